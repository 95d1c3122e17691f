use bytes::{BufMut, BytesMut};

use super::buf::{get_lenenc_int, get_u16, put_lenenc_int};
use super::constants::capabilities::{CLIENT_PROTOCOL_41, CLIENT_TRANSACTIONS};
use super::constants::{status::SERVER_STATUS_AUTOCOMMIT, EOF_HEADER, ERR_HEADER, OK_HEADER};
use super::error::{MysqlError, ProtocolError, DEFAULT_SQL_STATE};

/// OK packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn new(status: u16) -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status,
            warnings: 0,
        }
    }

    pub fn encode(&self, capabilities: u32) -> BytesMut {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(OK_HEADER);
        put_lenenc_int(&mut buf, self.affected_rows);
        put_lenenc_int(&mut buf, self.last_insert_id);

        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u16_le(self.status);
            buf.put_u16_le(self.warnings);
        }
        buf
    }

    /// Parse an OK payload (header byte included)
    pub fn parse(payload: &[u8], capabilities: u32) -> Result<Self, ProtocolError> {
        if !is_ok_packet(payload) {
            return Err(ProtocolError::malformed("not an OK packet"));
        }
        let mut buf = &payload[1..];
        let affected_rows = get_lenenc_int(&mut buf)?.unwrap_or(0);
        let last_insert_id = get_lenenc_int(&mut buf)?.unwrap_or(0);

        let mut status = 0;
        let mut warnings = 0;
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            status = get_u16(&mut buf)?;
            warnings = get_u16(&mut buf)?;
        } else if capabilities & CLIENT_TRANSACTIONS != 0 {
            status = get_u16(&mut buf)?;
        }

        Ok(Self {
            affected_rows,
            last_insert_id,
            status,
            warnings,
        })
    }
}

impl Default for OkPacket {
    fn default() -> Self {
        Self::new(SERVER_STATUS_AUTOCOMMIT)
    }
}

pub fn encode_err(err: &MysqlError, capabilities: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(9 + err.message.len());
    buf.put_u8(ERR_HEADER);
    buf.put_u16_le(err.code);

    if capabilities & CLIENT_PROTOCOL_41 != 0 {
        buf.put_u8(b'#');
        buf.extend_from_slice(err.state.as_bytes());
    }
    buf.extend_from_slice(err.message.as_bytes());
    buf
}

/// Parse an ERR payload (header byte included)
pub fn parse_err(payload: &[u8], capabilities: u32) -> Result<MysqlError, ProtocolError> {
    if !is_err_packet(payload) {
        return Err(ProtocolError::malformed("not an ERR packet"));
    }
    let mut buf = &payload[1..];
    let code = get_u16(&mut buf)?;

    let mut state = DEFAULT_SQL_STATE.to_string();
    if capabilities & CLIENT_PROTOCOL_41 != 0 && buf.len() >= 6 && buf[0] == b'#' {
        state = String::from_utf8_lossy(&buf[1..6]).into_owned();
        buf = &buf[6..];
    }

    Ok(MysqlError::with_state(
        code,
        state,
        String::from_utf8_lossy(buf).into_owned(),
    ))
}

pub fn encode_eof(status: u16, capabilities: u32) -> BytesMut {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u8(EOF_HEADER);
    if capabilities & CLIENT_PROTOCOL_41 != 0 {
        buf.put_u16_le(0);
        buf.put_u16_le(status);
    }
    buf
}

/// Status flags carried by an EOF payload, if any
pub fn parse_eof_status(payload: &[u8]) -> u16 {
    if payload.len() >= 5 {
        u16::from_le_bytes([payload[3], payload[4]])
    } else {
        0
    }
}

pub fn is_ok_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == OK_HEADER
}

pub fn is_err_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == ERR_HEADER
}

/// EOF marker byte and at most 5 bytes; longer 0xFE packets are rows
pub fn is_eof_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == EOF_HEADER && payload.len() <= 5
}
