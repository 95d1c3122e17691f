use bytes::{BufMut, BytesMut};
use rand::Rng;
use sha1::{Digest, Sha1};

use super::buf::{get_fixed, get_null_terminated, get_u16, get_u32, get_u8};
use super::constants::capabilities::*;
use super::constants::{
    status::SERVER_STATUS_AUTOCOMMIT, DEFAULT_COLLATION_ID, EOF_HEADER, ERR_HEADER,
    MIN_PROTOCOL_VERSION,
};
use super::error::ProtocolError;
use super::packets::parse_err;

pub const SALT_LEN: usize = 20;
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";

/// Generate a printable, NUL-free authentication salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; SALT_LEN];
    for b in salt.iter_mut() {
        *b = rng.gen_range(33u8..127u8);
    }
    salt
}

/// Initial handshake sent by the proxy to a connecting client
#[derive(Debug, Clone)]
pub struct ServerHandshake {
    pub server_version: String,
    pub connection_id: u32,
    pub salt: [u8; SALT_LEN],
    pub capabilities: u32,
    pub collation: u8,
    pub status: u16,
}

impl ServerHandshake {
    pub fn new(server_version: impl Into<String>, connection_id: u32, salt: [u8; SALT_LEN]) -> Self {
        Self {
            server_version: server_version.into(),
            connection_id,
            salt,
            capabilities: DEFAULT_CAPABILITIES,
            collation: DEFAULT_COLLATION_ID,
            status: SERVER_STATUS_AUTOCOMMIT,
        }
    }

    /// Encode using the fixed 4.1 layout with a 12-byte second salt half
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64 + self.server_version.len());

        buf.put_u8(MIN_PROTOCOL_VERSION);
        buf.extend_from_slice(self.server_version.as_bytes());
        buf.put_u8(0);
        buf.put_u32_le(self.connection_id);
        buf.extend_from_slice(&self.salt[..8]);
        buf.put_u8(0);
        buf.put_u16_le(self.capabilities as u16);
        buf.put_u8(self.collation);
        buf.put_u16_le(self.status);
        buf.put_u16_le((self.capabilities >> 16) as u16);
        buf.put_u8(0x15);
        buf.extend_from_slice(&[0u8; 10]);
        buf.extend_from_slice(&self.salt[8..]);
        buf.put_u8(0);
        buf
    }
}

/// Initial handshake received from a backend server
#[derive(Debug, Clone)]
pub struct BackendHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub salt: Vec<u8>,
    pub capabilities: u32,
    pub collation: u8,
    pub status: u16,
}

impl BackendHandshake {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = payload;
        let protocol_version = get_u8(&mut buf)?;
        if protocol_version == ERR_HEADER {
            return Err(ProtocolError::Server(parse_err(payload, CLIENT_PROTOCOL_41)?));
        }
        if protocol_version < MIN_PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedProtocolVersion(protocol_version));
        }

        let server_version = String::from_utf8_lossy(get_null_terminated(&mut buf)?).into_owned();
        let connection_id = get_u32(&mut buf)?;
        let mut salt = get_fixed(&mut buf, 8)?.to_vec();
        // filler
        get_u8(&mut buf)?;
        let mut capabilities = get_u16(&mut buf)? as u32;

        let mut collation = 0;
        let mut status = 0;
        if !buf.is_empty() {
            collation = get_u8(&mut buf)?;
            status = get_u16(&mut buf)?;
            capabilities |= (get_u16(&mut buf)? as u32) << 16;
            // auth data length + reserved
            get_fixed(&mut buf, 11)?;
            salt.extend_from_slice(get_fixed(&mut buf, 12)?);
        }

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            salt,
            capabilities,
            collation,
            status,
        })
    }
}

/// Handshake response: parsed in the server role, built in the client role
#[derive(Debug, Clone, Default)]
pub struct HandshakeResponse {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub collation: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    /// Present when CONNECT_WITH_DB is set; may be empty
    pub database: Option<String>,
}

impl HandshakeResponse {
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = payload;
        let capabilities = get_u32(&mut buf)?;
        let max_packet_size = get_u32(&mut buf)?;
        let collation = get_u8(&mut buf)?;
        get_fixed(&mut buf, 23)?;

        let username = String::from_utf8_lossy(get_null_terminated(&mut buf)?).into_owned();
        let auth_len = get_u8(&mut buf)? as usize;
        let auth_response = get_fixed(&mut buf, auth_len)?.to_vec();

        let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 && !buf.is_empty() {
            let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
            Some(String::from_utf8_lossy(&buf[..end]).into_owned())
        } else {
            None
        };

        Ok(Self {
            capabilities,
            max_packet_size,
            collation,
            username,
            auth_response,
            database,
        })
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64 + self.username.len());

        buf.put_u32_le(self.capabilities);
        buf.put_u32_le(self.max_packet_size);
        buf.put_u8(self.collation);
        buf.extend_from_slice(&[0u8; 23]);

        buf.extend_from_slice(self.username.as_bytes());
        buf.put_u8(0);

        buf.put_u8(self.auth_response.len() as u8);
        buf.extend_from_slice(&self.auth_response);

        if self.capabilities & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(ref db) = self.database {
                buf.extend_from_slice(db.as_bytes());
            }
            buf.put_u8(0);
        }
        buf
    }
}

/// Auth switch request sent by a backend after the handshake response
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub salt: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn is_auth_switch(payload: &[u8]) -> bool {
        !payload.is_empty() && payload[0] == EOF_HEADER
    }

    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if !Self::is_auth_switch(payload) {
            return Err(ProtocolError::malformed("not an auth switch request"));
        }
        let mut buf = &payload[1..];
        let plugin_name = String::from_utf8_lossy(get_null_terminated(&mut buf)?).into_owned();
        let salt = match buf.last() {
            Some(0) => buf[..buf.len() - 1].to_vec(),
            _ => buf.to_vec(),
        };
        Ok(Self { plugin_name, salt })
    }
}

/// mysql_native_password scramble:
/// SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
pub fn scramble_password(salt: &[u8], password: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let scramble = hasher.finalize();

    stage1
        .iter()
        .zip(scramble.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

/// Byte-exact comparison of a client scramble against the shared password
pub fn verify_auth_response(salt: &[u8], password: &[u8], response: &[u8]) -> bool {
    scramble_password(salt, password) == response
}
