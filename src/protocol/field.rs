use bytes::{BufMut, Bytes, BytesMut};

use super::buf::{
    get_fixed, get_lenenc_bytes, get_lenenc_int, get_u16, get_u32, get_u8, put_lenenc_bytes,
    put_lenenc_int, skip_lenenc_bytes,
};
use super::constants::field_types::{BINARY_FLAG, UNSIGNED_FLAG};
use super::error::ProtocolError;

/// Column definition (protocol 4.1).
///
/// Fields parsed from a backend keep their raw payload in `data` so they can
/// be relayed to the client untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Field {
    pub data: Option<Bytes>,
    pub schema: Bytes,
    pub table: Bytes,
    pub org_table: Bytes,
    pub name: Bytes,
    pub org_name: Bytes,
    pub charset: u16,
    pub column_length: u32,
    pub field_type: u8,
    pub flags: u16,
    pub decimals: u8,
    /// Only sent in reply to COM_FIELD_LIST
    pub default_value: Option<Bytes>,
}

fn lenenc_field(buf: &mut &[u8], what: &str) -> Result<Bytes, ProtocolError> {
    get_lenenc_bytes(buf)?
        .map(Bytes::copy_from_slice)
        .ok_or_else(|| ProtocolError::malformed(format!("column definition: NULL {}", what)))
}

impl Field {
    pub fn parse(data: Bytes) -> Result<Self, ProtocolError> {
        let mut buf = &data[..];

        // catalog, always "def"
        skip_lenenc_bytes(&mut buf)?;
        let schema = lenenc_field(&mut buf, "schema")?;
        let table = lenenc_field(&mut buf, "table")?;
        let org_table = lenenc_field(&mut buf, "org_table")?;
        let name = lenenc_field(&mut buf, "name")?;
        let org_name = lenenc_field(&mut buf, "org_name")?;

        // length of the fixed-size block (0x0c)
        get_u8(&mut buf)?;
        let charset = get_u16(&mut buf)?;
        let column_length = get_u32(&mut buf)?;
        let field_type = get_u8(&mut buf)?;
        let flags = get_u16(&mut buf)?;
        let decimals = get_u8(&mut buf)?;
        get_fixed(&mut buf, 2)?;

        let default_value = if buf.is_empty() {
            None
        } else {
            let len = get_lenenc_int(&mut buf)?.unwrap_or(0) as usize;
            Some(Bytes::copy_from_slice(get_fixed(&mut buf, len)?))
        };

        Ok(Self {
            schema,
            table,
            org_table,
            name,
            org_name,
            charset,
            column_length,
            field_type,
            flags,
            decimals,
            default_value,
            data: Some(data),
        })
    }

    /// Wire form: the raw payload when available, rebuilt otherwise
    pub fn dump(&self) -> Bytes {
        if let Some(ref data) = self.data {
            return data.clone();
        }

        let mut buf = BytesMut::with_capacity(
            48 + self.schema.len()
                + self.table.len()
                + self.org_table.len()
                + self.name.len()
                + self.org_name.len(),
        );
        put_lenenc_bytes(&mut buf, b"def");
        put_lenenc_bytes(&mut buf, &self.schema);
        put_lenenc_bytes(&mut buf, &self.table);
        put_lenenc_bytes(&mut buf, &self.org_table);
        put_lenenc_bytes(&mut buf, &self.name);
        put_lenenc_bytes(&mut buf, &self.org_name);
        buf.put_u8(0x0c);
        buf.put_u16_le(self.charset);
        buf.put_u32_le(self.column_length);
        buf.put_u8(self.field_type);
        buf.put_u16_le(self.flags);
        buf.put_u8(self.decimals);
        buf.put_u16_le(0);

        if let Some(ref default) = self.default_value {
            put_lenenc_int(&mut buf, default.len() as u64);
            buf.extend_from_slice(default);
        }
        buf.freeze()
    }

    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    pub fn is_unsigned(&self) -> bool {
        self.flags & UNSIGNED_FLAG != 0
    }

    pub fn is_binary(&self) -> bool {
        self.flags & BINARY_FLAG != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::field_types::{MYSQL_TYPE_LONGLONG, MYSQL_TYPE_VAR_STRING};

    #[test]
    fn test_dump_then_parse() {
        let field = Field {
            schema: Bytes::from_static(b"shop"),
            table: Bytes::from_static(b"orders"),
            org_table: Bytes::from_static(b"orders"),
            name: Bytes::from_static(b"id"),
            org_name: Bytes::from_static(b"id"),
            charset: 63,
            column_length: 20,
            field_type: MYSQL_TYPE_LONGLONG,
            flags: UNSIGNED_FLAG,
            ..Default::default()
        };
        let wire = field.dump();
        let parsed = Field::parse(wire.clone()).unwrap();
        assert_eq!(parsed.name_str(), "id");
        assert_eq!(parsed.field_type, MYSQL_TYPE_LONGLONG);
        assert!(parsed.is_unsigned());
        assert!(parsed.default_value.is_none());
        // Parsed fields relay their original bytes
        assert_eq!(parsed.dump(), wire);
    }

    #[test]
    fn test_field_list_default_value() {
        let field = Field {
            name: Bytes::from_static(b"status"),
            field_type: MYSQL_TYPE_VAR_STRING,
            default_value: Some(Bytes::from_static(b"new")),
            ..Default::default()
        };
        let parsed = Field::parse(field.dump()).unwrap();
        assert_eq!(parsed.default_value.as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_truncated_definition() {
        let wire = Field::default().dump();
        assert!(Field::parse(wire.slice(..wire.len() - 4)).is_err());
    }
}
