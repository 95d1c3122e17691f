use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use super::buf::{get_fixed, get_lenenc_bytes, get_u8, put_lenenc_bytes, LENENC_NULL};
use super::constants::field_types::*;
use super::constants::DEFAULT_COLLATION_ID;
use super::error::ProtocolError;
use super::field::Field;

const BINARY_COLLATION_ID: u16 = 63;

/// A decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Bytes(Bytes),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text-protocol rendering; `None` for NULL
    pub fn to_text(&self) -> Option<Bytes> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(Bytes::from(v.to_string())),
            Value::UInt(v) => Some(Bytes::from(v.to_string())),
            Value::Float(v) => Some(Bytes::from(v.to_string())),
            Value::Bytes(b) => Some(b.clone()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::UInt(v) => i64::try_from(*v).ok(),
            Value::Bytes(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(Bytes::from(s))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

/// Outcome of one backend command
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub status: u16,
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub resultset: Option<Resultset>,
}

/// Column metadata plus raw and decoded rows
#[derive(Debug, Clone, Default)]
pub struct Resultset {
    pub fields: Vec<Field>,
    pub field_names: HashMap<String, usize>,
    pub row_datas: Vec<Bytes>,
    pub values: Vec<Vec<Value>>,
}

impl Resultset {
    pub fn new(fields: Vec<Field>) -> Self {
        let field_names = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name_str(), i))
            .collect();
        Self {
            fields,
            field_names,
            row_datas: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build a text result set from column names and rows.
    ///
    /// Column types come from the first non-NULL value in each column.
    pub fn from_rows(names: &[&str], rows: Vec<Vec<Value>>) -> Result<Self, ProtocolError> {
        let mut fields: Vec<Field> = names
            .iter()
            .map(|name| Field {
                name: Bytes::copy_from_slice(name.as_bytes()),
                org_name: Bytes::copy_from_slice(name.as_bytes()),
                charset: DEFAULT_COLLATION_ID as u16,
                field_type: MYSQL_TYPE_VAR_STRING,
                ..Default::default()
            })
            .collect();

        for row in &rows {
            if row.len() != names.len() {
                return Err(ProtocolError::malformed(format!(
                    "row has {} values for {} columns",
                    row.len(),
                    names.len()
                )));
            }
        }

        for (col, field) in fields.iter_mut().enumerate() {
            let sample = rows.iter().map(|r| &r[col]).find(|v| !v.is_null());
            match sample {
                Some(Value::Int(_)) => {
                    field.field_type = MYSQL_TYPE_LONGLONG;
                    field.charset = BINARY_COLLATION_ID;
                    field.flags = BINARY_FLAG;
                }
                Some(Value::UInt(_)) => {
                    field.field_type = MYSQL_TYPE_LONGLONG;
                    field.charset = BINARY_COLLATION_ID;
                    field.flags = BINARY_FLAG | UNSIGNED_FLAG;
                }
                Some(Value::Float(_)) => {
                    field.field_type = MYSQL_TYPE_DOUBLE;
                    field.charset = BINARY_COLLATION_ID;
                    field.flags = BINARY_FLAG;
                }
                _ => {}
            }
        }

        let mut rs = Resultset::new(fields);
        for row in rows {
            let mut data = BytesMut::new();
            for value in &row {
                match value.to_text() {
                    Some(text) => put_lenenc_bytes(&mut data, &text),
                    None => data.extend_from_slice(&[LENENC_NULL]),
                }
            }
            rs.row_datas.push(data.freeze());
            rs.values.push(row);
        }

        for col in 0..rs.fields.len() {
            let width = rs
                .values
                .iter()
                .filter_map(|r| r[col].to_text())
                .map(|t| t.len())
                .max()
                .unwrap_or(0);
            rs.fields[col].column_length = width as u32;
        }
        Ok(rs)
    }

    /// Decode a row against the column metadata and keep it
    pub fn push_row(&mut self, data: Bytes, binary: bool) -> Result<(), ProtocolError> {
        let values = if binary {
            parse_binary_row(&self.fields, &data)?
        } else {
            parse_text_row(&self.fields, &data)?
        };
        self.row_datas.push(data);
        self.values.push(values);
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_count(&self) -> usize {
        self.fields.len()
    }

    pub fn value(&self, row: usize, col: usize) -> Option<&Value> {
        self.values.get(row)?.get(col)
    }

    pub fn value_by_name(&self, row: usize, name: &str) -> Option<&Value> {
        let col = *self.field_names.get(name)?;
        self.value(row, col)
    }
}

fn is_integer_type(t: u8) -> bool {
    matches!(
        t,
        MYSQL_TYPE_TINY
            | MYSQL_TYPE_SHORT
            | MYSQL_TYPE_INT24
            | MYSQL_TYPE_LONG
            | MYSQL_TYPE_LONGLONG
            | MYSQL_TYPE_YEAR
    )
}

fn parse_text_row(fields: &[Field], data: &[u8]) -> Result<Vec<Value>, ProtocolError> {
    let mut buf = data;
    let mut values = Vec::with_capacity(fields.len());

    for field in fields {
        let raw = match get_lenenc_bytes(&mut buf)? {
            Some(raw) => raw,
            None => {
                values.push(Value::Null);
                continue;
            }
        };

        let value = if is_integer_type(field.field_type) {
            let text = std::str::from_utf8(raw)
                .map_err(|_| ProtocolError::malformed("non-utf8 integer column"))?;
            if field.is_unsigned() {
                Value::UInt(text.parse().map_err(|_| {
                    ProtocolError::malformed(format!("invalid unsigned integer {:?}", text))
                })?)
            } else {
                Value::Int(text.parse().map_err(|_| {
                    ProtocolError::malformed(format!("invalid integer {:?}", text))
                })?)
            }
        } else if matches!(field.field_type, MYSQL_TYPE_FLOAT | MYSQL_TYPE_DOUBLE) {
            let text = std::str::from_utf8(raw)
                .map_err(|_| ProtocolError::malformed("non-utf8 float column"))?;
            Value::Float(
                text.parse()
                    .map_err(|_| ProtocolError::malformed(format!("invalid float {:?}", text)))?,
            )
        } else {
            Value::Bytes(Bytes::copy_from_slice(raw))
        };
        values.push(value);
    }

    if !buf.is_empty() {
        return Err(ProtocolError::malformed("text row longer than its columns"));
    }
    Ok(values)
}

fn fixed_le(buf: &mut &[u8], len: usize) -> Result<u64, ProtocolError> {
    let bytes = get_fixed(buf, len)?;
    Ok(bytes
        .iter()
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64))
}

fn parse_binary_row(fields: &[Field], data: &[u8]) -> Result<Vec<Value>, ProtocolError> {
    let mut buf = data;
    if get_u8(&mut buf)? != 0x00 {
        return Err(ProtocolError::malformed("binary row without 0x00 header"));
    }

    // NULL bitmap is offset by two bits in result rows
    let bitmap = get_fixed(&mut buf, (fields.len() + 7 + 2) / 8)?;
    let mut values = Vec::with_capacity(fields.len());

    for (i, field) in fields.iter().enumerate() {
        let bit = i + 2;
        if bitmap[bit / 8] & (1 << (bit % 8)) != 0 {
            values.push(Value::Null);
            continue;
        }

        let unsigned = field.is_unsigned();
        let value = match field.field_type {
            MYSQL_TYPE_NULL => Value::Null,
            MYSQL_TYPE_TINY => {
                let v = fixed_le(&mut buf, 1)?;
                if unsigned {
                    Value::UInt(v)
                } else {
                    Value::Int(v as u8 as i8 as i64)
                }
            }
            MYSQL_TYPE_SHORT | MYSQL_TYPE_YEAR => {
                let v = fixed_le(&mut buf, 2)?;
                if unsigned {
                    Value::UInt(v)
                } else {
                    Value::Int(v as u16 as i16 as i64)
                }
            }
            MYSQL_TYPE_INT24 | MYSQL_TYPE_LONG => {
                let v = fixed_le(&mut buf, 4)?;
                if unsigned {
                    Value::UInt(v)
                } else {
                    Value::Int(v as u32 as i32 as i64)
                }
            }
            MYSQL_TYPE_LONGLONG => {
                let v = fixed_le(&mut buf, 8)?;
                if unsigned {
                    Value::UInt(v)
                } else {
                    Value::Int(v as i64)
                }
            }
            MYSQL_TYPE_FLOAT => Value::Float(f32::from_bits(fixed_le(&mut buf, 4)? as u32) as f64),
            MYSQL_TYPE_DOUBLE => Value::Float(f64::from_bits(fixed_le(&mut buf, 8)?)),
            MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE | MYSQL_TYPE_DATETIME | MYSQL_TYPE_TIMESTAMP => {
                let len = get_u8(&mut buf)? as usize;
                let raw = get_fixed(&mut buf, len)?;
                Value::Bytes(Bytes::from(format_datetime(raw, field.field_type)?))
            }
            MYSQL_TYPE_TIME => {
                let len = get_u8(&mut buf)? as usize;
                let raw = get_fixed(&mut buf, len)?;
                Value::Bytes(Bytes::from(format_time(raw)?))
            }
            _ => match get_lenenc_bytes(&mut buf)? {
                Some(raw) => Value::Bytes(Bytes::copy_from_slice(raw)),
                None => Value::Null,
            },
        };
        values.push(value);
    }
    Ok(values)
}

fn format_datetime(raw: &[u8], field_type: u8) -> Result<String, ProtocolError> {
    let date_only = matches!(field_type, MYSQL_TYPE_DATE | MYSQL_TYPE_NEWDATE);
    let out = match raw.len() {
        0 if date_only => "0000-00-00".to_string(),
        0 => "0000-00-00 00:00:00".to_string(),
        4 | 7 | 11 => {
            let year = u16::from_le_bytes([raw[0], raw[1]]);
            let date = format!("{:04}-{:02}-{:02}", year, raw[2], raw[3]);
            if date_only {
                date
            } else if raw.len() == 4 {
                format!("{} 00:00:00", date)
            } else {
                let time = format!("{} {:02}:{:02}:{:02}", date, raw[4], raw[5], raw[6]);
                if raw.len() == 11 {
                    let micros = u32::from_le_bytes([raw[7], raw[8], raw[9], raw[10]]);
                    format!("{}.{:06}", time, micros)
                } else {
                    time
                }
            }
        }
        n => {
            return Err(ProtocolError::malformed(format!(
                "invalid datetime length {}",
                n
            )))
        }
    };
    Ok(out)
}

fn format_time(raw: &[u8]) -> Result<String, ProtocolError> {
    match raw.len() {
        0 => Ok("00:00:00".to_string()),
        8 | 12 => {
            let sign = if raw[0] == 1 { "-" } else { "" };
            let days = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]);
            let hours = u64::from(days) * 24 + u64::from(raw[5]);
            let time = format!("{}{:02}:{:02}:{:02}", sign, hours, raw[6], raw[7]);
            if raw.len() == 12 {
                let micros = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
                Ok(format!("{}.{:06}", time, micros))
            } else {
                Ok(time)
            }
        }
        n => Err(ProtocolError::malformed(format!("invalid time length {}", n))),
    }
}
