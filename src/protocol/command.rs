use bytes::Bytes;

use super::constants::Command;

/// Parsed command from client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Query(String),
    InitDb(String),
    Quit,
    Ping,
    FieldList { table: String, wildcard: String },
    Unknown(u8, Bytes),
}

impl ClientCommand {
    /// Parse command from packet payload
    pub fn parse(payload: &Bytes) -> Self {
        if payload.is_empty() {
            return ClientCommand::Unknown(0, Bytes::new());
        }

        let data = payload.slice(1..);
        match Command::from(payload[0]) {
            Command::Query => ClientCommand::Query(String::from_utf8_lossy(&data).into_owned()),
            Command::InitDb => ClientCommand::InitDb(String::from_utf8_lossy(&data).into_owned()),
            Command::Quit => ClientCommand::Quit,
            Command::Ping => ClientCommand::Ping,
            Command::FieldList => {
                // Table name is null-terminated, followed by optional wildcard
                let null_pos = data.iter().position(|&b| b == 0).unwrap_or(data.len());
                let table = String::from_utf8_lossy(&data[..null_pos]).into_owned();
                let wildcard = if null_pos + 1 < data.len() {
                    String::from_utf8_lossy(&data[null_pos + 1..]).into_owned()
                } else {
                    String::new()
                };
                ClientCommand::FieldList { table, wildcard }
            }
            _ => ClientCommand::Unknown(payload[0], data),
        }
    }

    /// Command byte, as reported in "not supported" errors
    pub fn code(&self) -> u8 {
        match self {
            ClientCommand::Query(_) => Command::Query as u8,
            ClientCommand::InitDb(_) => Command::InitDb as u8,
            ClientCommand::Quit => Command::Quit as u8,
            ClientCommand::Ping => Command::Ping as u8,
            ClientCommand::FieldList { .. } => Command::FieldList as u8,
            ClientCommand::Unknown(code, _) => *code,
        }
    }
}
