use thiserror::Error;

/// Error codes the proxy produces or inspects
pub mod codes {
    pub const ER_CON_COUNT_ERROR: u16 = 1040;
    pub const ER_ACCESS_DENIED_ERROR: u16 = 1045;
    pub const ER_NO_DB_ERROR: u16 = 1046;
    pub const ER_UNKNOWN_COM_ERROR: u16 = 1047;
    pub const ER_PARSE_ERROR: u16 = 1064;
    pub const ER_UNKNOWN_ERROR: u16 = 1105;
    pub const ER_TOO_MANY_USER_CONNECTIONS: u16 = 1203;
    pub const ER_NET_PACKETS_OUT_OF_ORDER: u16 = 1156;
    pub const ER_NET_READ_ERROR: u16 = 1158;
    pub const ER_MALFORMED_PACKET: u16 = 1835;
}

pub const DEFAULT_SQL_STATE: &str = "HY000";

/// SQL state for a MySQL error code
pub fn sql_state(code: u16) -> &'static str {
    use codes::*;
    match code {
        ER_CON_COUNT_ERROR => "08004",
        ER_ACCESS_DENIED_ERROR => "28000",
        ER_NO_DB_ERROR => "3D000",
        ER_UNKNOWN_COM_ERROR => "08S01",
        ER_PARSE_ERROR => "42000",
        ER_TOO_MANY_USER_CONNECTIONS => "42000",
        ER_NET_PACKETS_OUT_OF_ORDER => "08S01",
        ER_NET_READ_ERROR => "08S01",
        _ => DEFAULT_SQL_STATE,
    }
}

/// A MySQL-compatible error: what travels inside an ERR packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ERROR {code} ({state}): {message}")]
pub struct MysqlError {
    pub code: u16,
    pub state: String,
    pub message: String,
}

impl MysqlError {
    /// Build an error, deriving the SQL state from the code
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            state: sql_state(code).to_string(),
            message: message.into(),
        }
    }

    pub fn with_state(code: u16, state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            state: state.into(),
            message: message.into(),
        }
    }

    pub fn access_denied(user: &str, host: &str) -> Self {
        Self::new(
            codes::ER_ACCESS_DENIED_ERROR,
            format!(
                "Access denied for user '{}'@'{}' (using password: YES)",
                user, host
            ),
        )
    }

    pub fn too_many_user_connections() -> Self {
        Self::new(codes::ER_TOO_MANY_USER_CONNECTIONS, "Too many connections")
    }

    pub fn too_many_connections() -> Self {
        Self::new(codes::ER_CON_COUNT_ERROR, "Too many connections")
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(codes::ER_UNKNOWN_ERROR, message)
    }
}

/// Transport and codec failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("bad connection: {0}")]
    BadConnection(#[from] std::io::Error),

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("packets out of order: expected sequence {expected}, got {got}")]
    SequenceMismatch { expected: u8, got: u8 },

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("invalid handshake: {0}")]
    InvalidHandshake(String),

    #[error("unsupported protocol version {0}")]
    UnsupportedProtocolVersion(u8),

    #[error(transparent)]
    Server(#[from] MysqlError),
}

impl ProtocolError {
    pub fn malformed(what: impl Into<String>) -> Self {
        ProtocolError::Malformed(what.into())
    }

    /// Transport-class errors leave the connection unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::BadConnection(_)
                | ProtocolError::ConnectionClosed
                | ProtocolError::SequenceMismatch { .. }
        )
    }

    /// Client-visible rendering of this error
    pub fn to_mysql_error(&self) -> MysqlError {
        match self {
            ProtocolError::Server(e) => e.clone(),
            ProtocolError::SequenceMismatch { .. } => {
                MysqlError::new(codes::ER_NET_PACKETS_OUT_OF_ORDER, self.to_string())
            }
            ProtocolError::BadConnection(_) | ProtocolError::ConnectionClosed => {
                MysqlError::new(codes::ER_NET_READ_ERROR, self.to_string())
            }
            ProtocolError::Malformed(_) => {
                MysqlError::new(codes::ER_MALFORMED_PACKET, "Malformed packet")
            }
            _ => MysqlError::unknown(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_derived_from_code() {
        let e = MysqlError::access_denied("root", "127.0.0.1:5000");
        assert_eq!(e.code, 1045);
        assert_eq!(e.state, "28000");
        assert_eq!(
            e.message,
            "Access denied for user 'root'@'127.0.0.1:5000' (using password: YES)"
        );

        assert_eq!(MysqlError::new(9999, "x").state, "HY000");
        assert_eq!(MysqlError::too_many_user_connections().code, 1203);
    }

    #[test]
    fn test_display() {
        let e = MysqlError::unknown("boom");
        assert_eq!(e.to_string(), "ERROR 1105 (HY000): boom");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ProtocolError::ConnectionClosed.is_fatal());
        assert!(ProtocolError::SequenceMismatch { expected: 1, got: 3 }.is_fatal());
        assert!(!ProtocolError::malformed("short").is_fatal());
        assert!(!ProtocolError::Server(MysqlError::unknown("x")).is_fatal());
    }
}
