use crate::protocol::constants::{DEFAULT_CHARSET, DEFAULT_COLLATION_ID};
use crate::protocol::handshake::SALT_LEN;
use crate::protocol::status::{SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS};

/// Session state tracking
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Connection id announced in the handshake
    pub connection_id: u32,
    /// Client capability flags (intersected with what the proxy offers)
    pub capability_flags: u32,
    /// Server status bits reported back to the client
    pub status: u16,
    pub collation: u8,
    pub charset: &'static str,
    /// Client username
    pub username: String,
    /// Current database; empty until the client picks one
    pub database: String,
    /// Auth challenge sent in the handshake
    pub salt: [u8; SALT_LEN],
}

impl SessionState {
    pub fn new(connection_id: u32, salt: [u8; SALT_LEN]) -> Self {
        Self {
            connection_id,
            capability_flags: 0,
            status: SERVER_STATUS_AUTOCOMMIT,
            collation: DEFAULT_COLLATION_ID,
            charset: DEFAULT_CHARSET,
            username: String::new(),
            database: String::new(),
            salt,
        }
    }

    /// Update state after parsing handshake response
    pub fn set_from_handshake(&mut self, username: String, capabilities: u32) {
        self.username = username;
        self.capability_flags = capabilities;
    }

    /// Change current database
    pub fn change_database(&mut self, db: impl Into<String>) {
        self.database = db.into();
    }

    pub fn is_in_transaction(&self) -> bool {
        self.status & SERVER_STATUS_IN_TRANS != 0
    }

    pub fn is_autocommit(&self) -> bool {
        self.status & SERVER_STATUS_AUTOCOMMIT != 0
    }

    /// Take the transaction bits from a backend reply
    pub fn update_from_backend(&mut self, backend_status: u16) {
        const TRANSACTION_BITS: u16 = SERVER_STATUS_IN_TRANS | SERVER_STATUS_AUTOCOMMIT;
        self.status = (self.status & !TRANSACTION_BITS) | (backend_status & TRANSACTION_BITS);
    }

    /// Whether the current backend connection must stay bound to the session
    pub fn holds_backend(&self) -> bool {
        self.is_in_transaction() || !self.is_autocommit()
    }
}
