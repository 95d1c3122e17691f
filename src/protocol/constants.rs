/// MySQL frame header size: 3 bytes length + 1 byte sequence
pub const PACKET_HEADER_SIZE: usize = 4;
/// Maximum payload carried by a single frame (16MB - 1)
pub const MAX_PAYLOAD_LEN: usize = 0xFF_FF_FF;

/// Lowest handshake protocol version we can talk to
pub const MIN_PROTOCOL_VERSION: u8 = 10;

pub const OK_HEADER: u8 = 0x00;
pub const LOCAL_INFILE_HEADER: u8 = 0xFB;
pub const EOF_HEADER: u8 = 0xFE;
pub const ERR_HEADER: u8 = 0xFF;

/// Default collation: utf8_general_ci
pub const DEFAULT_COLLATION_ID: u8 = 33;
pub const DEFAULT_CHARSET: &str = "utf8";

/// MySQL capability flags
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_NO_SCHEMA: u32 = 1 << 4;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_ODBC: u32 = 1 << 6;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_IGNORE_SPACE: u32 = 1 << 8;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_INTERACTIVE: u32 = 1 << 10;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_IGNORE_SIGPIPE: u32 = 1 << 12;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_RESERVED: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PS_MULTI_RESULTS: u32 = 1 << 18;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;

    /// Capabilities advertised to clients in the initial handshake.
    ///
    /// No plugin auth, SSL or compression: clients answer with a plain
    /// secure-auth scramble.
    pub const DEFAULT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION;

    /// Capabilities requested from a backend (ANDed with what it offers).
    pub const BACKEND_CAPABILITIES: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_TRANSACTIONS
        | CLIENT_LONG_FLAG;
}

/// Server status bits carried by OK and EOF packets
#[allow(dead_code)]
pub mod status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
    pub const SERVER_STATUS_NO_GOOD_INDEX_USED: u16 = 0x0010;
    pub const SERVER_STATUS_NO_INDEX_USED: u16 = 0x0020;
    pub const SERVER_STATUS_CURSOR_EXISTS: u16 = 0x0040;
    pub const SERVER_STATUS_LAST_ROW_SENT: u16 = 0x0080;
    pub const SERVER_STATUS_DB_DROPPED: u16 = 0x0100;
    pub const SERVER_STATUS_NO_BACKSLASH_ESCAPED: u16 = 0x0200;
    pub const SERVER_STATUS_METADATA_CHANGED: u16 = 0x0400;
    pub const SERVER_QUERY_WAS_SLOW: u16 = 0x0800;
    pub const SERVER_PS_OUT_PARAMS: u16 = 0x1000;
}

/// Column type codes
#[allow(dead_code)]
pub mod field_types {
    pub const MYSQL_TYPE_DECIMAL: u8 = 0x00;
    pub const MYSQL_TYPE_TINY: u8 = 0x01;
    pub const MYSQL_TYPE_SHORT: u8 = 0x02;
    pub const MYSQL_TYPE_LONG: u8 = 0x03;
    pub const MYSQL_TYPE_FLOAT: u8 = 0x04;
    pub const MYSQL_TYPE_DOUBLE: u8 = 0x05;
    pub const MYSQL_TYPE_NULL: u8 = 0x06;
    pub const MYSQL_TYPE_TIMESTAMP: u8 = 0x07;
    pub const MYSQL_TYPE_LONGLONG: u8 = 0x08;
    pub const MYSQL_TYPE_INT24: u8 = 0x09;
    pub const MYSQL_TYPE_DATE: u8 = 0x0a;
    pub const MYSQL_TYPE_TIME: u8 = 0x0b;
    pub const MYSQL_TYPE_DATETIME: u8 = 0x0c;
    pub const MYSQL_TYPE_YEAR: u8 = 0x0d;
    pub const MYSQL_TYPE_NEWDATE: u8 = 0x0e;
    pub const MYSQL_TYPE_VARCHAR: u8 = 0x0f;
    pub const MYSQL_TYPE_BIT: u8 = 0x10;
    pub const MYSQL_TYPE_NEWDECIMAL: u8 = 0xf6;
    pub const MYSQL_TYPE_ENUM: u8 = 0xf7;
    pub const MYSQL_TYPE_SET: u8 = 0xf8;
    pub const MYSQL_TYPE_TINY_BLOB: u8 = 0xf9;
    pub const MYSQL_TYPE_MEDIUM_BLOB: u8 = 0xfa;
    pub const MYSQL_TYPE_LONG_BLOB: u8 = 0xfb;
    pub const MYSQL_TYPE_BLOB: u8 = 0xfc;
    pub const MYSQL_TYPE_VAR_STRING: u8 = 0xfd;
    pub const MYSQL_TYPE_STRING: u8 = 0xfe;
    pub const MYSQL_TYPE_GEOMETRY: u8 = 0xff;

    /// Column flag: value is unsigned
    pub const UNSIGNED_FLAG: u16 = 0x0020;
    /// Column flag: binary collation
    pub const BINARY_FLAG: u16 = 0x0080;
}

/// MySQL command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Sleep = 0x00,
    Quit = 0x01,
    InitDb = 0x02,
    Query = 0x03,
    FieldList = 0x04,
    CreateDb = 0x05,
    DropDb = 0x06,
    Refresh = 0x07,
    Shutdown = 0x08,
    Statistics = 0x09,
    ProcessInfo = 0x0a,
    Connect = 0x0b,
    ProcessKill = 0x0c,
    Debug = 0x0d,
    Ping = 0x0e,
    Time = 0x0f,
    DelayedInsert = 0x10,
    ChangeUser = 0x11,
    BinlogDump = 0x12,
    TableDump = 0x13,
    ConnectOut = 0x14,
    RegisterSlave = 0x15,
    StmtPrepare = 0x16,
    StmtExecute = 0x17,
    StmtSendLongData = 0x18,
    StmtClose = 0x19,
    StmtReset = 0x1a,
    SetOption = 0x1b,
    StmtFetch = 0x1c,
    Daemon = 0x1d,
    BinlogDumpGtid = 0x1e,
    ResetConnection = 0x1f,
    Unknown = 0xff,
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Command::Sleep,
            0x01 => Command::Quit,
            0x02 => Command::InitDb,
            0x03 => Command::Query,
            0x04 => Command::FieldList,
            0x05 => Command::CreateDb,
            0x06 => Command::DropDb,
            0x07 => Command::Refresh,
            0x08 => Command::Shutdown,
            0x09 => Command::Statistics,
            0x0a => Command::ProcessInfo,
            0x0b => Command::Connect,
            0x0c => Command::ProcessKill,
            0x0d => Command::Debug,
            0x0e => Command::Ping,
            0x0f => Command::Time,
            0x10 => Command::DelayedInsert,
            0x11 => Command::ChangeUser,
            0x12 => Command::BinlogDump,
            0x13 => Command::TableDump,
            0x14 => Command::ConnectOut,
            0x15 => Command::RegisterSlave,
            0x16 => Command::StmtPrepare,
            0x17 => Command::StmtExecute,
            0x18 => Command::StmtSendLongData,
            0x19 => Command::StmtClose,
            0x1a => Command::StmtReset,
            0x1b => Command::SetOption,
            0x1c => Command::StmtFetch,
            0x1d => Command::Daemon,
            0x1e => Command::BinlogDumpGtid,
            0x1f => Command::ResetConnection,
            _ => Command::Unknown,
        }
    }
}
