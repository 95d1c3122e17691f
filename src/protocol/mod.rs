pub mod buf;
pub mod codec;
pub mod command;
pub mod constants;
pub mod error;
pub mod field;
pub mod handshake;
pub mod packets;
pub mod resultset;
pub mod stream;

pub use codec::PacketCodec;
pub use command::ClientCommand;
pub use constants::{capabilities, status, Command};
pub use error::{codes, MysqlError, ProtocolError};
pub use field::Field;
pub use handshake::{
    generate_salt, scramble_password, verify_auth_response, AuthSwitchRequest, BackendHandshake,
    HandshakeResponse, ServerHandshake,
};
pub use packets::{is_eof_packet, is_err_packet, is_ok_packet, OkPacket};
pub use resultset::{QueryResult, Resultset, Value};
pub use stream::PacketStream;
