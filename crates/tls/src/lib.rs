//! TLS 1.0 - 1.3 over a caller-supplied duplex transport.
//!
//! The connection performs nonblocking I/O: any operation that cannot make
//! progress returns [TLSError::Blocked] with all internal cursors preserved,
//! and the caller retries after polling the transport in the indicated
//! direction.

pub mod alert;
mod cipher;
pub mod cipher_suite;
mod config;
mod connection;
pub mod der;
pub mod encoding;
mod error;
pub mod handshake;
pub mod kem;
mod key_schedule;
mod pem;
pub mod record_layer;
mod server_name;
mod transcript;
mod version;

pub use cipher_suite::CipherSuite;
pub use config::{ClientAuth, TLSConfig};
pub use connection::{Role, TLSConnection};
pub use error::{error_string, last_error_code, last_error_message, Category, Direction, TLSError};
pub use server_name::ServerName;
pub use version::ProtocolVersion;
