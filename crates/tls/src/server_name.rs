//! The server name sent (and received) in the SNI extension.

use crate::TLSError;

/// A DNS host name, at most 255 bytes, no interior NUL and no trailing dot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerName(String);

impl ServerName {
    pub fn new(name: &str) -> Result<Self, TLSError> {
        if name.is_empty() || name.len() > 255 {
            return Err(TLSError::ServerNameTooLong);
        }
        if name.bytes().any(|byte| byte == 0) || name.ends_with('.') {
            return Err(TLSError::IllegalParameter);
        }
        Ok(Self(name.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ServerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
