//! The public error taxonomy.
//!
//! Every error carries a numeric code whose top nibble is its category, so
//! callers can classify without matching on individual variants. A per-thread
//! slot remembers the most recent error; the connection API clears it on
//! entry to every public call.

use std::{cell::RefCell, io};

use crate::alert::Description;

/// Which half of the transport a blocked operation is waiting on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// Error categories, encoded in the top four bits of an error code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Category {
    Blocked = 1,
    Closed = 2,
    Io = 3,
    Protocol = 4,
    Usage = 5,
    AlertSent = 6,
    AlertReceived = 7,
    Internal = 8,
}

#[derive(Debug)]
pub enum TLSError {
    /// The transport would block; retry after polling the given direction.
    Blocked(Direction),
    /// The peer closed the transport before the handshake completed.
    ClosedEarly,
    /// Graceful shutdown, `close_notify` was exchanged.
    Closed,
    /// EOF after the handshake without a `close_notify`.
    ClosedWithoutNotify,

    /// Transport failure other than would-block.
    Io(io::Error),

    BadMessage,
    BadRecord,
    RecordOverflow,
    UnknownContentType,
    UnexpectedMessage,
    UnsupportedVersion,
    IllegalParameter,
    DuplicateExtension,
    HandshakeFailure,
    NoApplicationProtocol,
    KemUnsupported,
    BadCertificate,
    InvalidPem,
    BadDer,

    BadRecordMac,
    DecryptError,
    BadSignature,
    /// A per-direction record counter would wrap.
    SequenceNumberOverflow,

    /// The call is not legal in the connection's current state.
    InvalidState(&'static str),
    MissingConfig,
    MissingPrivateKey,
    ServerNameTooLong,
    UnknownPreferenceTag,

    /// A fatal alert was sent to the peer.
    AlertSent(Description),
    /// A fatal alert arrived from the peer.
    AlertReceived(Description),

    Internal(&'static str),
}

impl TLSError {
    #[must_use]
    pub fn category(&self) -> Category {
        match self {
            Self::Blocked(_) => Category::Blocked,
            Self::ClosedEarly | Self::Closed | Self::ClosedWithoutNotify => Category::Closed,
            Self::Io(_) => Category::Io,
            Self::BadMessage
            | Self::BadRecord
            | Self::RecordOverflow
            | Self::UnknownContentType
            | Self::UnexpectedMessage
            | Self::UnsupportedVersion
            | Self::IllegalParameter
            | Self::DuplicateExtension
            | Self::HandshakeFailure
            | Self::NoApplicationProtocol
            | Self::KemUnsupported
            | Self::BadCertificate
            | Self::InvalidPem
            | Self::BadDer
            | Self::BadRecordMac
            | Self::DecryptError
            | Self::BadSignature
            | Self::SequenceNumberOverflow => Category::Protocol,
            Self::InvalidState(_)
            | Self::MissingConfig
            | Self::MissingPrivateKey
            | Self::ServerNameTooLong
            | Self::UnknownPreferenceTag => Category::Usage,
            Self::AlertSent(_) => Category::AlertSent,
            Self::AlertReceived(_) => Category::AlertReceived,
            Self::Internal(_) => Category::Internal,
        }
    }

    fn index(&self) -> u32 {
        match self {
            Self::Blocked(Direction::Read) => 0,
            Self::Blocked(Direction::Write) => 1,
            Self::ClosedEarly => 2,
            Self::Closed => 3,
            Self::ClosedWithoutNotify => 4,
            Self::Io(_) => 5,
            Self::BadMessage => 6,
            Self::BadRecord => 7,
            Self::RecordOverflow => 8,
            Self::UnknownContentType => 9,
            Self::UnexpectedMessage => 10,
            Self::UnsupportedVersion => 11,
            Self::IllegalParameter => 12,
            Self::DuplicateExtension => 13,
            Self::HandshakeFailure => 14,
            Self::NoApplicationProtocol => 15,
            Self::KemUnsupported => 16,
            Self::BadCertificate => 17,
            Self::InvalidPem => 18,
            Self::BadDer => 19,
            Self::BadRecordMac => 20,
            Self::DecryptError => 21,
            Self::BadSignature => 22,
            Self::SequenceNumberOverflow => 23,
            Self::InvalidState(_) => 24,
            Self::MissingConfig => 25,
            Self::MissingPrivateKey => 26,
            Self::ServerNameTooLong => 27,
            Self::UnknownPreferenceTag => 28,
            Self::AlertSent(description) | Self::AlertReceived(description) => {
                0x100 + u32::from(u8::from(*description))
            },
            Self::Internal(_) => 29,
        }
    }

    /// The numeric code: category in bits 28..32, variant index below.
    #[must_use]
    pub fn code(&self) -> u32 {
        (self.category() as u32) << 28 | self.index()
    }

    /// The alert to send to the peer before closing, if this error calls
    /// for one. Usage and internal errors never alert.
    #[must_use]
    pub(crate) fn alert(&self) -> Option<Description> {
        let description = match self {
            Self::BadMessage | Self::BadDer => Description::DecodeError,
            Self::BadRecord | Self::RecordOverflow => Description::RecordOverflow,
            Self::UnknownContentType | Self::UnexpectedMessage => Description::UnexpectedMessage,
            Self::UnsupportedVersion => Description::ProtocolVersion,
            Self::IllegalParameter | Self::DuplicateExtension => Description::IllegalParameter,
            Self::HandshakeFailure | Self::KemUnsupported => Description::HandshakeFailure,
            Self::NoApplicationProtocol => Description::NoApplicationProtocol,
            Self::BadCertificate => Description::BadCertificate,
            Self::BadRecordMac => Description::BadRecordMAC,
            Self::DecryptError | Self::BadSignature => Description::DecryptError,
            Self::SequenceNumberOverflow => Description::InternalError,
            _ => return None,
        };
        Some(description)
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<(u32, String)>> = const { RefCell::new(None) };
}

/// Record `error` in the calling thread's error slot.
pub(crate) fn record_error(error: &TLSError) {
    // Blocked is not remembered: it is the steady state of a nonblocking caller.
    if matches!(error, TLSError::Blocked(_)) {
        return;
    }
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some((error.code(), error.to_string())));
}

/// Clear the calling thread's error slot. Invoked at entry to every public
/// connection call.
pub(crate) fn clear_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// The code of the most recent error on this thread, 0 if none.
#[must_use]
pub fn last_error_code() -> u32 {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|(code, _)| *code).unwrap_or(0))
}

/// The debug string of the most recent error on this thread.
#[must_use]
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| slot.borrow().as_ref().map(|(_, message)| message.clone()))
}

const UNKNOWN_LANGUAGE: &str = "(no translation available)";

/// Translate an error code into a human-readable string.
///
/// Only the `"EN"` language tag is supported; any other tag returns a
/// sentinel string.
#[must_use]
pub fn error_string(code: u32, lang: &str) -> &'static str {
    if lang != "EN" {
        return UNKNOWN_LANGUAGE;
    }
    match code >> 28 {
        c if c == Category::Blocked as u32 => "operation would block, retry later",
        c if c == Category::Closed as u32 => "connection closed",
        c if c == Category::Io as u32 => "transport I/O failure",
        c if c == Category::Protocol as u32 => "TLS protocol violation by peer",
        c if c == Category::Usage as u32 => "invalid use of the connection API",
        c if c == Category::AlertSent as u32 => "fatal alert sent to peer",
        c if c == Category::AlertReceived as u32 => "fatal alert received from peer",
        c if c == Category::Internal as u32 => "internal library failure",
        _ => "unknown error code",
    }
}

impl std::fmt::Display for TLSError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Blocked(Direction::Read) => write!(f, "blocked waiting for transport read"),
            Self::Blocked(Direction::Write) => write!(f, "blocked waiting for transport write"),
            Self::ClosedEarly => write!(f, "peer closed the transport during the handshake"),
            Self::Closed => write!(f, "connection closed"),
            Self::ClosedWithoutNotify => write!(f, "peer closed the transport without close_notify"),
            Self::Io(error) => write!(f, "transport error: {error}"),
            Self::BadMessage => write!(f, "malformed handshake message"),
            Self::BadRecord => write!(f, "malformed record"),
            Self::RecordOverflow => write!(f, "record exceeds the maximum permitted length"),
            Self::UnknownContentType => write!(f, "unknown record content type"),
            Self::UnexpectedMessage => write!(f, "message not permitted in the current state"),
            Self::UnsupportedVersion => write!(f, "no jointly supported protocol version"),
            Self::IllegalParameter => write!(f, "illegal handshake parameter"),
            Self::DuplicateExtension => write!(f, "extension appeared more than once"),
            Self::HandshakeFailure => write!(f, "no jointly supported handshake parameters"),
            Self::NoApplicationProtocol => write!(f, "no jointly supported application protocol"),
            Self::KemUnsupported => write!(f, "no jointly supported key encapsulation mechanism"),
            Self::BadCertificate => write!(f, "certificate could not be used"),
            Self::InvalidPem => write!(f, "malformed PEM input"),
            Self::BadDer => write!(f, "malformed DER structure"),
            Self::BadRecordMac => write!(f, "record failed integrity verification"),
            Self::DecryptError => write!(f, "handshake cryptography failed verification"),
            Self::BadSignature => write!(f, "peer signature did not verify"),
            Self::SequenceNumberOverflow => write!(f, "record sequence number exhausted"),
            Self::InvalidState(what) => write!(f, "invalid state: {what}"),
            Self::MissingConfig => write!(f, "no configuration attached to the connection"),
            Self::MissingPrivateKey => write!(f, "operation requires a private key"),
            Self::ServerNameTooLong => write!(f, "server name exceeds 255 bytes"),
            Self::UnknownPreferenceTag => write!(f, "unknown cipher preference tag"),
            Self::AlertSent(description) => write!(f, "fatal alert sent: {description}"),
            Self::AlertReceived(description) => write!(f, "fatal alert received: {description}"),
            Self::Internal(what) => write!(f, "internal error: {what}"),
        }
    }
}

impl std::error::Error for TLSError {}

impl From<bytebuf::BufferError> for TLSError {
    fn from(error: bytebuf::BufferError) -> Self {
        match error {
            bytebuf::BufferError::OutOfData => Self::BadMessage,
            // Growable buffers never report these; hitting one is a logic error.
            bytebuf::BufferError::Full | bytebuf::BufferError::ResizeDisallowed => {
                Self::Internal("buffer write failed")
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_partition_by_category() {
        assert_eq!(TLSError::BadRecordMac.code() >> 28, Category::Protocol as u32);
        assert_eq!(
            TLSError::Blocked(Direction::Read).code() >> 28,
            Category::Blocked as u32
        );
        assert_eq!(TLSError::MissingConfig.code() >> 28, Category::Usage as u32);
        assert_ne!(
            TLSError::Blocked(Direction::Read).code(),
            TLSError::Blocked(Direction::Write).code()
        );
    }

    #[test]
    fn translation_falls_back_on_unknown_language() {
        let code = TLSError::BadRecordMac.code();
        assert_eq!(error_string(code, "EN"), "TLS protocol violation by peer");
        assert_eq!(error_string(code, "DE"), UNKNOWN_LANGUAGE);
    }

    #[test]
    fn thread_local_slot_records_the_last_error() {
        clear_error();
        assert_eq!(last_error_code(), 0);

        record_error(&TLSError::BadRecordMac);
        assert_eq!(last_error_code(), TLSError::BadRecordMac.code());
        assert!(last_error_message().unwrap().contains("integrity"));

        // Blocked must not clobber the slot
        record_error(&TLSError::Blocked(Direction::Read));
        assert_eq!(last_error_code(), TLSError::BadRecordMac.code());

        clear_error();
        assert_eq!(last_error_code(), 0);
    }
}
