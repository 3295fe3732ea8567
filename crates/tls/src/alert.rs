//! The alert protocol: two-byte records carrying `(level, description)`.
//!
//! A fatal alert in either direction moves the connection to its closed
//! state. Warnings are logged and otherwise ignored, except `close_notify`
//! which starts a graceful shutdown.

use bytebuf::ByteBuffer;

use crate::{
    encoding::{self, Decode, Encode},
    enum_encoding,
};

enum_encoding!(
    pub enum Severity(u8) {
        Warning = 1,
        Fatal = 2,
    }
);

enum_encoding!(
    pub enum Description(u8) {
        CloseNotify = 0,
        UnexpectedMessage = 10,
        BadRecordMAC = 20,
        RecordOverflow = 22,
        DecompressionFailure = 30,
        HandshakeFailure = 40,
        BadCertificate = 42,
        UnsupportedCertificate = 43,
        CertificateRevoked = 44,
        CertificateExpired = 45,
        CertificateUnknown = 46,
        IllegalParameter = 47,
        UnknownCA = 48,
        AccessDenied = 49,
        DecodeError = 50,
        DecryptError = 51,
        ProtocolVersion = 70,
        InsufficientSecurity = 71,
        InternalError = 80,
        InappropriateFallback = 86,
        UserCanceled = 90,
        NoRenegotiation = 100,
        MissingExtension = 109,
        UnsupportedExtension = 110,
        UnrecognizedName = 112,
        UnknownPskIdentity = 115,
        CertificateRequired = 116,
        NoApplicationProtocol = 120,
    }
);

impl std::fmt::Display for Description {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CloseNotify => "close_notify",
            Self::UnexpectedMessage => "unexpected_message",
            Self::BadRecordMAC => "bad_record_mac",
            Self::RecordOverflow => "record_overflow",
            Self::DecompressionFailure => "decompression_failure",
            Self::HandshakeFailure => "handshake_failure",
            Self::BadCertificate => "bad_certificate",
            Self::UnsupportedCertificate => "unsupported_certificate",
            Self::CertificateRevoked => "certificate_revoked",
            Self::CertificateExpired => "certificate_expired",
            Self::CertificateUnknown => "certificate_unknown",
            Self::IllegalParameter => "illegal_parameter",
            Self::UnknownCA => "unknown_ca",
            Self::AccessDenied => "access_denied",
            Self::DecodeError => "decode_error",
            Self::DecryptError => "decrypt_error",
            Self::ProtocolVersion => "protocol_version",
            Self::InsufficientSecurity => "insufficient_security",
            Self::InternalError => "internal_error",
            Self::InappropriateFallback => "inappropriate_fallback",
            Self::UserCanceled => "user_canceled",
            Self::NoRenegotiation => "no_renegotiation",
            Self::MissingExtension => "missing_extension",
            Self::UnsupportedExtension => "unsupported_extension",
            Self::UnrecognizedName => "unrecognized_name",
            Self::UnknownPskIdentity => "unknown_psk_identity",
            Self::CertificateRequired => "certificate_required",
            Self::NoApplicationProtocol => "no_application_protocol",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Alert {
    pub severity: Severity,
    pub description: Description,
}

impl Alert {
    #[must_use]
    pub const fn fatal(description: Description) -> Self {
        Self {
            severity: Severity::Fatal,
            description,
        }
    }

    #[must_use]
    pub const fn close_notify() -> Self {
        Self {
            severity: Severity::Warning,
            description: Description::CloseNotify,
        }
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

impl Encode for Alert {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        self.severity.encode(buf)?;
        self.description.encode(buf)
    }
}

impl Decode for Alert {
    fn decode(buf: &mut ByteBuffer<'_>) -> encoding::Result<Self> {
        let severity = Severity::decode(buf)?;
        let description = Description::decode(buf)?;

        Ok(Self {
            severity,
            description,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alerts_are_two_bytes() {
        let alert = Alert::fatal(Description::BadRecordMAC);
        assert_eq!(alert.to_bytes(), vec![2, 20]);

        let mut buf = ByteBuffer::from_slice(&[1, 0]);
        let parsed = Alert::decode(&mut buf).unwrap();
        assert_eq!(parsed, Alert::close_notify());
        assert!(!parsed.is_fatal());
    }
}
