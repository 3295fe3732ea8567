use bytebuf::ByteBuffer;

use crate::encoding::{self, Decode, Encode};

/// A protocol version, ordered oldest to newest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProtocolVersion {
    Tls10,
    Tls11,
    Tls12,
    Tls13,
}

impl ProtocolVersion {
    /// The `{major, minor}` pair as it appears on the wire.
    /// TLS 1.x is 3.(x+1) for historical reasons.
    #[must_use]
    pub const fn wire(&self) -> [u8; 2] {
        match self {
            Self::Tls10 => [3, 1],
            Self::Tls11 => [3, 2],
            Self::Tls12 => [3, 3],
            Self::Tls13 => [3, 4],
        }
    }

    #[must_use]
    pub fn from_wire(bytes: [u8; 2]) -> Option<Self> {
        match bytes {
            [3, 1] => Some(Self::Tls10),
            [3, 2] => Some(Self::Tls11),
            [3, 3] => Some(Self::Tls12),
            [3, 4] => Some(Self::Tls13),
            _ => None,
        }
    }

    /// The version stamped on records. TLS 1.3 keeps the 1.2 marker on the
    /// wire for middlebox compatibility.
    #[must_use]
    pub(crate) fn record_version(&self) -> [u8; 2] {
        match self {
            Self::Tls13 => [3, 3],
            other => other.wire(),
        }
    }
}

impl Encode for ProtocolVersion {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        self.wire().encode(buf)
    }
}

impl Decode for ProtocolVersion {
    fn decode(buf: &mut ByteBuffer<'_>) -> encoding::Result<Self> {
        let bytes: [u8; 2] = buf.read_array().map_err(encoding::Error::from)?;
        Self::from_wire(bytes).ok_or(encoding::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_protocol_age() {
        assert!(ProtocolVersion::Tls10 < ProtocolVersion::Tls12);
        assert!(ProtocolVersion::Tls12 < ProtocolVersion::Tls13);
    }

    #[test]
    fn tls13_records_carry_the_tls12_marker() {
        assert_eq!(ProtocolVersion::Tls13.record_version(), [3, 3]);
        assert_eq!(ProtocolVersion::Tls13.wire(), [3, 4]);
    }
}
