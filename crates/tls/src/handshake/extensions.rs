//! Hello extension coders.
//!
//! Extensions travel as `(type: u16, length: u16, body)` tuples. Unknown
//! types are skipped on receive; a duplicate of any known type is rejected.
//! Several types decode differently depending on which side sent them, so
//! the decoder is told whose hello it is reading.

use bytebuf::ByteBuffer;

use crate::{
    encoding::{
        self, read_length_prefixed, read_length_prefixed_with, write_length_prefixed, Decode,
        Encode,
    },
    enum_encoding,
    kem::KemId,
    ProtocolVersion, ServerName, TLSError,
};

enum_encoding!(
    pub enum NamedGroup(u16) {
        Secp256r1 = 0x0017,
        X25519 = 0x001D,
    }
);

enum_encoding!(
    pub enum SignatureScheme(u16) {
        RsaPkcs1Sha1 = 0x0201,
        EcdsaSha1 = 0x0203,
        RsaPkcs1Sha256 = 0x0401,
        EcdsaSecp256r1Sha256 = 0x0403,
        RsaPkcs1Sha384 = 0x0501,
        RsaPssRsaeSha256 = 0x0804,
        RsaPssRsaeSha384 = 0x0805,
    }
);

enum_encoding!(
    /// Negotiable plaintext ceilings from RFC 6066.
    pub enum MaxFragmentLength(u8) {
        Len512 = 1,
        Len1024 = 2,
        Len2048 = 3,
        Len4096 = 4,
    }
);

impl MaxFragmentLength {
    #[must_use]
    pub fn in_bytes(&self) -> usize {
        match self {
            Self::Len512 => 512,
            Self::Len1024 => 1024,
            Self::Len2048 => 2048,
            Self::Len4096 => 4096,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyShareEntry {
    pub group: NamedGroup,
    pub key_exchange: Vec<u8>,
}

impl Encode for KeyShareEntry {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        self.group.encode(buf)?;
        write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(&self.key_exchange)?))
    }
}

impl Decode for KeyShareEntry {
    fn decode(buf: &mut ByteBuffer<'_>) -> encoding::Result<Self> {
        let group = NamedGroup::decode(buf)?;
        let key_exchange = read_length_prefixed(buf, 2)?;
        Ok(Self {
            group,
            key_exchange,
        })
    }
}

/// Which hello an extension block belongs to. The wire form of several
/// extensions depends on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelloSide {
    Client,
    Server,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Extension {
    /// SNI offer; the server acknowledges with an empty body.
    ServerName(ServerName),
    ServerNameAck,
    MaxFragmentLength(MaxFragmentLength),
    /// OCSP status request (client) or its empty acknowledgement (server).
    StatusRequest,
    SupportedGroups(Vec<NamedGroup>),
    EcPointFormats,
    SignatureAlgorithms(Vec<SignatureScheme>),
    /// Offered (client) or selected (server) application protocols.
    Alpn(Vec<Vec<u8>>),
    /// Initial handshake only; carries the empty verify data.
    RenegotiationInfo,
    SupportedVersions(Vec<ProtocolVersion>),
    SelectedVersion(ProtocolVersion),
    KeyShareOffers(Vec<KeyShareEntry>),
    KeyShareSelected(KeyShareEntry),
    /// Post-quantum KEM parameter sets the client accepts.
    KemParameters(Vec<KemId>),
}

const TYPE_SERVER_NAME: u16 = 0;
const TYPE_MAX_FRAGMENT_LENGTH: u16 = 1;
const TYPE_STATUS_REQUEST: u16 = 5;
const TYPE_SUPPORTED_GROUPS: u16 = 10;
const TYPE_EC_POINT_FORMATS: u16 = 11;
const TYPE_SIGNATURE_ALGORITHMS: u16 = 13;
const TYPE_ALPN: u16 = 16;
const TYPE_SUPPORTED_VERSIONS: u16 = 43;
const TYPE_KEY_SHARE: u16 = 51;
/// Draft code point for the hybrid KEM negotiation.
const TYPE_KEM_PARAMETERS: u16 = 0xFE01;
const TYPE_RENEGOTIATION_INFO: u16 = 0xFF01;

impl Extension {
    #[must_use]
    fn wire_type(&self) -> u16 {
        match self {
            Self::ServerName(_) | Self::ServerNameAck => TYPE_SERVER_NAME,
            Self::MaxFragmentLength(_) => TYPE_MAX_FRAGMENT_LENGTH,
            Self::StatusRequest => TYPE_STATUS_REQUEST,
            Self::SupportedGroups(_) => TYPE_SUPPORTED_GROUPS,
            Self::EcPointFormats => TYPE_EC_POINT_FORMATS,
            Self::SignatureAlgorithms(_) => TYPE_SIGNATURE_ALGORITHMS,
            Self::Alpn(_) => TYPE_ALPN,
            Self::RenegotiationInfo => TYPE_RENEGOTIATION_INFO,
            Self::SupportedVersions(_) | Self::SelectedVersion(_) => TYPE_SUPPORTED_VERSIONS,
            Self::KeyShareOffers(_) | Self::KeyShareSelected(_) => TYPE_KEY_SHARE,
            Self::KemParameters(_) => TYPE_KEM_PARAMETERS,
        }
    }

    fn encode_body(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        match self {
            Self::ServerName(name) => write_length_prefixed(buf, 2, |buf| {
                buf.write_u8(0)?; // name_type: host_name
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(name.as_str().as_bytes())?))
            }),
            Self::ServerNameAck => Ok(()),
            Self::MaxFragmentLength(len) => len.encode(buf),
            Self::StatusRequest => {
                buf.write_u8(1)?; // status_type: ocsp
                buf.write_u16(0)?; // responder_id_list
                buf.write_u16(0)?; // request_extensions
                Ok(())
            },
            Self::SupportedGroups(groups) => {
                write_length_prefixed(buf, 2, |buf| groups.as_slice().encode(buf))
            },
            Self::EcPointFormats => {
                buf.write_u8(1)?;
                buf.write_u8(0)?; // uncompressed
                Ok(())
            },
            Self::SignatureAlgorithms(schemes) => {
                write_length_prefixed(buf, 2, |buf| schemes.as_slice().encode(buf))
            },
            Self::Alpn(protocols) => write_length_prefixed(buf, 2, |buf| {
                for protocol in protocols {
                    write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(protocol)?))?;
                }
                Ok(())
            }),
            Self::RenegotiationInfo => Ok(buf.write_u8(0)?),
            Self::SupportedVersions(versions) => {
                write_length_prefixed(buf, 1, |buf| versions.as_slice().encode(buf))
            },
            Self::SelectedVersion(version) => version.encode(buf),
            Self::KeyShareOffers(entries) => {
                write_length_prefixed(buf, 2, |buf| entries.as_slice().encode(buf))
            },
            Self::KeyShareSelected(entry) => entry.encode(buf),
            Self::KemParameters(kems) => {
                write_length_prefixed(buf, 2, |buf| kems.as_slice().encode(buf))
            },
        }
    }

    fn decode_body(
        wire_type: u16,
        side: HelloSide,
        buf: &mut ByteBuffer<'_>,
    ) -> encoding::Result<Option<Self>> {
        let extension = match (wire_type, side) {
            (TYPE_SERVER_NAME, HelloSide::Client) => {
                read_length_prefixed_with(buf, 2, |list| {
                    let name_type = list.read_u8()?;
                    if name_type != 0 {
                        return Err(encoding::Error);
                    }
                    let name = read_length_prefixed(list, 2)?;
                    let name = std::str::from_utf8(&name).map_err(|_| encoding::Error)?;
                    ServerName::new(name)
                        .map(Self::ServerName)
                        .map_err(|_| encoding::Error)
                })?
            },
            (TYPE_SERVER_NAME, HelloSide::Server) => Self::ServerNameAck,
            (TYPE_MAX_FRAGMENT_LENGTH, _) => {
                Self::MaxFragmentLength(MaxFragmentLength::decode(buf)?)
            },
            (TYPE_STATUS_REQUEST, HelloSide::Client) => {
                let status_type = buf.read_u8()?;
                if status_type != 1 {
                    return Ok(None);
                }
                buf.skip_read(buf.remaining()).map_err(encoding::Error::from)?;
                Self::StatusRequest
            },
            (TYPE_STATUS_REQUEST, HelloSide::Server) => Self::StatusRequest,
            (TYPE_SUPPORTED_GROUPS, _) => read_length_prefixed_with(buf, 2, |list| {
                let mut groups = Vec::new();
                while list.remaining() != 0 {
                    // Unknown groups in the offer are fine, skip them
                    let raw = list.read_u16()?;
                    if let Ok(group) = NamedGroup::try_from(raw) {
                        groups.push(group);
                    }
                }
                Ok(Self::SupportedGroups(groups))
            })?,
            (TYPE_EC_POINT_FORMATS, _) => {
                let formats = read_length_prefixed(buf, 1)?;
                if !formats.contains(&0) {
                    // Peer cannot even do uncompressed points
                    return Err(encoding::Error);
                }
                Self::EcPointFormats
            },
            (TYPE_SIGNATURE_ALGORITHMS, _) => read_length_prefixed_with(buf, 2, |list| {
                let mut schemes = Vec::new();
                while list.remaining() != 0 {
                    let raw = list.read_u16()?;
                    if let Ok(scheme) = SignatureScheme::try_from(raw) {
                        schemes.push(scheme);
                    }
                }
                Ok(Self::SignatureAlgorithms(schemes))
            })?,
            (TYPE_ALPN, _) => read_length_prefixed_with(buf, 2, |list| {
                let mut protocols = Vec::new();
                while list.remaining() != 0 {
                    let protocol = read_length_prefixed(list, 1)?;
                    if protocol.is_empty() {
                        return Err(encoding::Error);
                    }
                    protocols.push(protocol);
                }
                Ok(Self::Alpn(protocols))
            })?,
            (TYPE_RENEGOTIATION_INFO, _) => {
                let verify_data = read_length_prefixed(buf, 1)?;
                if !verify_data.is_empty() {
                    // We never renegotiate, so any non-empty value is bogus
                    return Err(encoding::Error);
                }
                Self::RenegotiationInfo
            },
            (TYPE_SUPPORTED_VERSIONS, HelloSide::Client) => {
                read_length_prefixed_with(buf, 1, |list| {
                    let mut versions = Vec::new();
                    while list.remaining() != 0 {
                        let raw: [u8; 2] = list.read_array().map_err(encoding::Error::from)?;
                        if let Some(version) = ProtocolVersion::from_wire(raw) {
                            versions.push(version);
                        }
                    }
                    Ok(Self::SupportedVersions(versions))
                })?
            },
            (TYPE_SUPPORTED_VERSIONS, HelloSide::Server) => {
                Self::SelectedVersion(ProtocolVersion::decode(buf)?)
            },
            (TYPE_KEY_SHARE, HelloSide::Client) => read_length_prefixed_with(buf, 2, |list| {
                let mut entries = Vec::new();
                while list.remaining() != 0 {
                    // Shares for groups we don't know are skipped, not fatal
                    let raw = list.read_u16()?;
                    let key_exchange = read_length_prefixed(list, 2)?;
                    if let Ok(group) = NamedGroup::try_from(raw) {
                        entries.push(KeyShareEntry {
                            group,
                            key_exchange,
                        });
                    }
                }
                Ok(Self::KeyShareOffers(entries))
            })?,
            (TYPE_KEY_SHARE, HelloSide::Server) => {
                Self::KeyShareSelected(KeyShareEntry::decode(buf)?)
            },
            (TYPE_KEM_PARAMETERS, _) => read_length_prefixed_with(buf, 2, |list| {
                let mut kems = Vec::new();
                while list.remaining() != 0 {
                    let raw = list.read_u16()?;
                    if let Ok(kem) = KemId::try_from(raw) {
                        kems.push(kem);
                    }
                }
                Ok(Self::KemParameters(kems))
            })?,
            _ => return Ok(None),
        };
        Ok(Some(extension))
    }
}

impl Encode for Extension {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        buf.write_u16(self.wire_type())?;
        write_length_prefixed(buf, 2, |buf| self.encode_body(buf))
    }
}

/// Encode a whole extension block, including the outer u16 length.
pub(crate) fn encode_extensions(
    extensions: &[Extension],
    buf: &mut ByteBuffer<'_>,
) -> encoding::Result<()> {
    write_length_prefixed(buf, 2, |buf| extensions.encode(buf))
}

/// Decode a whole extension block. Unknown extension types are skipped;
/// duplicates of any type are rejected.
pub(crate) fn decode_extensions(
    buf: &mut ByteBuffer<'_>,
    side: HelloSide,
) -> Result<Vec<Extension>, TLSError> {
    if buf.remaining() == 0 {
        // The extension block as a whole is optional
        return Ok(Vec::new());
    }

    let block = read_length_prefixed(buf, 2).map_err(TLSError::from)?;
    let mut block = ByteBuffer::from_slice(&block);

    let mut extensions = Vec::new();
    let mut seen = Vec::new();
    while block.remaining() != 0 {
        let wire_type = block.read_u16().map_err(|_| TLSError::BadMessage)?;
        if seen.contains(&wire_type) {
            return Err(TLSError::DuplicateExtension);
        }
        seen.push(wire_type);

        let body = read_length_prefixed(&mut block, 2).map_err(TLSError::from)?;
        let mut body = ByteBuffer::from_slice(&body);
        match Extension::decode_body(wire_type, side, &mut body) {
            Ok(Some(extension)) => {
                if body.remaining() != 0 {
                    return Err(TLSError::BadMessage);
                }
                extensions.push(extension);
            },
            Ok(None) => {
                log::debug!("Skipping unknown extension type {wire_type}");
            },
            Err(_) => return Err(TLSError::BadMessage),
        }
    }
    Ok(extensions)
}

/// Walk the server's preference list against the client's offer and pick
/// the server's most preferred joint protocol.
pub(crate) fn select_alpn(
    server_preferences: &[Vec<u8>],
    client_offer: &[Vec<u8>],
) -> Result<Vec<u8>, TLSError> {
    server_preferences
        .iter()
        .find(|preferred| client_offer.contains(preferred))
        .cloned()
        .ok_or(TLSError::NoApplicationProtocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(extension: Extension, side: HelloSide) {
        let mut buf = ByteBuffer::growable(128);
        encode_extensions(std::slice::from_ref(&extension), &mut buf).unwrap();
        let decoded = decode_extensions(&mut buf, side).unwrap();
        assert_eq!(decoded, vec![extension]);
    }

    #[test]
    fn extension_round_trips() {
        round_trip(
            Extension::ServerName(ServerName::new("example.com").unwrap()),
            HelloSide::Client,
        );
        round_trip(
            Extension::SupportedGroups(vec![NamedGroup::X25519, NamedGroup::Secp256r1]),
            HelloSide::Client,
        );
        round_trip(
            Extension::SignatureAlgorithms(vec![
                SignatureScheme::EcdsaSecp256r1Sha256,
                SignatureScheme::RsaPssRsaeSha256,
            ]),
            HelloSide::Client,
        );
        round_trip(
            Extension::Alpn(vec![b"h2".to_vec(), b"http/1.1".to_vec()]),
            HelloSide::Server,
        );
        round_trip(
            Extension::SupportedVersions(vec![ProtocolVersion::Tls13, ProtocolVersion::Tls12]),
            HelloSide::Client,
        );
        round_trip(
            Extension::SelectedVersion(ProtocolVersion::Tls13),
            HelloSide::Server,
        );
        round_trip(
            Extension::KeyShareOffers(vec![KeyShareEntry {
                group: NamedGroup::X25519,
                key_exchange: vec![9; 32],
            }]),
            HelloSide::Client,
        );
        round_trip(
            Extension::KemParameters(vec![KemId::Bike1Level1R1, KemId::Sike503R1]),
            HelloSide::Client,
        );
        round_trip(Extension::MaxFragmentLength(MaxFragmentLength::Len2048), HelloSide::Client);
        round_trip(Extension::StatusRequest, HelloSide::Client);
        round_trip(Extension::RenegotiationInfo, HelloSide::Client);
    }

    #[test]
    fn the_wire_layout_of_alpn() {
        let mut buf = ByteBuffer::growable(64);
        Extension::Alpn(vec![b"h2".to_vec()])
            .encode(&mut buf)
            .unwrap();
        assert_eq!(
            buf.readable(),
            &[0, 16, 0, 5, 0, 3, 2, b'h', b'2'],
            "type, ext_len, list_len, name_len, name"
        );
    }

    #[test]
    fn unknown_extensions_are_skipped() {
        let mut buf = ByteBuffer::growable(64);
        write_length_prefixed(&mut buf, 2, |buf| {
            buf.write_u16(0x8888)?; // unassigned type
            write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(&[1, 2, 3])?))?;
            Extension::EcPointFormats.encode(buf)
        })
        .unwrap();

        let decoded = decode_extensions(&mut buf, HelloSide::Client).unwrap();
        assert_eq!(decoded, vec![Extension::EcPointFormats]);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut buf = ByteBuffer::growable(64);
        write_length_prefixed(&mut buf, 2, |buf| {
            Extension::EcPointFormats.encode(buf)?;
            Extension::EcPointFormats.encode(buf)
        })
        .unwrap();

        assert!(matches!(
            decode_extensions(&mut buf, HelloSide::Client),
            Err(TLSError::DuplicateExtension)
        ));
    }

    #[test]
    fn alpn_selection_prefers_the_server_order() {
        let server = vec![b"http/1.1".to_vec(), b"h2".to_vec()];
        let client = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        assert_eq!(select_alpn(&server, &client).unwrap(), b"http/1.1");

        let server = vec![b"h2".to_vec()];
        let client = vec![b"http/1.1".to_vec()];
        assert!(matches!(
            select_alpn(&server, &client),
            Err(TLSError::NoApplicationProtocol)
        ));
    }
}
