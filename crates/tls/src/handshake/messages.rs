//! Handshake message coders.
//!
//! Every encoder emits the complete message, four-byte handshake header
//! included, because exactly those bytes feed the transcript hash. Decoders
//! parse a message body that the reassembly layer has already sized.

use bytebuf::ByteBuffer;

use crate::{
    encoding::{
        self, read_length_prefixed, write_length_prefixed, Decode, Encode,
    },
    enum_encoding,
    handshake::extensions::{
        decode_extensions, encode_extensions, Extension, HelloSide, NamedGroup, SignatureScheme,
    },
    kem::KemId,
    ProtocolVersion, TLSError,
};

enum_encoding!(
    pub enum HandshakeType(u8) {
        HelloRequest = 0,
        ClientHello = 1,
        ServerHello = 2,
        NewSessionTicket = 4,
        EncryptedExtensions = 8,
        Certificate = 11,
        ServerKeyExchange = 12,
        CertificateRequest = 13,
        ServerHelloDone = 14,
        CertificateVerify = 15,
        ClientKeyExchange = 16,
        Finished = 20,
        CertificateStatus = 22,
        KeyUpdate = 24,
    }
);

pub(crate) const HEADER_LEN: usize = 4;

/// Write `body` wrapped in the `type || u24 length` handshake header.
fn write_message<F>(
    buf: &mut ByteBuffer<'_>,
    message_type: HandshakeType,
    body: F,
) -> encoding::Result<()>
where
    F: FnOnce(&mut ByteBuffer<'_>) -> encoding::Result<()>,
{
    message_type.encode(buf)?;
    write_length_prefixed(buf, 3, body)
}

#[derive(Clone, Debug)]
pub struct ClientHello {
    pub legacy_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suites: Vec<[u8; 2]>,
    pub extensions: Vec<Extension>,
}

impl Encode for ClientHello {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::ClientHello, |buf| {
            self.legacy_version.encode(buf)?;
            self.random.encode(buf)?;
            write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(&self.session_id)?))?;
            write_length_prefixed(buf, 2, |buf| {
                for code in &self.cipher_suites {
                    buf.write_bytes(code)?;
                }
                Ok(())
            })?;
            // Compression: the null method, nothing else, ever
            buf.write_u8(1)?;
            buf.write_u8(0)?;
            encode_extensions(&self.extensions, buf)
        })
    }
}

impl ClientHello {
    pub fn decode_body(body: &mut ByteBuffer<'_>) -> Result<Self, TLSError> {
        let legacy_version = ProtocolVersion::decode(body).map_err(TLSError::from)?;
        let random: [u8; 32] = body.read_array().map_err(|_| TLSError::BadMessage)?;

        let session_id = read_length_prefixed(body, 1).map_err(TLSError::from)?;
        if session_id.len() > 32 {
            return Err(TLSError::BadMessage);
        }

        let suites_raw = read_length_prefixed(body, 2).map_err(TLSError::from)?;
        if suites_raw.is_empty() || suites_raw.len() % 2 != 0 {
            return Err(TLSError::BadMessage);
        }
        let cipher_suites = suites_raw
            .chunks_exact(2)
            .map(|pair| [pair[0], pair[1]])
            .collect();

        let compressions = read_length_prefixed(body, 1).map_err(TLSError::from)?;
        if !compressions.contains(&0) {
            // The peer insists on compressing; RFC 3749 deployments learned
            // better (CRIME), so did everyone else
            return Err(TLSError::HandshakeFailure);
        }

        let extensions = decode_extensions(body, HelloSide::Client)?;
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }

        Ok(Self {
            legacy_version,
            random,
            session_id,
            cipher_suites,
            extensions,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ServerHello {
    pub legacy_version: ProtocolVersion,
    pub random: [u8; 32],
    pub session_id: Vec<u8>,
    pub cipher_suite: [u8; 2],
    pub extensions: Vec<Extension>,
}

impl Encode for ServerHello {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::ServerHello, |buf| {
            self.legacy_version.encode(buf)?;
            self.random.encode(buf)?;
            write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(&self.session_id)?))?;
            buf.write_bytes(&self.cipher_suite)?;
            buf.write_u8(0)?; // null compression
            encode_extensions(&self.extensions, buf)
        })
    }
}

impl ServerHello {
    pub fn decode_body(body: &mut ByteBuffer<'_>) -> Result<Self, TLSError> {
        let legacy_version = ProtocolVersion::decode(body).map_err(TLSError::from)?;
        let random: [u8; 32] = body.read_array().map_err(|_| TLSError::BadMessage)?;
        let session_id = read_length_prefixed(body, 1).map_err(TLSError::from)?;
        let cipher_suite: [u8; 2] = body.read_array().map_err(|_| TLSError::BadMessage)?;

        let compression = body.read_u8().map_err(|_| TLSError::BadMessage)?;
        if compression != 0 {
            return Err(TLSError::IllegalParameter);
        }

        let extensions = decode_extensions(body, HelloSide::Server)?;
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }

        Ok(Self {
            legacy_version,
            random,
            session_id,
            cipher_suite,
            extensions,
        })
    }
}

/// A certificate chain, leaf first, as raw DER.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateChain {
    pub certificates: Vec<Vec<u8>>,
}

impl CertificateChain {
    pub fn encode_message(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer<'_>,
    ) -> encoding::Result<()> {
        write_message(buf, HandshakeType::Certificate, |buf| {
            if version == ProtocolVersion::Tls13 {
                // certificate_request_context, empty outside post-handshake auth
                buf.write_u8(0)?;
            }
            write_length_prefixed(buf, 3, |buf| {
                for certificate in &self.certificates {
                    write_length_prefixed(buf, 3, |buf| Ok(buf.write_bytes(certificate)?))?;
                    if version == ProtocolVersion::Tls13 {
                        buf.write_u16(0)?; // per-certificate extensions
                    }
                }
                Ok(())
            })
        })
    }

    pub fn decode_body(
        version: ProtocolVersion,
        body: &mut ByteBuffer<'_>,
    ) -> Result<Self, TLSError> {
        if version == ProtocolVersion::Tls13 {
            let context = read_length_prefixed(body, 1).map_err(TLSError::from)?;
            if !context.is_empty() {
                // We never request post-handshake auth
                return Err(TLSError::IllegalParameter);
            }
        }

        let list = read_length_prefixed(body, 3).map_err(TLSError::from)?;
        let mut list = ByteBuffer::from_slice(&list);
        let mut certificates = Vec::new();
        while list.remaining() != 0 {
            certificates.push(read_length_prefixed(&mut list, 3).map_err(TLSError::from)?);
            if version == ProtocolVersion::Tls13 {
                let extensions = read_length_prefixed(&mut list, 2).map_err(TLSError::from)?;
                let mut extensions = ByteBuffer::from_slice(&extensions);
                // OCSP and SCT responses may ride here; we don't use them
                drop(decode_extensions_raw(&mut extensions)?);
            }
        }
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }
        Ok(Self { certificates })
    }
}

/// Skim an extension block without interpreting it: type/length sanity only.
fn decode_extensions_raw(buf: &mut ByteBuffer<'_>) -> Result<(), TLSError> {
    while buf.remaining() != 0 {
        let _ = buf.read_u16().map_err(|_| TLSError::BadMessage)?;
        let _ = read_length_prefixed(buf, 2).map_err(TLSError::from)?;
    }
    Ok(())
}

/// A stapled OCSP response (TLS 1.2 CertificateStatus message).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateStatus {
    pub response: Vec<u8>,
}

impl Encode for CertificateStatus {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::CertificateStatus, |buf| {
            buf.write_u8(1)?; // status_type: ocsp
            write_length_prefixed(buf, 3, |buf| Ok(buf.write_bytes(&self.response)?))
        })
    }
}

impl CertificateStatus {
    pub fn decode_body(body: &mut ByteBuffer<'_>) -> Result<Self, TLSError> {
        let status_type = body.read_u8().map_err(|_| TLSError::BadMessage)?;
        if status_type != 1 {
            return Err(TLSError::IllegalParameter);
        }
        let response = read_length_prefixed(body, 3).map_err(TLSError::from)?;
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }
        Ok(Self { response })
    }
}

/// The server's ephemeral key exchange parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KexParams {
    Ecdhe {
        group: NamedGroup,
        public: Vec<u8>,
    },
    Dhe {
        prime: Vec<u8>,
        generator: Vec<u8>,
        public: Vec<u8>,
    },
    /// Hybrid: classical ECDHE plus a KEM public key.
    EcdheKem {
        group: NamedGroup,
        public: Vec<u8>,
        kem: KemId,
        kem_public: Vec<u8>,
    },
}

const CURVE_TYPE_NAMED: u8 = 3;

impl KexParams {
    /// The exact wire bytes, as covered by the ServerKeyExchange signature.
    fn encode_params(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        match self {
            Self::Ecdhe { group, public } => {
                buf.write_u8(CURVE_TYPE_NAMED)?;
                group.encode(buf)?;
                write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(public)?))
            },
            Self::Dhe {
                prime,
                generator,
                public,
            } => {
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(prime)?))?;
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(generator)?))?;
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(public)?))
            },
            Self::EcdheKem {
                group,
                public,
                kem,
                kem_public,
            } => {
                buf.write_u8(CURVE_TYPE_NAMED)?;
                group.encode(buf)?;
                write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(public)?))?;
                kem.encode(buf)?;
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(kem_public)?))
            },
        }
    }

    #[must_use]
    pub fn to_params_bytes(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::growable(128);
        self.encode_params(&mut buf)
            .expect("growable buffers do not fail to encode");
        buf.readable().to_vec()
    }

    fn decode_ecdhe(body: &mut ByteBuffer<'_>) -> Result<(NamedGroup, Vec<u8>), TLSError> {
        let curve_type = body.read_u8().map_err(|_| TLSError::BadMessage)?;
        if curve_type != CURVE_TYPE_NAMED {
            return Err(TLSError::IllegalParameter);
        }
        let group = NamedGroup::decode(body).map_err(|_| TLSError::IllegalParameter)?;
        let public = read_length_prefixed(body, 1).map_err(TLSError::from)?;
        Ok((group, public))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KexKind {
    Ecdhe,
    Dhe,
    EcdheKem,
}

#[derive(Clone, Debug)]
pub struct ServerKeyExchange {
    pub params: KexParams,
    /// Present from TLS 1.2 on; older versions imply the algorithm.
    pub scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

impl Encode for ServerKeyExchange {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::ServerKeyExchange, |buf| {
            self.params.encode_params(buf)?;
            if let Some(scheme) = self.scheme {
                scheme.encode(buf)?;
            }
            write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(&self.signature)?))
        })
    }
}

impl ServerKeyExchange {
    pub fn decode_body(
        kind: KexKind,
        version: ProtocolVersion,
        body: &mut ByteBuffer<'_>,
    ) -> Result<Self, TLSError> {
        let params = match kind {
            KexKind::Ecdhe => {
                let (group, public) = KexParams::decode_ecdhe(body)?;
                KexParams::Ecdhe { group, public }
            },
            KexKind::Dhe => {
                let prime = read_length_prefixed(body, 2).map_err(TLSError::from)?;
                let generator = read_length_prefixed(body, 2).map_err(TLSError::from)?;
                let public = read_length_prefixed(body, 2).map_err(TLSError::from)?;
                KexParams::Dhe {
                    prime,
                    generator,
                    public,
                }
            },
            KexKind::EcdheKem => {
                let (group, public) = KexParams::decode_ecdhe(body)?;
                let kem_raw = body.read_u16().map_err(|_| TLSError::BadMessage)?;
                let kem = KemId::try_from(kem_raw).map_err(|_| TLSError::KemUnsupported)?;
                let kem_public = read_length_prefixed(body, 2).map_err(TLSError::from)?;
                KexParams::EcdheKem {
                    group,
                    public,
                    kem,
                    kem_public,
                }
            },
        };

        let scheme = if version >= ProtocolVersion::Tls12 {
            Some(SignatureScheme::decode(body).map_err(|_| TLSError::IllegalParameter)?)
        } else {
            None
        };
        let signature = read_length_prefixed(body, 2).map_err(TLSError::from)?;
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }

        Ok(Self {
            params,
            scheme,
            signature,
        })
    }
}

#[derive(Clone, Debug)]
pub struct CertificateRequest {
    pub schemes: Vec<SignatureScheme>,
}

impl CertificateRequest {
    pub fn encode_message(
        &self,
        version: ProtocolVersion,
        buf: &mut ByteBuffer<'_>,
    ) -> encoding::Result<()> {
        write_message(buf, HandshakeType::CertificateRequest, |buf| {
            if version == ProtocolVersion::Tls13 {
                buf.write_u8(0)?; // empty request context
                return encode_extensions(
                    &[Extension::SignatureAlgorithms(self.schemes.clone())],
                    buf,
                );
            }

            // certificate_types: rsa_sign, ecdsa_sign
            write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(&[1, 64])?))?;
            if version == ProtocolVersion::Tls12 {
                write_length_prefixed(buf, 2, |buf| self.schemes.as_slice().encode(buf))?;
            }
            // certificate_authorities: no constraint
            buf.write_u16(0)?;
            Ok(())
        })
    }

    pub fn decode_body(
        version: ProtocolVersion,
        body: &mut ByteBuffer<'_>,
    ) -> Result<Self, TLSError> {
        if version == ProtocolVersion::Tls13 {
            let context = read_length_prefixed(body, 1).map_err(TLSError::from)?;
            if !context.is_empty() {
                return Err(TLSError::IllegalParameter);
            }
            let extensions = decode_extensions(body, HelloSide::Client)?;
            let schemes = extensions
                .into_iter()
                .find_map(|extension| match extension {
                    Extension::SignatureAlgorithms(schemes) => Some(schemes),
                    _ => None,
                })
                .ok_or(TLSError::BadMessage)?;
            return Ok(Self { schemes });
        }

        let _certificate_types = read_length_prefixed(body, 1).map_err(TLSError::from)?;
        let schemes = if version == ProtocolVersion::Tls12 {
            let raw = read_length_prefixed(body, 2).map_err(TLSError::from)?;
            let mut raw = ByteBuffer::from_slice(&raw);
            let mut schemes = Vec::new();
            while raw.remaining() != 0 {
                let code = raw.read_u16().map_err(|_| TLSError::BadMessage)?;
                if let Ok(scheme) = SignatureScheme::try_from(code) {
                    schemes.push(scheme);
                }
            }
            schemes
        } else {
            vec![SignatureScheme::RsaPkcs1Sha1, SignatureScheme::EcdsaSha1]
        };
        let _authorities = read_length_prefixed(body, 2).map_err(TLSError::from)?;
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }
        Ok(Self { schemes })
    }
}

/// The client's half of the key exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientKeyExchange {
    /// RSA-encrypted premaster secret.
    Rsa(Vec<u8>),
    /// Ephemeral ECDH public point.
    Ecdhe(Vec<u8>),
    /// Ephemeral DH public value.
    Dhe(Vec<u8>),
    /// Hybrid: ECDH point plus KEM ciphertext.
    EcdheKem { public: Vec<u8>, kem_ciphertext: Vec<u8> },
}

impl Encode for ClientKeyExchange {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::ClientKeyExchange, |buf| match self {
            Self::Rsa(encrypted) => {
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(encrypted)?))
            },
            Self::Ecdhe(public) => {
                write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(public)?))
            },
            Self::Dhe(public) => {
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(public)?))
            },
            Self::EcdheKem {
                public,
                kem_ciphertext,
            } => {
                write_length_prefixed(buf, 1, |buf| Ok(buf.write_bytes(public)?))?;
                write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(kem_ciphertext)?))
            },
        })
    }
}

impl ClientKeyExchange {
    pub fn decode_body(
        kind: Option<KexKind>,
        body: &mut ByteBuffer<'_>,
    ) -> Result<Self, TLSError> {
        let message = match kind {
            None => Self::Rsa(read_length_prefixed(body, 2).map_err(TLSError::from)?),
            Some(KexKind::Ecdhe) => {
                Self::Ecdhe(read_length_prefixed(body, 1).map_err(TLSError::from)?)
            },
            Some(KexKind::Dhe) => {
                Self::Dhe(read_length_prefixed(body, 2).map_err(TLSError::from)?)
            },
            Some(KexKind::EcdheKem) => Self::EcdheKem {
                public: read_length_prefixed(body, 1).map_err(TLSError::from)?,
                kem_ciphertext: read_length_prefixed(body, 2).map_err(TLSError::from)?,
            },
        };
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }
        Ok(message)
    }
}

#[derive(Clone, Debug)]
pub struct CertificateVerify {
    pub scheme: Option<SignatureScheme>,
    pub signature: Vec<u8>,
}

impl Encode for CertificateVerify {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::CertificateVerify, |buf| {
            if let Some(scheme) = self.scheme {
                scheme.encode(buf)?;
            }
            write_length_prefixed(buf, 2, |buf| Ok(buf.write_bytes(&self.signature)?))
        })
    }
}

impl CertificateVerify {
    pub fn decode_body(
        version: ProtocolVersion,
        body: &mut ByteBuffer<'_>,
    ) -> Result<Self, TLSError> {
        let scheme = if version >= ProtocolVersion::Tls12 {
            Some(SignatureScheme::decode(body).map_err(|_| TLSError::IllegalParameter)?)
        } else {
            None
        };
        let signature = read_length_prefixed(body, 2).map_err(TLSError::from)?;
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }
        Ok(Self { scheme, signature })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: Vec<u8>,
}

impl Encode for Finished {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::Finished, |buf| {
            Ok(buf.write_bytes(&self.verify_data)?)
        })
    }
}

impl Finished {
    pub fn decode_body(body: &mut ByteBuffer<'_>) -> Result<Self, TLSError> {
        let mut verify_data = vec![0; body.remaining()];
        body.read_bytes(&mut verify_data)
            .map_err(|_| TLSError::BadMessage)?;
        Ok(Self { verify_data })
    }
}

#[derive(Clone, Debug)]
pub struct EncryptedExtensions {
    pub extensions: Vec<Extension>,
}

impl Encode for EncryptedExtensions {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> encoding::Result<()> {
        write_message(buf, HandshakeType::EncryptedExtensions, |buf| {
            encode_extensions(&self.extensions, buf)
        })
    }
}

impl EncryptedExtensions {
    pub fn decode_body(body: &mut ByteBuffer<'_>) -> Result<Self, TLSError> {
        let extensions = decode_extensions(body, HelloSide::Server)?;
        if body.remaining() != 0 {
            return Err(TLSError::BadMessage);
        }
        Ok(Self { extensions })
    }
}

/// An empty-bodied message: ServerHelloDone or HelloRequest.
pub(crate) fn encode_empty(
    message_type: HandshakeType,
    buf: &mut ByteBuffer<'_>,
) -> encoding::Result<()> {
    write_message(buf, message_type, |_| Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerName;

    #[test]
    fn client_hello_round_trip() {
        let hello = ClientHello {
            legacy_version: ProtocolVersion::Tls12,
            random: [7; 32],
            session_id: vec![1, 2, 3],
            cipher_suites: vec![[0x13, 0x01], [0xC0, 0x2F]],
            extensions: vec![
                Extension::ServerName(ServerName::new("example.com").unwrap()),
                Extension::SupportedGroups(vec![NamedGroup::X25519]),
            ],
        };

        let bytes = hello.to_bytes();
        assert_eq!(bytes[0], u8::from(HandshakeType::ClientHello));
        let length = u32::from_be_bytes([0, bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(length, bytes.len() - HEADER_LEN);

        let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..]);
        let parsed = ClientHello::decode_body(&mut body).unwrap();
        assert_eq!(parsed.random, hello.random);
        assert_eq!(parsed.session_id, hello.session_id);
        assert_eq!(parsed.cipher_suites, hello.cipher_suites);
        assert_eq!(parsed.extensions.len(), 2);
    }

    #[test]
    fn server_hello_round_trip() {
        let hello = ServerHello {
            legacy_version: ProtocolVersion::Tls12,
            random: [9; 32],
            session_id: vec![],
            cipher_suite: [0x13, 0x02],
            extensions: vec![Extension::SelectedVersion(ProtocolVersion::Tls13)],
        };

        let bytes = hello.to_bytes();
        let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..]);
        let parsed = ServerHello::decode_body(&mut body).unwrap();
        assert_eq!(parsed.cipher_suite, [0x13, 0x02]);
        assert_eq!(
            parsed.extensions,
            vec![Extension::SelectedVersion(ProtocolVersion::Tls13)]
        );
    }

    #[test]
    fn certificate_chain_both_wire_forms() {
        let chain = CertificateChain {
            certificates: vec![vec![1, 2, 3], vec![4, 5]],
        };

        for version in [ProtocolVersion::Tls12, ProtocolVersion::Tls13] {
            let mut buf = ByteBuffer::growable(64);
            chain.encode_message(version, &mut buf).unwrap();
            let bytes = buf.readable().to_vec();
            let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..]);
            let parsed = CertificateChain::decode_body(version, &mut body).unwrap();
            assert_eq!(parsed, chain, "{version:?}");
        }
    }

    #[test]
    fn server_key_exchange_ecdhe_round_trip() {
        let message = ServerKeyExchange {
            params: KexParams::Ecdhe {
                group: NamedGroup::X25519,
                public: vec![0xAA; 32],
            },
            scheme: Some(SignatureScheme::RsaPkcs1Sha256),
            signature: vec![0xBB; 64],
        };

        let bytes = message.to_bytes();
        let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..]);
        let parsed =
            ServerKeyExchange::decode_body(KexKind::Ecdhe, ProtocolVersion::Tls12, &mut body)
                .unwrap();
        assert_eq!(parsed.params, message.params);
        assert_eq!(parsed.scheme, message.scheme);
        assert_eq!(parsed.signature, message.signature);
    }

    #[test]
    fn hybrid_key_exchange_round_trip() {
        let message = ServerKeyExchange {
            params: KexParams::EcdheKem {
                group: NamedGroup::Secp256r1,
                public: vec![4; 65],
                kem: KemId::Bike1Level1R1,
                kem_public: vec![5; 100],
            },
            scheme: Some(SignatureScheme::RsaPkcs1Sha384),
            signature: vec![6; 48],
        };

        let bytes = message.to_bytes();
        let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..]);
        let parsed =
            ServerKeyExchange::decode_body(KexKind::EcdheKem, ProtocolVersion::Tls12, &mut body)
                .unwrap();
        assert_eq!(parsed.params, message.params);

        let ckx = ClientKeyExchange::EcdheKem {
            public: vec![4; 65],
            kem_ciphertext: vec![7; 120],
        };
        let bytes = ckx.to_bytes();
        let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..]);
        let parsed = ClientKeyExchange::decode_body(Some(KexKind::EcdheKem), &mut body).unwrap();
        assert_eq!(parsed, ckx);
    }

    #[test]
    fn truncated_bodies_are_rejected() {
        let hello = ServerHello {
            legacy_version: ProtocolVersion::Tls12,
            random: [9; 32],
            session_id: vec![],
            cipher_suite: [0x00, 0x2F],
            extensions: vec![],
        };
        let bytes = hello.to_bytes();

        // Drop the final byte of the body
        let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..bytes.len() - 1]);
        assert!(ServerHello::decode_body(&mut body).is_err());
    }

    #[test]
    fn certificate_request_forms() {
        let request = CertificateRequest {
            schemes: vec![
                SignatureScheme::EcdsaSecp256r1Sha256,
                SignatureScheme::RsaPssRsaeSha256,
            ],
        };

        for version in [
            ProtocolVersion::Tls10,
            ProtocolVersion::Tls12,
            ProtocolVersion::Tls13,
        ] {
            let mut buf = ByteBuffer::growable(64);
            request.encode_message(version, &mut buf).unwrap();
            let bytes = buf.readable().to_vec();
            let mut body = ByteBuffer::from_slice(&bytes[HEADER_LEN..]);
            let parsed = CertificateRequest::decode_body(version, &mut body).unwrap();
            if version >= ProtocolVersion::Tls12 {
                assert_eq!(parsed.schemes, request.schemes, "{version:?}");
            }
        }
    }
}
