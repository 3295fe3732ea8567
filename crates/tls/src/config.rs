//! Shared connection configuration.
//!
//! A config is built once, then attached to any number of connections
//! behind an [std::sync::Arc] and never mutated afterwards. It owns the
//! certificate chain (an index-ordered list, leaf first), the private key,
//! optional DH parameters, and the negotiation preference tables.

use std::sync::Arc;

use crate::{
    cipher_suite::{self, CipherSuite},
    der::{Reader, TypeTag},
    handshake::extensions::MaxFragmentLength,
    handshake::kex::SigningKeyMaterial,
    kem::{self, Kem, KemAlgorithm},
    pem, ProtocolVersion, TLSError,
};

use p256::ecdsa::SigningKey;
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::DecodePrivateKey,
    RsaPrivateKey,
};

/// Whether a server demands a client certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ClientAuth {
    #[default]
    None,
    /// Request one; an empty client Certificate is tolerated.
    Request,
    /// Request one and fail the handshake without it.
    Require,
}

/// Finite-field Diffie-Hellman group parameters (PKCS#3).
#[derive(Clone, Debug)]
pub(crate) struct DhParams {
    pub prime: Vec<u8>,
    pub generator: Vec<u8>,
}

pub struct TLSConfig {
    /// DER certificates, leaf first.
    pub(crate) certificate_chain: Vec<Vec<u8>>,
    pub(crate) private_key: Option<SigningKeyMaterial>,
    pub(crate) dh_params: Option<DhParams>,
    pub(crate) cipher_preferences: &'static [&'static CipherSuite],
    pub(crate) kem_preferences: &'static [&'static KemAlgorithm],
    pub(crate) kem_backend: Option<Arc<dyn Kem + Send + Sync>>,
    pub(crate) alpn_protocols: Vec<Vec<u8>>,
    /// Client: ask for an OCSP staple. Server: the staple to send.
    pub(crate) status_request: bool,
    pub(crate) ocsp_response: Option<Vec<u8>>,
    pub(crate) client_auth: ClientAuth,
    pub(crate) max_fragment_length: Option<MaxFragmentLength>,
    /// Ceiling on the negotiated protocol version.
    pub(crate) maximum_version: ProtocolVersion,
}

impl Default for TLSConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TLSConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            certificate_chain: Vec::new(),
            private_key: None,
            dh_params: None,
            cipher_preferences: cipher_suite::PREFERENCES_DEFAULT,
            kem_preferences: kem::PREFERENCES_ROUND1,
            kem_backend: None,
            alpn_protocols: Vec::new(),
            status_request: false,
            ocsp_response: None,
            client_auth: ClientAuth::None,
            max_fragment_length: None,
            maximum_version: ProtocolVersion::Tls13,
        }
    }

    /// Append every `CERTIFICATE` block from a concatenated PEM bundle.
    /// The first block of the first call is the leaf.
    pub fn add_certificate_chain_pem(&mut self, input: &str) -> Result<&mut Self, TLSError> {
        let blocks = pem::parse_blocks(input)?;
        let mut added = 0;
        for block in blocks {
            if block.label == "CERTIFICATE" {
                self.certificate_chain.push(block.der);
                added += 1;
            }
        }
        if added == 0 {
            return Err(TLSError::InvalidPem);
        }
        Ok(self)
    }

    /// Load the private key from PEM: PKCS#1 (`RSA PRIVATE KEY`),
    /// SEC1 (`EC PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`).
    pub fn set_private_key_pem(&mut self, input: &str) -> Result<&mut Self, TLSError> {
        let blocks = pem::parse_blocks(input)?;
        for block in blocks {
            let key = match block.label.as_str() {
                "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(&block.der)
                    .map(Box::new)
                    .map(SigningKeyMaterial::Rsa)
                    .map_err(|_| TLSError::InvalidPem)?,
                "EC PRIVATE KEY" => p256::SecretKey::from_sec1_der(&block.der)
                    .map(|secret| SigningKeyMaterial::Ecdsa(Box::new(SigningKey::from(secret))))
                    .map_err(|_| TLSError::InvalidPem)?,
                "PRIVATE KEY" => RsaPrivateKey::from_pkcs8_der(&block.der)
                    .map(Box::new)
                    .map(SigningKeyMaterial::Rsa)
                    .or_else(|_| {
                        p256::SecretKey::from_pkcs8_der(&block.der).map(|secret| {
                            SigningKeyMaterial::Ecdsa(Box::new(SigningKey::from(secret)))
                        })
                    })
                    .map_err(|_| TLSError::InvalidPem)?,
                _ => continue,
            };
            self.private_key = Some(key);
            return Ok(self);
        }
        Err(TLSError::InvalidPem)
    }

    /// Load `DH PARAMETERS` (PKCS#3: `SEQUENCE { prime, generator }`).
    pub fn set_dh_params_pem(&mut self, input: &str) -> Result<&mut Self, TLSError> {
        let blocks = pem::parse_blocks(input)?;
        let block = blocks
            .iter()
            .find(|block| block.label == "DH PARAMETERS")
            .ok_or(TLSError::InvalidPem)?;

        let mut outer = Reader::new(&block.der);
        let mut params = Reader::new(outer.expect(TypeTag::SEQUENCE).map_err(TLSError::from)?);
        let prime = params.expect(TypeTag::INTEGER).map_err(TLSError::from)?;
        let generator = params.expect(TypeTag::INTEGER).map_err(TLSError::from)?;

        // DER integers are signed; drop the sign-padding octet
        let strip = |bytes: &[u8]| match bytes {
            [0, rest @ ..] if !rest.is_empty() => rest.to_vec(),
            other => other.to_vec(),
        };
        self.dh_params = Some(DhParams {
            prime: strip(prime),
            generator: strip(generator),
        });
        Ok(self)
    }

    /// Cap the protocol version this endpoint negotiates.
    pub fn set_maximum_version(&mut self, version: ProtocolVersion) -> &mut Self {
        self.maximum_version = version;
        self
    }

    /// Install an explicit suite preference list instead of a named tag.
    pub fn set_cipher_preferences_list(
        &mut self,
        preferences: &'static [&'static CipherSuite],
    ) -> &mut Self {
        self.cipher_preferences = preferences;
        self
    }

    /// Select a cipher preference table by its version tag.
    pub fn set_cipher_preferences(&mut self, tag: &str) -> Result<&mut Self, TLSError> {
        self.cipher_preferences =
            cipher_suite::preferences_from_tag(tag).ok_or(TLSError::UnknownPreferenceTag)?;
        self.kem_preferences = match tag {
            "pq-round1" => kem::PREFERENCES_ROUND1,
            _ => self.kem_preferences,
        };
        Ok(self)
    }

    /// Install a KEM backend for the hybrid suites. Without one, hybrid
    /// suites are never selected.
    pub fn set_kem_backend(&mut self, backend: Arc<dyn Kem + Send + Sync>) -> &mut Self {
        self.kem_backend = Some(backend);
        self
    }

    pub fn set_kem_preferences(&mut self, preferences: &'static [&'static KemAlgorithm]) -> &mut Self {
        self.kem_preferences = preferences;
        self
    }

    /// The ALPN protocols this endpoint speaks, most preferred first.
    pub fn set_protocol_preferences<P: AsRef<[u8]>>(&mut self, protocols: &[P]) -> &mut Self {
        self.alpn_protocols = protocols
            .iter()
            .map(|protocol| protocol.as_ref().to_vec())
            .collect();
        self
    }

    pub fn set_status_request(&mut self, enabled: bool) -> &mut Self {
        self.status_request = enabled;
        self
    }

    /// The DER OCSP response a server staples when asked.
    pub fn set_ocsp_response(&mut self, response: Vec<u8>) -> &mut Self {
        self.ocsp_response = Some(response);
        self
    }

    pub fn set_client_auth(&mut self, client_auth: ClientAuth) -> &mut Self {
        self.client_auth = client_auth;
        self
    }

    pub fn set_max_fragment_length(&mut self, length: MaxFragmentLength) -> &mut Self {
        self.max_fragment_length = Some(length);
        self
    }

    #[must_use]
    pub(crate) fn has_rsa_key(&self) -> bool {
        matches!(self.private_key, Some(SigningKeyMaterial::Rsa(_)))
    }

    #[must_use]
    pub(crate) fn has_ecdsa_key(&self) -> bool {
        matches!(self.private_key, Some(SigningKeyMaterial::Ecdsa(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preference_tags() {
        let mut config = TLSConfig::new();
        config.set_cipher_preferences("legacy").unwrap();
        assert!(std::ptr::eq(
            config.cipher_preferences,
            cipher_suite::PREFERENCES_LEGACY
        ));
        assert!(matches!(
            config.set_cipher_preferences("does-not-exist"),
            Err(TLSError::UnknownPreferenceTag)
        ));
    }

    #[test]
    fn alpn_preferences_keep_order() {
        let mut config = TLSConfig::new();
        config.set_protocol_preferences(&["http/1.1", "h2"]);
        assert_eq!(
            config.alpn_protocols,
            vec![b"http/1.1".to_vec(), b"h2".to_vec()]
        );
    }

    #[test]
    fn dh_params_pem_round_trip() {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        // SEQUENCE { INTEGER 0x00F7 (sign-padded), INTEGER 2 }
        let der = [0x30, 0x07, 0x02, 0x02, 0x00, 0xF7, 0x02, 0x01, 0x02];
        let pem = format!(
            "-----BEGIN DH PARAMETERS-----\n{}\n-----END DH PARAMETERS-----\n",
            STANDARD.encode(der)
        );

        let mut config = TLSConfig::new();
        config.set_dh_params_pem(&pem).unwrap();
        let params = config.dh_params.as_ref().unwrap();
        assert_eq!(params.prime, vec![0xF7]);
        assert_eq!(params.generator, vec![2]);
    }
}
