//! Key exchange arithmetic and handshake signatures.
//!
//! Ephemeral ECDH runs over x25519 or P-256; finite-field DHE takes its
//! group from the configuration. Peer signatures verify against the leaf
//! certificate's SubjectPublicKeyInfo.

use md5::{Digest, Md5};
use p256::{
    ecdsa::{
        signature::hazmat::{PrehashSigner, PrehashVerifier},
        Signature as EcdsaSignature, SigningKey, VerifyingKey,
    },
    elliptic_curve::sec1::ToEncodedPoint,
};
use rand_core::{OsRng, RngCore};
use rsa::{
    pkcs1::DecodeRsaPublicKey,
    BigUint, Pkcs1v15Sign, Pss, RsaPublicKey,
};
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use zeroize::Zeroizing;

use crate::{
    der::{self, oid},
    handshake::extensions::{NamedGroup, SignatureScheme},
    ProtocolVersion, TLSError,
};

/// Our side's ephemeral key exchange state, alive only while the handshake
/// is in flight.
pub(crate) enum EphemeralKex {
    X25519(Option<x25519_dalek::EphemeralSecret>),
    P256(Option<p256::ecdh::EphemeralSecret>),
    Dhe {
        prime: BigUint,
        generator: BigUint,
        private: Zeroizing<Vec<u8>>,
    },
}

impl EphemeralKex {
    pub fn generate(group: NamedGroup) -> Self {
        match group {
            NamedGroup::X25519 => {
                Self::X25519(Some(x25519_dalek::EphemeralSecret::random_from_rng(OsRng)))
            },
            NamedGroup::Secp256r1 => {
                Self::P256(Some(p256::ecdh::EphemeralSecret::random(&mut OsRng)))
            },
        }
    }

    pub fn generate_dhe(prime: &[u8], generator: &[u8]) -> Self {
        let mut private = Zeroizing::new(vec![0; 32]);
        OsRng.fill_bytes(&mut private);
        Self::Dhe {
            prime: BigUint::from_bytes_be(prime),
            generator: BigUint::from_bytes_be(generator),
            private,
        }
    }

    /// The public value to put on the wire: raw little-x25519 bytes, an
    /// uncompressed SEC1 point, or a big-endian DH value.
    pub fn public_bytes(&self) -> Vec<u8> {
        match self {
            Self::X25519(secret) => {
                let secret = secret.as_ref().expect("key exchange still pending");
                x25519_dalek::PublicKey::from(secret).as_bytes().to_vec()
            },
            Self::P256(secret) => {
                let secret = secret.as_ref().expect("key exchange still pending");
                secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec()
            },
            Self::Dhe {
                prime,
                generator,
                private,
            } => generator
                .modpow(&BigUint::from_bytes_be(private), prime)
                .to_bytes_be(),
        }
    }

    /// Complete the exchange against the peer's public value. Consumes the
    /// ephemeral secret; a second call is a state error.
    pub fn shared_secret(&mut self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, TLSError> {
        match self {
            Self::X25519(secret) => {
                let secret = secret.take().ok_or(TLSError::InvalidState("key exchange done"))?;
                let peer: [u8; 32] = peer_public
                    .try_into()
                    .map_err(|_| TLSError::IllegalParameter)?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
                // An all-zero output means the peer sent a low-order point
                if shared.as_bytes().iter().all(|&byte| byte == 0) {
                    return Err(TLSError::IllegalParameter);
                }
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            },
            Self::P256(secret) => {
                let secret = secret.take().ok_or(TLSError::InvalidState("key exchange done"))?;
                let peer = p256::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| TLSError::IllegalParameter)?;
                let shared = secret.diffie_hellman(&peer);
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            },
            Self::Dhe {
                prime,
                private,
                ..
            } => {
                let peer = BigUint::from_bytes_be(peer_public);
                let two = BigUint::from(2u8);
                if peer < two || peer > prime.clone() - two {
                    return Err(TLSError::IllegalParameter);
                }
                let shared = peer.modpow(&BigUint::from_bytes_be(private), prime);
                // RFC 5246 8.1.2: leading zero octets are stripped
                Ok(Zeroizing::new(shared.to_bytes_be()))
            },
        }
    }
}

/// The peer's authenticated public key, lifted out of its leaf certificate.
pub(crate) enum PeerPublicKey {
    Rsa(RsaPublicKey),
    Ecdsa(VerifyingKey),
}

impl PeerPublicKey {
    pub fn from_certificate(certificate: &der::Certificate) -> Result<Self, TLSError> {
        let spki = &certificate.spki;
        if spki.algorithm == oid::RSA_ENCRYPTION {
            let key = RsaPublicKey::from_pkcs1_der(&spki.public_key)
                .map_err(|_| TLSError::BadCertificate)?;
            Ok(Self::Rsa(key))
        } else if spki.algorithm == oid::EC_PUBLIC_KEY {
            if spki.parameters.as_deref() != Some(oid::PRIME256V1) {
                return Err(TLSError::BadCertificate);
            }
            let key = VerifyingKey::from_sec1_bytes(&spki.public_key)
                .map_err(|_| TLSError::BadCertificate)?;
            Ok(Self::Ecdsa(key))
        } else {
            Err(TLSError::BadCertificate)
        }
    }

    #[must_use]
    pub fn is_rsa(&self) -> bool {
        matches!(self, Self::Rsa(_))
    }

    /// Verify a handshake signature. `scheme` is absent below TLS 1.2,
    /// where RSA signs the raw MD5+SHA-1 digest.
    pub fn verify(
        &self,
        scheme: Option<SignatureScheme>,
        message: &[u8],
        signature: &[u8],
    ) -> Result<(), TLSError> {
        match (self, scheme) {
            (Self::Rsa(key), None) => {
                let digest = md5_sha1(message);
                key.verify(Pkcs1v15Sign::new_unprefixed(), &digest, signature)
                    .map_err(|_| TLSError::BadSignature)
            },
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha1)) => key
                .verify(
                    Pkcs1v15Sign::new::<Sha1>(),
                    &Sha1::digest(message),
                    signature,
                )
                .map_err(|_| TLSError::BadSignature),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha256)) => key
                .verify(
                    Pkcs1v15Sign::new::<Sha256>(),
                    &Sha256::digest(message),
                    signature,
                )
                .map_err(|_| TLSError::BadSignature),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha384)) => key
                .verify(
                    Pkcs1v15Sign::new::<Sha384>(),
                    &Sha384::digest(message),
                    signature,
                )
                .map_err(|_| TLSError::BadSignature),
            (Self::Rsa(key), Some(SignatureScheme::RsaPssRsaeSha256)) => key
                .verify(Pss::new::<Sha256>(), &Sha256::digest(message), signature)
                .map_err(|_| TLSError::BadSignature),
            (Self::Rsa(key), Some(SignatureScheme::RsaPssRsaeSha384)) => key
                .verify(Pss::new::<Sha384>(), &Sha384::digest(message), signature)
                .map_err(|_| TLSError::BadSignature),
            (Self::Ecdsa(key), Some(SignatureScheme::EcdsaSecp256r1Sha256)) => {
                let parsed = EcdsaSignature::from_der(signature)
                    .map_err(|_| TLSError::BadSignature)?;
                key.verify_prehash(&Sha256::digest(message), &parsed)
                    .map_err(|_| TLSError::BadSignature)
            },
            (Self::Ecdsa(key), Some(SignatureScheme::EcdsaSha1)) => {
                let parsed = EcdsaSignature::from_der(signature)
                    .map_err(|_| TLSError::BadSignature)?;
                key.verify_prehash(&Sha1::digest(message), &parsed)
                    .map_err(|_| TLSError::BadSignature)
            },
            _ => Err(TLSError::IllegalParameter),
        }
    }

    /// Like [Self::verify], but over an already-computed digest (the TLS
    /// 1.2 CertificateVerify signs the transcript hash, which only exists
    /// in digest form).
    pub fn verify_digest(
        &self,
        scheme: Option<SignatureScheme>,
        digest: &[u8],
        signature: &[u8],
    ) -> Result<(), TLSError> {
        match (self, scheme) {
            (Self::Rsa(key), None) => key
                .verify(Pkcs1v15Sign::new_unprefixed(), digest, signature)
                .map_err(|_| TLSError::BadSignature),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha256)) => key
                .verify(Pkcs1v15Sign::new::<Sha256>(), digest, signature)
                .map_err(|_| TLSError::BadSignature),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha384)) => key
                .verify(Pkcs1v15Sign::new::<Sha384>(), digest, signature)
                .map_err(|_| TLSError::BadSignature),
            (Self::Ecdsa(key), Some(SignatureScheme::EcdsaSecp256r1Sha256)) => {
                let parsed = EcdsaSignature::from_der(signature)
                    .map_err(|_| TLSError::BadSignature)?;
                key.verify_prehash(digest, &parsed)
                    .map_err(|_| TLSError::BadSignature)
            },
            _ => Err(TLSError::IllegalParameter),
        }
    }

    /// RSA key transport: encrypt the premaster to the peer.
    pub fn encrypt_premaster(&self, premaster: &[u8]) -> Result<Vec<u8>, TLSError> {
        match self {
            Self::Rsa(key) => key
                .encrypt(&mut OsRng, rsa::Pkcs1v15Encrypt, premaster)
                .map_err(|_| TLSError::Internal("RSA encrypt")),
            Self::Ecdsa(_) => Err(TLSError::HandshakeFailure),
        }
    }
}

/// Our own signing key, shared between the config and the handshake.
pub(crate) enum SigningKeyMaterial {
    Rsa(Box<rsa::RsaPrivateKey>),
    Ecdsa(Box<SigningKey>),
}

impl SigningKeyMaterial {
    /// The signature scheme to use for a given protocol version.
    #[must_use]
    pub fn default_scheme(&self, version: ProtocolVersion) -> Option<SignatureScheme> {
        match (self, version) {
            (_, ProtocolVersion::Tls10 | ProtocolVersion::Tls11) => None,
            (Self::Rsa(_), ProtocolVersion::Tls12) => Some(SignatureScheme::RsaPkcs1Sha256),
            (Self::Rsa(_), ProtocolVersion::Tls13) => Some(SignatureScheme::RsaPssRsaeSha256),
            (Self::Ecdsa(_), _) => Some(SignatureScheme::EcdsaSecp256r1Sha256),
        }
    }

    /// Pick a scheme the peer also accepts.
    #[must_use]
    pub fn scheme_from(
        &self,
        version: ProtocolVersion,
        peer_schemes: &[SignatureScheme],
    ) -> Option<SignatureScheme> {
        let preferred = self.default_scheme(version)?;
        if peer_schemes.is_empty() || peer_schemes.contains(&preferred) {
            return Some(preferred);
        }
        // Fall back to anything of ours the peer listed
        let alternatives: &[SignatureScheme] = match self {
            Self::Rsa(_) if version == ProtocolVersion::Tls13 => {
                &[SignatureScheme::RsaPssRsaeSha384]
            },
            Self::Rsa(_) => &[
                SignatureScheme::RsaPkcs1Sha384,
                SignatureScheme::RsaPkcs1Sha1,
            ],
            Self::Ecdsa(_) => &[],
        };
        alternatives
            .iter()
            .copied()
            .find(|scheme| peer_schemes.contains(scheme))
    }

    pub fn sign(
        &self,
        scheme: Option<SignatureScheme>,
        message: &[u8],
    ) -> Result<Vec<u8>, TLSError> {
        match (self, scheme) {
            (Self::Rsa(key), None) => {
                let digest = md5_sha1(message);
                key.sign(Pkcs1v15Sign::new_unprefixed(), &digest)
                    .map_err(|_| TLSError::Internal("RSA sign"))
            },
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha1)) => key
                .sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(message))
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha256)) => key
                .sign(Pkcs1v15Sign::new::<Sha256>(), &Sha256::digest(message))
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha384)) => key
                .sign(Pkcs1v15Sign::new::<Sha384>(), &Sha384::digest(message))
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Rsa(key), Some(SignatureScheme::RsaPssRsaeSha256)) => key
                .sign_with_rng(&mut OsRng, Pss::new::<Sha256>(), &Sha256::digest(message))
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Rsa(key), Some(SignatureScheme::RsaPssRsaeSha384)) => key
                .sign_with_rng(&mut OsRng, Pss::new::<Sha384>(), &Sha384::digest(message))
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Ecdsa(key), Some(SignatureScheme::EcdsaSecp256r1Sha256)) => {
                let signature: EcdsaSignature = key
                    .sign_prehash(&Sha256::digest(message))
                    .map_err(|_| TLSError::Internal("ECDSA sign"))?;
                Ok(signature.to_der().as_bytes().to_vec())
            },
            _ => Err(TLSError::MissingPrivateKey),
        }
    }

    /// Like [Self::sign], but over an already-computed digest.
    pub fn sign_digest(
        &self,
        scheme: Option<SignatureScheme>,
        digest: &[u8],
    ) -> Result<Vec<u8>, TLSError> {
        match (self, scheme) {
            (Self::Rsa(key), None) => key
                .sign(Pkcs1v15Sign::new_unprefixed(), digest)
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha256)) => key
                .sign(Pkcs1v15Sign::new::<Sha256>(), digest)
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Rsa(key), Some(SignatureScheme::RsaPkcs1Sha384)) => key
                .sign(Pkcs1v15Sign::new::<Sha384>(), digest)
                .map_err(|_| TLSError::Internal("RSA sign")),
            (Self::Ecdsa(key), Some(SignatureScheme::EcdsaSecp256r1Sha256)) => {
                let signature: EcdsaSignature = key
                    .sign_prehash(digest)
                    .map_err(|_| TLSError::Internal("ECDSA sign"))?;
                Ok(signature.to_der().as_bytes().to_vec())
            },
            _ => Err(TLSError::MissingPrivateKey),
        }
    }
}

/// The TLS 1.0/1.1 signature input: MD5 and SHA-1 digests concatenated.
fn md5_sha1(message: &[u8]) -> [u8; 36] {
    let mut digest = [0; 36];
    digest[..16].copy_from_slice(&Md5::digest(message));
    digest[16..].copy_from_slice(&Sha1::digest(message));
    digest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x25519_agreement() {
        let mut alice = EphemeralKex::generate(NamedGroup::X25519);
        let mut bob = EphemeralKex::generate(NamedGroup::X25519);
        let alice_public = alice.public_bytes();
        let bob_public = bob.public_bytes();

        let alice_shared = alice.shared_secret(&bob_public).unwrap();
        let bob_shared = bob.shared_secret(&alice_public).unwrap();
        assert_eq!(alice_shared, bob_shared);
        assert_eq!(alice_shared.len(), 32);

        // The secret is single-use
        assert!(alice.shared_secret(&bob_public).is_err());
    }

    #[test]
    fn p256_agreement() {
        let mut alice = EphemeralKex::generate(NamedGroup::Secp256r1);
        let mut bob = EphemeralKex::generate(NamedGroup::Secp256r1);
        let alice_public = alice.public_bytes();
        assert_eq!(alice_public[0], 4, "uncompressed SEC1 point");
        let bob_public = bob.public_bytes();

        assert_eq!(
            alice.shared_secret(&bob_public).unwrap(),
            bob.shared_secret(&alice_public).unwrap()
        );
    }

    #[test]
    fn dhe_agreement() {
        // RFC 2409 Oakley group 2 (1024-bit MODP)
        let prime = {
            let hex = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                       020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                       4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                       EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";
            hex.as_bytes()
                .chunks(2)
                .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
                .collect::<Vec<u8>>()
        };
        let generator = vec![2];

        let mut server = EphemeralKex::generate_dhe(&prime, &generator);
        let mut client = EphemeralKex::generate_dhe(&prime, &generator);
        let server_public = server.public_bytes();
        let client_public = client.public_bytes();

        assert_eq!(
            server.shared_secret(&client_public).unwrap(),
            client.shared_secret(&server_public).unwrap()
        );
    }

    #[test]
    fn dhe_rejects_degenerate_publics() {
        let prime = vec![0xFF; 32];
        let mut kex = EphemeralKex::generate_dhe(&prime, &[2]);
        assert!(kex.shared_secret(&[1]).is_err());
        assert!(kex.shared_secret(&[0]).is_err());
    }

    #[test]
    fn ecdsa_sign_verify_round_trip() {
        let signing_key = SigningKey::random(&mut OsRng);
        let material = SigningKeyMaterial::Ecdsa(Box::new(signing_key.clone()));

        let message = b"client random server random params";
        let signature = material
            .sign(Some(SignatureScheme::EcdsaSecp256r1Sha256), message)
            .unwrap();

        let peer = PeerPublicKey::Ecdsa(VerifyingKey::from(&signing_key));
        peer.verify(
            Some(SignatureScheme::EcdsaSecp256r1Sha256),
            message,
            &signature,
        )
        .unwrap();

        assert!(peer
            .verify(
                Some(SignatureScheme::EcdsaSecp256r1Sha256),
                b"tampered",
                &signature
            )
            .is_err());
    }
}
