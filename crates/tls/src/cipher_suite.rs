//! Cipher suite descriptors and preference tables.
//!
//! Suites are immutable static table entries; the rest of the stack passes
//! `&'static CipherSuite` around and dispatches on the descriptor fields.

use crate::{kem::KemFamily, ProtocolVersion};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyExchange {
    /// RSA key transport: the client encrypts the premaster to the server key.
    Rsa,
    /// Ephemeral finite-field Diffie-Hellman, parameters from configuration.
    Dhe,
    /// Ephemeral elliptic-curve Diffie-Hellman.
    Ecdhe,
    /// ECDHE combined with a post-quantum KEM.
    EcdheKem(KemFamily),
    /// TLS 1.3 suites don't pin the key exchange; it comes from `key_share`.
    Tls13,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Auth {
    Rsa,
    Ecdsa,
    /// TLS 1.3 suites don't pin the authentication method either.
    Any,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordCipherKind {
    /// Initial state, before any key install.
    Null,
    /// AES in CBC mode, MAC-then-encrypt.
    AesCbc { key_len: usize },
    /// AES-GCM AEAD.
    AesGcm { key_len: usize },
    /// ChaCha20-Poly1305 AEAD.
    ChaCha20Poly1305,
}

impl RecordCipherKind {
    #[must_use]
    pub fn is_aead(&self) -> bool {
        matches!(self, Self::AesGcm { .. } | Self::ChaCha20Poly1305)
    }

    #[must_use]
    pub fn key_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::AesCbc { key_len } | Self::AesGcm { key_len } => *key_len,
            Self::ChaCha20Poly1305 => 32,
        }
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        match self {
            Self::AesCbc { .. } => 16,
            _ => 0,
        }
    }

    /// Length of the IV taken from the key block.
    #[must_use]
    pub fn fixed_iv_len(&self, version: ProtocolVersion) -> usize {
        match self {
            Self::Null => 0,
            // TLS 1.0 takes the CBC IV from the key block; later versions
            // send an explicit IV per record instead.
            Self::AesCbc { .. } => {
                if version == ProtocolVersion::Tls10 {
                    16
                } else {
                    0
                }
            },
            Self::AesGcm { .. } => {
                if version == ProtocolVersion::Tls13 {
                    12
                } else {
                    4
                }
            },
            Self::ChaCha20Poly1305 => 12,
        }
    }

    /// Length of the per-record IV or nonce carried on the wire.
    #[must_use]
    pub fn explicit_iv_len(&self, version: ProtocolVersion) -> usize {
        match self {
            Self::AesCbc { .. } if version >= ProtocolVersion::Tls11 => 16,
            Self::AesGcm { .. } if version != ProtocolVersion::Tls13 => 8,
            _ => 0,
        }
    }

    #[must_use]
    pub fn tag_len(&self) -> usize {
        if self.is_aead() {
            16
        } else {
            0
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MacAlgorithm {
    Null,
    HmacSha1,
    HmacSha256,
    HmacSha384,
}

impl MacAlgorithm {
    #[must_use]
    pub fn mac_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::HmacSha1 => 20,
            Self::HmacSha256 => 32,
            Self::HmacSha384 => 48,
        }
    }

    #[must_use]
    pub fn key_len(&self) -> usize {
        self.mac_len()
    }
}

/// The hash backing the PRF (1.2) or the HKDF ladder and transcript (1.3).
/// TLS 1.0/1.1 always use the MD5/SHA-1 PRF regardless of suite.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    #[must_use]
    pub fn output_len(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }
}

#[derive(Debug)]
pub struct CipherSuite {
    /// The two-byte IANA code.
    pub code: [u8; 2],
    pub name: &'static str,
    pub key_exchange: KeyExchange,
    pub auth: Auth,
    pub cipher: RecordCipherKind,
    pub mac: MacAlgorithm,
    pub hash: HashAlgorithm,
    pub minimum_version: ProtocolVersion,
    pub tls13: bool,
}

impl PartialEq for CipherSuite {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl CipherSuite {
    #[must_use]
    pub fn usable_at(&self, version: ProtocolVersion) -> bool {
        if version == ProtocolVersion::Tls13 {
            self.tls13
        } else {
            !self.tls13 && self.minimum_version <= version
        }
    }

    #[must_use]
    pub fn kem_family(&self) -> Option<KemFamily> {
        match self.key_exchange {
            KeyExchange::EcdheKem(family) => Some(family),
            _ => None,
        }
    }
}

macro_rules! suite {
    ($ident: ident, $code: expr, $name: expr, $kx: expr, $auth: expr, $cipher: expr, $mac: expr, $hash: expr, $min: expr, $tls13: expr) => {
        pub static $ident: CipherSuite = CipherSuite {
            code: $code,
            name: $name,
            key_exchange: $kx,
            auth: $auth,
            cipher: $cipher,
            mac: $mac,
            hash: $hash,
            minimum_version: $min,
            tls13: $tls13,
        };
    };
}

use HashAlgorithm::{Sha256, Sha384};
use MacAlgorithm::{HmacSha1, HmacSha256, Null as NullMac};
use ProtocolVersion::{Tls10, Tls12, Tls13};
use RecordCipherKind::{AesCbc, AesGcm, ChaCha20Poly1305};

#[rustfmt::skip]
mod table {
    use super::*;

    // TLS 1.3
    suite!(TLS_AES_128_GCM_SHA256, [0x13, 0x01], "TLS_AES_128_GCM_SHA256",
        KeyExchange::Tls13, Auth::Any, AesGcm { key_len: 16 }, NullMac, Sha256, Tls13, true);
    suite!(TLS_AES_256_GCM_SHA384, [0x13, 0x02], "TLS_AES_256_GCM_SHA384",
        KeyExchange::Tls13, Auth::Any, AesGcm { key_len: 32 }, NullMac, Sha384, Tls13, true);
    suite!(TLS_CHACHA20_POLY1305_SHA256, [0x13, 0x03], "TLS_CHACHA20_POLY1305_SHA256",
        KeyExchange::Tls13, Auth::Any, ChaCha20Poly1305, NullMac, Sha256, Tls13, true);

    // ECDHE, AEAD
    suite!(TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256, [0xC0, 0x2F], "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        KeyExchange::Ecdhe, Auth::Rsa, AesGcm { key_len: 16 }, NullMac, Sha256, Tls12, false);
    suite!(TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384, [0xC0, 0x30], "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        KeyExchange::Ecdhe, Auth::Rsa, AesGcm { key_len: 32 }, NullMac, Sha384, Tls12, false);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256, [0xC0, 0x2B], "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        KeyExchange::Ecdhe, Auth::Ecdsa, AesGcm { key_len: 16 }, NullMac, Sha256, Tls12, false);
    suite!(TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384, [0xC0, 0x2C], "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        KeyExchange::Ecdhe, Auth::Ecdsa, AesGcm { key_len: 32 }, NullMac, Sha384, Tls12, false);
    suite!(TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256, [0xCC, 0xA8], "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        KeyExchange::Ecdhe, Auth::Rsa, ChaCha20Poly1305, NullMac, Sha256, Tls12, false);
    suite!(TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256, [0xCC, 0xA9], "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        KeyExchange::Ecdhe, Auth::Ecdsa, ChaCha20Poly1305, NullMac, Sha256, Tls12, false);

    // ECDHE, CBC
    suite!(TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA, [0xC0, 0x13], "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA",
        KeyExchange::Ecdhe, Auth::Rsa, AesCbc { key_len: 16 }, HmacSha1, Sha256, Tls10, false);
    suite!(TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA, [0xC0, 0x14], "TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA",
        KeyExchange::Ecdhe, Auth::Rsa, AesCbc { key_len: 32 }, HmacSha1, Sha256, Tls10, false);

    // DHE
    suite!(TLS_DHE_RSA_WITH_AES_128_CBC_SHA, [0x00, 0x33], "TLS_DHE_RSA_WITH_AES_128_CBC_SHA",
        KeyExchange::Dhe, Auth::Rsa, AesCbc { key_len: 16 }, HmacSha1, Sha256, Tls10, false);
    suite!(TLS_DHE_RSA_WITH_AES_256_CBC_SHA, [0x00, 0x39], "TLS_DHE_RSA_WITH_AES_256_CBC_SHA",
        KeyExchange::Dhe, Auth::Rsa, AesCbc { key_len: 32 }, HmacSha1, Sha256, Tls10, false);

    // RSA key transport
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA, [0x00, 0x2F], "TLS_RSA_WITH_AES_128_CBC_SHA",
        KeyExchange::Rsa, Auth::Rsa, AesCbc { key_len: 16 }, HmacSha1, Sha256, Tls10, false);
    suite!(TLS_RSA_WITH_AES_256_CBC_SHA, [0x00, 0x35], "TLS_RSA_WITH_AES_256_CBC_SHA",
        KeyExchange::Rsa, Auth::Rsa, AesCbc { key_len: 32 }, HmacSha1, Sha256, Tls10, false);
    suite!(TLS_RSA_WITH_AES_128_CBC_SHA256, [0x00, 0x3C], "TLS_RSA_WITH_AES_128_CBC_SHA256",
        KeyExchange::Rsa, Auth::Rsa, AesCbc { key_len: 16 }, HmacSha256, Sha256, Tls12, false);
    suite!(TLS_RSA_WITH_AES_128_GCM_SHA256, [0x00, 0x9C], "TLS_RSA_WITH_AES_128_GCM_SHA256",
        KeyExchange::Rsa, Auth::Rsa, AesGcm { key_len: 16 }, NullMac, Sha256, Tls12, false);
    suite!(TLS_RSA_WITH_AES_256_GCM_SHA384, [0x00, 0x9D], "TLS_RSA_WITH_AES_256_GCM_SHA384",
        KeyExchange::Rsa, Auth::Rsa, AesGcm { key_len: 32 }, NullMac, Sha384, Tls12, false);

    // Post-quantum hybrids (round-1 draft code points)
    suite!(TLS_ECDHE_BIKE_RSA_WITH_AES_256_GCM_SHA384, [0xFF, 0x04], "TLS_ECDHE_BIKE_RSA_WITH_AES_256_GCM_SHA384",
        KeyExchange::EcdheKem(KemFamily::Bike), Auth::Rsa, AesGcm { key_len: 32 }, NullMac, Sha384, Tls12, false);
    suite!(TLS_ECDHE_SIKE_RSA_WITH_AES_256_GCM_SHA384, [0xFF, 0x08], "TLS_ECDHE_SIKE_RSA_WITH_AES_256_GCM_SHA384",
        KeyExchange::EcdheKem(KemFamily::Sike), Auth::Rsa, AesGcm { key_len: 32 }, NullMac, Sha384, Tls12, false);
}

pub use table::*;

/// Every suite this implementation knows about.
pub static ALL_SUITES: &[&CipherSuite] = &[
    &TLS_AES_128_GCM_SHA256,
    &TLS_AES_256_GCM_SHA384,
    &TLS_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
    &TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
    &TLS_DHE_RSA_WITH_AES_128_CBC_SHA,
    &TLS_DHE_RSA_WITH_AES_256_CBC_SHA,
    &TLS_RSA_WITH_AES_128_CBC_SHA,
    &TLS_RSA_WITH_AES_256_CBC_SHA,
    &TLS_RSA_WITH_AES_128_CBC_SHA256,
    &TLS_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_BIKE_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_SIKE_RSA_WITH_AES_256_GCM_SHA384,
];

/// Modern default: 1.3 suites, then forward-secret AEAD 1.2 suites.
pub static PREFERENCES_DEFAULT: &[&CipherSuite] = &[
    &TLS_AES_128_GCM_SHA256,
    &TLS_AES_256_GCM_SHA384,
    &TLS_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
    &TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
];

/// Interoperability set: adds DHE and static-RSA CBC suites.
pub static PREFERENCES_LEGACY: &[&CipherSuite] = &[
    &TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
    &TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA,
    &TLS_DHE_RSA_WITH_AES_128_CBC_SHA,
    &TLS_DHE_RSA_WITH_AES_256_CBC_SHA,
    &TLS_RSA_WITH_AES_128_GCM_SHA256,
    &TLS_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_RSA_WITH_AES_128_CBC_SHA256,
    &TLS_RSA_WITH_AES_128_CBC_SHA,
    &TLS_RSA_WITH_AES_256_CBC_SHA,
];

/// Round-1 post-quantum hybrids first, classical ECDHE as fallback.
pub static PREFERENCES_PQ_ROUND1: &[&CipherSuite] = &[
    &TLS_ECDHE_BIKE_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_SIKE_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
    &TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
];

#[must_use]
pub fn from_code(code: [u8; 2]) -> Option<&'static CipherSuite> {
    ALL_SUITES.iter().copied().find(|suite| suite.code == code)
}

#[must_use]
pub fn preferences_from_tag(tag: &str) -> Option<&'static [&'static CipherSuite]> {
    match tag {
        "default" => Some(PREFERENCES_DEFAULT),
        "legacy" => Some(PREFERENCES_LEGACY),
        "pq-round1" => Some(PREFERENCES_PQ_ROUND1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique_and_resolvable() {
        for (i, a) in ALL_SUITES.iter().enumerate() {
            for b in &ALL_SUITES[i + 1..] {
                assert_ne!(a.code, b.code, "{} and {}", a.name, b.name);
            }
            assert!(std::ptr::eq(from_code(a.code).unwrap(), *a));
        }
    }

    #[test]
    fn version_eligibility() {
        assert!(TLS_AES_128_GCM_SHA256.usable_at(ProtocolVersion::Tls13));
        assert!(!TLS_AES_128_GCM_SHA256.usable_at(ProtocolVersion::Tls12));
        assert!(!TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256.usable_at(ProtocolVersion::Tls13));
        assert!(!TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256.usable_at(ProtocolVersion::Tls11));
        assert!(TLS_RSA_WITH_AES_128_CBC_SHA.usable_at(ProtocolVersion::Tls10));
    }

    #[test]
    fn record_overhead_parameters() {
        use ProtocolVersion::*;

        let cbc = &TLS_RSA_WITH_AES_128_CBC_SHA.cipher;
        assert_eq!(cbc.fixed_iv_len(Tls10), 16);
        assert_eq!(cbc.explicit_iv_len(Tls10), 0);
        assert_eq!(cbc.explicit_iv_len(Tls12), 16);

        let gcm = &TLS_AES_256_GCM_SHA384.cipher;
        assert_eq!(gcm.fixed_iv_len(Tls13), 12);
        assert_eq!(gcm.explicit_iv_len(Tls13), 0);
        assert_eq!(gcm.fixed_iv_len(Tls12), 4);
        assert_eq!(gcm.explicit_iv_len(Tls12), 8);
        assert_eq!(gcm.tag_len(), 16);
    }
}
