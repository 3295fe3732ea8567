//! Concrete record protection: the negotiated cipher and MAC, materialized
//! from a key block or traffic secret. The record layer owns the framing;
//! this module only transforms payloads.

use aes::{Aes128, Aes256};
use aes_gcm::{
    aead::AeadInPlace,
    Aes128Gcm, Aes256Gcm, KeyInit,
};
use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use chacha20poly1305::ChaCha20Poly1305;
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Sha256, Sha384};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::cipher_suite::{MacAlgorithm, RecordCipherKind};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CipherError {
    Encrypt,
    Decrypt,
}

#[derive(Clone, Copy)]
enum AesKind {
    Aes128,
    Aes256,
}

/// A CBC cipher. The mode state is rebuilt per record because every record
/// carries (or derives) its own IV.
pub(crate) struct CbcCipher {
    kind: AesKind,
    key: Zeroizing<Vec<u8>>,
}

impl CbcCipher {
    pub fn encrypt_in_place(&self, iv: &[u8; 16], buf: &mut [u8]) -> Result<(), CipherError> {
        if buf.len() % 16 != 0 {
            return Err(CipherError::Encrypt);
        }
        let len = buf.len();
        match self.kind {
            AesKind::Aes128 => cbc::Encryptor::<Aes128>::new_from_slices(&self.key, iv)
                .map_err(|_| CipherError::Encrypt)?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map(|_| ())
                .map_err(|_| CipherError::Encrypt),
            AesKind::Aes256 => cbc::Encryptor::<Aes256>::new_from_slices(&self.key, iv)
                .map_err(|_| CipherError::Encrypt)?
                .encrypt_padded_mut::<NoPadding>(buf, len)
                .map(|_| ())
                .map_err(|_| CipherError::Encrypt),
        }
    }

    pub fn decrypt_in_place(&self, iv: &[u8; 16], buf: &mut [u8]) -> Result<(), CipherError> {
        if buf.len() % 16 != 0 || buf.is_empty() {
            return Err(CipherError::Decrypt);
        }
        match self.kind {
            AesKind::Aes128 => cbc::Decryptor::<Aes128>::new_from_slices(&self.key, iv)
                .map_err(|_| CipherError::Decrypt)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ())
                .map_err(|_| CipherError::Decrypt),
            AesKind::Aes256 => cbc::Decryptor::<Aes256>::new_from_slices(&self.key, iv)
                .map_err(|_| CipherError::Decrypt)?
                .decrypt_padded_mut::<NoPadding>(buf)
                .map(|_| ())
                .map_err(|_| CipherError::Decrypt),
        }
    }
}

pub(crate) enum AeadCipher {
    AesGcm128(Box<Aes128Gcm>),
    AesGcm256(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
}

impl AeadCipher {
    /// Encrypt in place and return the 16-byte tag.
    pub fn seal(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
    ) -> Result<[u8; 16], CipherError> {
        let tag = match self {
            Self::AesGcm128(cipher) => cipher
                .encrypt_in_place_detached(nonce.into(), aad, buf)
                .map_err(|_| CipherError::Encrypt)?,
            Self::AesGcm256(cipher) => cipher
                .encrypt_in_place_detached(nonce.into(), aad, buf)
                .map_err(|_| CipherError::Encrypt)?,
            Self::ChaCha(cipher) => cipher
                .encrypt_in_place_detached(nonce.into(), aad, buf)
                .map_err(|_| CipherError::Encrypt)?,
        };
        let mut out = [0; 16];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Verify the tag and decrypt in place. Tag comparison happens inside
    /// the AEAD implementation, in constant time.
    pub fn open(
        &self,
        nonce: &[u8; 12],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8; 16],
    ) -> Result<(), CipherError> {
        match self {
            Self::AesGcm128(cipher) => cipher
                .decrypt_in_place_detached(nonce.into(), aad, buf, tag.into())
                .map_err(|_| CipherError::Decrypt),
            Self::AesGcm256(cipher) => cipher
                .decrypt_in_place_detached(nonce.into(), aad, buf, tag.into())
                .map_err(|_| CipherError::Decrypt),
            Self::ChaCha(cipher) => cipher
                .decrypt_in_place_detached(nonce.into(), aad, buf, tag.into())
                .map_err(|_| CipherError::Decrypt),
        }
    }
}

/// The active record transform for one direction.
pub(crate) enum RecordCipher {
    Null,
    Cbc(CbcCipher),
    Aead(AeadCipher),
}

impl RecordCipher {
    pub fn new(kind: RecordCipherKind, key: &[u8]) -> Result<Self, CipherError> {
        let cipher = match kind {
            RecordCipherKind::Null => Self::Null,
            RecordCipherKind::AesCbc { key_len: 16 } => Self::Cbc(CbcCipher {
                kind: AesKind::Aes128,
                key: Zeroizing::new(key.to_vec()),
            }),
            RecordCipherKind::AesCbc { key_len: 32 } => Self::Cbc(CbcCipher {
                kind: AesKind::Aes256,
                key: Zeroizing::new(key.to_vec()),
            }),
            RecordCipherKind::AesGcm { key_len: 16 } => Self::Aead(AeadCipher::AesGcm128(
                Box::new(Aes128Gcm::new_from_slice(key).map_err(|_| CipherError::Encrypt)?),
            )),
            RecordCipherKind::AesGcm { key_len: 32 } => Self::Aead(AeadCipher::AesGcm256(
                Box::new(Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Encrypt)?),
            )),
            RecordCipherKind::ChaCha20Poly1305 => Self::Aead(AeadCipher::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(key).map_err(|_| CipherError::Encrypt)?,
            ))),
            RecordCipherKind::AesCbc { .. } | RecordCipherKind::AesGcm { .. } => {
                return Err(CipherError::Encrypt)
            },
        };
        Ok(cipher)
    }
}

/// The record MAC for MAC-then-encrypt suites.
pub(crate) enum RecordMac {
    Null,
    Sha1(Zeroizing<Vec<u8>>),
    Sha256(Zeroizing<Vec<u8>>),
    Sha384(Zeroizing<Vec<u8>>),
}

impl RecordMac {
    #[must_use]
    pub fn new(algorithm: MacAlgorithm, key: &[u8]) -> Self {
        let key = Zeroizing::new(key.to_vec());
        match algorithm {
            MacAlgorithm::Null => Self::Null,
            MacAlgorithm::HmacSha1 => Self::Sha1(key),
            MacAlgorithm::HmacSha256 => Self::Sha256(key),
            MacAlgorithm::HmacSha384 => Self::Sha384(key),
        }
    }

    #[must_use]
    pub fn mac_len(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Sha1(_) => 20,
            Self::Sha256(_) => 32,
            Self::Sha384(_) => 48,
        }
    }

    /// MAC over the record pseudo-header and plaintext:
    /// `seq || type || version || len || fragment`.
    #[must_use]
    pub fn compute(
        &self,
        sequence_number: u64,
        content_type: u8,
        version: [u8; 2],
        fragment: &[u8],
    ) -> Vec<u8> {
        fn run<M: Mac>(mut mac: M, seq: u64, header: [u8; 3], len: u16, fragment: &[u8]) -> Vec<u8> {
            mac.update(&seq.to_be_bytes());
            mac.update(&header);
            mac.update(&len.to_be_bytes());
            mac.update(fragment);
            mac.finalize().into_bytes().to_vec()
        }

        let header = [content_type, version[0], version[1]];
        let len = fragment.len() as u16;
        match self {
            Self::Null => Vec::new(),
            Self::Sha1(key) => {
                let mac = <Hmac<Sha1> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                run(mac, sequence_number, header, len, fragment)
            },
            Self::Sha256(key) => {
                let mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                run(mac, sequence_number, header, len, fragment)
            },
            Self::Sha384(key) => {
                let mac = <Hmac<Sha384> as Mac>::new_from_slice(key)
                    .expect("HMAC accepts keys of any length");
                run(mac, sequence_number, header, len, fragment)
            },
        }
    }

    /// Constant-time comparison against a received MAC.
    #[must_use]
    pub fn verify(
        &self,
        sequence_number: u64,
        content_type: u8,
        version: [u8; 2],
        fragment: &[u8],
        received: &[u8],
    ) -> bool {
        let expected = self.compute(sequence_number, content_type, version, fragment);
        if expected.len() != received.len() {
            return false;
        }
        expected.ct_eq(received).into()
    }
}
