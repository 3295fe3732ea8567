//! The running handshake transcript.
//!
//! Every handshake message, header included, is folded into the transcript
//! in the order sent or received. Which digest ends up being used is only
//! known once the suite is negotiated, so all of them run concurrently
//! until then.

use md5::{Digest, Md5};
use sha1::Sha1;
use sha2::{Sha256, Sha384};

use crate::cipher_suite::HashAlgorithm;

#[derive(Clone)]
pub(crate) struct Transcript {
    md5: Md5,
    sha1: Sha1,
    sha256: Sha256,
    sha384: Sha384,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self {
            md5: Md5::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            sha384: Sha384::new(),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.md5.update(bytes);
        self.sha1.update(bytes);
        self.sha256.update(bytes);
        self.sha384.update(bytes);
    }

    /// The current hash under the negotiated algorithm. The transcript keeps
    /// running; this observes a snapshot.
    #[must_use]
    pub fn hash(&self, algorithm: HashAlgorithm) -> Vec<u8> {
        match algorithm {
            HashAlgorithm::Sha256 => self.sha256.clone().finalize().to_vec(),
            HashAlgorithm::Sha384 => self.sha384.clone().finalize().to_vec(),
        }
    }

    /// The MD5 and SHA-1 digests concatenated, as the TLS 1.0/1.1 Finished
    /// computation wants them.
    #[must_use]
    pub fn hash_md5_sha1(&self) -> [u8; 36] {
        let mut out = [0; 36];
        out[..16].copy_from_slice(&self.md5.clone().finalize());
        out[16..].copy_from_slice(&self.sha1.clone().finalize());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshots_do_not_disturb_the_running_hash() {
        let mut transcript = Transcript::new();
        transcript.update(b"hello ");

        let early = transcript.hash(HashAlgorithm::Sha256);
        transcript.update(b"world");
        let late = transcript.hash(HashAlgorithm::Sha256);

        assert_ne!(early, late);
        assert_eq!(
            late.as_slice(),
            Sha256::digest(b"hello world").as_slice(),
            "incremental updates must match the one-shot digest"
        );
    }

    #[test]
    fn single_byte_change_diverges() {
        let mut a = Transcript::new();
        let mut b = Transcript::new();
        a.update(&[22, 0, 0, 3, 1, 2, 3]);
        b.update(&[22, 0, 0, 3, 1, 2, 4]);
        assert_ne!(a.hash(HashAlgorithm::Sha256), b.hash(HashAlgorithm::Sha256));
        assert_ne!(a.hash_md5_sha1(), b.hash_md5_sha1());
    }
}
