//! Key derivation for every protocol version.
//!
//! TLS 1.0/1.1 use the MD5 xor SHA-1 PRF, TLS 1.2 the suite-hash PRF
//! ([RFC 5246 section 5](https://www.rfc-editor.org/rfc/rfc5246#section-5)),
//! and TLS 1.3 the HKDF extract/expand ladder
//! ([RFC 8446 section 7.1](https://www.rfc-editor.org/rfc/rfc8446#section-7.1)).

use hkdf::Hkdf;
use hmac::{
    digest::KeyInit,
    Hmac, Mac,
};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};
use zeroize::Zeroizing;

use crate::{cipher_suite::HashAlgorithm, ProtocolVersion};

pub(crate) const MASTER_SECRET_LEN: usize = 48;
pub(crate) const VERIFY_DATA_LEN: usize = 12;

/// `P_hash(secret, seed)` from RFC 5246: HMAC iterated until `out` is full.
fn p_hash<M: Mac + KeyInit>(secret: &[u8], seed: &[u8], out: &mut [u8]) {
    let hmac = |parts: &[&[u8]]| {
        let mut mac =
            <M as KeyInit>::new_from_slice(secret).expect("HMAC accepts keys of any length");
        for part in parts {
            Mac::update(&mut mac, part);
        }
        mac.finalize().into_bytes()
    };

    // A(1) = HMAC(secret, seed), A(i+1) = HMAC(secret, A(i))
    let mut a = hmac(&[seed]);

    let mut written = 0;
    while written < out.len() {
        let block = hmac(&[&a, seed]);
        let n = block.len().min(out.len() - written);
        out[written..written + n].copy_from_slice(&block[..n]);
        written += n;
        a = hmac(&[&a]);
    }
}

/// The version-appropriate PRF over `label || seed`.
pub(crate) fn prf(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    seed: &[u8],
    out: &mut [u8],
) {
    let mut label_and_seed = Vec::with_capacity(label.len() + seed.len());
    label_and_seed.extend_from_slice(label);
    label_and_seed.extend_from_slice(seed);

    match version {
        ProtocolVersion::Tls10 | ProtocolVersion::Tls11 => {
            // P_MD5 over the first half of the secret, xored with P_SHA1
            // over the second half. Odd lengths share the middle byte.
            let half = secret.len().div_ceil(2);
            let (first, second) = (&secret[..half], &secret[secret.len() - half..]);

            p_hash::<Hmac<Md5>>(first, &label_and_seed, out);
            let mut sha1_out = vec![0; out.len()];
            p_hash::<Hmac<Sha1>>(second, &label_and_seed, &mut sha1_out);
            for (byte, sha1_byte) in out.iter_mut().zip(sha1_out) {
                *byte ^= sha1_byte;
            }
        },
        ProtocolVersion::Tls12 => match hash {
            HashAlgorithm::Sha256 => p_hash::<Hmac<Sha256>>(secret, &label_and_seed, out),
            HashAlgorithm::Sha384 => p_hash::<Hmac<Sha384>>(secret, &label_and_seed, out),
        },
        ProtocolVersion::Tls13 => unreachable!("TLS 1.3 derives keys through HKDF"),
    }
}

pub(crate) fn derive_master_secret(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    premaster: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
) -> Zeroizing<[u8; MASTER_SECRET_LEN]> {
    let mut seed = [0; 64];
    seed[..32].copy_from_slice(client_random);
    seed[32..].copy_from_slice(server_random);

    let mut master = Zeroizing::new([0; MASTER_SECRET_LEN]);
    prf(version, hash, premaster, b"master secret", &seed, &mut *master);
    master
}

/// The key block split into its six spans, client before server within each
/// pair, per RFC 5246 section 6.3.
pub(crate) struct KeyBlock {
    pub client_mac: Zeroizing<Vec<u8>>,
    pub server_mac: Zeroizing<Vec<u8>>,
    pub client_key: Zeroizing<Vec<u8>>,
    pub server_key: Zeroizing<Vec<u8>>,
    pub client_iv: Zeroizing<Vec<u8>>,
    pub server_iv: Zeroizing<Vec<u8>>,
}

pub(crate) fn derive_key_block(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    master: &[u8; MASTER_SECRET_LEN],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    mac_key_len: usize,
    enc_key_len: usize,
    fixed_iv_len: usize,
) -> KeyBlock {
    // Note the inverted random order compared to the master secret.
    let mut seed = [0; 64];
    seed[..32].copy_from_slice(server_random);
    seed[32..].copy_from_slice(client_random);

    let total = 2 * (mac_key_len + enc_key_len + fixed_iv_len);
    let mut block = Zeroizing::new(vec![0; total]);
    prf(version, hash, master, b"key expansion", &seed, &mut block);

    let span_lens = [
        mac_key_len,
        mac_key_len,
        enc_key_len,
        enc_key_len,
        fixed_iv_len,
        fixed_iv_len,
    ];
    let mut spans = block.chunks_at(&span_lens);
    KeyBlock {
        client_mac: spans.next_span(),
        server_mac: spans.next_span(),
        client_key: spans.next_span(),
        server_key: spans.next_span(),
        client_iv: spans.next_span(),
        server_iv: spans.next_span(),
    }
}

// Small helper to carve the key block without off-by-one offset arithmetic.
trait ChunksAt {
    fn chunks_at<'a>(&'a self, lens: &'a [usize]) -> SpanIter<'a>;
}

impl ChunksAt for Zeroizing<Vec<u8>> {
    fn chunks_at<'a>(&'a self, lens: &'a [usize]) -> SpanIter<'a> {
        SpanIter {
            bytes: self,
            lens,
            at: 0,
            next: 0,
        }
    }
}

struct SpanIter<'a> {
    bytes: &'a [u8],
    lens: &'a [usize],
    at: usize,
    next: usize,
}

impl SpanIter<'_> {
    fn next_span(&mut self) -> Zeroizing<Vec<u8>> {
        let len = self.lens[self.next];
        self.next += 1;
        let span = Zeroizing::new(self.bytes[self.at..self.at + len].to_vec());
        self.at += len;
        span
    }
}

/// The 12-byte Finished verify_data for TLS 1.2 and below.
pub(crate) fn finished_verify_data(
    version: ProtocolVersion,
    hash: HashAlgorithm,
    master: &[u8; MASTER_SECRET_LEN],
    from_server: bool,
    transcript_hash: &[u8],
) -> [u8; VERIFY_DATA_LEN] {
    let label: &[u8] = if from_server {
        b"server finished"
    } else {
        b"client finished"
    };
    let mut out = [0; VERIFY_DATA_LEN];
    prf(version, hash, master, label, transcript_hash, &mut out);
    out
}

// --- TLS 1.3 -----------------------------------------------------------

fn hkdf_extract(hash: HashAlgorithm, salt: &[u8], ikm: &[u8]) -> Zeroizing<Vec<u8>> {
    match hash {
        HashAlgorithm::Sha256 => {
            let (prk, _) = Hkdf::<Sha256>::extract(Some(salt), ikm);
            Zeroizing::new(prk.to_vec())
        },
        HashAlgorithm::Sha384 => {
            let (prk, _) = Hkdf::<Sha384>::extract(Some(salt), ikm);
            Zeroizing::new(prk.to_vec())
        },
    }
}

/// The HkdfLabel info structure: length, `"tls13 "`-prefixed label, context.
fn hkdf_label_info(length: u16, label: &[u8], context: &[u8]) -> Vec<u8> {
    const PREFIX: &[u8] = b"tls13 ";

    let mut info = Vec::with_capacity(4 + PREFIX.len() + label.len() + context.len());
    info.extend_from_slice(&length.to_be_bytes());
    info.push((PREFIX.len() + label.len()) as u8);
    info.extend_from_slice(PREFIX);
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);
    info
}

pub(crate) fn hkdf_expand_label(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Zeroizing<Vec<u8>> {
    let info = hkdf_label_info(length as u16, label, context);
    let mut out = Zeroizing::new(vec![0; length]);

    match hash {
        HashAlgorithm::Sha256 => Hkdf::<Sha256>::from_prk(secret)
            .and_then(|hkdf| hkdf.expand(&info, &mut out).map_err(|_| hkdf::InvalidPrkLength))
            .expect("PRK has digest length and output fits 255 blocks"),
        HashAlgorithm::Sha384 => Hkdf::<Sha384>::from_prk(secret)
            .and_then(|hkdf| hkdf.expand(&info, &mut out).map_err(|_| hkdf::InvalidPrkLength))
            .expect("PRK has digest length and output fits 255 blocks"),
    }
    out
}

fn empty_hash(hash: HashAlgorithm) -> Vec<u8> {
    match hash {
        HashAlgorithm::Sha256 => Sha256::digest([]).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest([]).to_vec(),
    }
}

/// `Derive-Secret(secret, label, context-hash)`.
fn derive_secret(
    hash: HashAlgorithm,
    secret: &[u8],
    label: &[u8],
    context_hash: &[u8],
) -> Zeroizing<Vec<u8>> {
    hkdf_expand_label(hash, secret, label, context_hash, hash.output_len())
}

/// The three-phase extract/expand ladder. Phases advance in lock step with
/// the handshake: early at construction, handshake once the shared secret
/// exists, master once the server Finished is in the transcript.
pub(crate) struct Schedule13 {
    hash: HashAlgorithm,
    /// The current phase secret, salt for the next extract.
    phase_secret: Zeroizing<Vec<u8>>,

    pub client_handshake_traffic: Zeroizing<Vec<u8>>,
    pub server_handshake_traffic: Zeroizing<Vec<u8>>,
    pub client_application_traffic: Zeroizing<Vec<u8>>,
    pub server_application_traffic: Zeroizing<Vec<u8>>,
}

impl Schedule13 {
    /// Start the ladder: `early_secret = HKDF-Extract(0, 0)`.
    /// External PSKs and resumption are not supported, so the IKM is all
    /// zeros.
    #[must_use]
    pub fn new(hash: HashAlgorithm) -> Self {
        let zeros = vec![0; hash.output_len()];
        let early_secret = hkdf_extract(hash, &[], &zeros);
        Self {
            hash,
            phase_secret: early_secret,
            client_handshake_traffic: Zeroizing::new(Vec::new()),
            server_handshake_traffic: Zeroizing::new(Vec::new()),
            client_application_traffic: Zeroizing::new(Vec::new()),
            server_application_traffic: Zeroizing::new(Vec::new()),
        }
    }

    /// Fold in the (EC)DHE shared secret and derive the handshake traffic
    /// secrets. `transcript_hash` covers ClientHello..ServerHello.
    pub fn derive_handshake_secrets(&mut self, shared_secret: &[u8], transcript_hash: &[u8]) {
        let salt = derive_secret(self.hash, &self.phase_secret, b"derived", &empty_hash(self.hash));
        let handshake_secret = hkdf_extract(self.hash, &salt, shared_secret);

        self.client_handshake_traffic =
            derive_secret(self.hash, &handshake_secret, b"c hs traffic", transcript_hash);
        self.server_handshake_traffic =
            derive_secret(self.hash, &handshake_secret, b"s hs traffic", transcript_hash);
        self.phase_secret = handshake_secret;
    }

    /// Derive the first application traffic secrets. `transcript_hash`
    /// covers ClientHello..server Finished.
    pub fn derive_application_secrets(&mut self, transcript_hash: &[u8]) {
        let salt = derive_secret(self.hash, &self.phase_secret, b"derived", &empty_hash(self.hash));
        let zeros = vec![0; self.hash.output_len()];
        let master_secret = hkdf_extract(self.hash, &salt, &zeros);

        self.client_application_traffic =
            derive_secret(self.hash, &master_secret, b"c ap traffic", transcript_hash);
        self.server_application_traffic =
            derive_secret(self.hash, &master_secret, b"s ap traffic", transcript_hash);
        self.phase_secret = master_secret;
    }

    /// Per-direction record protection material from a traffic secret.
    #[must_use]
    pub fn traffic_keys(
        &self,
        traffic_secret: &[u8],
        key_len: usize,
        iv_len: usize,
    ) -> (Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>) {
        let key = hkdf_expand_label(self.hash, traffic_secret, b"key", &[], key_len);
        let iv = hkdf_expand_label(self.hash, traffic_secret, b"iv", &[], iv_len);
        (key, iv)
    }

    /// The Finished MAC over the transcript, keyed from a traffic secret.
    #[must_use]
    pub fn finished_mac(&self, traffic_secret: &[u8], transcript_hash: &[u8]) -> Vec<u8> {
        let finished_key = hkdf_expand_label(
            self.hash,
            traffic_secret,
            b"finished",
            &[],
            self.hash.output_len(),
        );
        match self.hash {
            HashAlgorithm::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(&finished_key)
                    .expect("HMAC accepts keys of any length");
                mac.update(transcript_hash);
                mac.finalize().into_bytes().to_vec()
            },
            HashAlgorithm::Sha384 => {
                let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(&finished_key)
                    .expect("HMAC accepts keys of any length");
                mac.update(transcript_hash);
                mac.finalize().into_bytes().to_vec()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        let clean: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        clean
            .as_bytes()
            .chunks(2)
            .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap())
            .collect()
    }

    /// TLS 1.2 PRF test vector (P_SHA256) from the IETF TLS working group.
    #[test]
    fn tls12_prf_sha256_vector() {
        let secret = unhex("9bbe436ba940f017b17652849a71db35");
        let seed = unhex("a0ba9f936cda311827a6f796ffd5198c");
        let mut out = vec![0; 100];
        let mut label_and_seed = b"test label".to_vec();
        label_and_seed.extend_from_slice(&seed);

        p_hash::<Hmac<Sha256>>(&secret, &label_and_seed, &mut out);

        let expected = unhex(
            "e3f229ba727be17b8d122620557cd453c2aab21d07c3d495329b52d4e61edb5a\
             6b301791e90d35c9c9a46b4e14baf9af0fa022f7077def17abfd3797c0564bab\
             4fbc91666e9def9b97fce34f796789baa48082d122ee42c5a72e5a5110fff701\
             87347b66",
        );
        assert_eq!(out, expected);
    }

    /// The md5/sha1 PRF must split an odd-length secret with a shared
    /// middle byte and xor the halves.
    #[test]
    fn tls10_prf_splits_the_secret() {
        let secret = [1, 2, 3, 4, 5];
        let mut out = [0; 16];
        prf(
            ProtocolVersion::Tls10,
            HashAlgorithm::Sha256,
            &secret,
            b"key expansion",
            b"seed",
            &mut out,
        );

        // Recompute by hand from the halves
        let mut md5_half = [0; 16];
        p_hash::<Hmac<Md5>>(&secret[..3], b"key expansionseed", &mut md5_half);
        let mut sha1_half = [0; 16];
        p_hash::<Hmac<Sha1>>(&secret[2..], b"key expansionseed", &mut sha1_half);
        for (byte, sha1_byte) in md5_half.iter_mut().zip(sha1_half) {
            *byte ^= sha1_byte;
        }
        assert_eq!(out, md5_half);
    }

    #[test]
    fn key_block_layout() {
        let master = Zeroizing::new([7; MASTER_SECRET_LEN]);
        let block = derive_key_block(
            ProtocolVersion::Tls12,
            HashAlgorithm::Sha256,
            &master,
            &[1; 32],
            &[2; 32],
            20,
            16,
            4,
        );
        assert_eq!(block.client_mac.len(), 20);
        assert_eq!(block.server_mac.len(), 20);
        assert_eq!(block.client_key.len(), 16);
        assert_eq!(block.server_key.len(), 16);
        assert_eq!(block.client_iv.len(), 4);
        assert_eq!(block.server_iv.len(), 4);
        assert_ne!(block.client_key, block.server_key);
    }

    /// The HkdfLabel info bytes, checked structurally.
    #[test]
    fn hkdf_label_layout() {
        let info = hkdf_label_info(16, b"key", b"ctx");
        let mut expected = vec![0, 16];
        expected.push(9); // "tls13 key"
        expected.extend_from_slice(b"tls13 key");
        expected.push(3);
        expected.extend_from_slice(b"ctx");
        assert_eq!(info, expected);
    }

    /// RFC 8448 section 3 (simple 1-RTT), the secrets that do not depend
    /// on the transcript: the extract chain from the early secret through
    /// the master secret, using the traced x25519 shared secret.
    #[test]
    fn rfc8448_extract_chain() {
        let hash = HashAlgorithm::Sha256;

        let early = hkdf_extract(hash, &[], &[0; 32]);
        assert_eq!(
            early.as_slice(),
            unhex("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92a")
        );

        let derived = derive_secret(hash, &early, b"derived", &empty_hash(hash));
        assert_eq!(
            derived.as_slice(),
            unhex("6f2615a108c702c5678f54fc9dbab69716c076189c48250cebeac3576c3611ba")
        );

        let ikm = unhex("8bd4054fb55b9d63fdfbacf9f04b9f0d35e6d63f537563efd46272900f89492d");
        let handshake = hkdf_extract(hash, &derived, &ikm);
        assert_eq!(
            handshake.as_slice(),
            unhex("1dc826e93606aa6fdc0aadc12f741b01046aa6b99f691ed221a9f0ca043fbeac")
        );

        let derived2 = derive_secret(hash, &handshake, b"derived", &empty_hash(hash));
        let master = hkdf_extract(hash, &derived2, &[0; 32]);
        assert_eq!(
            master.as_slice(),
            unhex("18df06843d13a08bf2a449844c5f8a478001bc4d4c627984d5a41da8d0402919")
        );
    }

    /// The sha384 ladder has no published trace in RFC 8448; check the
    /// structural properties instead.
    #[test]
    fn sha384_ladder_shape() {
        let mut schedule = Schedule13::new(HashAlgorithm::Sha384);
        schedule.derive_handshake_secrets(&[3; 48], &[5; 48]);
        assert_eq!(schedule.client_handshake_traffic.len(), 48);
        assert_ne!(
            schedule.client_handshake_traffic,
            schedule.server_handshake_traffic
        );

        let (key, iv) = schedule.traffic_keys(&schedule.server_handshake_traffic, 32, 12);
        assert_eq!((key.len(), iv.len()), (32, 12));

        schedule.derive_application_secrets(&[6; 48]);
        assert_eq!(schedule.client_application_traffic.len(), 48);
        assert_ne!(
            schedule.client_application_traffic,
            schedule.client_handshake_traffic
        );
    }
}
