//! Shared scaffolding for the handshake tests: an in-memory nonblocking
//! duplex, throwaway certificates, and the loop that drives two
//! connections against each other.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io::{self, Read, Write},
    rc::Rc,
    sync::OnceLock,
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand_core::OsRng;
use rsa::{
    pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey},
    RsaPrivateKey,
};
use tls::{TLSConnection, TLSError};

// --- in-memory nonblocking duplex ---------------------------------------

type Queue = Rc<RefCell<VecDeque<u8>>>;

pub struct PipeReader {
    queue: Queue,
    chunk: usize,
    stutter: bool,
    turn: Cell<bool>,
}

pub struct PipeWriter {
    queue: Queue,
    chunk: usize,
    stutter: bool,
    turn: Cell<bool>,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.stutter {
            let skip = self.turn.get();
            self.turn.set(!skip);
            if skip {
                return Err(io::ErrorKind::WouldBlock.into());
            }
        }
        let mut queue = self.queue.borrow_mut();
        if queue.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let take = buf.len().min(self.chunk).min(queue.len());
        for slot in buf.iter_mut().take(take) {
            *slot = queue.pop_front().expect("length checked");
        }
        Ok(take)
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stutter {
            let skip = self.turn.get();
            self.turn.set(!skip);
            if skip {
                return Err(io::ErrorKind::WouldBlock.into());
            }
        }
        let take = buf.len().min(self.chunk);
        self.queue.borrow_mut().extend(&buf[..take]);
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Two connected transports: `(client side, server side)`. `chunk` caps the
/// bytes moved per call; `stutter` makes every other call would-block.
pub fn duplex(
    chunk: usize,
    stutter: bool,
) -> ((PipeReader, PipeWriter), (PipeReader, PipeWriter)) {
    let client_to_server: Queue = Rc::new(RefCell::new(VecDeque::new()));
    let server_to_client: Queue = Rc::new(RefCell::new(VecDeque::new()));

    let end = |queue: &Queue| {
        (
            PipeReader {
                queue: Rc::clone(queue),
                chunk,
                stutter,
                turn: Cell::new(false),
            },
            PipeWriter {
                queue: Rc::clone(queue),
                chunk,
                stutter,
                turn: Cell::new(false),
            },
        )
    };

    let (client_read, _) = end(&server_to_client);
    let (_, client_write) = end(&client_to_server);
    let (server_read, _) = end(&client_to_server);
    let (_, server_write) = end(&server_to_client);
    ((client_read, client_write), (server_read, server_write))
}

// --- throwaway certificates ---------------------------------------------

fn der_tlv(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    if body.len() < 128 {
        out.push(body.len() as u8);
    } else if body.len() < 256 {
        out.extend_from_slice(&[0x81, body.len() as u8]);
    } else {
        out.push(0x82);
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    }
    out.extend_from_slice(body);
    out
}

const OID_RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
const OID_SHA256_WITH_RSA: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x0B];
const OID_EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];
const OID_PRIME256V1: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];

/// A minimal X.509 shell around `spki`. The self-"signature" is garbage;
/// nothing in these tests validates chains, only leaf keys.
fn build_certificate(spki: Vec<u8>) -> Vec<u8> {
    let signature_algorithm = der_tlv(
        0x30,
        &[der_tlv(0x06, OID_SHA256_WITH_RSA), der_tlv(0x05, &[])].concat(),
    );
    let validity = der_tlv(
        0x30,
        &[
            der_tlv(0x17, b"200101000000Z"),
            der_tlv(0x17, b"400101000000Z"),
        ]
        .concat(),
    );
    let tbs = der_tlv(
        0x30,
        &[
            der_tlv(0xA0, &der_tlv(0x02, &[2])), // [0] version: v3
            der_tlv(0x02, &[1]),                 // serial
            signature_algorithm.clone(),
            der_tlv(0x30, &[]), // issuer
            validity,
            der_tlv(0x30, &[]), // subject
            spki,
        ]
        .concat(),
    );
    der_tlv(
        0x30,
        &[tbs, signature_algorithm, der_tlv(0x03, &[0, 0xAA])].concat(),
    )
}

fn pem_wrap(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let lines: Vec<&str> = body
        .as_bytes()
        .chunks(64)
        .map(|chunk| std::str::from_utf8(chunk).expect("base64 is ascii"))
        .collect();
    format!(
        "-----BEGIN {label}-----\n{}\n-----END {label}-----\n",
        lines.join("\n")
    )
}

/// A PEM certificate + key pair backed by a (lazily generated, shared)
/// RSA-2048 key.
pub fn rsa_identity() -> (String, String) {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    let key = KEY.get_or_init(|| {
        RsaPrivateKey::new(&mut OsRng, 2048).expect("RSA key generation")
    });

    let public_der = key
        .to_public_key()
        .to_pkcs1_der()
        .expect("PKCS#1 encoding")
        .into_vec();
    let mut bit_string = vec![0];
    bit_string.extend_from_slice(&public_der);
    let spki = der_tlv(
        0x30,
        &[
            der_tlv(
                0x30,
                &[der_tlv(0x06, OID_RSA_ENCRYPTION), der_tlv(0x05, &[])].concat(),
            ),
            der_tlv(0x03, &bit_string),
        ]
        .concat(),
    );

    let certificate = pem_wrap("CERTIFICATE", &build_certificate(spki));
    let key_der = key.to_pkcs1_der().expect("PKCS#1 encoding");
    let key_pem = pem_wrap("RSA PRIVATE KEY", key_der.as_bytes());
    (certificate, key_pem)
}

/// A PEM certificate + key pair backed by a fresh P-256 key.
pub fn ecdsa_identity() -> (String, String) {
    let secret = p256::SecretKey::random(&mut OsRng);
    let point = secret.public_key().to_sec1_bytes();

    let mut bit_string = vec![0];
    bit_string.extend_from_slice(&point);
    let spki = der_tlv(
        0x30,
        &[
            der_tlv(
                0x30,
                &[
                    der_tlv(0x06, OID_EC_PUBLIC_KEY),
                    der_tlv(0x06, OID_PRIME256V1),
                ]
                .concat(),
            ),
            der_tlv(0x03, &bit_string),
        ]
        .concat(),
    );

    let certificate = pem_wrap("CERTIFICATE", &build_certificate(spki));
    let key_der = secret.to_sec1_der().expect("SEC1 encoding");
    let key_pem = pem_wrap("EC PRIVATE KEY", &key_der);
    (certificate, key_pem)
}

/// PKCS#3 DH parameters: the RFC 2409 1024-bit MODP group.
pub fn dh_params_pem() -> String {
    let prime_hex = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
                     020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
                     4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
                     EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";
    let mut prime = vec![0]; // sign-padding octet, the top bit is set
    prime.extend(
        prime_hex
            .as_bytes()
            .chunks(2)
            .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).unwrap(), 16).unwrap()),
    );

    let der = der_tlv(
        0x30,
        &[der_tlv(0x02, &prime), der_tlv(0x02, &[2])].concat(),
    );
    pem_wrap("DH PARAMETERS", &der)
}

// --- driving ------------------------------------------------------------

type Conn = TLSConnection<PipeReader, PipeWriter>;

/// Alternate the two handshakes until both complete. Panics on any error
/// other than would-block.
pub fn drive(client: &mut Conn, server: &mut Conn) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut client_done = false;
    let mut server_done = false;
    for _ in 0..200_000 {
        if !client_done {
            match client.negotiate() {
                Ok(()) => client_done = true,
                Err(TLSError::Blocked(_)) => {},
                Err(error) => panic!("client handshake failed: {error}"),
            }
        }
        if !server_done {
            match server.negotiate() {
                Ok(()) => server_done = true,
                Err(TLSError::Blocked(_)) => {},
                Err(error) => panic!("server handshake failed: {error}"),
            }
        }
        if client_done && server_done {
            return;
        }
    }
    panic!("handshake did not converge");
}

/// Alternate the two handshakes until both fail (or finish); returns the
/// terminal results.
pub fn drive_to_failure(
    client: &mut Conn,
    server: &mut Conn,
) -> (Result<(), TLSError>, Result<(), TLSError>) {
    let mut client_result = None;
    let mut server_result = None;
    for _ in 0..200_000 {
        if client_result.is_none() {
            match client.negotiate() {
                Err(TLSError::Blocked(_)) => {},
                other => client_result = Some(other),
            }
        }
        if server_result.is_none() {
            match server.negotiate() {
                Err(TLSError::Blocked(_)) => {},
                other => server_result = Some(other),
            }
        }
        if let (Some(_), Some(_)) = (&client_result, &server_result) {
            return (
                client_result.expect("checked above"),
                server_result.expect("checked above"),
            );
        }
    }
    panic!("negotiation neither completed nor failed");
}

/// Push `payload` from one side to the other and assert it arrives intact.
pub fn transfer(from: &mut Conn, to: &mut Conn, payload: &[u8]) {
    let mut sent = 0;
    let mut received = Vec::new();
    let mut buf = [0; 4096];
    let mut spins = 0;
    while received.len() < payload.len() {
        if sent < payload.len() {
            match from.send(&payload[sent..]) {
                Ok(consumed) => sent += consumed,
                Err(TLSError::Blocked(_)) => {},
                Err(error) => panic!("send failed: {error}"),
            }
        }
        match to.recv(&mut buf) {
            Ok(0) => panic!("unexpected close"),
            Ok(read) => received.extend_from_slice(&buf[..read]),
            Err(TLSError::Blocked(_)) => {},
            Err(error) => panic!("recv failed: {error}"),
        }
        spins += 1;
        assert!(spins < 1_000_000, "transfer did not make progress");
    }
    assert_eq!(received, payload);
}
