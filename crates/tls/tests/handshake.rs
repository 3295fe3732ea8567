//! End-to-end handshakes: a client and a server driven against each other
//! over an in-memory nonblocking transport, across protocol versions, key
//! exchanges and negotiation outcomes.

mod common;

use std::sync::Arc;

use rand_core::{OsRng, RngCore};
use tls::{
    cipher_suite,
    kem::{self, Kem, KemAlgorithm, KemKeypair},
    ClientAuth, ProtocolVersion, Role, TLSConfig, TLSConnection, TLSError,
};
use zeroize::Zeroizing;

use common::{drive, drive_to_failure, duplex, dh_params_pem, ecdsa_identity, rsa_identity, transfer};

fn server_config(certificate: &str, key: &str) -> TLSConfig {
    let mut config = TLSConfig::new();
    config.add_certificate_chain_pem(certificate).unwrap();
    config.set_private_key_pem(key).unwrap();
    config
}

fn pair(
    client_config: TLSConfig,
    server_config: TLSConfig,
) -> (
    TLSConnection<common::PipeReader, common::PipeWriter>,
    TLSConnection<common::PipeReader, common::PipeWriter>,
) {
    pair_over(client_config, server_config, 4096, false)
}

fn pair_over(
    client_config: TLSConfig,
    server_config: TLSConfig,
    chunk: usize,
    stutter: bool,
) -> (
    TLSConnection<common::PipeReader, common::PipeWriter>,
    TLSConnection<common::PipeReader, common::PipeWriter>,
) {
    let ((client_read, client_write), (server_read, server_write)) = duplex(chunk, stutter);
    let mut client = TLSConnection::new(Role::Client, client_read, client_write);
    client.set_config(Arc::new(client_config));
    let mut server = TLSConnection::new(Role::Server, server_read, server_write);
    server.set_config(Arc::new(server_config));
    (client, server)
}

#[test]
fn tls13_handshake_with_rsa_certificate() {
    let (certificate, key) = rsa_identity();
    let (mut client, mut server) = pair(TLSConfig::new(), server_config(&certificate, &key));

    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls13));
    assert_eq!(server.negotiated_version(), Some(ProtocolVersion::Tls13));
    assert_eq!(client.cipher_suite().unwrap().code, [0x13, 0x01]);

    transfer(&mut client, &mut server, b"hello over 1.3");
    transfer(&mut server, &mut client, b"and back again");
}

#[test]
fn tls13_handshake_with_ecdsa_certificate() {
    let (certificate, key) = ecdsa_identity();
    let (mut client, mut server) = pair(TLSConfig::new(), server_config(&certificate, &key));

    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls13));
    transfer(&mut client, &mut server, b"signed by P-256");
}

#[test]
fn tls12_ecdhe_gcm_handshake() {
    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences("legacy").unwrap();
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences("legacy").unwrap();

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);

    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls12));
    assert_eq!(
        client.cipher_suite().unwrap().name,
        "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256"
    );
    transfer(&mut client, &mut server, b"forward secrecy, 2008 style");
    transfer(&mut server, &mut client, b"ack");
}

#[test]
fn tls12_ecdsa_handshake() {
    static PREFS: &[&cipher_suite::CipherSuite] =
        &[&cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256];

    let (certificate, key) = ecdsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences_list(PREFS);
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences_list(PREFS);

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls12));
    transfer(&mut client, &mut server, b"ecdsa signed key exchange");
}

#[test]
fn tls12_static_rsa_cbc_handshake() {
    static PREFS: &[&cipher_suite::CipherSuite] = &[&cipher_suite::TLS_RSA_WITH_AES_128_CBC_SHA];

    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences_list(PREFS);
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences_list(PREFS);

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls12));
    transfer(&mut client, &mut server, b"mac then encrypt");
    transfer(&mut server, &mut client, b"mac then encrypt, reversed");
}

#[test]
fn tls11_explicit_iv_handshake() {
    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_maximum_version(ProtocolVersion::Tls11);
    let mut server = server_config(&certificate, &key);
    server.set_maximum_version(ProtocolVersion::Tls11);

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls11));
    assert_eq!(
        client.cipher_suite().unwrap().name,
        "TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA"
    );
    transfer(&mut client, &mut server, b"per-record IV");
}

#[test]
fn tls10_chained_iv_handshake() {
    static PREFS: &[&cipher_suite::CipherSuite] = &[&cipher_suite::TLS_RSA_WITH_AES_128_CBC_SHA];

    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences_list(PREFS);
    client_config.set_maximum_version(ProtocolVersion::Tls10);
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences_list(PREFS);
    server.set_maximum_version(ProtocolVersion::Tls10);

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls10));

    // Several records in a row exercise the IV chaining
    for message in [&b"one"[..], b"two", b"three"] {
        transfer(&mut client, &mut server, message);
        transfer(&mut server, &mut client, message);
    }
}

#[test]
fn tls12_dhe_handshake() {
    static PREFS: &[&cipher_suite::CipherSuite] =
        &[&cipher_suite::TLS_DHE_RSA_WITH_AES_128_CBC_SHA];

    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences_list(PREFS);
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences_list(PREFS);
    server.set_dh_params_pem(&dh_params_pem()).unwrap();

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    transfer(&mut client, &mut server, b"finite field agreement");
}

#[test]
fn alpn_server_preference_wins() {
    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_protocol_preferences(&["h2", "http/1.1"]);
    let mut server = server_config(&certificate, &key);
    server.set_protocol_preferences(&["http/1.1", "h2"]);

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert_eq!(client.application_protocol(), Some(&b"http/1.1"[..]));
    assert_eq!(server.application_protocol(), Some(&b"http/1.1"[..]));
}

#[test]
fn alpn_mismatch_is_fatal() {
    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_protocol_preferences(&["http/1.1"]);
    let mut server = server_config(&certificate, &key);
    server.set_protocol_preferences(&["h2"]);

    let (mut client, mut server) = pair(client_config, server);
    let (client_result, server_result) = drive_to_failure(&mut client, &mut server);

    assert!(matches!(
        server_result,
        Err(TLSError::NoApplicationProtocol)
    ));
    assert!(matches!(
        client_result,
        Err(TLSError::AlertReceived(
            tls::alert::Description::NoApplicationProtocol
        ))
    ));
}

#[test]
fn alpn_absent_offer_negotiates_nothing() {
    let (certificate, key) = rsa_identity();
    let mut server = server_config(&certificate, &key);
    server.set_protocol_preferences(&["h2"]);

    let (mut client, mut server) = pair(TLSConfig::new(), server);
    drive(&mut client, &mut server);
    assert_eq!(client.application_protocol(), None);
    assert_eq!(server.application_protocol(), None);
}

#[test]
fn server_name_reaches_the_server() {
    let (certificate, key) = rsa_identity();
    let (mut client, mut server) = pair(TLSConfig::new(), server_config(&certificate, &key));
    client.set_server_name("Example.COM").unwrap();

    drive(&mut client, &mut server);
    assert_eq!(server.server_name().unwrap().as_str(), "example.com");
}

#[test]
fn mutual_auth_tls12() {
    let (certificate, key) = rsa_identity();
    let mut client_config = server_config(&certificate, &key);
    client_config.set_cipher_preferences("legacy").unwrap();
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences("legacy").unwrap();
    server.set_client_auth(ClientAuth::Require);

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert!(!server.peer_certificates().is_empty());
    transfer(&mut client, &mut server, b"authenticated both ways");
}

#[test]
fn mutual_auth_tls13() {
    let (certificate, key) = rsa_identity();
    let client_config = server_config(&certificate, &key);
    let mut server = server_config(&certificate, &key);
    server.set_client_auth(ClientAuth::Require);

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls13));
    assert!(!server.peer_certificates().is_empty());
    transfer(&mut server, &mut client, b"client is who they claim");
}

#[test]
fn ocsp_staple_reaches_the_client() {
    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences("legacy").unwrap();
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences("legacy").unwrap();
    server.set_ocsp_response(vec![0x30, 0x03, 0x0A, 0x01, 0x00]);

    let (mut client, mut server) = pair(client_config, server);
    client.set_status_request(true);
    drive(&mut client, &mut server);
    assert_eq!(
        client.ocsp_response(),
        Some(&[0x30, 0x03, 0x0A, 0x01, 0x00][..])
    );
}

#[test]
fn negotiated_max_fragment_length_still_moves_bulk_data() {
    use tls::handshake::extensions::MaxFragmentLength;

    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_max_fragment_length(MaxFragmentLength::Len512);

    let (mut client, mut server) = pair(client_config, server_config(&certificate, &key));
    drive(&mut client, &mut server);

    let mut payload = vec![0; 8000];
    OsRng.fill_bytes(&mut payload);
    transfer(&mut client, &mut server, &payload);
}

#[test]
fn handshake_survives_a_transport_that_blocks_between_every_byte() {
    let (certificate, key) = rsa_identity();
    let (mut client, mut server) =
        pair_over(TLSConfig::new(), server_config(&certificate, &key), 1, true);

    drive(&mut client, &mut server);
    assert_eq!(client.negotiated_version(), Some(ProtocolVersion::Tls13));
    transfer(&mut client, &mut server, b"one byte at a time");
}

#[test]
fn bulk_transfer_fragments_and_reassembles() {
    let (certificate, key) = rsa_identity();
    let (mut client, mut server) = pair(TLSConfig::new(), server_config(&certificate, &key));
    drive(&mut client, &mut server);

    let mut payload = vec![0; 100_000];
    OsRng.fill_bytes(&mut payload);
    transfer(&mut client, &mut server, &payload);
    transfer(&mut server, &mut client, &payload);
}

#[test]
fn shutdown_is_a_clean_close_in_both_directions() {
    let (certificate, key) = rsa_identity();
    let (mut client, mut server) = pair(TLSConfig::new(), server_config(&certificate, &key));
    drive(&mut client, &mut server);

    client.shutdown().unwrap();
    let mut buf = [0; 16];
    assert_eq!(server.recv(&mut buf).unwrap(), 0);
    server.shutdown().unwrap();
    assert_eq!(client.recv(&mut buf).unwrap(), 0);
    assert!(client.is_closed());
    assert!(server.is_closed());

    assert!(matches!(client.send(b"too late"), Err(TLSError::Closed)));
}

// --- hybrid post-quantum suites -----------------------------------------

/// A stand-in KEM backend: public and secret key are equal, the shared
/// secret is ciphertext xor key. Worthless cryptography, exact plumbing.
struct ToyKem(&'static KemAlgorithm);

impl Kem for ToyKem {
    fn algorithm(&self) -> &'static KemAlgorithm {
        self.0
    }

    fn available(&self) -> bool {
        true
    }

    fn generate_keypair(&self) -> Result<KemKeypair, TLSError> {
        let mut public_key = vec![0; 32];
        OsRng.fill_bytes(&mut public_key);
        Ok(KemKeypair {
            algorithm: self.0,
            secret_key: Zeroizing::new(public_key.clone()),
            public_key,
        })
    }

    fn encapsulate(&self, public_key: &[u8]) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>), TLSError> {
        let mut ciphertext = vec![0; 32];
        OsRng.fill_bytes(&mut ciphertext);
        let shared: Vec<u8> = ciphertext
            .iter()
            .zip(public_key)
            .map(|(a, b)| a ^ b)
            .collect();
        Ok((ciphertext, Zeroizing::new(shared)))
    }

    fn decapsulate(
        &self,
        keypair: &KemKeypair,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, TLSError> {
        Ok(Zeroizing::new(
            ciphertext
                .iter()
                .zip(keypair.secret_key.iter())
                .map(|(a, b)| a ^ b)
                .collect(),
        ))
    }
}

#[test]
fn hybrid_kem_handshake() {
    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences("pq-round1").unwrap();
    client_config.set_kem_backend(Arc::new(ToyKem(&kem::BIKE1_L1_R1)));
    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences("pq-round1").unwrap();
    server.set_kem_backend(Arc::new(ToyKem(&kem::BIKE1_L1_R1)));

    let (mut client, mut server) = pair(client_config, server);
    drive(&mut client, &mut server);
    assert_eq!(client.cipher_suite().unwrap().code, [0xFF, 0x04]);
    transfer(&mut client, &mut server, b"hybrid premaster in effect");
}

#[test]
fn hybrid_kem_round_mismatch_fails() {
    static HYBRID_ONLY: &[&cipher_suite::CipherSuite] = &[
        &cipher_suite::TLS_ECDHE_BIKE_RSA_WITH_AES_256_GCM_SHA384,
        &cipher_suite::TLS_ECDHE_SIKE_RSA_WITH_AES_256_GCM_SHA384,
    ];
    static ROUND2_ONLY: &[&KemAlgorithm] = &[&kem::BIKE1_L1_R2, &kem::SIKE_P434_R2];

    let (certificate, key) = rsa_identity();
    let mut client_config = TLSConfig::new();
    client_config.set_cipher_preferences_list(HYBRID_ONLY);
    client_config.set_kem_preferences(ROUND2_ONLY);
    client_config.set_kem_backend(Arc::new(ToyKem(&kem::BIKE1_L1_R2)));

    let mut server = server_config(&certificate, &key);
    server.set_cipher_preferences_list(HYBRID_ONLY);
    server.set_kem_preferences(kem::PREFERENCES_ROUND1);
    server.set_kem_backend(Arc::new(ToyKem(&kem::BIKE1_L1_R1)));

    let (mut client, mut server) = pair(client_config, server);
    let (client_result, server_result) = drive_to_failure(&mut client, &mut server);
    assert!(matches!(server_result, Err(TLSError::KemUnsupported)));
    assert!(matches!(client_result, Err(TLSError::AlertReceived(_))));
}
