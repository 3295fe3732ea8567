//! The handshake state machine.
//!
//! The connection pumps records; this module decides what the bytes mean.
//! Outbound flights are produced whole (each message queued to the outbound
//! buffer in order, with key installs at the correct instants between
//! them); inbound flights are consumed one message at a time, with the
//! within-flight position tracked by flags in [Pending]. Both directions
//! fold every handshake message into the transcript the moment it is
//! queued or accepted.

pub mod extensions;
pub(crate) mod kex;
pub mod messages;

use bytebuf::ByteBuffer;
use rand_core::{OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{
    cipher_suite::{self, Auth, CipherSuite, KeyExchange},
    config::TLSConfig,
    connection::{Role, TLSConnection},
    der,
    encoding::Encode,
    error::TLSError,
    kem::{self, KemAlgorithm, KemId, KemKeypair},
    key_schedule::{self, Schedule13},
    record_layer::DirectionState,
    transcript::Transcript,
    ProtocolVersion,
};

use extensions::{
    select_alpn, Extension, KeyShareEntry, MaxFragmentLength, NamedGroup, SignatureScheme,
};
use kex::{EphemeralKex, PeerPublicKey};
use messages::{
    encode_empty, CertificateChain, CertificateRequest, CertificateStatus, CertificateVerify,
    ClientHello, ClientKeyExchange, EncryptedExtensions, Finished, HandshakeType, KexKind,
    KexParams, ServerHello, ServerKeyExchange,
};

/// The groups we generate shares for, most preferred first.
const SUPPORTED_GROUPS: &[NamedGroup] = &[NamedGroup::X25519, NamedGroup::Secp256r1];

const SUPPORTED_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::EcdsaSecp256r1Sha256,
    SignatureScheme::RsaPssRsaeSha256,
    SignatureScheme::RsaPssRsaeSha384,
    SignatureScheme::RsaPkcs1Sha256,
    SignatureScheme::RsaPkcs1Sha384,
    SignatureScheme::RsaPkcs1Sha1,
    SignatureScheme::EcdsaSha1,
];

/// Where the connection stands in the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum HandshakeState {
    SendClientHello,
    RecvServerHello,
    /// TLS 1.2 client: Certificate through ServerHelloDone.
    RecvServerFlight12,
    /// TLS 1.2 client: Certificate?, ClientKeyExchange, CertificateVerify?,
    /// ChangeCipherSpec, Finished.
    SendClientFlight12,
    /// Either side, TLS 1.2: peer's ChangeCipherSpec then Finished.
    RecvChangeCipherSpec12,
    RecvFinished12,
    /// TLS 1.2 server: ChangeCipherSpec + Finished after the client's.
    SendServerFinished12,
    /// TLS 1.3 client: EncryptedExtensions through server Finished.
    RecvServerFlight13,
    SendClientFlight13,
    RecvClientHello,
    /// TLS 1.2 server: ServerHello through ServerHelloDone.
    SendServerFlight12,
    RecvClientFlight12,
    /// TLS 1.3 server: ServerHello through server Finished.
    SendServerFlight13,
    RecvClientFlight13,
    ApplicationData,
    Closed,
}

impl HandshakeState {
    /// True while the state machine owes the peer bytes.
    #[must_use]
    pub fn wants_write(&self) -> bool {
        matches!(
            self,
            Self::SendClientHello
                | Self::SendClientFlight12
                | Self::SendServerFinished12
                | Self::SendClientFlight13
                | Self::SendServerFlight12
                | Self::SendServerFlight13
        )
    }
}

/// A complete inbound handshake event.
pub(crate) enum HandshakeEvent {
    Message(HandshakeType, Vec<u8>),
    ChangeCipherSpec,
}

/// Negotiation state that only matters until the handshake completes.
/// Secret material lives here until it is installed, and is wiped with the
/// struct.
pub(crate) struct Pending {
    pub suite: Option<&'static CipherSuite>,
    pub client_random: [u8; 32],
    pub server_random: [u8; 32],
    pub client_session_id: Vec<u8>,
    /// The version field of the ClientHello, bound into the RSA premaster.
    pub client_legacy_version: ProtocolVersion,

    /// Our ephemeral share (1.2), or the share matching the server's pick.
    pub kex: Option<EphemeralKex>,
    /// The client's 1.3 offers, one per supported group.
    pub offered_shares: Vec<(NamedGroup, EphemeralKex)>,
    pub server_kex_params: Option<KexParams>,
    pub kem_keypair: Option<KemKeypair>,
    pub kem_selected: Option<&'static KemAlgorithm>,

    pub master_secret: Zeroizing<[u8; key_schedule::MASTER_SECRET_LEN]>,
    pub schedule13: Option<Schedule13>,
    /// Derived 1.2 banks parked until the ChangeCipherSpec boundary.
    pub pending_read: Option<DirectionState>,
    pub pending_write: Option<DirectionState>,
    /// Derived 1.3 application banks parked until each Finished boundary.
    pub app_read: Option<DirectionState>,
    pub app_write: Option<DirectionState>,

    pub peer_certificates: Vec<Vec<u8>>,
    pub peer_public_key: Option<PeerPublicKey>,
    pub peer_schemes: Vec<SignatureScheme>,
    pub ocsp_staple: Option<Vec<u8>>,

    // ClientHello intelligence the server acts on
    pub client_groups: Vec<NamedGroup>,
    pub client_keyshares: Vec<KeyShareEntry>,
    pub client_alpn: Vec<Vec<u8>>,
    pub client_kems: Vec<KemId>,
    pub client_status_request: bool,
    pub client_max_fragment: Option<MaxFragmentLength>,

    // Flight progress
    pub cert_requested: bool,
    pub client_cert_sent: bool,
    pub seen_certificate: bool,
    pub seen_status: bool,
    pub seen_server_kex: bool,
    pub seen_cert_request: bool,
    pub seen_client_kex: bool,
    pub seen_cert_verify: bool,
    pub seen_encrypted_extensions: bool,
    pub ccs_received: bool,
}

impl Pending {
    #[must_use]
    pub fn new() -> Self {
        Self {
            suite: None,
            client_random: [0; 32],
            server_random: [0; 32],
            client_session_id: Vec::new(),
            client_legacy_version: ProtocolVersion::Tls12,
            kex: None,
            offered_shares: Vec::new(),
            server_kex_params: None,
            kem_keypair: None,
            kem_selected: None,
            master_secret: Zeroizing::new([0; key_schedule::MASTER_SECRET_LEN]),
            schedule13: None,
            pending_read: None,
            pending_write: None,
            app_read: None,
            app_write: None,
            peer_certificates: Vec::new(),
            peer_public_key: None,
            peer_schemes: Vec::new(),
            ocsp_staple: None,
            client_groups: Vec::new(),
            client_keyshares: Vec::new(),
            client_alpn: Vec::new(),
            client_kems: Vec::new(),
            client_status_request: false,
            client_max_fragment: None,
            cert_requested: false,
            client_cert_sent: false,
            seen_certificate: false,
            seen_status: false,
            seen_server_kex: false,
            seen_cert_request: false,
            seen_client_kex: false,
            seen_cert_verify: false,
            seen_encrypted_extensions: false,
            ccs_received: false,
        }
    }

    fn suite(&self) -> Result<&'static CipherSuite, TLSError> {
        self.suite.ok_or(TLSError::InvalidState("no cipher suite negotiated"))
    }
}

// --- produce: outbound flights ------------------------------------------

pub(crate) fn produce<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    match (conn.role, conn.state) {
        (Role::Client, HandshakeState::SendClientHello) => send_client_hello(conn),
        (Role::Client, HandshakeState::SendClientFlight12) => send_client_flight12(conn),
        (Role::Client, HandshakeState::SendClientFlight13) => send_client_flight13(conn),
        (Role::Server, HandshakeState::SendServerFlight12) => send_server_flight12(conn),
        (Role::Server, HandshakeState::SendServerFinished12) => send_server_finished12(conn),
        (Role::Server, HandshakeState::SendServerFlight13) => send_server_flight13(conn),
        _ => Err(TLSError::InvalidState("nothing to produce")),
    }
}

fn client_max_version(config: &TLSConfig) -> ProtocolVersion {
    let from_suites = if config.cipher_preferences.iter().any(|suite| suite.tls13) {
        ProtocolVersion::Tls13
    } else {
        ProtocolVersion::Tls12
    };
    from_suites.min(config.maximum_version)
}

fn send_client_hello<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    let config = conn.config()?;
    OsRng.fill_bytes(&mut conn.pending.client_random);

    let max_version = client_max_version(&config);
    conn.advertised_version = max_version;

    let cipher_suites: Vec<[u8; 2]> = config
        .cipher_preferences
        .iter()
        .filter(|suite| suite.kem_family().is_none() || config.kem_backend.is_some())
        .filter(|suite| {
            if suite.tls13 {
                max_version == ProtocolVersion::Tls13
            } else {
                suite.minimum_version <= max_version.min(ProtocolVersion::Tls12)
            }
        })
        .map(|suite| suite.code)
        .collect();
    if cipher_suites.is_empty() {
        return Err(TLSError::HandshakeFailure);
    }

    let mut extensions = vec![
        Extension::RenegotiationInfo,
        Extension::SupportedGroups(SUPPORTED_GROUPS.to_vec()),
        Extension::EcPointFormats,
        Extension::SignatureAlgorithms(SUPPORTED_SCHEMES.to_vec()),
    ];
    if let Some(name) = &conn.server_name {
        extensions.push(Extension::ServerName(name.clone()));
    }
    if conn.status_request {
        extensions.push(Extension::StatusRequest);
    }
    let alpn = conn.alpn_list(&config);
    if !alpn.is_empty() {
        extensions.push(Extension::Alpn(alpn));
    }
    if let Some(length) = config.max_fragment_length {
        extensions.push(Extension::MaxFragmentLength(length));
    }
    if config.kem_backend.is_some()
        && config
            .cipher_preferences
            .iter()
            .any(|suite| suite.kem_family().is_some())
    {
        extensions.push(Extension::KemParameters(
            config.kem_preferences.iter().map(|kem| kem.id).collect(),
        ));
    }
    if max_version == ProtocolVersion::Tls13 {
        extensions.push(Extension::SupportedVersions(vec![
            ProtocolVersion::Tls13,
            ProtocolVersion::Tls12,
            ProtocolVersion::Tls11,
            ProtocolVersion::Tls10,
        ]));

        let mut offers = Vec::new();
        for &group in SUPPORTED_GROUPS {
            let share = EphemeralKex::generate(group);
            offers.push(KeyShareEntry {
                group,
                key_exchange: share.public_bytes(),
            });
            conn.pending.offered_shares.push((group, share));
        }
        extensions.push(Extension::KeyShareOffers(offers));
    }

    let hello = ClientHello {
        legacy_version: max_version.min(ProtocolVersion::Tls12),
        random: conn.pending.client_random,
        session_id: Vec::new(),
        cipher_suites,
        extensions,
    };
    conn.queue_handshake(&hello.to_bytes())?;
    conn.state = HandshakeState::RecvServerHello;
    Ok(())
}

/// Build both 1.2 direction banks from the master secret and park them for
/// the ChangeCipherSpec boundary.
fn derive_banks12<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    let suite = conn.pending.suite()?;
    let version = conn.version()?;

    let block = key_schedule::derive_key_block(
        version,
        suite.hash,
        &conn.pending.master_secret,
        &conn.pending.client_random,
        &conn.pending.server_random,
        suite.mac.key_len(),
        suite.cipher.key_len(),
        suite.cipher.fixed_iv_len(version),
    );

    let client = DirectionState::from_material(
        suite,
        &block.client_key,
        &block.client_mac,
        &block.client_iv,
        false,
    )?;
    let server = DirectionState::from_material(
        suite,
        &block.server_key,
        &block.server_mac,
        &block.server_iv,
        false,
    )?;

    let (write, read) = match conn.role {
        Role::Client => (client, server),
        Role::Server => (server, client),
    };
    conn.pending.pending_write = Some(write);
    conn.pending.pending_read = Some(read);
    Ok(())
}

/// The premaster secret from our side of the negotiated key exchange,
/// together with the ClientKeyExchange message that transports it.
fn client_premaster<R, W>(
    conn: &mut TLSConnection<R, W>,
) -> Result<(Zeroizing<Vec<u8>>, ClientKeyExchange), TLSError> {
    let suite = conn.pending.suite()?;
    let config = conn.config()?;

    match suite.key_exchange {
        KeyExchange::Rsa => {
            let mut premaster = Zeroizing::new(vec![0; 48]);
            premaster[..2].copy_from_slice(&conn.advertised_version.min(ProtocolVersion::Tls12).wire());
            OsRng.fill_bytes(&mut premaster[2..]);

            let peer = conn
                .pending
                .peer_public_key
                .as_ref()
                .ok_or(TLSError::UnexpectedMessage)?;
            let encrypted = peer.encrypt_premaster(&premaster)?;
            Ok((premaster, ClientKeyExchange::Rsa(encrypted)))
        },
        KeyExchange::Ecdhe | KeyExchange::Dhe => {
            let params = conn
                .pending
                .server_kex_params
                .take()
                .ok_or(TLSError::UnexpectedMessage)?;
            let (mut kex, peer_public, message) = match &params {
                KexParams::Ecdhe { group, public } => {
                    let kex = EphemeralKex::generate(*group);
                    let message = ClientKeyExchange::Ecdhe(kex.public_bytes());
                    (kex, public.clone(), message)
                },
                KexParams::Dhe {
                    prime,
                    generator,
                    public,
                } => {
                    let kex = EphemeralKex::generate_dhe(prime, generator);
                    let message = ClientKeyExchange::Dhe(kex.public_bytes());
                    (kex, public.clone(), message)
                },
                KexParams::EcdheKem { .. } => return Err(TLSError::UnexpectedMessage),
            };
            let premaster = kex.shared_secret(&peer_public)?;
            Ok((premaster, message))
        },
        KeyExchange::EcdheKem(_) => {
            let params = conn
                .pending
                .server_kex_params
                .take()
                .ok_or(TLSError::UnexpectedMessage)?;
            let KexParams::EcdheKem {
                group,
                public,
                kem: kem_id,
                kem_public,
            } = &params
            else {
                return Err(TLSError::UnexpectedMessage);
            };

            let backend = config.kem_backend.clone().ok_or(TLSError::KemUnsupported)?;
            if backend.algorithm().id != *kem_id {
                return Err(TLSError::KemUnsupported);
            }
            let (kem_ciphertext, kem_shared) = backend.encapsulate(kem_public)?;

            let mut kex = EphemeralKex::generate(*group);
            let ecdhe_public = kex.public_bytes();
            let ecdhe_shared = kex.shared_secret(public)?;

            // Hybrid premaster: classical secret then KEM secret
            let mut premaster = Zeroizing::new(Vec::new());
            premaster.extend_from_slice(&ecdhe_shared);
            premaster.extend_from_slice(&kem_shared);
            Ok((
                premaster,
                ClientKeyExchange::EcdheKem {
                    public: ecdhe_public,
                    kem_ciphertext,
                },
            ))
        },
        KeyExchange::Tls13 => Err(TLSError::InvalidState("TLS 1.3 has no premaster")),
    }
}

fn send_client_flight12<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    let config = conn.config()?;
    let suite = conn.pending.suite()?;
    let version = conn.version()?;

    if conn.pending.cert_requested {
        let chain = CertificateChain {
            certificates: config.certificate_chain.clone(),
        };
        let mut buf = ByteBuffer::growable(256);
        chain.encode_message(version, &mut buf).map_err(TLSError::from)?;
        conn.queue_handshake(&buf.readable().to_vec())?;
        conn.pending.client_cert_sent = !config.certificate_chain.is_empty();
    }

    let (premaster, key_exchange) = client_premaster(conn)?;
    conn.queue_handshake(&key_exchange.to_bytes())?;

    conn.pending.master_secret = key_schedule::derive_master_secret(
        version,
        suite.hash,
        &premaster,
        &conn.pending.client_random,
        &conn.pending.server_random,
    );
    drop(premaster);
    derive_banks12(conn)?;

    if conn.pending.client_cert_sent {
        let key = config.private_key.as_ref().ok_or(TLSError::MissingPrivateKey)?;
        let scheme = if version >= ProtocolVersion::Tls12 {
            Some(
                key.scheme_from(version, &conn.pending.peer_schemes)
                    .ok_or(TLSError::HandshakeFailure)?,
            )
        } else {
            None
        };
        let signature = sign_transcript12(key, scheme, &conn.transcript)?;
        let verify = CertificateVerify { scheme, signature };
        conn.queue_handshake(&verify.to_bytes())?;
    }

    conn.queue_change_cipher_spec()?;
    let write = conn.pending.pending_write.take().ok_or(TLSError::Internal("no pending bank"))?;
    conn.write_state = write;

    let verify_data = key_schedule::finished_verify_data(
        version,
        suite.hash,
        &conn.pending.master_secret,
        conn.role == Role::Server,
        &transcript_hash12(version, suite, &conn.transcript),
    );
    let finished = Finished {
        verify_data: verify_data.to_vec(),
    };
    conn.queue_handshake(&finished.to_bytes())?;

    conn.state = HandshakeState::RecvChangeCipherSpec12;
    Ok(())
}

/// TLS 1.2 CertificateVerify input: the transcript digest under the
/// scheme's own hash.
fn sign_transcript12(
    key: &kex::SigningKeyMaterial,
    scheme: Option<SignatureScheme>,
    transcript: &Transcript,
) -> Result<Vec<u8>, TLSError> {
    match scheme {
        None => key.sign_digest(None, &transcript.hash_md5_sha1()),
        Some(SignatureScheme::RsaPkcs1Sha256 | SignatureScheme::EcdsaSecp256r1Sha256) => {
            key.sign_digest(scheme, &transcript.hash(cipher_suite::HashAlgorithm::Sha256))
        },
        Some(SignatureScheme::RsaPkcs1Sha384) => {
            key.sign_digest(scheme, &transcript.hash(cipher_suite::HashAlgorithm::Sha384))
        },
        // Remaining schemes don't apply to 1.2 CertificateVerify
        Some(_) => Err(TLSError::HandshakeFailure),
    }
}

/// The Finished seed: MD5+SHA-1 below 1.2, the suite hash from 1.2 on.
fn transcript_hash12(
    version: ProtocolVersion,
    suite: &'static CipherSuite,
    transcript: &Transcript,
) -> Vec<u8> {
    if version >= ProtocolVersion::Tls12 {
        transcript.hash(suite.hash)
    } else {
        transcript.hash_md5_sha1().to_vec()
    }
}

fn send_server_finished12<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    let suite = conn.pending.suite()?;
    let version = conn.version()?;

    conn.queue_change_cipher_spec()?;
    let write = conn.pending.pending_write.take().ok_or(TLSError::Internal("no pending bank"))?;
    conn.write_state = write;

    let verify_data = key_schedule::finished_verify_data(
        version,
        suite.hash,
        &conn.pending.master_secret,
        true,
        &transcript_hash12(version, suite, &conn.transcript),
    );
    conn.queue_handshake(
        &Finished {
            verify_data: verify_data.to_vec(),
        }
        .to_bytes(),
    )?;

    conn.finish_handshake();
    Ok(())
}

fn send_server_flight12<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    let config = conn.config()?;
    let suite = conn.pending.suite()?;
    let version = conn.version()?;
    OsRng.fill_bytes(&mut conn.pending.server_random);

    // ServerHello
    let mut extensions = vec![Extension::RenegotiationInfo];
    if conn.server_name.is_some() {
        extensions.push(Extension::ServerNameAck);
    }
    if let Some(length) = conn.pending.client_max_fragment {
        extensions.push(Extension::MaxFragmentLength(length));
        conn.set_fragment_limit(length.in_bytes());
    }
    let staple = conn.pending.client_status_request && config.ocsp_response.is_some();
    if staple {
        extensions.push(Extension::StatusRequest);
    }
    let alpn = conn.alpn_list(&config);
    if !conn.pending.client_alpn.is_empty() && !alpn.is_empty() {
        let protocol = select_alpn(&alpn, &conn.pending.client_alpn)?;
        conn.negotiated_alpn = Some(protocol.clone());
        extensions.push(Extension::Alpn(vec![protocol]));
    }

    let hello = ServerHello {
        legacy_version: version,
        random: conn.pending.server_random,
        session_id: Vec::new(),
        cipher_suite: suite.code,
        extensions,
    };
    conn.queue_handshake(&hello.to_bytes())?;

    // Certificate
    let chain = CertificateChain {
        certificates: config.certificate_chain.clone(),
    };
    let mut buf = ByteBuffer::growable(1024);
    chain.encode_message(version, &mut buf).map_err(TLSError::from)?;
    conn.queue_handshake(&buf.readable().to_vec())?;

    if staple {
        let status = CertificateStatus {
            response: config.ocsp_response.clone().unwrap_or_default(),
        };
        conn.queue_handshake(&status.to_bytes())?;
    }

    // ServerKeyExchange for the ephemeral exchanges
    let params = match suite.key_exchange {
        KeyExchange::Rsa => None,
        KeyExchange::Ecdhe => {
            let group = pick_group(&conn.pending.client_groups)?;
            let kex = EphemeralKex::generate(group);
            let public = kex.public_bytes();
            conn.pending.kex = Some(kex);
            Some(KexParams::Ecdhe { group, public })
        },
        KeyExchange::Dhe => {
            let dh = config.dh_params.clone().ok_or(TLSError::HandshakeFailure)?;
            let kex = EphemeralKex::generate_dhe(&dh.prime, &dh.generator);
            let public = kex.public_bytes();
            conn.pending.kex = Some(kex);
            Some(KexParams::Dhe {
                prime: dh.prime,
                generator: dh.generator,
                public,
            })
        },
        KeyExchange::EcdheKem(family) => {
            let backend = config.kem_backend.clone().ok_or(TLSError::KemUnsupported)?;
            let algorithm = kem::select(family, config.kem_preferences, &conn.pending.client_kems)?;
            if backend.algorithm().id != algorithm.id {
                return Err(TLSError::KemUnsupported);
            }
            let keypair = backend.generate_keypair()?;
            let kem_public = keypair.public_key.clone();
            conn.pending.kem_selected = Some(algorithm);
            conn.pending.kem_keypair = Some(keypair);

            let group = pick_group(&conn.pending.client_groups)?;
            let kex = EphemeralKex::generate(group);
            let public = kex.public_bytes();
            conn.pending.kex = Some(kex);
            Some(KexParams::EcdheKem {
                group,
                public,
                kem: algorithm.id,
                kem_public,
            })
        },
        KeyExchange::Tls13 => return Err(TLSError::InvalidState("1.3 suite on the 1.2 path")),
    };

    if let Some(params) = params {
        let key = config.private_key.as_ref().ok_or(TLSError::MissingPrivateKey)?;
        let scheme = if version >= ProtocolVersion::Tls12 {
            Some(
                key.scheme_from(version, &conn.pending.peer_schemes)
                    .ok_or(TLSError::HandshakeFailure)?,
            )
        } else {
            None
        };

        let mut signed = Vec::new();
        signed.extend_from_slice(&conn.pending.client_random);
        signed.extend_from_slice(&conn.pending.server_random);
        signed.extend_from_slice(&params.to_params_bytes());
        let signature = key.sign(scheme, &signed)?;

        let message = ServerKeyExchange {
            params,
            scheme,
            signature,
        };
        conn.queue_handshake(&message.to_bytes())?;
    }

    if config.client_auth != crate::ClientAuth::None {
        let request = CertificateRequest {
            schemes: SUPPORTED_SCHEMES.to_vec(),
        };
        let mut buf = ByteBuffer::growable(64);
        request.encode_message(version, &mut buf).map_err(TLSError::from)?;
        conn.queue_handshake(&buf.readable().to_vec())?;
        conn.pending.cert_requested = true;
    }

    let mut buf = ByteBuffer::growable(8);
    encode_empty(HandshakeType::ServerHelloDone, &mut buf).map_err(TLSError::from)?;
    conn.queue_handshake(&buf.readable().to_vec())?;

    conn.state = HandshakeState::RecvClientFlight12;
    Ok(())
}

fn pick_group(client_groups: &[NamedGroup]) -> Result<NamedGroup, TLSError> {
    if client_groups.is_empty() {
        // No supported_groups extension: assume the common default
        return Ok(NamedGroup::X25519);
    }
    SUPPORTED_GROUPS
        .iter()
        .copied()
        .find(|group| client_groups.contains(group))
        .ok_or(TLSError::HandshakeFailure)
}

// --- TLS 1.3 flights ----------------------------------------------------

/// The CertificateVerify input: 64 spaces, a role-bound context string, a
/// NUL, then the transcript hash.
fn certificate_verify_content(server: bool, transcript_hash: &[u8]) -> Vec<u8> {
    let context: &[u8] = if server {
        b"TLS 1.3, server CertificateVerify"
    } else {
        b"TLS 1.3, client CertificateVerify"
    };
    let mut content = vec![0x20; 64];
    content.extend_from_slice(context);
    content.push(0);
    content.extend_from_slice(transcript_hash);
    content
}

fn traffic_bank(
    suite: &'static CipherSuite,
    schedule: &Schedule13,
    secret: &[u8],
) -> Result<DirectionState, TLSError> {
    let (key, iv) = schedule.traffic_keys(secret, suite.cipher.key_len(), 12);
    DirectionState::from_material(suite, &key, &[], &iv, true)
}

fn send_server_flight13<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    let config = conn.config()?;
    let suite = conn.pending.suite()?;
    OsRng.fill_bytes(&mut conn.pending.server_random);

    // Pick the client share we can answer
    let share = SUPPORTED_GROUPS
        .iter()
        .find_map(|&group| {
            conn.pending
                .client_keyshares
                .iter()
                .find(|entry| entry.group == group)
                .cloned()
        })
        .ok_or(TLSError::HandshakeFailure)?;

    let mut kex = EphemeralKex::generate(share.group);
    let our_public = kex.public_bytes();
    let shared_secret = kex.shared_secret(&share.key_exchange)?;

    let hello = ServerHello {
        legacy_version: ProtocolVersion::Tls12,
        random: conn.pending.server_random,
        session_id: conn.pending.client_session_id.clone(),
        cipher_suite: suite.code,
        extensions: vec![
            Extension::SelectedVersion(ProtocolVersion::Tls13),
            Extension::KeyShareSelected(KeyShareEntry {
                group: share.group,
                key_exchange: our_public,
            }),
        ],
    };
    conn.queue_handshake(&hello.to_bytes())?;

    // Handshake keys switch on, both directions, right after ServerHello
    let mut schedule = Schedule13::new(suite.hash);
    schedule.derive_handshake_secrets(&shared_secret, &conn.transcript.hash(suite.hash));
    conn.write_state = traffic_bank(suite, &schedule, &schedule.server_handshake_traffic)?;
    conn.read_state = traffic_bank(suite, &schedule, &schedule.client_handshake_traffic)?;

    // EncryptedExtensions
    let mut extensions = Vec::new();
    if conn.server_name.is_some() {
        extensions.push(Extension::ServerNameAck);
    }
    if let Some(length) = conn.pending.client_max_fragment {
        extensions.push(Extension::MaxFragmentLength(length));
        conn.set_fragment_limit(length.in_bytes());
    }
    let alpn = conn.alpn_list(&config);
    if !conn.pending.client_alpn.is_empty() && !alpn.is_empty() {
        let protocol = select_alpn(&alpn, &conn.pending.client_alpn)?;
        conn.negotiated_alpn = Some(protocol.clone());
        extensions.push(Extension::Alpn(vec![protocol]));
    }
    conn.queue_handshake(&EncryptedExtensions { extensions }.to_bytes())?;

    if config.client_auth != crate::ClientAuth::None {
        let request = CertificateRequest {
            schemes: SUPPORTED_SCHEMES.to_vec(),
        };
        let mut buf = ByteBuffer::growable(64);
        request
            .encode_message(ProtocolVersion::Tls13, &mut buf)
            .map_err(TLSError::from)?;
        conn.queue_handshake(&buf.readable().to_vec())?;
        conn.pending.cert_requested = true;
    }

    // Certificate + CertificateVerify + Finished
    let chain = CertificateChain {
        certificates: config.certificate_chain.clone(),
    };
    let mut buf = ByteBuffer::growable(1024);
    chain
        .encode_message(ProtocolVersion::Tls13, &mut buf)
        .map_err(TLSError::from)?;
    conn.queue_handshake(&buf.readable().to_vec())?;

    let key = config.private_key.as_ref().ok_or(TLSError::MissingPrivateKey)?;
    let scheme = key
        .scheme_from(ProtocolVersion::Tls13, &conn.pending.peer_schemes)
        .ok_or(TLSError::HandshakeFailure)?;
    let content = certificate_verify_content(true, &conn.transcript.hash(suite.hash));
    let signature = key.sign(Some(scheme), &content)?;
    conn.queue_handshake(
        &CertificateVerify {
            scheme: Some(scheme),
            signature,
        }
        .to_bytes(),
    )?;

    let verify_data =
        schedule.finished_mac(&schedule.server_handshake_traffic, &conn.transcript.hash(suite.hash));
    conn.queue_handshake(&Finished { verify_data }.to_bytes())?;

    // Application secrets exist from the server Finished onward; the write
    // direction flips now, the read direction once the client finishes.
    schedule.derive_application_secrets(&conn.transcript.hash(suite.hash));
    conn.write_state = traffic_bank(suite, &schedule, &schedule.server_application_traffic)?;
    conn.pending.app_read = Some(traffic_bank(suite, &schedule, &schedule.client_application_traffic)?);
    conn.pending.schedule13 = Some(schedule);

    conn.state = HandshakeState::RecvClientFlight13;
    Ok(())
}

fn send_client_flight13<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    let config = conn.config()?;
    let suite = conn.pending.suite()?;

    if conn.pending.cert_requested {
        let chain = CertificateChain {
            certificates: config.certificate_chain.clone(),
        };
        let mut buf = ByteBuffer::growable(1024);
        chain
            .encode_message(ProtocolVersion::Tls13, &mut buf)
            .map_err(TLSError::from)?;
        conn.queue_handshake(&buf.readable().to_vec())?;

        if !config.certificate_chain.is_empty() {
            let key = config.private_key.as_ref().ok_or(TLSError::MissingPrivateKey)?;
            let scheme = key
                .scheme_from(ProtocolVersion::Tls13, &conn.pending.peer_schemes)
                .ok_or(TLSError::HandshakeFailure)?;
            let content = certificate_verify_content(false, &conn.transcript.hash(suite.hash));
            let signature = key.sign(Some(scheme), &content)?;
            conn.queue_handshake(
                &CertificateVerify {
                    scheme: Some(scheme),
                    signature,
                }
                .to_bytes(),
            )?;
        }
    }

    let schedule = conn
        .pending
        .schedule13
        .as_ref()
        .ok_or(TLSError::Internal("no key schedule"))?;
    let verify_data = schedule.finished_mac(
        &schedule.client_handshake_traffic,
        &conn.transcript.hash(suite.hash),
    );
    conn.queue_handshake(&Finished { verify_data }.to_bytes())?;

    let write = conn
        .pending
        .app_write
        .take()
        .ok_or(TLSError::Internal("no pending bank"))?;
    conn.write_state = write;

    conn.finish_handshake();
    Ok(())
}

// --- consume: inbound messages ------------------------------------------

pub(crate) fn consume<R, W>(
    conn: &mut TLSConnection<R, W>,
    event: HandshakeEvent,
) -> Result<(), TLSError> {
    let (message_type, body) = match event {
        HandshakeEvent::ChangeCipherSpec => return consume_change_cipher_spec(conn),
        HandshakeEvent::Message(message_type, body) => (message_type, body),
    };

    if message_type == HandshakeType::HelloRequest {
        // Legal at any time, never hashed, never acted on: we don't renegotiate
        return Ok(());
    }

    // Snapshot the transcript before this message lands in it; Finished and
    // CertificateVerify both bind the transcript *up to* themselves.
    let transcript_before = conn.transcript.clone();
    let mut full = Vec::with_capacity(messages::HEADER_LEN + body.len());
    full.push(u8::from(message_type));
    full.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    full.extend_from_slice(&body);
    conn.transcript.update(&full);

    let mut body = ByteBuffer::from_slice(&body);
    match (conn.role, conn.state) {
        (Role::Server, HandshakeState::RecvClientHello) => {
            if message_type != HandshakeType::ClientHello {
                return Err(TLSError::UnexpectedMessage);
            }
            consume_client_hello(conn, &mut body)
        },
        (Role::Client, HandshakeState::RecvServerHello) => {
            consume_server_hello(conn, message_type, &mut body)
        },
        (Role::Client, HandshakeState::RecvServerFlight12) => {
            consume_server_flight12(conn, message_type, &mut body)
        },
        (Role::Server, HandshakeState::RecvClientFlight12) => {
            consume_client_flight12(conn, message_type, &mut body, &transcript_before)
        },
        (_, HandshakeState::RecvFinished12) => {
            consume_finished12(conn, message_type, &mut body, &transcript_before)
        },
        (Role::Client, HandshakeState::RecvServerFlight13) => {
            consume_server_flight13(conn, message_type, &mut body, &transcript_before)
        },
        (Role::Server, HandshakeState::RecvClientFlight13) => {
            consume_client_flight13(conn, message_type, &mut body, &transcript_before)
        },
        _ => Err(TLSError::UnexpectedMessage),
    }
}

fn consume_change_cipher_spec<R, W>(conn: &mut TLSConnection<R, W>) -> Result<(), TLSError> {
    if conn.version().ok() == Some(ProtocolVersion::Tls13) {
        // Middlebox-compatibility dummy, accepted and ignored
        return Ok(());
    }
    match conn.state {
        HandshakeState::RecvChangeCipherSpec12 => {},
        HandshakeState::RecvClientFlight12 if conn.pending.seen_client_kex => {
            // Client auth: the CertificateVerify must precede the key change
            if conn.pending.client_cert_sent && !conn.pending.seen_cert_verify {
                return Err(TLSError::UnexpectedMessage);
            }
        },
        _ => return Err(TLSError::UnexpectedMessage),
    }
    if conn.pending.ccs_received {
        return Err(TLSError::UnexpectedMessage);
    }

    let read = conn
        .pending
        .pending_read
        .take()
        .ok_or(TLSError::UnexpectedMessage)?;
    conn.read_state = read;
    conn.pending.ccs_received = true;
    conn.state = HandshakeState::RecvFinished12;
    Ok(())
}

fn negotiate_version(
    config: &TLSConfig,
    hello: &ClientHello,
) -> Result<ProtocolVersion, TLSError> {
    let our_max = client_max_version(config);

    let offered = hello
        .extensions
        .iter()
        .find_map(|extension| match extension {
            Extension::SupportedVersions(versions) => Some(versions.as_slice()),
            _ => None,
        });

    let version = match offered {
        // RFC 8446 4.2.1: the selection must be a member of the offered
        // list. A client may leave a hole in it on purpose.
        Some(versions) => versions
            .iter()
            .copied()
            .filter(|version| *version <= our_max)
            .max()
            .ok_or(TLSError::UnsupportedVersion)?,
        // No extension: the legacy field is a ceiling, not a list
        None => hello.legacy_version.min(ProtocolVersion::Tls12).min(our_max),
    };

    let floor = config
        .cipher_preferences
        .iter()
        .map(|suite| suite.minimum_version)
        .min()
        .ok_or(TLSError::HandshakeFailure)?;
    if version < floor {
        return Err(TLSError::UnsupportedVersion);
    }
    Ok(version)
}

fn select_suite<R, W>(
    conn: &TLSConnection<R, W>,
    config: &TLSConfig,
    version: ProtocolVersion,
    offered: &[[u8; 2]],
) -> Result<&'static CipherSuite, TLSError> {
    // A hybrid suite that failed only on its KEM negotiation produces a
    // more telling error than a generic handshake failure
    let mut kem_miss = false;

    let selected = config.cipher_preferences.iter().copied().find(|suite| {
        if !suite.usable_at(version) || !offered.contains(&suite.code) {
            return false;
        }
        let key_fits = match suite.auth {
            Auth::Rsa => config.has_rsa_key(),
            Auth::Ecdsa => config.has_ecdsa_key(),
            Auth::Any => config.private_key.is_some(),
        };
        if !key_fits {
            return false;
        }
        match suite.key_exchange {
            KeyExchange::Rsa => config.has_rsa_key(),
            KeyExchange::Dhe => config.dh_params.is_some(),
            KeyExchange::Ecdhe => pick_group(&conn.pending.client_groups).is_ok(),
            KeyExchange::EcdheKem(family) => {
                if config.kem_backend.is_none()
                    || pick_group(&conn.pending.client_groups).is_err()
                {
                    return false;
                }
                let joint =
                    kem::select(family, config.kem_preferences, &conn.pending.client_kems);
                kem_miss |= joint.is_err();
                joint.is_ok()
            },
            KeyExchange::Tls13 => SUPPORTED_GROUPS.iter().any(|&group| {
                conn.pending
                    .client_keyshares
                    .iter()
                    .any(|entry| entry.group == group)
            }),
        }
    });

    selected.ok_or(if kem_miss {
        TLSError::KemUnsupported
    } else {
        TLSError::HandshakeFailure
    })
}

fn consume_client_hello<R, W>(
    conn: &mut TLSConnection<R, W>,
    body: &mut ByteBuffer<'_>,
) -> Result<(), TLSError> {
    let config = conn.config()?;
    let hello = ClientHello::decode_body(body)?;

    conn.pending.client_random = hello.random;
    conn.pending.client_session_id = hello.session_id.clone();
    conn.pending.client_legacy_version = hello.legacy_version;

    for extension in &hello.extensions {
        match extension {
            Extension::ServerName(name) => conn.server_name = Some(name.clone()),
            Extension::SupportedGroups(groups) => conn.pending.client_groups = groups.clone(),
            Extension::SignatureAlgorithms(schemes) => {
                conn.pending.peer_schemes = schemes.clone()
            },
            Extension::Alpn(protocols) => conn.pending.client_alpn = protocols.clone(),
            Extension::KeyShareOffers(entries) => {
                conn.pending.client_keyshares = entries.clone()
            },
            Extension::KemParameters(kems) => conn.pending.client_kems = kems.clone(),
            Extension::StatusRequest => conn.pending.client_status_request = true,
            Extension::MaxFragmentLength(length) => {
                conn.pending.client_max_fragment = Some(*length)
            },
            _ => {},
        }
    }

    let version = negotiate_version(&config, &hello)?;
    conn.set_version(version);
    let suite = select_suite(conn, &config, version, &hello.cipher_suites)?;
    conn.pending.suite = Some(suite);
    log::debug!("Negotiated {} at {version:?}", suite.name);

    conn.state = if version == ProtocolVersion::Tls13 {
        HandshakeState::SendServerFlight13
    } else {
        HandshakeState::SendServerFlight12
    };
    Ok(())
}

fn consume_server_hello<R, W>(
    conn: &mut TLSConnection<R, W>,
    message_type: HandshakeType,
    body: &mut ByteBuffer<'_>,
) -> Result<(), TLSError> {
    if message_type != HandshakeType::ServerHello {
        return Err(TLSError::UnexpectedMessage);
    }
    let config = conn.config()?;
    let hello = ServerHello::decode_body(body)?;
    conn.pending.server_random = hello.random;

    // The negotiated version: the supported_versions extension wins over
    // the legacy field
    let mut version = hello.legacy_version;
    let mut selected_share = None;
    for extension in &hello.extensions {
        match extension {
            Extension::SelectedVersion(selected) => version = *selected,
            Extension::KeyShareSelected(entry) => selected_share = Some(entry.clone()),
            Extension::Alpn(protocols) => {
                // The server must pick exactly one protocol we offered
                if protocols.len() != 1 || !conn.alpn_list(&config).contains(&protocols[0]) {
                    return Err(TLSError::NoApplicationProtocol);
                }
                conn.negotiated_alpn = Some(protocols[0].clone());
            },
            Extension::MaxFragmentLength(length) => {
                if config.max_fragment_length != Some(*length) {
                    return Err(TLSError::IllegalParameter);
                }
                conn.set_fragment_limit(length.in_bytes());
            },
            Extension::StatusRequest => {
                if !conn.status_request {
                    return Err(TLSError::IllegalParameter);
                }
            },
            _ => {},
        }
    }

    if version > conn.advertised_version {
        return Err(TLSError::UnsupportedVersion);
    }
    conn.set_version(version);

    let suite = cipher_suite::from_code(hello.cipher_suite)
        .filter(|suite| suite.usable_at(version))
        .filter(|suite| {
            config
                .cipher_preferences
                .iter()
                .any(|preference| preference.code == suite.code)
        })
        .ok_or(TLSError::HandshakeFailure)?;
    conn.pending.suite = Some(suite);

    if version == ProtocolVersion::Tls13 {
        let share = selected_share.ok_or(TLSError::IllegalParameter)?;
        let position = conn
            .pending
            .offered_shares
            .iter()
            .position(|(group, _)| *group == share.group)
            .ok_or(TLSError::IllegalParameter)?;
        let (_, mut kex) = conn.pending.offered_shares.swap_remove(position);
        let shared_secret = kex.shared_secret(&share.key_exchange)?;
        conn.pending.offered_shares.clear();

        let mut schedule = Schedule13::new(suite.hash);
        schedule.derive_handshake_secrets(&shared_secret, &conn.transcript.hash(suite.hash));
        conn.write_state = traffic_bank(suite, &schedule, &schedule.client_handshake_traffic)?;
        conn.read_state = traffic_bank(suite, &schedule, &schedule.server_handshake_traffic)?;
        conn.pending.schedule13 = Some(schedule);

        conn.state = HandshakeState::RecvServerFlight13;
    } else {
        conn.state = HandshakeState::RecvServerFlight12;
    }
    Ok(())
}

fn parse_peer_leaf<R, W>(
    conn: &mut TLSConnection<R, W>,
    chain: CertificateChain,
) -> Result<(), TLSError> {
    let leaf = chain
        .certificates
        .first()
        .ok_or(TLSError::BadCertificate)?;
    let parsed = der::Certificate::parse(leaf)?;
    conn.pending.peer_public_key = Some(PeerPublicKey::from_certificate(&parsed)?);
    conn.pending.peer_certificates = chain.certificates;
    Ok(())
}

fn consume_server_flight12<R, W>(
    conn: &mut TLSConnection<R, W>,
    message_type: HandshakeType,
    body: &mut ByteBuffer<'_>,
) -> Result<(), TLSError> {
    let suite = conn.pending.suite()?;
    let version = conn.version()?;

    match message_type {
        HandshakeType::Certificate if !conn.pending.seen_certificate => {
            conn.pending.seen_certificate = true;
            let chain = CertificateChain::decode_body(version, body)?;
            parse_peer_leaf(conn, chain)?;

            // The certificate must match what the suite authenticates with
            let is_rsa = conn
                .pending
                .peer_public_key
                .as_ref()
                .is_some_and(PeerPublicKey::is_rsa);
            if is_rsa != (suite.auth == Auth::Rsa) {
                return Err(TLSError::BadCertificate);
            }
        },
        HandshakeType::CertificateStatus
            if conn.pending.seen_certificate
                && !conn.pending.seen_status
                && conn.status_request =>
        {
            conn.pending.seen_status = true;
            let status = CertificateStatus::decode_body(body)?;
            conn.pending.ocsp_staple = Some(status.response);
        },
        HandshakeType::ServerKeyExchange
            if conn.pending.seen_certificate && !conn.pending.seen_server_kex =>
        {
            conn.pending.seen_server_kex = true;
            let kind = match suite.key_exchange {
                KeyExchange::Ecdhe => KexKind::Ecdhe,
                KeyExchange::Dhe => KexKind::Dhe,
                KeyExchange::EcdheKem(_) => KexKind::EcdheKem,
                KeyExchange::Rsa | KeyExchange::Tls13 => {
                    return Err(TLSError::UnexpectedMessage)
                },
            };
            let message = ServerKeyExchange::decode_body(kind, version, body)?;

            let mut signed = Vec::new();
            signed.extend_from_slice(&conn.pending.client_random);
            signed.extend_from_slice(&conn.pending.server_random);
            signed.extend_from_slice(&message.params.to_params_bytes());

            let peer = conn
                .pending
                .peer_public_key
                .as_ref()
                .ok_or(TLSError::UnexpectedMessage)?;
            peer.verify(message.scheme, &signed, &message.signature)?;
            conn.pending.server_kex_params = Some(message.params);
        },
        HandshakeType::CertificateRequest if !conn.pending.seen_cert_request => {
            conn.pending.seen_cert_request = true;
            let request = CertificateRequest::decode_body(version, body)?;
            conn.pending.cert_requested = true;
            conn.pending.peer_schemes = request.schemes;
        },
        HandshakeType::ServerHelloDone => {
            if !conn.pending.seen_certificate {
                return Err(TLSError::UnexpectedMessage);
            }
            let needs_kex = !matches!(suite.key_exchange, KeyExchange::Rsa);
            if needs_kex && !conn.pending.seen_server_kex {
                return Err(TLSError::UnexpectedMessage);
            }
            if body.remaining() != 0 {
                return Err(TLSError::BadMessage);
            }
            conn.state = HandshakeState::SendClientFlight12;
        },
        _ => return Err(TLSError::UnexpectedMessage),
    }
    Ok(())
}

/// RSA key transport premaster, with the Bleichenbacher countermeasure: a
/// decryption or version failure silently yields a random premaster, and
/// the handshake dies later at Finished with no oracle.
fn rsa_premaster<R, W>(
    conn: &TLSConnection<R, W>,
    config: &TLSConfig,
    encrypted: &[u8],
) -> Result<Zeroizing<Vec<u8>>, TLSError> {
    let kex::SigningKeyMaterial::Rsa(key) = config
        .private_key
        .as_ref()
        .ok_or(TLSError::MissingPrivateKey)?
    else {
        return Err(TLSError::UnexpectedMessage);
    };

    let mut premaster = Zeroizing::new(vec![0; 48]);
    OsRng.fill_bytes(&mut premaster[..]);

    if let Ok(decrypted) = key.decrypt(rsa::Pkcs1v15Encrypt, encrypted) {
        let expected_version = conn.pending.client_legacy_version;
        let ok = decrypted.len() == 48
            && bool::from(decrypted[..2].ct_eq(&expected_version.wire()));
        if ok {
            premaster.copy_from_slice(&decrypted);
        }
    }
    Ok(premaster)
}

fn consume_client_flight12<R, W>(
    conn: &mut TLSConnection<R, W>,
    message_type: HandshakeType,
    body: &mut ByteBuffer<'_>,
    transcript_before: &Transcript,
) -> Result<(), TLSError> {
    let config = conn.config()?;
    let suite = conn.pending.suite()?;
    let version = conn.version()?;

    match message_type {
        HandshakeType::Certificate
            if conn.pending.cert_requested && !conn.pending.seen_certificate =>
        {
            conn.pending.seen_certificate = true;
            let chain = CertificateChain::decode_body(version, body)?;
            if chain.certificates.is_empty() {
                if config.client_auth == crate::ClientAuth::Require {
                    return Err(TLSError::HandshakeFailure);
                }
            } else {
                parse_peer_leaf(conn, chain)?;
                conn.pending.client_cert_sent = true;
            }
        },
        HandshakeType::ClientKeyExchange if !conn.pending.seen_client_kex => {
            if conn.pending.cert_requested && !conn.pending.seen_certificate {
                return Err(TLSError::UnexpectedMessage);
            }
            conn.pending.seen_client_kex = true;

            let kind = match suite.key_exchange {
                KeyExchange::Rsa => None,
                KeyExchange::Ecdhe => Some(KexKind::Ecdhe),
                KeyExchange::Dhe => Some(KexKind::Dhe),
                KeyExchange::EcdheKem(_) => Some(KexKind::EcdheKem),
                KeyExchange::Tls13 => return Err(TLSError::UnexpectedMessage),
            };
            let message = ClientKeyExchange::decode_body(kind, body)?;

            let premaster = match message {
                ClientKeyExchange::Rsa(encrypted) => rsa_premaster(conn, &config, &encrypted)?,
                ClientKeyExchange::Ecdhe(public) | ClientKeyExchange::Dhe(public) => conn
                    .pending
                    .kex
                    .as_mut()
                    .ok_or(TLSError::UnexpectedMessage)?
                    .shared_secret(&public)?,
                ClientKeyExchange::EcdheKem {
                    public,
                    kem_ciphertext,
                } => {
                    let backend =
                        config.kem_backend.clone().ok_or(TLSError::KemUnsupported)?;
                    let keypair = conn
                        .pending
                        .kem_keypair
                        .as_ref()
                        .ok_or(TLSError::UnexpectedMessage)?;
                    let kem_shared = backend.decapsulate(keypair, &kem_ciphertext)?;
                    let ecdhe_shared = conn
                        .pending
                        .kex
                        .as_mut()
                        .ok_or(TLSError::UnexpectedMessage)?
                        .shared_secret(&public)?;

                    let mut premaster = Zeroizing::new(Vec::new());
                    premaster.extend_from_slice(&ecdhe_shared);
                    premaster.extend_from_slice(&kem_shared);
                    premaster
                },
            };

            conn.pending.master_secret = key_schedule::derive_master_secret(
                version,
                suite.hash,
                &premaster,
                &conn.pending.client_random,
                &conn.pending.server_random,
            );
            derive_banks12(conn)?;
        },
        HandshakeType::CertificateVerify
            if conn.pending.client_cert_sent
                && conn.pending.seen_client_kex
                && !conn.pending.seen_cert_verify =>
        {
            conn.pending.seen_cert_verify = true;
            let message = CertificateVerify::decode_body(version, body)?;
            let peer = conn
                .pending
                .peer_public_key
                .as_ref()
                .ok_or(TLSError::UnexpectedMessage)?;
            verify_transcript12(peer, message.scheme, transcript_before, &message.signature)?;
        },
        _ => return Err(TLSError::UnexpectedMessage),
    }
    // Finished is handled one state later; the ChangeCipherSpec event moves
    // us there once the client keys are installed
    Ok(())
}

fn verify_transcript12(
    peer: &PeerPublicKey,
    scheme: Option<SignatureScheme>,
    transcript: &Transcript,
    signature: &[u8],
) -> Result<(), TLSError> {
    match scheme {
        None => peer.verify_digest(None, &transcript.hash_md5_sha1(), signature),
        Some(SignatureScheme::RsaPkcs1Sha256 | SignatureScheme::EcdsaSecp256r1Sha256) => peer
            .verify_digest(
                scheme,
                &transcript.hash(cipher_suite::HashAlgorithm::Sha256),
                signature,
            ),
        Some(SignatureScheme::RsaPkcs1Sha384) => peer.verify_digest(
            scheme,
            &transcript.hash(cipher_suite::HashAlgorithm::Sha384),
            signature,
        ),
        Some(_) => Err(TLSError::IllegalParameter),
    }
}

fn consume_finished12<R, W>(
    conn: &mut TLSConnection<R, W>,
    message_type: HandshakeType,
    body: &mut ByteBuffer<'_>,
    transcript_before: &Transcript,
) -> Result<(), TLSError> {
    if message_type != HandshakeType::Finished {
        return Err(TLSError::UnexpectedMessage);
    }
    let suite = conn.pending.suite()?;
    let version = conn.version()?;
    let finished = Finished::decode_body(body)?;

    let expected = key_schedule::finished_verify_data(
        version,
        suite.hash,
        &conn.pending.master_secret,
        conn.role == Role::Client, // the peer's label
        &transcript_hash12(version, suite, transcript_before),
    );

    if finished.verify_data.len() != expected.len()
        || !bool::from(expected.ct_eq(&finished.verify_data))
    {
        return Err(TLSError::DecryptError);
    }

    match conn.role {
        // Client got the server's Finished: the handshake is complete
        Role::Client => conn.finish_handshake(),
        // Server got the client's Finished: answer with its own
        Role::Server => conn.state = HandshakeState::SendServerFinished12,
    }
    Ok(())
}

fn consume_server_flight13<R, W>(
    conn: &mut TLSConnection<R, W>,
    message_type: HandshakeType,
    body: &mut ByteBuffer<'_>,
    transcript_before: &Transcript,
) -> Result<(), TLSError> {
    let config = conn.config()?;
    let suite = conn.pending.suite()?;

    match message_type {
        HandshakeType::EncryptedExtensions if !conn.pending.seen_encrypted_extensions => {
            conn.pending.seen_encrypted_extensions = true;
            let message = EncryptedExtensions::decode_body(body)?;
            for extension in message.extensions {
                match extension {
                    Extension::Alpn(protocols) => {
                        if protocols.len() != 1
                            || !conn.alpn_list(&config).contains(&protocols[0])
                        {
                            return Err(TLSError::NoApplicationProtocol);
                        }
                        conn.negotiated_alpn = Some(protocols[0].clone());
                    },
                    Extension::MaxFragmentLength(length) => {
                        if config.max_fragment_length != Some(length) {
                            return Err(TLSError::IllegalParameter);
                        }
                        conn.set_fragment_limit(length.in_bytes());
                    },
                    _ => {},
                }
            }
        },
        HandshakeType::CertificateRequest
            if conn.pending.seen_encrypted_extensions && !conn.pending.seen_cert_request =>
        {
            conn.pending.seen_cert_request = true;
            let request = CertificateRequest::decode_body(ProtocolVersion::Tls13, body)?;
            conn.pending.cert_requested = true;
            conn.pending.peer_schemes = request.schemes;
        },
        HandshakeType::Certificate
            if conn.pending.seen_encrypted_extensions && !conn.pending.seen_certificate =>
        {
            conn.pending.seen_certificate = true;
            let chain = CertificateChain::decode_body(ProtocolVersion::Tls13, body)?;
            parse_peer_leaf(conn, chain)?;
        },
        HandshakeType::CertificateVerify
            if conn.pending.seen_certificate && !conn.pending.seen_cert_verify =>
        {
            conn.pending.seen_cert_verify = true;
            let message = CertificateVerify::decode_body(ProtocolVersion::Tls13, body)?;
            let content =
                certificate_verify_content(true, &transcript_before.hash(suite.hash));
            let peer = conn
                .pending
                .peer_public_key
                .as_ref()
                .ok_or(TLSError::UnexpectedMessage)?;
            peer.verify(message.scheme, &content, &message.signature)?;
        },
        HandshakeType::Finished if conn.pending.seen_cert_verify => {
            let finished = Finished::decode_body(body)?;
            let schedule = conn
                .pending
                .schedule13
                .as_mut()
                .ok_or(TLSError::Internal("no key schedule"))?;

            let expected = schedule.finished_mac(
                &schedule.server_handshake_traffic,
                &transcript_before.hash(suite.hash),
            );
            if finished.verify_data.len() != expected.len()
                || !bool::from(expected.as_slice().ct_eq(&finished.verify_data))
            {
                return Err(TLSError::DecryptError);
            }

            // The server reads our flight under handshake keys but writes
            // application records from here on
            schedule.derive_application_secrets(&conn.transcript.hash(suite.hash));
            conn.read_state =
                traffic_bank(suite, schedule, &schedule.server_application_traffic)?;
            conn.pending.app_write = Some(traffic_bank(
                suite,
                schedule,
                &schedule.client_application_traffic,
            )?);
            conn.state = HandshakeState::SendClientFlight13;
        },
        _ => return Err(TLSError::UnexpectedMessage),
    }
    Ok(())
}

fn consume_client_flight13<R, W>(
    conn: &mut TLSConnection<R, W>,
    message_type: HandshakeType,
    body: &mut ByteBuffer<'_>,
    transcript_before: &Transcript,
) -> Result<(), TLSError> {
    let config = conn.config()?;
    let suite = conn.pending.suite()?;

    match message_type {
        HandshakeType::Certificate
            if conn.pending.cert_requested && !conn.pending.seen_certificate =>
        {
            conn.pending.seen_certificate = true;
            let chain = CertificateChain::decode_body(ProtocolVersion::Tls13, body)?;
            if chain.certificates.is_empty() {
                if config.client_auth == crate::ClientAuth::Require {
                    return Err(TLSError::HandshakeFailure);
                }
            } else {
                parse_peer_leaf(conn, chain)?;
                conn.pending.client_cert_sent = true;
            }
        },
        HandshakeType::CertificateVerify
            if conn.pending.client_cert_sent && !conn.pending.seen_cert_verify =>
        {
            conn.pending.seen_cert_verify = true;
            let message = CertificateVerify::decode_body(ProtocolVersion::Tls13, body)?;
            let content =
                certificate_verify_content(false, &transcript_before.hash(suite.hash));
            let peer = conn
                .pending
                .peer_public_key
                .as_ref()
                .ok_or(TLSError::UnexpectedMessage)?;
            peer.verify(message.scheme, &content, &message.signature)?;
        },
        HandshakeType::Finished => {
            if conn.pending.cert_requested && !conn.pending.seen_certificate {
                return Err(TLSError::UnexpectedMessage);
            }
            if conn.pending.client_cert_sent && !conn.pending.seen_cert_verify {
                return Err(TLSError::UnexpectedMessage);
            }

            let finished = Finished::decode_body(body)?;
            let schedule = conn
                .pending
                .schedule13
                .as_ref()
                .ok_or(TLSError::Internal("no key schedule"))?;
            let expected = schedule.finished_mac(
                &schedule.client_handshake_traffic,
                &transcript_before.hash(suite.hash),
            );
            if finished.verify_data.len() != expected.len()
                || !bool::from(expected.as_slice().ct_eq(&finished.verify_data))
            {
                return Err(TLSError::DecryptError);
            }

            let read = conn
                .pending
                .app_read
                .take()
                .ok_or(TLSError::Internal("no pending bank"))?;
            conn.read_state = read;
            conn.finish_handshake();
        },
        _ => return Err(TLSError::UnexpectedMessage),
    }
    Ok(())
}
