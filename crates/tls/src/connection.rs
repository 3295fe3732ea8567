//! The connection object: configuration, crypto state for both directions,
//! the record pump, and the public read/write API.
//!
//! Every public call is re-entrant on [TLSError::Blocked]: all cursors (the
//! partial record header, the partially-read record body, the outbound
//! flush position, the handshake reassembly buffer) live in the connection,
//! so the caller just retries after polling the transport.

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytebuf::ByteBuffer;
use zeroize::Zeroizing;

use crate::{
    alert::{Alert, Description},
    cipher_suite::CipherSuite,
    config::TLSConfig,
    encoding::{Decode, Encode},
    error::{self, Direction, TLSError},
    handshake::{
        self,
        messages::HandshakeType,
        HandshakeEvent, HandshakeState, Pending,
    },
    record_layer::{
        seal_fragmented, ContentType, DirectionState, RecordHeader, HEADER_LEN, MAX_PLAINTEXT_LEN,
    },
    transcript::Transcript,
    ProtocolVersion, ServerName,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Handshake messages larger than this are nonsense; certificates chains
/// are the biggest legitimate payload and stay far below it.
const MAX_HANDSHAKE_MESSAGE_LEN: usize = 1 << 20;

pub struct TLSConnection<R, W> {
    pub(crate) role: Role,
    reader: R,
    writer: W,
    config: Option<Arc<TLSConfig>>,

    pub(crate) state: HandshakeState,
    /// The highest version offered in our ClientHello.
    pub(crate) advertised_version: ProtocolVersion,
    version: Option<ProtocolVersion>,
    negotiated_suite: Option<&'static CipherSuite>,

    pub(crate) pending: Pending,
    pub(crate) transcript: Transcript,
    pub(crate) read_state: DirectionState,
    pub(crate) write_state: DirectionState,

    pub(crate) server_name: Option<ServerName>,
    pub(crate) status_request: bool,
    pub(crate) negotiated_alpn: Option<Vec<u8>>,
    alpn_preferences: Option<Vec<Vec<u8>>>,
    peer_ocsp_staple: Option<Vec<u8>>,
    peer_certificates: Vec<Vec<u8>>,

    /// Inbound record cursors: the five header bytes, then the payload.
    header_in: ByteBuffer<'static>,
    current_header: Option<RecordHeader>,
    body_in: ByteBuffer<'static>,
    /// Handshake messages reassembled across record boundaries.
    handshake_in: ByteBuffer<'static>,
    /// Decrypted application bytes the caller has not collected yet.
    in_plaintext: ByteBuffer<'static>,
    /// Sealed records awaiting transport writes.
    out: ByteBuffer<'static>,
    fragment_limit: usize,

    /// Most recent warning alert from the peer.
    reader_alert: Option<Alert>,
    /// Alert queued or already emitted toward the peer.
    writer_alert: Option<Alert>,
    closing: AtomicBool,
    closed: AtomicBool,
    close_notify_received: bool,

    wire_bytes_in: u64,
    wire_bytes_out: u64,
}

impl<R, W> TLSConnection<R, W> {
    #[must_use]
    pub fn new(role: Role, reader: R, writer: W) -> Self {
        Self {
            role,
            reader,
            writer,
            config: None,
            state: match role {
                Role::Client => HandshakeState::SendClientHello,
                Role::Server => HandshakeState::RecvClientHello,
            },
            advertised_version: ProtocolVersion::Tls13,
            version: None,
            negotiated_suite: None,
            pending: Pending::new(),
            transcript: Transcript::new(),
            read_state: DirectionState::plaintext(),
            write_state: DirectionState::plaintext(),
            server_name: None,
            status_request: false,
            negotiated_alpn: None,
            alpn_preferences: None,
            peer_ocsp_staple: None,
            peer_certificates: Vec::new(),
            header_in: ByteBuffer::<'static>::with_fixed_size(HEADER_LEN),
            current_header: None,
            body_in: ByteBuffer::growable(0),
            handshake_in: ByteBuffer::growable(0),
            in_plaintext: ByteBuffer::growable(0),
            out: ByteBuffer::growable(0),
            fragment_limit: MAX_PLAINTEXT_LEN,
            reader_alert: None,
            writer_alert: None,
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_notify_received: false,
            wire_bytes_in: 0,
            wire_bytes_out: 0,
        }
    }

    pub fn set_config(&mut self, config: Arc<TLSConfig>) {
        self.config = Some(config);
    }

    /// The name to request via SNI (client) or the name the peer asked for
    /// (server, after the handshake).
    pub fn set_server_name(&mut self, name: &str) -> Result<(), TLSError> {
        error::clear_error();
        match ServerName::new(name) {
            Ok(name) => {
                self.server_name = Some(name);
                Ok(())
            },
            Err(error) => {
                error::record_error(&error);
                Err(error)
            },
        }
    }

    /// Override the config's ALPN preference list for this connection.
    pub fn set_protocol_preferences<P: AsRef<[u8]>>(&mut self, protocols: &[P]) {
        self.alpn_preferences = Some(
            protocols
                .iter()
                .map(|protocol| protocol.as_ref().to_vec())
                .collect(),
        );
    }

    /// Ask the server for a stapled OCSP response (client side).
    pub fn set_status_request(&mut self, enabled: bool) {
        self.status_request = enabled;
    }

    #[must_use]
    pub fn negotiated_version(&self) -> Option<ProtocolVersion> {
        self.version
    }

    #[must_use]
    pub fn cipher_suite(&self) -> Option<&'static CipherSuite> {
        self.negotiated_suite.or(self.pending.suite)
    }

    /// The ALPN protocol both sides settled on.
    #[must_use]
    pub fn application_protocol(&self) -> Option<&[u8]> {
        self.negotiated_alpn.as_deref()
    }

    #[must_use]
    pub fn server_name(&self) -> Option<&ServerName> {
        self.server_name.as_ref()
    }

    /// The peer's stapled OCSP response, if one arrived.
    #[must_use]
    pub fn ocsp_response(&self) -> Option<&[u8]> {
        self.peer_ocsp_staple.as_deref()
    }

    /// The peer's certificate chain, raw DER, leaf first.
    #[must_use]
    pub fn peer_certificates(&self) -> &[Vec<u8>] {
        &self.peer_certificates
    }

    #[must_use]
    pub fn last_warning_alert(&self) -> Option<Alert> {
        self.reader_alert
    }

    #[must_use]
    pub fn is_handshake_complete(&self) -> bool {
        self.state == HandshakeState::ApplicationData
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn wire_bytes(&self) -> (u64, u64) {
        (self.wire_bytes_in, self.wire_bytes_out)
    }

    // --- crate-internal accessors the state machine drives --------------

    pub(crate) fn config(&self) -> Result<Arc<TLSConfig>, TLSError> {
        self.config.clone().ok_or(TLSError::MissingConfig)
    }

    pub(crate) fn version(&self) -> Result<ProtocolVersion, TLSError> {
        self.version
            .ok_or(TLSError::InvalidState("no version negotiated"))
    }

    pub(crate) fn set_version(&mut self, version: ProtocolVersion) {
        self.version = Some(version);
    }

    /// The ALPN list in effect: the per-connection override, else the
    /// config's.
    pub(crate) fn alpn_list(&self, config: &TLSConfig) -> Vec<Vec<u8>> {
        self.alpn_preferences
            .clone()
            .unwrap_or_else(|| config.alpn_protocols.clone())
    }

    /// The version stamped on outgoing records. Until something is
    /// negotiated this is {3,1}, which keeps ancient middleware happy with
    /// the initial ClientHello.
    fn outgoing_version(&self) -> ProtocolVersion {
        self.version.unwrap_or(ProtocolVersion::Tls10)
    }

    pub(crate) fn set_fragment_limit(&mut self, limit: usize) {
        self.fragment_limit = limit.min(MAX_PLAINTEXT_LEN);
    }

    /// Queue one handshake message: into the transcript, then sealed into
    /// the outbound buffer under the current write keys.
    pub(crate) fn queue_handshake(&mut self, bytes: &[u8]) -> Result<(), TLSError> {
        self.transcript.update(bytes);
        let version = self.outgoing_version();
        seal_fragmented(
            &mut self.write_state,
            version,
            ContentType::Handshake,
            bytes,
            self.fragment_limit,
            &mut self.out,
        )?;
        Ok(())
    }

    /// Queue the one-byte ChangeCipherSpec record. Not part of the
    /// transcript.
    pub(crate) fn queue_change_cipher_spec(&mut self) -> Result<(), TLSError> {
        self.write_state.seal(
            self.outgoing_version(),
            ContentType::ChangeCipherSpec,
            &[1],
            &mut self.out,
        )
    }

    /// The handshake is done: remember what was negotiated, then wipe the
    /// negotiation scratch state (and the secrets still inside it).
    pub(crate) fn finish_handshake(&mut self) {
        self.negotiated_suite = self.pending.suite;
        self.peer_ocsp_staple = self.pending.ocsp_staple.take();
        self.peer_certificates = std::mem::take(&mut self.pending.peer_certificates);
        self.pending = Pending::new();
        self.handshake_in.wipe();
        self.state = HandshakeState::ApplicationData;
        log::debug!(
            "Handshake complete: {:?} with {}",
            self.version,
            self.negotiated_suite.map_or("?", |suite| suite.name)
        );
    }
}

impl<R: io::Read, W: io::Write> TLSConnection<R, W> {
    /// Drive the transport write side until the outbound buffer is empty.
    fn flush_out(&mut self) -> Result<(), TLSError> {
        while self.out.remaining() != 0 {
            match self.writer.write(self.out.readable()) {
                Ok(0) => {
                    return Err(TLSError::Io(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "transport accepted no bytes",
                    )))
                },
                Ok(written) => {
                    self.out
                        .skip_read(written)
                        .map_err(|_| TLSError::Internal("flush cursor"))?;
                    self.wire_bytes_out += written as u64;
                },
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Err(TLSError::Blocked(Direction::Write));
                },
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {},
                Err(error) => return Err(TLSError::Io(error)),
            }
        }
        // Fully drained: zero the sealed records and reclaim the space
        self.out.wipe();

        match self.writer.flush() {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                Err(TLSError::Blocked(Direction::Write))
            },
            Err(error) => Err(TLSError::Io(error)),
        }
    }

    /// Read transport bytes into `target`, up to `want`. Returns how many
    /// arrived.
    fn fill_from_transport(
        reader: &mut R,
        target: &mut ByteBuffer<'static>,
        want: usize,
        handshake_done: bool,
        close_notify_received: bool,
    ) -> Result<usize, TLSError> {
        let mut chunk = [0; 4096];
        let want = want.min(chunk.len());
        loop {
            match reader.read(&mut chunk[..want]) {
                Ok(0) => {
                    return Err(if !handshake_done {
                        TLSError::ClosedEarly
                    } else if close_notify_received {
                        TLSError::Closed
                    } else {
                        TLSError::ClosedWithoutNotify
                    });
                },
                Ok(read) => {
                    target
                        .write_bytes(&chunk[..read])
                        .map_err(|_| TLSError::Internal("receive buffer"))?;
                    return Ok(read);
                },
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Err(TLSError::Blocked(Direction::Read));
                },
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {},
                Err(error) => return Err(TLSError::Io(error)),
            }
        }
    }

    /// Read and unprotect the next record. Resumable: header and body
    /// cursors survive a would-block at any byte.
    fn read_record(&mut self) -> Result<(ContentType, Zeroizing<Vec<u8>>), TLSError> {
        let handshake_done = self.state == HandshakeState::ApplicationData;

        let header = loop {
            if let Some(header) = self.current_header {
                break header;
            }
            if self.header_in.remaining() == HEADER_LEN {
                let bytes: [u8; HEADER_LEN] = self
                    .header_in
                    .read_array()
                    .map_err(|_| TLSError::Internal("header buffer"))?;
                self.header_in.wipe();
                self.current_header = Some(RecordHeader::parse(bytes)?);
                continue;
            }
            let want = HEADER_LEN - self.header_in.remaining();
            let read = Self::fill_from_transport(
                &mut self.reader,
                &mut self.header_in,
                want,
                handshake_done,
                self.close_notify_received,
            )?;
            self.wire_bytes_in += read as u64;
        };

        while self.body_in.remaining() < header.length {
            let want = header.length - self.body_in.remaining();
            let read = Self::fill_from_transport(
                &mut self.reader,
                &mut self.body_in,
                want,
                handshake_done,
                self.close_notify_received,
            )?;
            self.wire_bytes_in += read as u64;
        }

        let version = self.version.unwrap_or(ProtocolVersion::Tls12);
        let payload = self.body_in.readable().to_vec();
        let opened = self.read_state.open(version, header, &payload);
        self.current_header = None;
        self.body_in.wipe();
        opened
    }

    /// Process an alert payload. `close_notify` surfaces as
    /// [TLSError::Closed]; fatal alerts close the connection.
    fn process_alert(&mut self, payload: &[u8]) -> Result<(), TLSError> {
        if payload.len() != 2 {
            return Err(TLSError::BadMessage);
        }
        let mut buf = ByteBuffer::from_slice(payload);
        let alert = Alert::decode(&mut buf).map_err(|_| TLSError::BadMessage)?;

        if alert.description == Description::CloseNotify {
            self.close_notify_received = true;
            self.closed.store(true, Ordering::Release);
            return Err(TLSError::Closed);
        }
        if alert.is_fatal() {
            log::warn!("Fatal alert from peer: {}", alert.description);
            self.state = HandshakeState::Closed;
            self.closed.store(true, Ordering::Release);
            return Err(TLSError::AlertReceived(alert.description));
        }

        log::info!("Warning alert from peer: {}", alert.description);
        self.reader_alert = Some(alert);
        Ok(())
    }

    /// The next handshake event: a fully reassembled message, or a
    /// ChangeCipherSpec record.
    fn next_event(&mut self) -> Result<HandshakeEvent, TLSError> {
        loop {
            if self.handshake_in.remaining() >= handshake::messages::HEADER_LEN {
                let readable = self.handshake_in.readable();
                let raw_type = readable[0];
                let length =
                    u32::from_be_bytes([0, readable[1], readable[2], readable[3]]) as usize;
                if length > MAX_HANDSHAKE_MESSAGE_LEN {
                    return Err(TLSError::BadMessage);
                }
                if self.handshake_in.remaining() >= handshake::messages::HEADER_LEN + length {
                    let message_type = HandshakeType::try_from(raw_type)
                        .map_err(|_| TLSError::UnexpectedMessage)?;
                    let body =
                        readable[handshake::messages::HEADER_LEN..][..length].to_vec();
                    self.handshake_in
                        .skip_read(handshake::messages::HEADER_LEN + length)
                        .map_err(|_| TLSError::Internal("reassembly cursor"))?;
                    self.handshake_in.compact();
                    return Ok(HandshakeEvent::Message(message_type, body));
                }
            }

            let (content_type, payload) = self.read_record()?;
            match content_type {
                ContentType::Handshake => {
                    if payload.is_empty() {
                        return Err(TLSError::BadMessage);
                    }
                    self.handshake_in
                        .write_bytes(&payload)
                        .map_err(|_| TLSError::Internal("reassembly buffer"))?;
                },
                ContentType::ChangeCipherSpec => {
                    if payload.as_slice() != [1] {
                        return Err(TLSError::BadMessage);
                    }
                    return Ok(HandshakeEvent::ChangeCipherSpec);
                },
                ContentType::Alert => match self.process_alert(&payload) {
                    // A close mid-handshake is an early close
                    Err(TLSError::Closed) => return Err(TLSError::ClosedEarly),
                    other => other?,
                },
                ContentType::ApplicationData => return Err(TLSError::UnexpectedMessage),
            }
        }
    }

    /// Run the handshake as far as the transport allows.
    ///
    /// Returns `Ok(())` once the connection reaches its application state.
    /// [TLSError::Blocked] means retry after polling; everything else is
    /// fatal.
    pub fn negotiate(&mut self) -> Result<(), TLSError> {
        error::clear_error();
        if self.config.is_none() {
            let error = TLSError::MissingConfig;
            error::record_error(&error);
            return Err(error);
        }

        let result = self.negotiate_inner();
        result.map_err(|error| self.fail(error))
    }

    fn negotiate_inner(&mut self) -> Result<(), TLSError> {
        loop {
            self.flush_out()?;
            match self.state {
                HandshakeState::ApplicationData => return Ok(()),
                HandshakeState::Closed => return Err(TLSError::Closed),
                state if state.wants_write() => handshake::produce(self)?,
                _ => {
                    let event = self.next_event()?;
                    handshake::consume(self, event)?;
                },
            }
        }
    }

    /// Record the failure, push a best-effort fatal alert, close.
    fn fail(&mut self, error: TLSError) -> TLSError {
        if matches!(error, TLSError::Blocked(_)) {
            return error;
        }
        error::record_error(&error);

        if let Some(description) = error.alert() {
            if self.writer_alert.is_none() && !self.is_closed() {
                let alert = Alert::fatal(description);
                self.writer_alert = Some(alert);
                // Best effort only: a fatal error must not wedge the
                // connection trying to announce itself
                let sealed = self.write_state.seal(
                    self.outgoing_version(),
                    ContentType::Alert,
                    &alert.to_bytes(),
                    &mut self.out,
                );
                if sealed.is_ok() {
                    let _ = self.flush_out();
                }
                log::warn!("Closing with fatal alert: {}", description);
            }
        }

        self.state = HandshakeState::Closed;
        self.closed.store(true, Ordering::Release);
        error
    }

    /// Encrypt and send application bytes. Returns how many payload bytes
    /// were accepted; they are guaranteed to be delivered by later calls
    /// even if this one could only partially flush.
    pub fn send(&mut self, payload: &[u8]) -> Result<usize, TLSError> {
        error::clear_error();
        if self.is_closed() || self.closing.load(Ordering::Acquire) {
            return Err(self.fail(TLSError::Closed));
        }
        if self.state != HandshakeState::ApplicationData {
            let error = TLSError::InvalidState("send before handshake completion");
            error::record_error(&error);
            return Err(error);
        }

        // Backlog from an earlier blocked call goes out first
        if self.out.remaining() != 0 {
            self.flush_out().map_err(|error| self.fail(error))?;
        }
        if payload.is_empty() {
            return Ok(0);
        }

        let version = self.version()?;
        let consumed = seal_fragmented(
            &mut self.write_state,
            version,
            ContentType::ApplicationData,
            payload,
            self.fragment_limit,
            &mut self.out,
        )
        .map_err(|error| self.fail(error))?;

        match self.flush_out() {
            // Accepted bytes are queued; a blocked flush finishes later
            Ok(()) | Err(TLSError::Blocked(_)) => Ok(consumed),
            Err(error) => Err(self.fail(error)),
        }
    }

    /// Receive decrypted application bytes. `Ok(0)` means the peer closed
    /// the stream cleanly.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TLSError> {
        error::clear_error();
        if self.state != HandshakeState::ApplicationData
            && self.state != HandshakeState::Closed
        {
            let error = TLSError::InvalidState("recv before handshake completion");
            error::record_error(&error);
            return Err(error);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        loop {
            if self.in_plaintext.remaining() != 0 {
                let take = buf.len().min(self.in_plaintext.remaining());
                self.in_plaintext
                    .read_bytes(&mut buf[..take])
                    .map_err(|_| TLSError::Internal("plaintext queue"))?;
                if self.in_plaintext.remaining() == 0 {
                    self.in_plaintext.wipe();
                }
                return Ok(take);
            }
            if self.close_notify_received || self.is_closed() {
                return Ok(0);
            }

            let (content_type, payload) = match self.read_record() {
                Ok(record) => record,
                Err(TLSError::Closed) => return Ok(0),
                Err(error) => return Err(self.fail(error)),
            };
            match content_type {
                ContentType::ApplicationData => {
                    self.in_plaintext
                        .write_bytes(&payload)
                        .map_err(|_| TLSError::Internal("plaintext queue"))?;
                },
                ContentType::Alert => match self.process_alert(&payload) {
                    Ok(()) => {},
                    Err(TLSError::Closed) => return Ok(0),
                    Err(error) => return Err(self.fail(error)),
                },
                ContentType::Handshake => {
                    if let Err(error) = self.post_handshake(&payload) {
                        return Err(self.fail(error));
                    }
                },
                ContentType::ChangeCipherSpec => {
                    // Only the 1.3 middlebox dummy is tolerated here
                    if self.version != Some(ProtocolVersion::Tls13) {
                        return Err(self.fail(TLSError::UnexpectedMessage));
                    }
                },
            }
        }
    }

    /// Post-handshake handshake traffic: tickets are ignored, a 1.2
    /// renegotiation request is politely refused, anything else is an
    /// error.
    fn post_handshake(&mut self, payload: &[u8]) -> Result<(), TLSError> {
        self.handshake_in
            .write_bytes(payload)
            .map_err(|_| TLSError::Internal("reassembly buffer"))?;

        while self.handshake_in.remaining() >= handshake::messages::HEADER_LEN {
            let readable = self.handshake_in.readable();
            let raw_type = readable[0];
            let length = u32::from_be_bytes([0, readable[1], readable[2], readable[3]]) as usize;
            if length > MAX_HANDSHAKE_MESSAGE_LEN {
                return Err(TLSError::BadMessage);
            }
            if self.handshake_in.remaining() < handshake::messages::HEADER_LEN + length {
                break;
            }
            self.handshake_in
                .skip_read(handshake::messages::HEADER_LEN + length)
                .map_err(|_| TLSError::Internal("reassembly cursor"))?;
            self.handshake_in.compact();

            match HandshakeType::try_from(raw_type) {
                Ok(HandshakeType::NewSessionTicket) => {
                    // Resumption is unsupported; the ticket is discarded
                    log::debug!("Ignoring NewSessionTicket");
                },
                Ok(HandshakeType::HelloRequest) => {
                    log::debug!("Refusing renegotiation");
                    let alert = Alert {
                        severity: crate::alert::Severity::Warning,
                        description: Description::NoRenegotiation,
                    };
                    self.write_state.seal(
                        self.outgoing_version(),
                        ContentType::Alert,
                        &alert.to_bytes(),
                        &mut self.out,
                    )?;
                    match self.flush_out() {
                        Ok(()) | Err(TLSError::Blocked(_)) => {},
                        Err(error) => return Err(error),
                    }
                },
                _ => return Err(TLSError::UnexpectedMessage),
            }
        }
        Ok(())
    }

    /// Send `close_notify` and mark the connection closed. The peer's
    /// answer is not awaited.
    pub fn shutdown(&mut self) -> Result<(), TLSError> {
        error::clear_error();
        self.closing.store(true, Ordering::Release);

        if self.writer_alert.is_none() {
            let alert = Alert::close_notify();
            self.writer_alert = Some(alert);
            self.write_state.seal(
                self.outgoing_version(),
                ContentType::Alert,
                &alert.to_bytes(),
                &mut self.out,
            )?;
        }

        match self.flush_out() {
            Ok(()) => {
                self.closed.store(true, Ordering::Release);
                self.state = HandshakeState::Closed;
                Ok(())
            },
            Err(blocked @ TLSError::Blocked(_)) => Err(blocked),
            Err(error) => {
                // The transport is gone; closed is closed
                self.closed.store(true, Ordering::Release);
                self.state = HandshakeState::Closed;
                error::record_error(&error);
                Err(error)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_connection_is_in_the_opening_state() {
        let client = TLSConnection::new(Role::Client, io::empty(), io::sink());
        assert_eq!(client.state, HandshakeState::SendClientHello);
        assert!(!client.is_handshake_complete());
        assert!(client.negotiated_version().is_none());

        let server = TLSConnection::new(Role::Server, io::empty(), io::sink());
        assert_eq!(server.state, HandshakeState::RecvClientHello);
    }

    #[test]
    fn negotiate_without_config_is_a_usage_error() {
        let mut client = TLSConnection::new(Role::Client, io::empty(), io::sink());
        assert!(matches!(client.negotiate(), Err(TLSError::MissingConfig)));
        assert_eq!(
            crate::last_error_code(),
            TLSError::MissingConfig.code()
        );
    }

    #[test]
    fn send_before_handshake_is_a_usage_error() {
        let mut client = TLSConnection::new(Role::Client, io::empty(), io::sink());
        assert!(matches!(
            client.send(b"hello"),
            Err(TLSError::InvalidState(_))
        ));
    }
}
