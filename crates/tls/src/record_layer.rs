//! The record protocol: framing, protection and sequence tracking.
//!
//! A record is `type(1) || version(2) || length(2) || payload`. Outbound
//! payloads are MAC-then-encrypted (CBC suites) or sealed (AEAD suites)
//! under the write direction's state; inbound records are verified and
//! opened under the read direction's state. Each direction keeps its own
//! 64-bit sequence number, reset whenever new keys are installed.

use bytebuf::ByteBuffer;
use rand_core::{OsRng, RngCore};
use subtle::{Choice, ConstantTimeEq};
use zeroize::Zeroizing;

use crate::{
    cipher::{AeadCipher, RecordCipher, RecordMac},
    cipher_suite::{CipherSuite, RecordCipherKind},
    ProtocolVersion, TLSError,
};

/// Maximum plaintext carried by one record.
pub const MAX_PLAINTEXT_LEN: usize = 1 << 14;

/// Maximum payload length accepted in a record header: plaintext plus the
/// protection overhead allowance.
pub const MAX_PAYLOAD_LEN: usize = MAX_PLAINTEXT_LEN + 256;

pub const HEADER_LEN: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
}

impl ContentType {
    #[must_use]
    const fn wire(self) -> u8 {
        match self {
            Self::ChangeCipherSpec => 20,
            Self::Alert => 21,
            Self::Handshake => 22,
            Self::ApplicationData => 23,
        }
    }

    #[must_use]
    fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            20 => Some(Self::ChangeCipherSpec),
            21 => Some(Self::Alert),
            22 => Some(Self::Handshake),
            23 => Some(Self::ApplicationData),
            _ => None,
        }
    }
}

impl TryFrom<u8> for ContentType {
    type Error = TLSError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Self::from_wire(byte).ok_or_else(|| {
            log::warn!("Record carries unassigned content type {byte}");
            TLSError::UnknownContentType
        })
    }
}

impl From<ContentType> for u8 {
    fn from(value: ContentType) -> Self {
        value.wire()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub version: [u8; 2],
    pub length: usize,
}

impl RecordHeader {
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Result<Self, TLSError> {
        let content_type = ContentType::try_from(bytes[0])?;

        // SSLv2-style headers and garbage both show up as a bad major
        // version; everything with major 3 is let through so that a
        // version mismatch can be answered with a proper alert.
        if bytes[1] != 3 || bytes[2] > 4 {
            return Err(TLSError::BadRecord);
        }

        let length = usize::from(u16::from_be_bytes([bytes[3], bytes[4]]));
        if length > MAX_PAYLOAD_LEN {
            return Err(TLSError::RecordOverflow);
        }

        Ok(Self {
            content_type,
            version: [bytes[1], bytes[2]],
            length,
        })
    }
}

fn write_header(
    out: &mut ByteBuffer<'_>,
    content_type: ContentType,
    version: [u8; 2],
    length: usize,
) -> Result<(), TLSError> {
    out.write_u8(content_type.into())?;
    out.write_bytes(&version)?;
    out.write_u16(length as u16)?;
    Ok(())
}

/// Everything needed to protect (or unprotect) records in one direction.
pub(crate) struct DirectionState {
    kind: RecordCipherKind,
    cipher: RecordCipher,
    mac: RecordMac,
    /// Key-block IV (CBC 1.0), GCM salt, or full xor-nonce IV.
    fixed_iv: Zeroizing<Vec<u8>>,
    sequence_number: u64,
    /// Records use the TLS 1.3 inner-plaintext construction.
    tls13: bool,
}

impl DirectionState {
    /// The initial state: no protection at all.
    #[must_use]
    pub fn plaintext() -> Self {
        Self {
            kind: RecordCipherKind::Null,
            cipher: RecordCipher::Null,
            mac: RecordMac::Null,
            fixed_iv: Zeroizing::new(Vec::new()),
            sequence_number: 0,
            tls13: false,
        }
    }

    /// Build a direction's state from derived key material.
    /// The sequence number starts over at zero.
    pub fn from_material(
        suite: &'static CipherSuite,
        key: &[u8],
        mac_key: &[u8],
        fixed_iv: &[u8],
        tls13: bool,
    ) -> Result<Self, TLSError> {
        let cipher = RecordCipher::new(suite.cipher, key)
            .map_err(|_| TLSError::Internal("record cipher init"))?;
        Ok(Self {
            kind: suite.cipher,
            cipher,
            mac: RecordMac::new(suite.mac, mac_key),
            fixed_iv: Zeroizing::new(fixed_iv.to_vec()),
            sequence_number: 0,
            tls13,
        })
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !matches!(self.cipher, RecordCipher::Null)
    }

    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    fn bump_sequence(&mut self) -> Result<(), TLSError> {
        self.sequence_number = self
            .sequence_number
            .checked_add(1)
            .ok_or(TLSError::SequenceNumberOverflow)?;
        Ok(())
    }

    /// The largest plaintext fragment one record can carry under this
    /// state. CBC reserves room for the MAC, one block of padding and the
    /// padding length byte inside the plaintext limit; AEAD expansion fits
    /// in the payload allowance instead.
    #[must_use]
    pub fn max_fragment(&self) -> usize {
        match self.kind {
            RecordCipherKind::AesCbc { .. } => {
                MAX_PLAINTEXT_LEN - self.mac.mac_len() - self.kind.block_size() - 1
            },
            _ => MAX_PLAINTEXT_LEN,
        }
    }

    /// Nonce for xor-style AEAD suites: the fixed IV xored with the
    /// big-endian sequence number in the rightmost bytes.
    fn xor_nonce(&self, sequence_number: u64) -> [u8; 12] {
        let mut nonce = [0; 12];
        nonce[..self.fixed_iv.len()].copy_from_slice(&self.fixed_iv);
        for (nonce_byte, seq_byte) in nonce[4..].iter_mut().zip(sequence_number.to_be_bytes()) {
            *nonce_byte ^= seq_byte;
        }
        nonce
    }

    /// Protect one fragment and append the complete record to `out`.
    pub fn seal(
        &mut self,
        version: ProtocolVersion,
        content_type: ContentType,
        fragment: &[u8],
        out: &mut ByteBuffer<'_>,
    ) -> Result<(), TLSError> {
        debug_assert!(fragment.len() <= self.max_fragment());
        let wire_version = version.record_version();
        let sequence_number = self.sequence_number;

        match (&self.cipher, self.tls13) {
            (RecordCipher::Null, _) => {
                write_header(out, content_type, wire_version, fragment.len())?;
                out.write_bytes(fragment)?;
                // No protection, no replay counter to maintain
                return Ok(());
            },
            (RecordCipher::Cbc(_), _) => {
                let mac =
                    self.mac
                        .compute(sequence_number, content_type.into(), wire_version, fragment);
                let block = self.kind.block_size();

                let explicit_iv = version >= ProtocolVersion::Tls11;
                let mut iv = [0; 16];
                if explicit_iv {
                    OsRng.fill_bytes(&mut iv);
                } else {
                    iv.copy_from_slice(&self.fixed_iv);
                }

                let unpadded = fragment.len() + mac.len() + 1;
                let padding = (block - unpadded % block) % block;
                let pad_byte = padding as u8;

                let mut plaintext = Zeroizing::new(Vec::with_capacity(unpadded + padding));
                plaintext.extend_from_slice(fragment);
                plaintext.extend_from_slice(&mac);
                plaintext.resize(unpadded + padding, pad_byte);

                let RecordCipher::Cbc(cbc) = &self.cipher else {
                    unreachable!();
                };
                cbc.encrypt_in_place(&iv, &mut plaintext)
                    .map_err(|_| TLSError::Internal("CBC encrypt"))?;

                let iv_len = if explicit_iv { 16 } else { 0 };
                write_header(out, content_type, wire_version, iv_len + plaintext.len())?;
                if explicit_iv {
                    out.write_bytes(&iv)?;
                } else {
                    // TLS 1.0 chains the CBC residue into the next record
                    self.fixed_iv
                        .copy_from_slice(&plaintext[plaintext.len() - 16..]);
                }
                out.write_bytes(&plaintext)?;
            },
            (RecordCipher::Aead(_), false) => {
                let explicit_len = self.kind.explicit_iv_len(version);
                let nonce = if explicit_len > 0 {
                    // GCM: salt from the key block, explicit part is the
                    // sequence number, sent on the wire
                    let mut nonce = [0; 12];
                    nonce[..4].copy_from_slice(&self.fixed_iv);
                    nonce[4..].copy_from_slice(&sequence_number.to_be_bytes());
                    nonce
                } else {
                    self.xor_nonce(sequence_number)
                };

                let mut aad = Vec::with_capacity(13);
                aad.extend_from_slice(&sequence_number.to_be_bytes());
                aad.push(content_type.into());
                aad.extend_from_slice(&wire_version);
                aad.extend_from_slice(&(fragment.len() as u16).to_be_bytes());

                let mut ciphertext = fragment.to_vec();
                let RecordCipher::Aead(aead) = &self.cipher else {
                    unreachable!();
                };
                let tag = aead
                    .seal(&nonce, &aad, &mut ciphertext)
                    .map_err(|_| TLSError::Internal("AEAD seal"))?;

                let length = explicit_len + ciphertext.len() + tag.len();
                write_header(out, content_type, wire_version, length)?;
                if explicit_len > 0 {
                    out.write_bytes(&sequence_number.to_be_bytes())?;
                }
                out.write_bytes(&ciphertext)?;
                out.write_bytes(&tag)?;
            },
            (RecordCipher::Aead(_), true) => {
                // TLS 1.3 inner plaintext: content || real type, under an
                // outer application_data header that doubles as the AAD
                let nonce = self.xor_nonce(sequence_number);

                let mut inner = Zeroizing::new(Vec::with_capacity(fragment.len() + 1));
                inner.extend_from_slice(fragment);
                inner.push(content_type.into());

                let length = inner.len() + 16;
                let aad = [
                    ContentType::ApplicationData.into(),
                    3,
                    3,
                    (length >> 8) as u8,
                    length as u8,
                ];

                let RecordCipher::Aead(aead) = &self.cipher else {
                    unreachable!();
                };
                let tag = aead
                    .seal(&nonce, &aad, &mut inner)
                    .map_err(|_| TLSError::Internal("AEAD seal"))?;

                write_header(out, ContentType::ApplicationData, [3, 3], length)?;
                out.write_bytes(&inner)?;
                out.write_bytes(&tag)?;
            },
        }

        self.bump_sequence()
    }

    /// Verify and unprotect one record payload. Returns the real content
    /// type (which the TLS 1.3 inner plaintext hides) and the plaintext.
    pub fn open(
        &mut self,
        version: ProtocolVersion,
        header: RecordHeader,
        payload: &[u8],
    ) -> Result<(ContentType, Zeroizing<Vec<u8>>), TLSError> {
        let sequence_number = self.sequence_number;

        let opened = match self.cipher {
            RecordCipher::Null => {
                if payload.len() > MAX_PLAINTEXT_LEN {
                    return Err(TLSError::RecordOverflow);
                }
                return Ok((header.content_type, Zeroizing::new(payload.to_vec())));
            },
            RecordCipher::Cbc(_) => {
                let opened = self.open_cbc(version, header, payload)?;
                (header.content_type, opened)
            },
            RecordCipher::Aead(_) if !self.tls13 => {
                let explicit_len = self.kind.explicit_iv_len(version);
                if payload.len() < explicit_len + 16 {
                    return Err(TLSError::BadRecordMac);
                }

                let nonce = if explicit_len > 0 {
                    let mut nonce = [0; 12];
                    nonce[..4].copy_from_slice(&self.fixed_iv);
                    nonce[4..].copy_from_slice(&payload[..8]);
                    nonce
                } else {
                    self.xor_nonce(sequence_number)
                };

                let body = &payload[explicit_len..];
                let (ciphertext, tag) = body.split_at(body.len() - 16);
                let plaintext_len = ciphertext.len();

                let mut aad = Vec::with_capacity(13);
                aad.extend_from_slice(&sequence_number.to_be_bytes());
                aad.push(header.content_type.into());
                aad.extend_from_slice(&header.version);
                aad.extend_from_slice(&(plaintext_len as u16).to_be_bytes());

                let mut buf = Zeroizing::new(ciphertext.to_vec());
                let tag: [u8; 16] = tag.try_into().expect("split_at guarantees 16 bytes");
                let RecordCipher::Aead(aead) = &self.cipher else {
                    unreachable!();
                };
                aead.open(&nonce, &aad, &mut buf, &tag)
                    .map_err(|_| TLSError::BadRecordMac)?;
                (header.content_type, buf)
            },
            RecordCipher::Aead(_) => {
                if header.content_type != ContentType::ApplicationData || payload.len() < 16 {
                    return Err(TLSError::BadRecordMac);
                }
                let nonce = self.xor_nonce(sequence_number);
                let aad = [
                    ContentType::ApplicationData.into(),
                    3,
                    3,
                    (payload.len() >> 8) as u8,
                    payload.len() as u8,
                ];

                let (ciphertext, tag) = payload.split_at(payload.len() - 16);
                let mut buf = Zeroizing::new(ciphertext.to_vec());
                let tag: [u8; 16] = tag.try_into().expect("split_at guarantees 16 bytes");
                let RecordCipher::Aead(aead) = &self.cipher else {
                    unreachable!();
                };
                aead.open(&nonce, &aad, &mut buf, &tag)
                    .map_err(|_| TLSError::BadRecordMac)?;

                // Strip zero padding down to the inner content type
                let type_at = buf
                    .iter()
                    .rposition(|&byte| byte != 0)
                    .ok_or(TLSError::UnexpectedMessage)?;
                let content_type = ContentType::try_from(buf[type_at])?;
                buf.truncate(type_at);
                (content_type, buf)
            },
        };

        if opened.1.len() > MAX_PLAINTEXT_LEN {
            return Err(TLSError::RecordOverflow);
        }
        self.bump_sequence()?;
        Ok(opened)
    }

    /// CBC open: decrypt, then validate padding and MAC without branching
    /// on secret data until the final combined verdict.
    fn open_cbc(
        &mut self,
        version: ProtocolVersion,
        header: RecordHeader,
        payload: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, TLSError> {
        let block = self.kind.block_size();
        let mac_len = self.mac.mac_len();
        let explicit_iv = version >= ProtocolVersion::Tls11;
        let iv_len = if explicit_iv { block } else { 0 };

        // Minimum: the IV, plus one block holding at least the padding byte
        if payload.len() < iv_len + block || (payload.len() - iv_len) % block != 0 {
            return Err(TLSError::BadRecordMac);
        }

        let mut iv = [0; 16];
        if explicit_iv {
            iv.copy_from_slice(&payload[..iv_len]);
        } else {
            iv.copy_from_slice(&self.fixed_iv);
            // Chain the residue for the next record before decrypting
            self.fixed_iv.copy_from_slice(&payload[payload.len() - 16..]);
        }

        let mut buf = Zeroizing::new(payload[iv_len..].to_vec());
        let RecordCipher::Cbc(cbc) = &self.cipher else {
            unreachable!();
        };
        cbc.decrypt_in_place(&iv, &mut buf)
            .map_err(|_| TLSError::BadRecordMac)?;

        // Padding check over a fixed window of trailing bytes
        let pad_byte = buf[buf.len() - 1];
        let pad_len = usize::from(pad_byte);
        let mut pad_ok = Choice::from(u8::from(pad_len + 1 + mac_len <= buf.len()));
        let window = buf.len().min(256);
        for (i, &byte) in buf[buf.len() - window..].iter().enumerate() {
            let from_end = window - i; // 1-based distance from the end
            let in_padding = Choice::from(u8::from(from_end <= pad_len + 1));
            pad_ok &= !in_padding | byte.ct_eq(&pad_byte);
        }

        // On bad padding fall back to a zero-length assumption so the MAC
        // computation still runs over comparable input sizes
        let content_len = if bool::from(pad_ok) {
            buf.len() - mac_len - pad_len - 1
        } else {
            buf.len().saturating_sub(mac_len + 1)
        };

        let (content, rest) = buf.split_at(content_len);
        let mac_ok = self.mac.verify(
            self.sequence_number,
            header.content_type.into(),
            header.version,
            content,
            &rest[..mac_len],
        );

        if !(bool::from(pad_ok) && mac_ok) {
            return Err(TLSError::BadRecordMac);
        }

        buf.truncate(content_len);
        Ok(buf)
    }
}

/// Split `payload` into fragments and seal each one as its own record.
/// Returns the number of payload bytes consumed.
pub(crate) fn seal_fragmented(
    state: &mut DirectionState,
    version: ProtocolVersion,
    content_type: ContentType,
    payload: &[u8],
    limit: usize,
    out: &mut ByteBuffer<'_>,
) -> Result<usize, TLSError> {
    let max_fragment = state.max_fragment().min(limit);
    let mut consumed = 0;
    loop {
        let fragment = &payload[consumed..(consumed + max_fragment).min(payload.len())];
        state.seal(version, content_type, fragment, out)?;
        consumed += fragment.len();
        if consumed >= payload.len() {
            return Ok(consumed);
        }
    }
}
