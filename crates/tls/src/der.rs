//! A minimal DER reader: just enough X.509 to find a certificate's
//! SubjectPublicKeyInfo and validity window. Chain path validation is the
//! application's business, not ours.

pub mod time;

use crate::TLSError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    UnexpectedEndOfData,
    UnexpectedTag,
    IllegalLength,
    IllegalValue,
}

impl From<Error> for TLSError {
    fn from(_: Error) -> Self {
        TLSError::BadDer
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeTag(pub u8);

impl TypeTag {
    pub const INTEGER: Self = Self(0x02);
    pub const BIT_STRING: Self = Self(0x03);
    pub const OBJECT_IDENTIFIER: Self = Self(0x06);
    pub const UTC_TIME: Self = Self(0x17);
    pub const GENERALIZED_TIME: Self = Self(0x18);
    pub const SEQUENCE: Self = Self(0x30);

    /// Context-specific constructed tag `[n]`.
    #[must_use]
    pub const fn context(n: u8) -> Self {
        Self(0xA0 | n)
    }
}

/// A cursor over DER-encoded bytes.
#[derive(Clone, Copy)]
pub struct Reader<'a> {
    bytes: &'a [u8],
    at: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, at: 0 }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.at == self.bytes.len()
    }

    fn read_byte(&mut self) -> Result<u8, Error> {
        let byte = *self.bytes.get(self.at).ok_or(Error::UnexpectedEndOfData)?;
        self.at += 1;
        Ok(byte)
    }

    fn read_length(&mut self) -> Result<usize, Error> {
        let first = self.read_byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }

        let num_bytes = usize::from(first & 0x7F);
        // DER forbids lengths padded out further than they need to be;
        // four bytes bounds everything we will ever meet in a certificate.
        if num_bytes == 0 || num_bytes > 4 {
            return Err(Error::IllegalLength);
        }

        let mut length = 0usize;
        for _ in 0..num_bytes {
            length = length << 8 | usize::from(self.read_byte()?);
        }
        Ok(length)
    }

    /// Read the next TLV. Returns its tag and value bytes.
    pub fn next_item(&mut self) -> Result<(TypeTag, &'a [u8]), Error> {
        let tag = TypeTag(self.read_byte()?);
        let length = self.read_length()?;

        let value = self
            .bytes
            .get(self.at..self.at + length)
            .ok_or(Error::UnexpectedEndOfData)?;
        self.at += length;
        Ok((tag, value))
    }

    /// Read the next TLV and require its tag.
    pub fn expect(&mut self, expected: TypeTag) -> Result<&'a [u8], Error> {
        let (tag, value) = self.next_item()?;
        if tag != expected {
            return Err(Error::UnexpectedTag);
        }
        Ok(value)
    }

    /// Read the next TLV only if it carries `tag`; otherwise leave the
    /// cursor where it is.
    pub fn take_optional(&mut self, tag: TypeTag) -> Option<&'a [u8]> {
        let mut lookahead = *self;
        match lookahead.next_item() {
            Ok((found, value)) if found == tag => {
                *self = lookahead;
                Some(value)
            },
            _ => None,
        }
    }
}

/// The subject public key of a certificate, still in SPKI form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectPublicKeyInfo {
    /// The algorithm OID, raw DER value bytes.
    pub algorithm: Vec<u8>,
    /// The optional algorithm parameters (for EC keys, the named curve OID).
    pub parameters: Option<Vec<u8>>,
    /// The public key with the bit string's unused-bits octet stripped.
    pub public_key: Vec<u8>,
}

pub mod oid {
    //! Raw OID value bytes for the algorithms we recognize.
    pub const RSA_ENCRYPTION: &[u8] = &[0x2A, 0x86, 0x48, 0x86, 0xF7, 0x0D, 0x01, 0x01, 0x01];
    pub const EC_PUBLIC_KEY: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01];
    pub const PRIME256V1: &[u8] = &[0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x03, 0x01, 0x07];
}

/// What we need from one parsed certificate.
#[derive(Clone, Debug)]
pub struct Certificate {
    pub spki: SubjectPublicKeyInfo,
    /// Validity window in nanoseconds since the Unix epoch.
    pub not_before: i64,
    pub not_after: i64,
}

impl Certificate {
    /// Walk `Certificate ::= SEQUENCE { tbsCertificate, sigAlg, signature }`
    /// far enough to pull out validity and SPKI.
    pub fn parse(der: &[u8]) -> Result<Self, Error> {
        let mut top = Reader::new(der);
        let mut cert = Reader::new(top.expect(TypeTag::SEQUENCE)?);
        let mut tbs = Reader::new(cert.expect(TypeTag::SEQUENCE)?);

        // [0] EXPLICIT version, absent in v1 certificates
        tbs.take_optional(TypeTag::context(0));
        tbs.expect(TypeTag::INTEGER)?; // serialNumber
        tbs.expect(TypeTag::SEQUENCE)?; // signature algorithm
        tbs.expect(TypeTag::SEQUENCE)?; // issuer

        let mut validity = Reader::new(tbs.expect(TypeTag::SEQUENCE)?);
        let not_before = read_time(&mut validity)?;
        let not_after = read_time(&mut validity)?;

        tbs.expect(TypeTag::SEQUENCE)?; // subject

        let mut spki = Reader::new(tbs.expect(TypeTag::SEQUENCE)?);
        let mut algorithm_reader = Reader::new(spki.expect(TypeTag::SEQUENCE)?);
        let algorithm = algorithm_reader.expect(TypeTag::OBJECT_IDENTIFIER)?.to_vec();
        let parameters = algorithm_reader
            .take_optional(TypeTag::OBJECT_IDENTIFIER)
            .map(<[u8]>::to_vec);

        let bit_string = spki.expect(TypeTag::BIT_STRING)?;
        let (&unused_bits, public_key) =
            bit_string.split_first().ok_or(Error::IllegalValue)?;
        if unused_bits != 0 {
            // Neither RSA nor EC keys leave stray bits
            return Err(Error::IllegalValue);
        }

        Ok(Self {
            spki: SubjectPublicKeyInfo {
                algorithm,
                parameters,
                public_key: public_key.to_vec(),
            },
            not_before,
            not_after,
        })
    }
}

fn read_time(reader: &mut Reader<'_>) -> Result<i64, Error> {
    let (tag, value) = reader.next_item()?;
    match tag {
        TypeTag::UTC_TIME => time::parse_utc_time(value),
        TypeTag::GENERALIZED_TIME => time::parse_generalized_time(value),
        _ => Err(Error::UnexpectedTag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tlv_walks_and_bounds_checks() {
        // SEQUENCE { INTEGER 5 }
        let der = [0x30, 0x03, 0x02, 0x01, 0x05];
        let mut reader = Reader::new(&der);
        let mut inner = Reader::new(reader.expect(TypeTag::SEQUENCE).unwrap());
        assert_eq!(inner.expect(TypeTag::INTEGER).unwrap(), &[5]);
        assert!(inner.is_empty());

        // Truncated: claims 4 bytes, carries 2
        let truncated = [0x30, 0x04, 0x02, 0x01];
        assert_eq!(
            Reader::new(&truncated).next_item(),
            Err(Error::UnexpectedEndOfData)
        );
    }

    #[test]
    fn long_form_lengths() {
        let mut der = vec![0x30, 0x82, 0x01, 0x00];
        der.extend(std::iter::repeat_n(0u8, 256));
        let mut reader = Reader::new(&der);
        let value = reader.expect(TypeTag::SEQUENCE).unwrap();
        assert_eq!(value.len(), 256);
    }

    #[test]
    fn optional_context_tag_is_skipped_only_when_present() {
        let with = [0xA0, 0x01, 0x00, 0x02, 0x01, 0x07];
        let mut reader = Reader::new(&with);
        assert!(reader.take_optional(TypeTag::context(0)).is_some());
        assert_eq!(reader.expect(TypeTag::INTEGER).unwrap(), &[7]);

        let without = [0x02, 0x01, 0x07];
        let mut reader = Reader::new(&without);
        assert!(reader.take_optional(TypeTag::context(0)).is_none());
        assert_eq!(reader.expect(TypeTag::INTEGER).unwrap(), &[7]);
    }
}
