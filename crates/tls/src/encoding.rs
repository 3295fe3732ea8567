//! Wire encoding over [ByteBuffer].
//!
//! TLS fields are big-endian and length-prefixed. Encoders reserve the
//! length slot, write the body, then patch the slot, so no intermediate
//! allocation is needed. Decoders bounds-check every length before
//! consuming.

use bytebuf::{BufferError, ByteBuffer};

use crate::TLSError;

#[derive(Clone, Copy, Debug)]
pub struct Error;

pub type Result<T> = std::result::Result<T, Error>;

impl From<BufferError> for Error {
    fn from(_: BufferError) -> Self {
        Error
    }
}

impl From<Error> for TLSError {
    fn from(_: Error) -> Self {
        TLSError::BadMessage
    }
}

pub trait Encode {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> Result<()>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::growable(64);
        self.encode(&mut buf)
            .expect("growable buffers do not fail to encode");
        buf.readable().to_vec()
    }
}

pub trait Decode: Sized {
    fn decode(buf: &mut ByteBuffer<'_>) -> Result<Self>;
}

impl<const N: usize> Encode for [u8; N] {
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> Result<()> {
        Ok(buf.write_bytes(self)?)
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(buf: &mut ByteBuffer<'_>) -> Result<Self> {
        Ok(buf.read_array()?)
    }
}

macro_rules! encoding_for_number {
    ($number: ty, $write: ident, $read: ident) => {
        impl Encode for $number {
            fn encode(&self, buf: &mut ByteBuffer<'_>) -> Result<()> {
                Ok(buf.$write(*self)?)
            }
        }

        impl Decode for $number {
            fn decode(buf: &mut ByteBuffer<'_>) -> Result<Self> {
                Ok(buf.$read()?)
            }
        }
    };
}

encoding_for_number!(u8, write_u8, read_u8);
encoding_for_number!(u16, write_u16, read_u16);
encoding_for_number!(u32, write_u32, read_u32);
encoding_for_number!(u64, write_u64, read_u64);

impl<T> Encode for [T]
where
    T: Encode,
{
    fn encode(&self, buf: &mut ByteBuffer<'_>) -> Result<()> {
        for element in self {
            element.encode(buf)?;
        }
        Ok(())
    }
}

/// Write `body` behind a length prefix of `prefix_len` bytes (1, 2 or 3).
pub fn write_length_prefixed<F>(
    buf: &mut ByteBuffer<'_>,
    prefix_len: usize,
    body: F,
) -> Result<()>
where
    F: FnOnce(&mut ByteBuffer<'_>) -> Result<()>,
{
    let at = buf.write_cursor();
    buf.skip_write(prefix_len)?;
    body(buf)?;
    let length = buf.write_cursor() - at - prefix_len;

    match prefix_len {
        1 => {
            let length = u8::try_from(length).map_err(|_| Error)?;
            buf.rewrite_bytes_at(at, &[length])?;
        },
        2 => {
            let length = u16::try_from(length).map_err(|_| Error)?;
            buf.rewrite_u16_at(at, length)?;
        },
        3 => {
            let length = u32::try_from(length).map_err(|_| Error)?;
            if length >= 1 << 24 {
                return Err(Error);
            }
            buf.rewrite_u24_at(at, length)?;
        },
        _ => return Err(Error),
    }
    Ok(())
}

fn read_prefix(buf: &mut ByteBuffer<'_>, prefix_len: usize) -> Result<usize> {
    let length = match prefix_len {
        1 => usize::from(buf.read_u8()?),
        2 => usize::from(buf.read_u16()?),
        3 => buf.read_u24()? as usize,
        _ => return Err(Error),
    };
    if length > buf.remaining() {
        return Err(Error);
    }
    Ok(length)
}

/// Read a length prefix of `prefix_len` bytes and copy out the body.
pub fn read_length_prefixed(buf: &mut ByteBuffer<'_>, prefix_len: usize) -> Result<Vec<u8>> {
    let length = read_prefix(buf, prefix_len)?;
    let mut body = vec![0; length];
    buf.read_bytes(&mut body)?;
    Ok(body)
}

/// Read a length prefix, then decode the body with `parse`, which must
/// consume it exactly.
pub fn read_length_prefixed_with<T, F>(
    buf: &mut ByteBuffer<'_>,
    prefix_len: usize,
    parse: F,
) -> Result<T>
where
    F: FnOnce(&mut ByteBuffer<'_>) -> Result<T>,
{
    let body = read_length_prefixed(buf, prefix_len)?;
    let mut body = ByteBuffer::from_slice(&body);
    let value = parse(&mut body)?;
    if body.remaining() != 0 {
        return Err(Error);
    }
    Ok(value)
}

/// Generate a wire enum: a fieldless enum plus [Encode], [Decode] and the
/// conversions to and from its wire integer type.
#[macro_export]
macro_rules! enum_encoding {
    (
        $(#[$doccomments:meta])*
        $visibility:vis enum $name:ident($size: ty)
        { $( $(#[$variantdoc:meta])* $variant: ident = $value: expr,)* }
    ) => {
        $(#[$doccomments])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        $visibility enum $name {
            $($(#[$variantdoc])* $variant),*
        }

        impl From<$name> for $size {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $value,)*
                }
            }
        }

        impl TryFrom<$size> for $name {
            type Error = $crate::encoding::Error;

            fn try_from(value: $size) -> std::result::Result<Self, $crate::encoding::Error> {
                match value {
                    $($value => Ok(Self::$variant),)*
                    _ => Err($crate::encoding::Error),
                }
            }
        }

        impl $crate::encoding::Encode for $name {
            fn encode(&self, buf: &mut bytebuf::ByteBuffer<'_>) -> $crate::encoding::Result<()> {
                <$size>::from(*self).encode(buf)
            }
        }

        impl $crate::encoding::Decode for $name {
            fn decode(buf: &mut bytebuf::ByteBuffer<'_>) -> $crate::encoding::Result<Self> {
                let raw = <$size as $crate::encoding::Decode>::decode(buf)?;
                Self::try_from(raw)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    enum_encoding!(
        enum TestKind(u8) {
            Alpha = 1,
            Beta = 2,
        }
    );

    #[test]
    fn enum_round_trip() {
        let mut buf = ByteBuffer::growable(4);
        TestKind::Beta.encode(&mut buf).unwrap();
        assert_eq!(buf.readable(), &[2]);
        assert_eq!(TestKind::decode(&mut buf).unwrap(), TestKind::Beta);
        assert!(TestKind::try_from(9).is_err());
    }

    #[test]
    fn length_prefix_is_patched_after_the_body() {
        let mut buf = ByteBuffer::growable(16);
        write_length_prefixed(&mut buf, 2, |buf| {
            buf.write_bytes(b"abc")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(buf.readable(), &[0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn length_prefix_overflowing_the_message_is_rejected() {
        // Claims 5 bytes but only 2 follow
        let mut buf = ByteBuffer::from_slice(&[0, 5, 1, 2]);
        assert!(read_length_prefixed(&mut buf, 2).is_err());
    }

    #[test]
    fn nested_parse_must_consume_the_body_exactly() {
        let mut buf = ByteBuffer::from_slice(&[3, 1, 2, 3]);
        let result = read_length_prefixed_with(&mut buf, 1, |body| u16::decode(body));
        assert!(result.is_err());
    }
}
