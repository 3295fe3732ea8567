//! A linear byte arena with independent read and write cursors.
//!
//! Every wire read, wire write and cryptographic transform in the TLS stack
//! goes through a [ByteBuffer]. The buffer tracks how far it has been written
//! (`high_water_mark`) so that [ByteBuffer::wipe] can zero exactly the bytes
//! that ever held data, and owned storage is zeroed again on drop.
//!
//! Cursor invariant: `read_cursor <= write_cursor <= high_water_mark <= size`.

use zeroize::Zeroize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferError {
    /// A read reached past the write cursor
    OutOfData,
    /// A write reached past the end of a non-growable buffer
    Full,
    /// The buffer is borrowed, tainted or marked read-only and cannot grow
    ResizeDisallowed,
}

enum Data<'a> {
    /// Aliases caller memory. Never writable, never growable.
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

pub struct ByteBuffer<'a> {
    data: Data<'a>,
    read_cursor: usize,
    write_cursor: usize,
    high_water_mark: usize,
    growable: bool,
    /// Set once an interior slice has been handed out. A tainted buffer must
    /// not reallocate, since the caller may still hold the window it was given.
    tainted: bool,
}

pub type Result<T> = std::result::Result<T, BufferError>;

impl<'a> ByteBuffer<'a> {
    /// A read-only buffer aliasing caller memory.
    ///
    /// The whole slice counts as already written, so it can be read back
    /// immediately.
    #[must_use]
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        let len = bytes.len();
        Self {
            data: Data::Borrowed(bytes),
            read_cursor: 0,
            write_cursor: len,
            high_water_mark: len,
            growable: false,
            tainted: true,
        }
    }

    #[must_use]
    pub fn from_str(s: &'a str) -> Self {
        Self::from_slice(s.as_bytes())
    }

    /// An owned, fixed-size buffer. Writes past `size` fail with [BufferError::Full].
    #[must_use]
    pub fn with_fixed_size(size: usize) -> ByteBuffer<'static> {
        ByteBuffer {
            data: Data::Owned(vec![0; size]),
            read_cursor: 0,
            write_cursor: 0,
            high_water_mark: 0,
            growable: false,
            tainted: false,
        }
    }

    /// An owned buffer that reallocates as needed.
    #[must_use]
    pub fn growable(initial_size: usize) -> ByteBuffer<'static> {
        ByteBuffer {
            data: Data::Owned(vec![0; initial_size]),
            read_cursor: 0,
            write_cursor: 0,
            high_water_mark: 0,
            growable: true,
            tainted: false,
        }
    }

    fn storage(&self) -> &[u8] {
        match &self.data {
            Data::Borrowed(bytes) => bytes,
            Data::Owned(bytes) => bytes,
        }
    }

    fn storage_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.data {
            Data::Borrowed(_) => Err(BufferError::Full),
            Data::Owned(bytes) => Ok(bytes),
        }
    }

    /// Total addressable size (not the number of bytes written).
    #[must_use]
    pub fn size(&self) -> usize {
        self.storage().len()
    }

    #[must_use]
    pub fn is_tainted(&self) -> bool {
        self.tainted
    }

    #[must_use]
    pub fn is_growable(&self) -> bool {
        self.growable
    }

    /// Number of bytes available to read: `write_cursor - read_cursor`.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.write_cursor - self.read_cursor
    }

    /// Number of bytes that can be written without growing.
    #[must_use]
    pub fn space_remaining(&self) -> usize {
        self.size() - self.write_cursor
    }

    #[must_use]
    pub fn read_cursor(&self) -> usize {
        self.read_cursor
    }

    #[must_use]
    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    /// Everything written but not yet read.
    #[must_use]
    pub fn readable(&self) -> &[u8] {
        &self.storage()[self.read_cursor..self.write_cursor]
    }

    /// Grow the buffer so that at least `n` more bytes can be written.
    ///
    /// Fails with [BufferError::ResizeDisallowed] on borrowed, fixed-size or
    /// tainted buffers.
    pub fn reserve(&mut self, n: usize) -> Result<()> {
        if self.space_remaining() >= n {
            return Ok(());
        }
        if !self.growable || self.tainted || matches!(self.data, Data::Borrowed(_)) {
            return Err(BufferError::ResizeDisallowed);
        }

        let needed = self.write_cursor + n;
        let new_size = needed.max(self.size() * 2).max(64);
        match &mut self.data {
            Data::Owned(bytes) => bytes.resize(new_size, 0),
            Data::Borrowed(_) => unreachable!("borrowed buffers are never growable"),
        }
        Ok(())
    }

    fn ensure_writable(&mut self, n: usize) -> Result<()> {
        if self.space_remaining() >= n {
            return Ok(());
        }
        if self.growable {
            self.reserve(n)
        } else {
            Err(BufferError::Full)
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure_writable(bytes.len())?;
        let at = self.write_cursor;
        self.storage_mut()?[at..at + bytes.len()].copy_from_slice(bytes);
        self.write_cursor += bytes.len();
        self.high_water_mark = self.high_water_mark.max(self.write_cursor);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    /// Big-endian 24-bit write. The topmost byte of `value` must be zero.
    pub fn write_u24(&mut self, value: u32) -> Result<()> {
        debug_assert!(value < 1 << 24);
        self.write_bytes(&value.to_be_bytes()[1..])
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn read_bytes(&mut self, out: &mut [u8]) -> Result<()> {
        if self.remaining() < out.len() {
            return Err(BufferError::OutOfData);
        }
        out.copy_from_slice(&self.storage()[self.read_cursor..self.read_cursor + out.len()]);
        self.read_cursor += out.len();
        Ok(())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0; N];
        self.read_bytes(&mut out)?;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let bytes: [u8; 3] = self.read_array()?;
        Ok(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Hand out a window of `n` unread bytes without copying.
    ///
    /// Taints the buffer: it can no longer grow, so the window stays valid.
    pub fn raw_read(&mut self, n: usize) -> Result<&[u8]> {
        if self.remaining() < n {
            return Err(BufferError::OutOfData);
        }
        self.tainted = true;
        let at = self.read_cursor;
        self.read_cursor += n;
        Ok(&self.storage()[at..at + n])
    }

    /// Hand out a writable window of `n` bytes past the write cursor.
    ///
    /// The window counts as written. Taints the buffer.
    pub fn raw_write(&mut self, n: usize) -> Result<&mut [u8]> {
        self.ensure_writable(n)?;
        self.tainted = true;
        let at = self.write_cursor;
        self.write_cursor += n;
        self.high_water_mark = self.high_water_mark.max(self.write_cursor);
        Ok(&mut self.storage_mut()?[at..at + n])
    }

    pub fn skip_read(&mut self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(BufferError::OutOfData);
        }
        self.read_cursor += n;
        Ok(())
    }

    /// Advance the write cursor over `n` bytes, leaving them zeroed.
    /// Used to reserve space for a length field that is patched afterwards.
    pub fn skip_write(&mut self, n: usize) -> Result<()> {
        self.ensure_writable(n)?;
        let at = self.write_cursor;
        let storage = self.storage_mut()?;
        storage[at..at + n].fill(0);
        self.write_cursor += n;
        self.high_water_mark = self.high_water_mark.max(self.write_cursor);
        Ok(())
    }

    /// Overwrite already-written bytes at an absolute offset.
    /// The cursors do not move. Used to patch length prefixes.
    pub fn rewrite_bytes_at(&mut self, at: usize, bytes: &[u8]) -> Result<()> {
        if at + bytes.len() > self.write_cursor {
            return Err(BufferError::OutOfData);
        }
        self.storage_mut()
            .map_err(|_| BufferError::ResizeDisallowed)?[at..at + bytes.len()]
            .copy_from_slice(bytes);
        Ok(())
    }

    pub fn rewrite_u16_at(&mut self, at: usize, value: u16) -> Result<()> {
        self.rewrite_bytes_at(at, &value.to_be_bytes())
    }

    pub fn rewrite_u24_at(&mut self, at: usize, value: u32) -> Result<()> {
        debug_assert!(value < 1 << 24);
        self.rewrite_bytes_at(at, &value.to_be_bytes()[1..])
    }

    /// Move unread bytes to the front of the buffer, reclaiming the space
    /// before the read cursor.
    pub fn compact(&mut self) {
        if self.read_cursor == 0 {
            return;
        }
        let (read, write) = (self.read_cursor, self.write_cursor);
        if let Data::Owned(bytes) = &mut self.data {
            bytes.copy_within(read..write, 0);
        }
        self.write_cursor -= read;
        self.read_cursor = 0;
        self.high_water_mark = self.high_water_mark.max(self.write_cursor);
    }

    /// Zero every byte that was ever written and reset both cursors.
    /// Borrowed storage is left untouched.
    pub fn wipe(&mut self) {
        let high_water_mark = self.high_water_mark;
        if let Data::Owned(bytes) = &mut self.data {
            bytes[..high_water_mark].zeroize();
        }
        self.read_cursor = 0;
        self.write_cursor = 0;
        self.high_water_mark = 0;
        self.tainted = false;
    }

    /// Reset the cursors without touching the contents.
    pub fn reread(&mut self) {
        self.read_cursor = 0;
    }
}

impl Drop for ByteBuffer<'_> {
    fn drop(&mut self) {
        if let Data::Owned(bytes) = &mut self.data {
            bytes.zeroize();
        }
    }
}

impl std::fmt::Debug for ByteBuffer<'_> {
    // Contents are deliberately not printed, they may be key material.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("read_cursor", &self.read_cursor)
            .field("write_cursor", &self.write_cursor)
            .field("high_water_mark", &self.high_water_mark)
            .field("size", &self.size())
            .field("growable", &self.growable)
            .field("tainted", &self.tainted)
            .finish()
    }
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::OutOfData => "read past the end of the written data",
            Self::Full => "write past the end of a fixed-size buffer",
            Self::ResizeDisallowed => "buffer cannot be resized",
        };
        f.write_str(message)
    }
}

impl std::error::Error for BufferError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trips() {
        let mut buffer = ByteBuffer::growable(4);
        buffer.write_u8(0xAB).unwrap();
        buffer.write_u16(0x1234).unwrap();
        buffer.write_u24(0x00AB_CDEF).unwrap();
        buffer.write_u32(0xDEAD_BEEF).unwrap();
        buffer.write_u64(0x0102_0304_0506_0708).unwrap();

        assert_eq!(buffer.read_u8().unwrap(), 0xAB);
        assert_eq!(buffer.read_u16().unwrap(), 0x1234);
        assert_eq!(buffer.read_u24().unwrap(), 0x00AB_CDEF);
        assert_eq!(buffer.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buffer.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(buffer.read_u8(), Err(BufferError::OutOfData));
    }

    #[test]
    fn big_endian_on_the_wire() {
        let mut buffer = ByteBuffer::growable(0);
        buffer.write_u16(0x0303).unwrap();
        buffer.write_u24(0x012345).unwrap();
        assert_eq!(buffer.readable(), &[0x03, 0x03, 0x01, 0x23, 0x45]);
    }

    #[test]
    fn fixed_buffer_fills_up() {
        let mut buffer = ByteBuffer::<'static>::with_fixed_size(2);
        buffer.write_u16(7).unwrap();
        assert_eq!(buffer.write_u8(1), Err(BufferError::Full));
    }

    #[test]
    fn borrowed_buffer_is_readable_but_not_writable() {
        let mut buffer = ByteBuffer::from_slice(&[1, 2, 3]);
        assert_eq!(buffer.remaining(), 3);
        assert_eq!(buffer.read_u8().unwrap(), 1);
        assert!(buffer.is_tainted());
        assert_eq!(buffer.reserve(1), Err(BufferError::ResizeDisallowed));
    }

    #[test]
    fn raw_windows_taint_the_buffer() {
        let mut buffer = ByteBuffer::growable(16);
        buffer.write_bytes(&[1, 2, 3, 4]).unwrap();
        assert!(!buffer.is_tainted());

        let window = buffer.raw_read(2).unwrap();
        assert_eq!(window, &[1, 2]);
        assert!(buffer.is_tainted());

        // 16-byte backing store, 4 written: a 100-byte write would need a grow
        assert_eq!(buffer.reserve(100), Err(BufferError::ResizeDisallowed));
    }

    #[test]
    fn wipe_zeroes_up_to_the_high_water_mark() {
        let mut buffer = ByteBuffer::growable(8);
        buffer.write_bytes(&[0xFF; 8]).unwrap();
        buffer.skip_read(8).unwrap();
        buffer.wipe();

        assert_eq!(buffer.remaining(), 0);
        assert_eq!(buffer.high_water_mark(), 0);
        buffer.skip_write(8).unwrap();
        assert_eq!(buffer.readable(), &[0; 8]);
    }

    #[test]
    fn length_patching() {
        let mut buffer = ByteBuffer::growable(0);
        buffer.write_u8(22).unwrap();
        let at = buffer.write_cursor();
        buffer.skip_write(2).unwrap();
        buffer.write_bytes(b"hello").unwrap();
        buffer.rewrite_u16_at(at, 5).unwrap();
        assert_eq!(buffer.readable(), &[22, 0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn compact_moves_unread_data_to_the_front() {
        let mut buffer = ByteBuffer::growable(8);
        buffer.write_bytes(&[1, 2, 3, 4, 5]).unwrap();
        buffer.skip_read(3).unwrap();
        buffer.compact();
        assert_eq!(buffer.read_cursor(), 0);
        assert_eq!(buffer.readable(), &[4, 5]);
    }
}
