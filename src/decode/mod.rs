// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounds-checked byte cursor shared by the constant-pool loader (§4.3)
//! and the in-loop instruction decoder (§4.4). Each caller maps a short
//! read (`None`) to the error variant appropriate to its context
//! (`TruncatedHeader` vs. `TruncatedInstruction`).


/// A forward-only, bounds-checked reader over a byte slice.
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Start a cursor at the beginning of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Start a cursor at a given offset into `bytes`.
    #[must_use]
    pub const fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    /// Current read position.
    #[must_use]
    pub const fn pos(&self) -> usize {
        self.pos
    }

    /// Total length of the underlying buffer.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the cursor has reached the end of the buffer.
    #[must_use]
    pub const fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Read a single byte and advance.
    pub fn read_u8(&mut self) -> Option<u8> {
        let byte = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(byte)
    }

    /// Read a little-endian signed 32-bit integer and advance.
    pub fn read_i32(&mut self) -> Option<i32> {
        let bytes = self.read_array::<4>()?;
        Some(i32::from_le_bytes(bytes))
    }

    /// Read a little-endian IEEE-754 double and advance.
    pub fn read_f64(&mut self) -> Option<f64> {
        let bytes = self.read_array::<8>()?;
        Some(f64::from_le_bytes(bytes))
    }

    /// Read `len` raw bytes and advance.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let slice = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    /// Read a one-byte length prefix followed by that many bytes.
    pub fn read_len_prefixed_bytes(&mut self) -> Option<&'a [u8]> {
        let len = self.read_u8()? as usize;
        self.read_bytes(len)
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.read_bytes(N)?;
        slice.try_into().ok()
    }
}
