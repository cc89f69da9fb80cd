//! Framed input: the unit of simulation input exchanged between peers.

use std::fmt;

use rollnet_proto::constants::MAX_INPUT_BUFFER;

/// Simulation frame number.
pub type Frame = i32;

/// Sentinel for "no frame".
pub const NULL_FRAME: Frame = -1;

/// Fixed-capacity input buffer tagged with a frame number.
///
/// Bytes past `size` are always zero, so two inputs with equal payloads compare
/// equal regardless of how they were built.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GameInput {
    pub frame: Frame,
    size: usize,
    bits: [u8; MAX_INPUT_BUFFER],
}

impl GameInput {
    /// Creates an input of `size` bytes, copying from `bytes` when given.
    ///
    /// Panics if `size` is zero or larger than [`MAX_INPUT_BUFFER`].
    pub fn new(frame: Frame, bytes: Option<&[u8]>, size: usize) -> Self {
        assert!(
            size > 0 && size <= MAX_INPUT_BUFFER,
            "input size {size} out of range"
        );
        let mut bits = [0u8; MAX_INPUT_BUFFER];
        if let Some(bytes) = bytes {
            let n = bytes.len().min(size);
            bits[..n].copy_from_slice(&bytes[..n]);
        }
        Self { frame, size, bits }
    }

    /// All-zero input.
    pub fn blank(frame: Frame, size: usize) -> Self {
        Self::new(frame, None, size)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_null(&self) -> bool {
        self.frame == NULL_FRAME
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bits[..self.size]
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bits[..self.size]
    }

    /// Number of addressable bits.
    pub fn bit_len(&self) -> usize {
        self.size * 8
    }

    pub fn value(&self, i: usize) -> bool {
        assert!(i < self.bit_len(), "bit {i} out of range");
        self.bits[i / 8] & (1 << (i % 8)) != 0
    }

    pub fn set(&mut self, i: usize) {
        assert!(i < self.bit_len(), "bit {i} out of range");
        self.bits[i / 8] |= 1 << (i % 8);
    }

    pub fn clear(&mut self, i: usize) {
        assert!(i < self.bit_len(), "bit {i} out of range");
        self.bits[i / 8] &= !(1 << (i % 8));
    }

    pub fn set_bit(&mut self, i: usize, on: bool) {
        if on { self.set(i) } else { self.clear(i) }
    }

    /// Zeroes the payload, keeping frame and size.
    pub fn erase(&mut self) {
        self.bits[..self.size].fill(0);
    }

    /// Compares payloads, and frames too unless `bits_only`.
    pub fn equal(&self, other: &GameInput, bits_only: bool) -> bool {
        (bits_only || self.frame == other.frame)
            && self.size == other.size
            && self.bytes() == other.bytes()
    }
}

impl fmt::Debug for GameInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(frame:{} size:{} ", self.frame, self.size)?;
        for b in self.bytes() {
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_copies_and_zero_pads() {
        let input = GameInput::new(3, Some(&[0xAA, 0xBB, 0xCC]), 2);
        assert_eq!(input.frame, 3);
        assert_eq!(input.bytes(), &[0xAA, 0xBB]);
        assert_eq!(GameInput::blank(0, 4).bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn zero_size_is_rejected() {
        let _ = GameInput::blank(0, 0);
    }

    #[test]
    #[should_panic]
    fn oversized_input_is_rejected() {
        let _ = GameInput::blank(0, MAX_INPUT_BUFFER + 1);
    }

    #[test]
    fn bit_ops() {
        let mut input = GameInput::blank(0, 2);
        input.set(0);
        input.set(9);
        assert!(input.value(0));
        assert!(input.value(9));
        assert!(!input.value(8));
        assert_eq!(input.bytes(), &[0x01, 0x02]);
        input.clear(0);
        assert_eq!(input.bytes(), &[0x00, 0x02]);
        input.erase();
        assert_eq!(input.bytes(), &[0, 0]);
    }

    #[test]
    fn equal_bits_only_ignores_frame() {
        let a = GameInput::new(1, Some(&[5]), 1);
        let b = GameInput::new(2, Some(&[5]), 1);
        assert!(a.equal(&b, true));
        assert!(!a.equal(&b, false));
        assert!(!a.equal(&GameInput::new(1, Some(&[6]), 1), true));
    }

    #[test]
    fn debug_shows_hex_payload() {
        let input = GameInput::new(7, Some(&[0x0F, 0xA0]), 2);
        assert_eq!(format!("{input:?}"), "(frame:7 size:2 0fa0)");
    }
}
