//! Bit-level writer/reader for the input delta stream.
//!
//! Bits are packed most-significant-first within each byte. The reader is
//! bounded by an explicit bit count (the `num_bits` field of the input message),
//! not by the byte length, so trailing padding is never interpreted.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitError {
    #[error("attempted to read {requested} bits but only {available} bits available")]
    EndOfStream { requested: usize, available: usize },
    #[error("bit stream capacity of {capacity} bits exceeded")]
    Overflow { capacity: usize },
    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: u32, bits: usize },
}

pub type BitResult<T> = Result<T, BitError>;

/// Bounded bit writer.
#[derive(Debug)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
    capacity: usize,
}

impl BitWriter {
    /// Creates a writer that accepts at most `capacity` bits.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity.div_ceil(8)),
            bit_len: 0,
            capacity,
        }
    }

    /// Number of bits written so far.
    pub fn bits_written(&self) -> usize {
        self.bit_len
    }

    /// Bits still available before the capacity is reached.
    pub fn remaining(&self) -> usize {
        self.capacity - self.bit_len
    }

    pub fn write_bit(&mut self, value: bool) -> BitResult<()> {
        if self.bit_len >= self.capacity {
            return Err(BitError::Overflow {
                capacity: self.capacity,
            });
        }
        let shift = 7 - (self.bit_len % 8);
        if shift == 7 {
            self.bytes.push(0);
        }
        if value {
            let last = self.bytes.len() - 1;
            self.bytes[last] |= 1 << shift;
        }
        self.bit_len += 1;
        Ok(())
    }

    /// Writes the low `bits` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u32, bits: usize) -> BitResult<()> {
        if bits < 32 && value >= (1u32 << bits) {
            return Err(BitError::ValueOutOfRange { value, bits });
        }
        if bits > self.remaining() {
            return Err(BitError::Overflow {
                capacity: self.capacity,
            });
        }
        for i in (0..bits).rev() {
            self.write_bit((value >> i) & 1 == 1)?;
        }
        Ok(())
    }

    /// Returns the packed bytes and the exact bit count.
    pub fn finish(self) -> (Vec<u8>, usize) {
        (self.bytes, self.bit_len)
    }
}

/// Reader over `num_bits` bits of a packed buffer.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    bytes: &'a [u8],
    num_bits: usize,
    offset: usize,
}

impl<'a> BitReader<'a> {
    /// Creates a reader. `num_bits` is clamped to what `bytes` can hold.
    pub fn new(bytes: &'a [u8], num_bits: usize) -> Self {
        Self {
            bytes,
            num_bits: num_bits.min(bytes.len() * 8),
            offset: 0,
        }
    }

    pub fn bits_read(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.num_bits - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.offset >= self.num_bits
    }

    pub fn read_bit(&mut self) -> BitResult<bool> {
        if self.offset >= self.num_bits {
            return Err(BitError::EndOfStream {
                requested: 1,
                available: 0,
            });
        }
        let byte = self.bytes[self.offset / 8];
        let bit = (byte >> (7 - (self.offset % 8))) & 1 == 1;
        self.offset += 1;
        Ok(bit)
    }

    pub fn read_bits(&mut self, bits: usize) -> BitResult<u32> {
        if bits > self.remaining() {
            return Err(BitError::EndOfStream {
                requested: bits,
                available: self.remaining(),
            });
        }
        let mut value = 0u32;
        for _ in 0..bits {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }
}
