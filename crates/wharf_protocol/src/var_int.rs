use std::io::{Read, Write};

use byteorder::ReadBytesExt;
use thiserror::Error;

use crate::{Decode, Encode};

/// An `i32` carried in one to five bytes: seven payload bits per byte,
/// least-significant group first, high bit flagging a continuation.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct VarInt(pub i32);

const PAYLOAD_BITS: u8 = 0b0111_1111;
const CONTINUE_BIT: u8 = 0b1000_0000;

impl VarInt {
    /// The most bytes a varint can span on the wire.
    pub const MAX_SIZE: usize = 5;

    /// How many bytes [`Encode::encode`] will emit for this value,
    /// assuming no I/O error.
    pub fn written_size(self) -> usize {
        let payload_bits = 32 - self.0.leading_zeros() as usize;
        payload_bits.div_ceil(7).max(1)
    }

    /// Reads a varint from a source that may end mid-value, telling the
    /// caller whether to wait for more bytes ([`Incomplete`]) or to give
    /// up on the stream ([`TooLarge`]).
    ///
    /// The frame decoder uses this on its partial buffer: the length
    /// prefix of a frame is the one place a varint can legitimately be
    /// cut short.
    ///
    /// [`Incomplete`]: VarIntDecodeError::Incomplete
    /// [`TooLarge`]: VarIntDecodeError::TooLarge
    pub fn decode_partial(r: impl Read) -> Result<i32, VarIntDecodeError> {
        Self::read_from(r).map(|v| v.0)
    }

    /// The shared decode core: accumulate seven bits per byte until a
    /// byte without the continuation flag arrives.
    fn read_from(mut r: impl Read) -> Result<Self, VarIntDecodeError> {
        let mut value = 0i32;
        let mut shift = 0u32;

        loop {
            let byte = r.read_u8().map_err(|_| VarIntDecodeError::Incomplete)?;
            value |= i32::from(byte & PAYLOAD_BITS) << shift;

            if byte & CONTINUE_BIT == 0 {
                return Ok(Self(value));
            }

            shift += 7;
            if shift as usize >= Self::MAX_SIZE * 7 {
                return Err(VarIntDecodeError::TooLarge);
            }
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
pub enum VarIntDecodeError {
    #[error("incomplete VarInt decode")]
    Incomplete,
    #[error("VarInt is too large")]
    TooLarge,
}

impl Encode for VarInt {
    fn encode(&self, mut w: impl Write) -> anyhow::Result<()> {
        let mut remaining = self.0 as u32;

        loop {
            let byte = (remaining as u8) & PAYLOAD_BITS;
            remaining >>= 7;

            if remaining == 0 {
                w.write_all(&[byte])?;
                return Ok(());
            }

            w.write_all(&[byte | CONTINUE_BIT])?;
        }
    }
}

impl Decode<'_> for VarInt {
    fn decode(r: &mut &[u8]) -> anyhow::Result<Self> {
        Ok(Self::read_from(r)?)
    }
}

impl From<i32> for VarInt {
    fn from(n: i32) -> Self {
        VarInt(n)
    }
}

impl From<VarInt> for i32 {
    fn from(n: VarInt) -> Self {
        n.0
    }
}
