#![doc = include_str!("../README.md")]
#![deny(
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    rustdoc::missing_crate_level_docs,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unused_lifetimes,
    unused_import_braces,
    unreachable_pub,
    clippy::dbg_macro
)]

pub mod bounded;
pub mod decode;
pub mod encode;
mod impls;
pub mod nbt;
pub mod packets;
pub mod profile;
pub mod raw;
pub mod registry;
pub mod text;
pub mod var_int;
pub mod version;

use std::io::Write;

pub use bounded::Bounded;
pub use decode::{PacketDecoder, PacketFrame};
pub use encode::PacketEncoder;
pub use profile::{GameProfile, Property};
pub use raw::RawBytes;
pub use registry::{PacketKind, PacketRegistry};
pub use text::Text;
pub use var_int::VarInt;
pub use version::ProtocolVersion;
pub use {anyhow, bytes, uuid};

/// The maximum number of bytes in a single packet frame.
pub const MAX_PACKET_SIZE: i32 = 2097151;

/// How large a packet should be before it is compressed by the packet
/// encoder.
///
/// If the inner value is >= 0, then packets with encoded lengths >= to this
/// value will be compressed. If the value is negative, then compression is
/// disabled and no packets are compressed.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CompressionThreshold(pub i32);

impl CompressionThreshold {
    /// No compression.
    pub const DEFAULT: Self = Self(-1);

    pub fn is_enabled(self) -> bool {
        self.0 >= 0
    }
}

/// No compression.
impl Default for CompressionThreshold {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<i32> for CompressionThreshold {
    fn from(n: i32) -> Self {
        Self(n)
    }
}

/// The connection state a packet belongs to.
///
/// Transitions are monotonic except `Configuration` <-> `Play`, which may
/// alternate on modern protocols during a backend switch.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PacketState {
    Handshaking,
    Status,
    Login,
    Configuration,
    Play,
}

/// The direction a packet travels in.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PacketSide {
    /// Client to proxy, or proxy to backend.
    Serverbound,
    /// Backend to proxy, or proxy to client.
    Clientbound,
}

/// The `Encode` trait allows objects to be written to the Minecraft
/// protocol. It is the inverse of [`Decode`].
///
/// Primitive encodings do not vary between protocol versions; packets,
/// whose layouts do vary, implement [`Packet`] instead and are built out of
/// these primitives.
pub trait Encode {
    /// Writes this object to the provided writer.
    ///
    /// If this type also implements [`Decode`] then successful calls to
    /// this function returning `Ok(())` must always successfully
    /// [`decode`](Decode::decode) using the data that was written to the
    /// writer. The exact number of bytes that were originally written must
    /// be consumed during the decoding.
    fn encode(&self, w: impl Write) -> anyhow::Result<()>;

    /// Like [`Encode::encode`], except that a whole slice of values is
    /// encoded with no leading length prefix.
    ///
    /// This is important for `u8` where the entire slice can be written in
    /// a single call.
    fn encode_slice(slice: &[Self], mut w: impl Write) -> anyhow::Result<()>
    where
        Self: Sized,
    {
        for value in slice {
            value.encode(&mut w)?;
        }

        Ok(())
    }
}

/// The `Decode` trait allows objects to be read from the Minecraft
/// protocol. It is the inverse of [`Encode`].
///
/// `Decode` is parameterized by a lifetime. This allows the decoded value
/// to borrow data from the byte slice it was read from.
pub trait Decode<'a>: Sized {
    /// Reads this object from the provided byte slice.
    ///
    /// Implementations of `Decode` are expected to shrink the slice from
    /// the front as bytes are read.
    fn decode(r: &mut &'a [u8]) -> anyhow::Result<Self>;
}

/// A packet with a version-dependent layout.
///
/// Packet IDs are not part of the packet itself; they are resolved through
/// the [`PacketRegistry`] for the connection's negotiated version, state,
/// and direction.
pub trait Packet: std::fmt::Debug {
    /// The name of this packet for logging and error messages.
    const NAME: &'static str;

    /// Writes the packet body (without ID or framing) for `version`.
    fn encode(&self, w: impl Write, version: ProtocolVersion) -> anyhow::Result<()>;

    /// Reads the packet body (without ID or framing) for `version`.
    fn decode(r: &mut &[u8], version: ProtocolVersion) -> anyhow::Result<Self>
    where
        Self: Sized;
}
