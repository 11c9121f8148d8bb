//! Typed packet I/O on top of the frame codec.
//!
//! A [`Conn`] owns a socket plus the encoder/decoder pair and knows the
//! connection's negotiated version, current state, and which direction it
//! is speaking. Packet IDs are resolved through the shared registry at
//! send/receive time, so the same code path serves every protocol
//! revision.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use wharf_protocol::{
    CompressionThreshold, Packet, PacketDecoder, PacketEncoder, PacketFrame, PacketKind,
    PacketRegistry, PacketSide, PacketState, ProtocolVersion,
};

const READ_BUF_SIZE: usize = 4096;

/// Shared codec context for a connection or one of its split halves.
#[derive(Clone)]
pub(crate) struct ConnMeta {
    pub registry: Arc<PacketRegistry>,
    pub version: ProtocolVersion,
    pub state: PacketState,
    /// The direction packets sent *by the proxy* on this connection
    /// travel: clientbound toward players, serverbound toward backends.
    pub send_side: PacketSide,
    pub read_timeout: Duration,
}

impl ConnMeta {
    fn recv_side(&self) -> PacketSide {
        match self.send_side {
            PacketSide::Clientbound => PacketSide::Serverbound,
            PacketSide::Serverbound => PacketSide::Clientbound,
        }
    }

    /// Resolves a decoded frame's ID against the registry for the
    /// receiving direction.
    pub fn kind_of(&self, frame: &PacketFrame) -> Option<PacketKind> {
        self.registry
            .packet_kind(self.version, self.state, self.recv_side(), frame.id)
    }

    pub fn send_id(&self, kind: PacketKind) -> anyhow::Result<i32> {
        self.registry
            .packet_id(self.version, self.state, self.send_side, kind)
            .ok_or_else(|| {
                anyhow!(
                    "{kind:?} does not exist in {:?}/{:?} for {}",
                    self.state,
                    self.send_side,
                    self.version
                )
            })
    }
}

async fn read_frame(
    read: &mut (impl AsyncReadExt + Unpin),
    dec: &mut PacketDecoder,
    timeout: Duration,
) -> anyhow::Result<PacketFrame> {
    loop {
        if let Some(frame) = dec.try_next_packet()? {
            return Ok(frame);
        }

        dec.reserve(READ_BUF_SIZE);
        let mut buf = dec.take_capacity();

        let n = tokio::time::timeout(timeout, read.read_buf(&mut buf))
            .await
            .context("read timed out")??;

        if n == 0 {
            return Err(std::io::Error::from(ErrorKind::UnexpectedEof).into());
        }

        // This should always be an O(1) unsplit because we reserved space
        // earlier and the call to `read_buf` shouldn't have grown the
        // allocation.
        dec.queue_bytes(buf);
    }
}

/// A whole connection, used for the staged phases before the relay is
/// installed.
pub(crate) struct Conn {
    stream: TcpStream,
    enc: PacketEncoder,
    dec: PacketDecoder,
    pub meta: ConnMeta,
}

impl Conn {
    pub fn new(
        stream: TcpStream,
        registry: Arc<PacketRegistry>,
        send_side: PacketSide,
        read_timeout: Duration,
        compression_level: u32,
    ) -> Self {
        Self {
            stream,
            enc: PacketEncoder::with_compression_level(compression_level),
            dec: PacketDecoder::new(),
            meta: ConnMeta {
                registry,
                version: ProtocolVersion::MAXIMUM,
                state: PacketState::Handshaking,
                send_side,
                read_timeout,
            },
        }
    }

    pub async fn recv_frame(&mut self) -> anyhow::Result<PacketFrame> {
        read_frame(&mut self.stream, &mut self.dec, self.meta.read_timeout).await
    }

    /// Receives the next frame and requires it to be `kind`. Anything
    /// else, known or unknown, is a protocol violation.
    pub async fn recv_expect<P: Packet>(&mut self, kind: PacketKind) -> anyhow::Result<P> {
        let frame = self.recv_frame().await?;

        match self.meta.kind_of(&frame) {
            Some(k) if k == kind => frame.decode_as::<P>(self.meta.version),
            Some(k) => bail!("expected {kind:?}, got {k:?} in state {:?}", self.meta.state),
            None => bail!(
                "unknown packet ID {:#04x} in state {:?}",
                frame.id,
                self.meta.state
            ),
        }
    }

    pub async fn send<P: Packet>(&mut self, kind: PacketKind, pkt: &P) -> anyhow::Result<()> {
        let id = self.meta.send_id(kind)?;
        self.enc.append_packet(id, self.meta.version, pkt)?;
        self.flush().await
    }

    /// Forwards an already-decoded frame without re-encoding its body.
    pub async fn send_frame(&mut self, frame: &PacketFrame) -> anyhow::Result<()> {
        self.enc.append_frame(frame)?;
        self.flush().await
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        let bytes = self.enc.take();
        self.stream.write_all(&bytes).await?;
        Ok(())
    }

    pub fn set_compression(&mut self, threshold: CompressionThreshold) {
        self.enc.set_compression(threshold);
        self.dec.set_compression(threshold);
    }

    pub fn enable_encryption(&mut self, key: &[u8; 16]) {
        self.enc.enable_encryption(key);
        self.dec.enable_encryption(key);
    }

    pub fn set_version(&mut self, version: ProtocolVersion) {
        self.meta.version = version;
    }

    pub fn set_state(&mut self, state: PacketState) {
        self.meta.state = state;
    }

    /// Splits into independently owned halves for the relay pumps.
    pub fn into_split(self) -> (ConnReader, ConnWriter) {
        let (read, write) = self.stream.into_split();

        (
            ConnReader {
                read,
                dec: self.dec,
                meta: self.meta.clone(),
            },
            ConnWriter {
                write,
                enc: self.enc,
                meta: self.meta,
            },
        )
    }

    /// Reunites halves produced by [`into_split`](Self::into_split).
    pub fn reunite(reader: ConnReader, writer: ConnWriter) -> anyhow::Result<Self> {
        let stream = reader
            .read
            .reunite(writer.write)
            .map_err(|_| anyhow!("halves belong to different connections"))?;

        Ok(Self {
            stream,
            enc: writer.enc,
            dec: reader.dec,
            meta: reader.meta,
        })
    }
}

/// The read half of a split connection.
pub(crate) struct ConnReader {
    read: OwnedReadHalf,
    dec: PacketDecoder,
    pub meta: ConnMeta,
}

impl ConnReader {
    pub async fn recv_frame(&mut self) -> anyhow::Result<PacketFrame> {
        read_frame(&mut self.read, &mut self.dec, self.meta.read_timeout).await
    }
}

/// The write half of a split connection.
pub(crate) struct ConnWriter {
    write: OwnedWriteHalf,
    enc: PacketEncoder,
    pub meta: ConnMeta,
}

impl ConnWriter {
    pub async fn send<P: Packet>(&mut self, kind: PacketKind, pkt: &P) -> anyhow::Result<()> {
        let id = self.meta.send_id(kind)?;
        self.enc.append_packet(id, self.meta.version, pkt)?;
        self.flush().await
    }

    /// Re-frames and forwards an already-decoded frame without
    /// re-encoding its body. Awaiting the write is what provides
    /// backpressure: while this side's socket buffer is full, the pump
    /// stops reading from the opposite peer.
    pub async fn send_frame(&mut self, frame: &PacketFrame) -> anyhow::Result<()> {
        self.enc.append_frame(frame)?;
        self.flush().await
    }

    async fn flush(&mut self) -> anyhow::Result<()> {
        let bytes = self.enc.take();
        self.write.write_all(&bytes).await?;
        Ok(())
    }
}
