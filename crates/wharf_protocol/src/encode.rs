use std::io::Write;

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncryptMut, BlockSizeUser, KeyIvInit};
use anyhow::ensure;
use bytes::{BufMut, BytesMut};

use crate::decode::PacketFrame;
use crate::var_int::VarInt;
use crate::{CompressionThreshold, Encode, Packet, ProtocolVersion, MAX_PACKET_SIZE};

/// The AES block cipher with a 128 bit key, using the CFB-8 mode of
/// operation.
type Cipher = cfb8::Encryptor<aes::Aes128>;

/// Incremental encoder for the frame layer, the write-side counterpart of
/// [`PacketDecoder`](crate::PacketDecoder).
///
/// Packets and raw frames are appended to an internal buffer and framed in
/// place; [`take`](Self::take) hands the framed (and, once negotiated,
/// encrypted) bytes to the socket writer.
pub struct PacketEncoder {
    buf: BytesMut,
    compress_buf: Vec<u8>,
    threshold: CompressionThreshold,
    compression_level: u32,
    cipher: Option<Cipher>,
}

impl Default for PacketEncoder {
    fn default() -> Self {
        Self {
            buf: BytesMut::new(),
            compress_buf: Vec::new(),
            threshold: CompressionThreshold::DEFAULT,
            compression_level: 6,
            cipher: None,
        }
    }
}

impl PacketEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression_level(level: u32) -> Self {
        Self {
            compression_level: level.min(9),
            ..Self::default()
        }
    }

    #[inline]
    fn append_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes)
    }

    /// Frames the bytes from `from` to the end of the buffer: prepends the
    /// packet length varint, and, when compression is enabled, the data
    /// length varint plus zlib compression of the payload.
    fn enframe_from(&mut self, from: usize) -> anyhow::Result<()> {
        let data_len = self.buf.len() - from;

        if self.threshold.is_enabled() {
            use std::io::Read;

            use flate2::bufread::ZlibEncoder;
            use flate2::Compression;

            if data_len > self.threshold.0 as usize {
                let mut z = ZlibEncoder::new(
                    &self.buf[from..],
                    Compression::new(self.compression_level),
                );

                self.compress_buf.clear();

                let data_len_size = VarInt(data_len as i32).written_size();

                let packet_len = data_len_size + z.read_to_end(&mut self.compress_buf)?;

                ensure!(
                    packet_len <= MAX_PACKET_SIZE as usize,
                    "packet exceeds maximum length"
                );

                drop(z);

                self.buf.truncate(from);

                let mut writer = (&mut self.buf).writer();

                VarInt(packet_len as i32).encode(&mut writer)?;
                VarInt(data_len as i32).encode(&mut writer)?;
                self.buf.extend_from_slice(&self.compress_buf);
            } else {
                let data_len_size = 1;
                let packet_len = data_len_size + data_len;

                ensure!(
                    packet_len <= MAX_PACKET_SIZE as usize,
                    "packet exceeds maximum length"
                );

                let packet_len_size = VarInt(packet_len as i32).written_size();

                let data_prefix_len = packet_len_size + data_len_size;

                self.buf.put_bytes(0, data_prefix_len);
                self.buf
                    .copy_within(from..from + data_len, from + data_prefix_len);

                let mut front = &mut self.buf[from..];

                VarInt(packet_len as i32).encode(&mut front)?;
                // Zero for no compression on this packet.
                VarInt(0).encode(front)?;
            }

            return Ok(());
        }

        let packet_len = data_len;

        ensure!(
            packet_len <= MAX_PACKET_SIZE as usize,
            "packet exceeds maximum length"
        );

        let packet_len_size = VarInt(packet_len as i32).written_size();

        self.buf.put_bytes(0, packet_len_size);
        self.buf
            .copy_within(from..from + data_len, from + packet_len_size);

        let front = &mut self.buf[from..];
        VarInt(packet_len as i32).encode(front)?;

        Ok(())
    }

    /// Appends a typed packet under the registry-resolved `id` for
    /// `version`.
    pub fn append_packet<P: Packet>(
        &mut self,
        id: i32,
        version: ProtocolVersion,
        pkt: &P,
    ) -> anyhow::Result<()> {
        let start_len = self.buf.len();
        let mut writer = (&mut self.buf).writer();
        VarInt(id).encode(&mut writer)?;
        pkt.encode(&mut writer, version)?;
        self.enframe_from(start_len)
    }

    /// Re-frames an already-decoded frame without re-encoding its body.
    /// This is the relay path: payloads pass through byte-for-byte.
    pub fn append_frame(&mut self, frame: &PacketFrame) -> anyhow::Result<()> {
        let start_len = self.buf.len();
        VarInt(frame.id).encode((&mut self.buf).writer())?;
        self.append_bytes(&frame.body);
        self.enframe_from(start_len)
    }

    /// Takes all the packets written so far and encrypts them if encryption
    /// is enabled.
    pub fn take(&mut self) -> BytesMut {
        if let Some(cipher) = &mut self.cipher {
            for chunk in self.buf.chunks_mut(Cipher::block_size()) {
                let gen_arr = GenericArray::from_mut_slice(chunk);
                cipher.encrypt_block_mut(gen_arr);
            }
        }

        self.buf.split()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn compression(&self) -> CompressionThreshold {
        self.threshold
    }

    pub fn set_compression(&mut self, threshold: CompressionThreshold) {
        self.threshold = threshold;
    }

    /// Initializes the cipher with the given key. All future packets **and
    /// any that have not been [taken] yet** are encrypted.
    ///
    /// [taken]: Self::take
    ///
    /// # Panics
    ///
    /// Panics if encryption is already enabled.
    pub fn enable_encryption(&mut self, key: &[u8; 16]) {
        assert!(self.cipher.is_none(), "encryption is already enabled");
        self.cipher = Some(Cipher::new_from_slices(key, key).expect("invalid key"));
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::PacketDecoder;

    // A tiny stand-in packet: a varint-prefixed blob.
    #[derive(Debug, PartialEq)]
    struct Blob(Vec<u8>);

    impl Packet for Blob {
        const NAME: &'static str = "Blob";

        fn encode(&self, w: impl std::io::Write, _version: ProtocolVersion) -> anyhow::Result<()> {
            use crate::Encode;
            self.0.encode(w)
        }

        fn decode(r: &mut &[u8], _version: ProtocolVersion) -> anyhow::Result<Self> {
            use crate::Decode;
            Ok(Self(Vec::decode(r)?))
        }
    }

    fn round_trip(threshold: CompressionThreshold, key: Option<[u8; 16]>, payload_len: usize) {
        let version = ProtocolVersion::V1_20_2;

        let mut enc = PacketEncoder::new();
        let mut dec = PacketDecoder::new();

        enc.set_compression(threshold);
        dec.set_compression(threshold);

        if let Some(key) = key {
            enc.enable_encryption(&key);
            dec.enable_encryption(&key);
        }

        let pkt = Blob((0..payload_len).map(|n| n as u8).collect());

        enc.append_packet(0x2a, version, &pkt).unwrap();
        let bytes = enc.take();

        // Feed the wire bytes in two pieces to exercise partial decode.
        let mid = bytes.len() / 2;
        dec.queue_bytes(BytesMut::from(&bytes[..mid]));
        assert!(dec.try_next_packet().unwrap().is_none());
        dec.queue_bytes(BytesMut::from(&bytes[mid..]));

        let frame = dec.try_next_packet().unwrap().expect("complete frame");
        assert_eq!(frame.id, 0x2a);
        assert_eq!(frame.decode_as::<Blob>(version).unwrap(), pkt);
    }

    #[test]
    fn frame_round_trip_plain() {
        round_trip(CompressionThreshold::DEFAULT, None, 100);
    }

    #[test]
    fn frame_round_trip_compressed_above_threshold() {
        round_trip(CompressionThreshold(16), None, 1000);
    }

    #[test]
    fn frame_round_trip_compressed_below_threshold() {
        round_trip(CompressionThreshold(256), None, 10);
    }

    #[test]
    fn frame_round_trip_encrypted() {
        round_trip(CompressionThreshold::DEFAULT, Some([7; 16]), 100);
    }

    #[test]
    fn frame_round_trip_encrypted_and_compressed() {
        round_trip(CompressionThreshold(16), Some([7; 16]), 1000);
        round_trip(CompressionThreshold(256), Some([7; 16]), 10);
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut dec = PacketDecoder::new();

        let mut header = vec![];
        use crate::Encode;
        VarInt(MAX_PACKET_SIZE + 1).encode(&mut header).unwrap();

        dec.queue_slice(&header);
        assert!(dec.try_next_packet().is_err());
    }

    #[test]
    fn malformed_length_varint_rejected() {
        let mut dec = PacketDecoder::new();
        dec.queue_slice(&[0x80, 0x80, 0x80, 0x80, 0x80, 0x01]);
        assert!(dec.try_next_packet().is_err());
    }

    #[test]
    fn sub_threshold_compressed_payload_rejected() {
        // A frame claiming a decompressed size at or below the threshold
        // must be refused.
        let version = ProtocolVersion::V1_20_2;

        let mut enc = PacketEncoder::new();
        enc.set_compression(CompressionThreshold(10));

        let pkt = Blob(vec![1; 100]);
        enc.append_packet(0x00, version, &pkt).unwrap();
        let bytes = enc.take();

        let mut dec = PacketDecoder::new();
        dec.set_compression(CompressionThreshold(200));
        dec.queue_bytes(bytes);
        assert!(dec.try_next_packet().is_err());
    }
}
