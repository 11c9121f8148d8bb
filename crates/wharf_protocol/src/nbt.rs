//! Just enough NBT to proxy a modern protocol.
//!
//! The proxy never interprets world data, so it does not carry a full NBT
//! library. It needs exactly three operations: skipping a tag payload
//! (to parse past registry data embedded in JoinGame), capturing the raw
//! bytes of a named root compound (so a dimension compound can be re-sent
//! verbatim inside a synthesized Respawn), and extracting the plain text
//! of a network-NBT chat component (disconnect reasons on 1.20.3+).

use anyhow::{bail, ensure, Context};
use byteorder::{BigEndian, ReadBytesExt};

pub const TAG_END: u8 = 0;
pub const TAG_BYTE: u8 = 1;
pub const TAG_SHORT: u8 = 2;
pub const TAG_INT: u8 = 3;
pub const TAG_LONG: u8 = 4;
pub const TAG_FLOAT: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_BYTE_ARRAY: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_LIST: u8 = 9;
pub const TAG_COMPOUND: u8 = 10;
pub const TAG_INT_ARRAY: u8 = 11;
pub const TAG_LONG_ARRAY: u8 = 12;

fn advance(r: &mut &[u8], n: usize) -> anyhow::Result<()> {
    ensure!(r.len() >= n, "unexpected end of NBT data");
    *r = &r[n..];
    Ok(())
}

fn read_len(r: &mut &[u8]) -> anyhow::Result<usize> {
    let n = r.read_i32::<BigEndian>()?;
    ensure!(n >= 0, "negative NBT length");
    Ok(n as usize)
}

fn skip_string(r: &mut &[u8]) -> anyhow::Result<()> {
    let len = r.read_u16::<BigEndian>()? as usize;
    advance(r, len)
}

fn read_string(r: &mut &[u8]) -> anyhow::Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    ensure!(r.len() >= len, "unexpected end of NBT string");
    let (s, rest) = r.split_at(len);
    // Mojang NBT strings are modified UTF-8; real-world component text is
    // plain UTF-8, and anything else degrades to lossy replacement.
    let s = String::from_utf8_lossy(s).into_owned();
    *r = rest;
    Ok(s)
}

/// Skips one tag payload of the given type.
pub fn skip_value(r: &mut &[u8], tag: u8) -> anyhow::Result<()> {
    match tag {
        TAG_END => Ok(()),
        TAG_BYTE => advance(r, 1),
        TAG_SHORT => advance(r, 2),
        TAG_INT | TAG_FLOAT => advance(r, 4),
        TAG_LONG | TAG_DOUBLE => advance(r, 8),
        TAG_BYTE_ARRAY => {
            let len = read_len(r)?;
            advance(r, len)
        }
        TAG_STRING => skip_string(r),
        TAG_LIST => {
            let elem = r.read_u8()?;
            let len = read_len(r)?;
            for _ in 0..len {
                skip_value(r, elem)?;
            }
            Ok(())
        }
        TAG_COMPOUND => {
            loop {
                let tag = r.read_u8()?;
                if tag == TAG_END {
                    return Ok(());
                }
                skip_string(r)?;
                skip_value(r, tag)?;
            }
        }
        TAG_INT_ARRAY => {
            let len = read_len(r)?;
            advance(r, len.saturating_mul(4))
        }
        TAG_LONG_ARRAY => {
            let len = read_len(r)?;
            advance(r, len.saturating_mul(8))
        }
        n => bail!("unknown NBT tag {n}"),
    }
}

/// Consumes a named root tag (the pre-1.20.2 network encoding) and returns
/// its raw bytes, suitable for re-emission verbatim.
pub fn capture_named_root<'a>(r: &mut &'a [u8]) -> anyhow::Result<&'a [u8]> {
    let start = *r;

    let tag = r.read_u8()?;
    if tag != TAG_END {
        skip_string(r).context("NBT root name")?;
        skip_value(r, tag)?;
    }

    Ok(&start[..start.len() - r.len()])
}

/// Reads an unnamed network-NBT chat component (1.20.2+ encoding) and
/// returns its flattened plain text. Styling and children beyond `text`
/// and `extra` are discarded.
pub fn read_network_text(r: &mut &[u8]) -> anyhow::Result<String> {
    let tag = r.read_u8()?;
    read_text_value(r, tag)
}

fn read_text_value(r: &mut &[u8], tag: u8) -> anyhow::Result<String> {
    match tag {
        TAG_STRING => read_string(r),
        TAG_COMPOUND => {
            let mut out = String::new();
            loop {
                let tag = r.read_u8()?;
                if tag == TAG_END {
                    return Ok(out);
                }
                let name = read_string(r)?;
                match (name.as_str(), tag) {
                    ("text", TAG_STRING) => {
                        let text = read_string(r)?;
                        out.insert_str(0, &text);
                    }
                    ("extra", TAG_LIST) => {
                        let elem = r.read_u8()?;
                        let len = read_len(r)?;
                        for _ in 0..len {
                            out.push_str(&read_text_value(r, elem)?);
                        }
                    }
                    _ => skip_value(r, tag)?,
                }
            }
        }
        n => bail!("chat component has unexpected NBT root tag {n}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::Text;

    #[test]
    fn network_text_round_trips_through_writer() {
        let mut buf = vec![];
        Text::new("Gone fishing").encode_network_nbt(&mut buf).unwrap();

        let mut r = buf.as_slice();
        assert_eq!(read_network_text(&mut r).unwrap(), "Gone fishing");
        assert!(r.is_empty());
    }

    #[test]
    fn styled_component_text_is_extracted() {
        use crate::text::TextColor;

        let mut buf = vec![];
        Text::new("Moved on")
            .color(TextColor::Gold)
            .encode_network_nbt(&mut buf)
            .unwrap();

        let mut r = buf.as_slice();
        assert_eq!(read_network_text(&mut r).unwrap(), "Moved on");
    }

    #[test]
    fn capture_preserves_root_bytes() {
        // {"": {x: 1b}} as a named root compound.
        let bytes: &[u8] = &[
            TAG_COMPOUND, 0, 0, // root tag + empty name
            TAG_BYTE, 0, 1, b'x', 1, // x: 1b
            TAG_END,
        ];

        let mut r = bytes;
        let captured = capture_named_root(&mut r).unwrap();
        assert_eq!(captured, bytes);
        assert!(r.is_empty());
    }

    #[test]
    fn skip_handles_nested_lists() {
        // List of two compounds, each {n: 5s}.
        let mut buf = vec![TAG_COMPOUND, 0, 0];
        buf.extend_from_slice(&[
            TAG_LIST, 0, 1, b'l', TAG_COMPOUND, 0, 0, 0, 2, // l: [2 compounds]
            TAG_SHORT, 0, 1, b'n', 0, 5, TAG_END,
            TAG_SHORT, 0, 1, b'n', 0, 5, TAG_END,
            TAG_END,
        ]);

        let mut r = buf.as_slice();
        let captured = capture_named_root(&mut r).unwrap();
        assert_eq!(captured.len(), buf.len());
    }
}
