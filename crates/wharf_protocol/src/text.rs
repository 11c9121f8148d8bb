//! A minimal chat component, sufficient for the documents a proxy
//! originates itself: status descriptions, kick reasons, and system
//! messages. Components arriving from backends are relayed opaquely and
//! never pass through this type.

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};
use serde::Serialize;
use serde_json::Value;

use crate::version::JsonDialect;

/// The 16 legacy chat colors.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TextColor {
    Black,
    DarkBlue,
    DarkGreen,
    DarkAqua,
    DarkRed,
    DarkPurple,
    Gold,
    Gray,
    DarkGray,
    Blue,
    Green,
    Aqua,
    Red,
    LightPurple,
    Yellow,
    White,
    /// An arbitrary RGB color, only expressible on 1.16+.
    Hex(u32),
}

impl TextColor {
    const NAMED: [(TextColor, &'static str, u32); 16] = [
        (TextColor::Black, "black", 0x000000),
        (TextColor::DarkBlue, "dark_blue", 0x0000aa),
        (TextColor::DarkGreen, "dark_green", 0x00aa00),
        (TextColor::DarkAqua, "dark_aqua", 0x00aaaa),
        (TextColor::DarkRed, "dark_red", 0xaa0000),
        (TextColor::DarkPurple, "dark_purple", 0xaa00aa),
        (TextColor::Gold, "gold", 0xffaa00),
        (TextColor::Gray, "gray", 0xaaaaaa),
        (TextColor::DarkGray, "dark_gray", 0x555555),
        (TextColor::Blue, "blue", 0x5555ff),
        (TextColor::Green, "green", 0x55ff55),
        (TextColor::Aqua, "aqua", 0x55ffff),
        (TextColor::Red, "red", 0xff5555),
        (TextColor::LightPurple, "light_purple", 0xff55ff),
        (TextColor::Yellow, "yellow", 0xffff55),
        (TextColor::White, "white", 0xffffff),
    ];

    fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(c, _, _)| *c == self)
            .map(|(_, name, _)| *name)
    }

    /// The serialized form under a dialect: hex colors downsample to the
    /// nearest named color for pre-1.16 clients.
    fn serialize(self, dialect: JsonDialect) -> String {
        match self {
            Self::Hex(rgb) => match dialect {
                JsonDialect::Legacy => self.downsample(rgb),
                JsonDialect::Hex | JsonDialect::Modern => format!("#{rgb:06x}"),
            },
            named => named.name().unwrap_or("white").to_owned(),
        }
    }

    fn downsample(self, rgb: u32) -> String {
        let (r, g, b) = ((rgb >> 16) & 0xff, (rgb >> 8) & 0xff, rgb & 0xff);

        let nearest = Self::NAMED
            .iter()
            .min_by_key(|(_, _, c)| {
                let (nr, ng, nb) = ((c >> 16) & 0xff, (c >> 8) & 0xff, c & 0xff);
                let dr = r.abs_diff(nr);
                let dg = g.abs_diff(ng);
                let db = b.abs_diff(nb);
                dr * dr + dg * dg + db * db
            })
            .map(|(_, name, _)| *name)
            .unwrap_or("white");

        nearest.to_owned()
    }
}

/// A chat component: a piece of text with optional styling and children.
#[derive(Clone, PartialEq, Default, Debug, Serialize)]
pub struct Text {
    pub text: String,
    #[serde(skip)]
    pub color: Option<TextColor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underlined: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strikethrough: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfuscated: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<Text>,
}

impl Text {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn color(mut self, color: TextColor) -> Self {
        self.color = Some(color);
        self
    }

    /// Parses a string containing legacy `§`-style formatting codes into a
    /// component chain. Unknown codes are dropped.
    pub fn from_legacy(s: &str) -> Self {
        let mut segments: Vec<Text> = vec![];
        let mut current = Text::default();
        let mut chars = s.chars();

        while let Some(c) = chars.next() {
            if c == '\u{a7}' {
                let Some(code) = chars.next() else { break };

                if !current.text.is_empty() {
                    segments.push(current.clone());
                    current.text.clear();
                }

                match code.to_ascii_lowercase() {
                    '0'..='9' | 'a'..='f' => {
                        let idx = code.to_digit(16).unwrap() as usize;
                        current = Text::default().color(TextColor::NAMED[idx].0);
                    }
                    'l' => current.bold = Some(true),
                    'o' => current.italic = Some(true),
                    'n' => current.underlined = Some(true),
                    'm' => current.strikethrough = Some(true),
                    'k' => current.obfuscated = Some(true),
                    'r' => current = Text::default(),
                    _ => {}
                }
            } else {
                current.text.push(c);
            }
        }

        if !current.text.is_empty() {
            segments.push(current);
        }

        match segments.len() {
            0 => Text::default(),
            // A single run needs no wrapping parent.
            1 => segments.pop().unwrap(),
            // Multiple runs hang off an unstyled parent so styles don't
            // leak between siblings.
            _ => Text {
                extra: segments,
                ..Text::default()
            },
        }
    }

    /// Reconstructs a component from serialized JSON, keeping only the
    /// pieces the proxy cares about (text content and children). Styling
    /// of foreign components is not preserved; they are only ever used for
    /// logging and re-wrapping kick reasons.
    pub fn from_json_lossy(s: &str) -> Self {
        match serde_json::from_str::<Value>(s) {
            Ok(value) => Self::from_value_lossy(&value),
            Err(_) => Self::new(s),
        }
    }

    fn from_value_lossy(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::new(s.clone()),
            Value::Array(parts) => Self {
                extra: parts.iter().map(Self::from_value_lossy).collect(),
                ..Self::default()
            },
            Value::Object(map) => {
                let mut text = Self::new(
                    map.get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                );

                if text.text.is_empty() {
                    // Translatable components degrade to their key.
                    if let Some(key) = map.get("translate").and_then(Value::as_str) {
                        text.text = key.to_owned();
                    }
                }

                if let Some(Value::Array(extra)) = map.get("extra") {
                    text.extra = extra.iter().map(Self::from_value_lossy).collect();
                }

                text
            }
            _ => Self::default(),
        }
    }

    /// The undecorated text of this component and its children.
    pub fn flatten(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.extra {
            out.push_str(&child.flatten());
        }
        out
    }

    /// Serializes the component under the JSON dialect the receiving
    /// client's version expects.
    pub fn to_json_value(&self, dialect: JsonDialect) -> Value {
        let mut value = serde_json::to_value(self).expect("text serialization cannot fail");

        if let Some(color) = self.color {
            value["color"] = Value::String(color.serialize(dialect));
        }

        if !self.extra.is_empty() {
            value["extra"] = Value::Array(
                self.extra
                    .iter()
                    .map(|child| child.to_json_value(dialect))
                    .collect(),
            );
        }

        value
    }

    pub fn to_json(&self, dialect: JsonDialect) -> String {
        self.to_json_value(dialect).to_string()
    }

    /// Writes the component as network NBT, the encoding PLAY- and
    /// CONFIG-phase text fields use on 1.20.3+. Children are flattened;
    /// the components the proxy originates in those phases are plain kick
    /// reasons.
    pub fn encode_network_nbt(&self, mut w: impl Write) -> anyhow::Result<()> {
        const TAG_STRING: u8 = 0x08;
        const TAG_COMPOUND: u8 = 0x0a;
        const TAG_BYTE: u8 = 0x01;
        const TAG_END: u8 = 0x00;

        fn write_str(mut w: impl Write, s: &str) -> anyhow::Result<()> {
            w.write_u16::<BigEndian>(s.len() as u16)?;
            w.write_all(s.as_bytes())?;
            Ok(())
        }

        let flat = self.flatten();

        if self.color.is_none() && self.bold.is_none() && self.italic.is_none() {
            // An unstyled component is just a string tag.
            w.write_u8(TAG_STRING)?;
            write_str(&mut w, &flat)?;
            return Ok(());
        }

        w.write_u8(TAG_COMPOUND)?;

        w.write_u8(TAG_STRING)?;
        write_str(&mut w, "text")?;
        write_str(&mut w, &flat)?;

        if let Some(color) = self.color {
            w.write_u8(TAG_STRING)?;
            write_str(&mut w, "color")?;
            write_str(&mut w, &color.serialize(JsonDialect::Modern))?;
        }

        for (name, flag) in [("bold", self.bold), ("italic", self.italic)] {
            if let Some(flag) = flag {
                w.write_u8(TAG_BYTE)?;
                write_str(&mut w, name)?;
                w.write_u8(u8::from(flag))?;
            }
        }

        w.write_u8(TAG_END)?;
        Ok(())
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Text {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn plain_text_serializes_to_text_field() {
        let t = Text::new("A wharf proxy");
        assert_eq!(
            t.to_json(JsonDialect::Legacy),
            r#"{"text":"A wharf proxy"}"#
        );
    }

    #[test]
    fn hex_color_downsamples_for_legacy_clients() {
        let t = Text::new("x").color(TextColor::Hex(0xff5454));

        let legacy = t.to_json_value(JsonDialect::Legacy);
        assert_eq!(legacy["color"], "red");

        let hex = t.to_json_value(JsonDialect::Hex);
        assert_eq!(hex["color"], "#ff5454");
    }

    #[test]
    fn legacy_codes_parse() {
        let t = Text::from_legacy("\u{a7}cred\u{a7}r plain");
        assert_eq!(t.flatten(), "red plain");
        assert_eq!(t.extra[0].color, Some(TextColor::Red));
        assert_eq!(t.extra[1].color, None);

        let single = Text::from_legacy("\u{a7}6gold");
        assert_eq!(single.color, Some(TextColor::Gold));
    }

    #[test]
    fn unstyled_nbt_is_a_string_tag() {
        let mut buf = vec![];
        Text::new("Bye").encode_network_nbt(&mut buf).unwrap();
        assert_eq!(buf, [0x08, 0x00, 0x03, b'B', b'y', b'e']);
    }

    #[test]
    fn styled_nbt_is_a_compound() {
        let mut buf = vec![];
        Text::new("x")
            .color(TextColor::Red)
            .encode_network_nbt(&mut buf)
            .unwrap();
        assert_eq!(buf[0], 0x0a);
        assert_eq!(*buf.last().unwrap(), 0x00);
    }
}
