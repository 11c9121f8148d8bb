//! Identification and ordering of Minecraft wire-protocol revisions.

use std::fmt;

/// A Minecraft protocol revision understood by the proxy.
///
/// Variants are declared in release order with the protocol number as the
/// discriminant, so the derived `Ord` matches wire-protocol ordering and
/// version gates read as plain comparisons
/// (`version >= ProtocolVersion::V1_20_2`).
///
/// Several releases share a protocol number (1.20 and 1.20.1 are both 763);
/// the variant is named after the first release that introduced the number.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(i32)]
pub enum ProtocolVersion {
    V1_7_2 = 4,
    V1_7_6 = 5,
    V1_8 = 47,
    V1_9 = 107,
    V1_9_1 = 108,
    V1_9_2 = 109,
    V1_9_4 = 110,
    V1_10 = 210,
    V1_11 = 315,
    V1_11_1 = 316,
    V1_12 = 335,
    V1_12_1 = 338,
    V1_12_2 = 340,
    V1_13 = 393,
    V1_13_1 = 401,
    V1_13_2 = 404,
    V1_14 = 477,
    V1_14_1 = 480,
    V1_14_2 = 485,
    V1_14_3 = 490,
    V1_14_4 = 498,
    V1_15 = 573,
    V1_15_1 = 575,
    V1_15_2 = 578,
    V1_16 = 735,
    V1_16_1 = 736,
    V1_16_2 = 751,
    V1_16_3 = 753,
    V1_16_4 = 754,
    V1_17 = 755,
    V1_17_1 = 756,
    V1_18 = 757,
    V1_18_2 = 758,
    V1_19 = 759,
    V1_19_1 = 760,
    V1_19_3 = 761,
    V1_19_4 = 762,
    V1_20 = 763,
    V1_20_2 = 764,
    V1_20_3 = 765,
    V1_20_5 = 766,
    V1_21 = 767,
}

/// Which JSON dialect a chat component is serialized under for a given
/// client version. The encoding of components changed at 1.16 (RGB colors)
/// and again at 1.20.3.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum JsonDialect {
    /// Pre-1.16: named colors only; RGB values are downsampled.
    Legacy,
    /// 1.16 up to (but excluding) 1.20.3: `#rrggbb` colors allowed.
    Hex,
    /// 1.20.3 and newer.
    Modern,
}

impl ProtocolVersion {
    /// The oldest revision the proxy can speak.
    pub const MINIMUM: Self = Self::V1_7_2;

    /// The newest revision the proxy can speak.
    pub const MAXIMUM: Self = Self::V1_21;

    /// Every supported revision, oldest first.
    pub const ALL: &'static [Self] = &[
        Self::V1_7_2,
        Self::V1_7_6,
        Self::V1_8,
        Self::V1_9,
        Self::V1_9_1,
        Self::V1_9_2,
        Self::V1_9_4,
        Self::V1_10,
        Self::V1_11,
        Self::V1_11_1,
        Self::V1_12,
        Self::V1_12_1,
        Self::V1_12_2,
        Self::V1_13,
        Self::V1_13_1,
        Self::V1_13_2,
        Self::V1_14,
        Self::V1_14_1,
        Self::V1_14_2,
        Self::V1_14_3,
        Self::V1_14_4,
        Self::V1_15,
        Self::V1_15_1,
        Self::V1_15_2,
        Self::V1_16,
        Self::V1_16_1,
        Self::V1_16_2,
        Self::V1_16_3,
        Self::V1_16_4,
        Self::V1_17,
        Self::V1_17_1,
        Self::V1_18,
        Self::V1_18_2,
        Self::V1_19,
        Self::V1_19_1,
        Self::V1_19_3,
        Self::V1_19_4,
        Self::V1_20,
        Self::V1_20_2,
        Self::V1_20_3,
        Self::V1_20_5,
        Self::V1_21,
    ];

    /// The protocol number carried in the Handshake packet.
    pub fn number(self) -> i32 {
        self as i32
    }

    /// Looks up the revision for a protocol number from a Handshake.
    /// Returns `None` for numbers the proxy does not speak (including
    /// snapshot versions, which use numbers with the high bit set).
    pub fn from_number(n: i32) -> Option<Self> {
        Self::ALL
            .binary_search_by_key(&n, |v| v.number())
            .ok()
            .map(|i| Self::ALL[i])
    }

    /// The display name of the first release that introduced this protocol
    /// number.
    pub fn name(self) -> &'static str {
        match self {
            Self::V1_7_2 => "1.7.2",
            Self::V1_7_6 => "1.7.6",
            Self::V1_8 => "1.8",
            Self::V1_9 => "1.9",
            Self::V1_9_1 => "1.9.1",
            Self::V1_9_2 => "1.9.2",
            Self::V1_9_4 => "1.9.4",
            Self::V1_10 => "1.10",
            Self::V1_11 => "1.11",
            Self::V1_11_1 => "1.11.1",
            Self::V1_12 => "1.12",
            Self::V1_12_1 => "1.12.1",
            Self::V1_12_2 => "1.12.2",
            Self::V1_13 => "1.13",
            Self::V1_13_1 => "1.13.1",
            Self::V1_13_2 => "1.13.2",
            Self::V1_14 => "1.14",
            Self::V1_14_1 => "1.14.1",
            Self::V1_14_2 => "1.14.2",
            Self::V1_14_3 => "1.14.3",
            Self::V1_14_4 => "1.14.4",
            Self::V1_15 => "1.15",
            Self::V1_15_1 => "1.15.1",
            Self::V1_15_2 => "1.15.2",
            Self::V1_16 => "1.16",
            Self::V1_16_1 => "1.16.1",
            Self::V1_16_2 => "1.16.2",
            Self::V1_16_3 => "1.16.3",
            Self::V1_16_4 => "1.16.4",
            Self::V1_17 => "1.17",
            Self::V1_17_1 => "1.17.1",
            Self::V1_18 => "1.18",
            Self::V1_18_2 => "1.18.2",
            Self::V1_19 => "1.19",
            Self::V1_19_1 => "1.19.1",
            Self::V1_19_3 => "1.19.3",
            Self::V1_19_4 => "1.19.4",
            Self::V1_20 => "1.20",
            Self::V1_20_2 => "1.20.2",
            Self::V1_20_3 => "1.20.3",
            Self::V1_20_5 => "1.20.5",
            Self::V1_21 => "1.21",
        }
    }

    /// The chat-component JSON dialect clients of this version expect.
    pub fn json_dialect(self) -> JsonDialect {
        if self >= Self::V1_20_3 {
            JsonDialect::Modern
        } else if self >= Self::V1_16 {
            JsonDialect::Hex
        } else {
            JsonDialect::Legacy
        }
    }

    /// Whether this version uses the configuration phase between login and
    /// play.
    pub fn has_config_state(self) -> bool {
        self >= Self::V1_20_2
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (protocol {})", self.name(), self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_sorted_and_complete() {
        assert!(ProtocolVersion::ALL.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ProtocolVersion::ALL.first(), Some(&ProtocolVersion::MINIMUM));
        assert_eq!(ProtocolVersion::ALL.last(), Some(&ProtocolVersion::MAXIMUM));
    }

    #[test]
    fn number_round_trip() {
        for &v in ProtocolVersion::ALL {
            assert_eq!(ProtocolVersion::from_number(v.number()), Some(v));
        }

        assert_eq!(ProtocolVersion::from_number(3), None);
        assert_eq!(ProtocolVersion::from_number(0x4000_0001), None);
    }

    #[test]
    fn ordering_matches_release_history() {
        use ProtocolVersion::*;

        assert!(V1_7_2 < V1_8);
        assert!(V1_16 < V1_20_2);
        assert!(V1_20_2.has_config_state());
        assert!(!V1_20.has_config_state());
    }

    #[test]
    fn dialect_boundaries() {
        use ProtocolVersion::*;

        assert_eq!(V1_15_2.json_dialect(), JsonDialect::Legacy);
        assert_eq!(V1_16.json_dialect(), JsonDialect::Hex);
        assert_eq!(V1_20_2.json_dialect(), JsonDialect::Hex);
        assert_eq!(V1_20_3.json_dialect(), JsonDialect::Modern);
    }
}
