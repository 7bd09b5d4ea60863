use serde::{Deserialize, Serialize};

/// The 4 font style flags a token can carry.
///
/// The bit values are the ones stored in the packed token attributes.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Debug,
)]
#[serde(transparent)]
pub struct FontStyle {
    bits: u8,
}

impl FontStyle {
    /// Italic font style
    pub const ITALIC: Self = Self { bits: 1 };
    /// Bold font style
    pub const BOLD: Self = Self { bits: 2 };
    /// Underline font style
    pub const UNDERLINE: Self = Self { bits: 4 };
    /// Strikethrough font style
    pub const STRIKETHROUGH: Self = Self { bits: 8 };

    const ALL_BITS: u8 = 0b1111;

    /// Returns an empty set of flags
    pub const fn empty() -> Self {
        Self { bits: 0 }
    }

    /// The raw bits, between 0 and 15
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Builds a font style from raw bits, ignoring bits that are not a known flag
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self {
            bits: bits & Self::ALL_BITS,
        }
    }

    /// Returns `true` if no flags are currently stored
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// Returns `true` if all of the flags in `other` are contained within `self`
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Returns the font style from a theme font style string, eg `"italic bold"`.
    ///
    /// Unknown keywords are ignored and an empty string gives an empty font style.
    pub fn from_str(font_style_str: &str) -> Self {
        let mut font_style = Self::empty();
        for keyword in font_style_str.split_whitespace() {
            match keyword {
                "italic" => font_style.insert(FontStyle::ITALIC),
                "bold" => font_style.insert(FontStyle::BOLD),
                "underline" => font_style.insert(FontStyle::UNDERLINE),
                "strikethrough" => font_style.insert(FontStyle::STRIKETHROUGH),
                _ => (),
            }
        }
        font_style
    }

    /// Inserts the specified flags in-place
    pub fn insert(&mut self, other: Self) {
        self.bits |= other.bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_font_style_strings() {
        let cases = [
            ("", 0),
            ("italic", 1),
            ("bold", 2),
            ("underline", 4),
            ("strikethrough", 8),
            ("italic bold", 3),
            ("  bold   underline ", 6),
            ("italic bold underline strikethrough", 15),
            ("normal", 0),
            ("bolder", 0),
        ];

        for (input, expected) in cases {
            assert_eq!(FontStyle::from_str(input).bits(), expected, "{input:?}");
        }
    }

    #[test]
    fn truncates_unknown_bits() {
        assert_eq!(FontStyle::from_bits_truncate(0xFF).bits(), 15);
        assert!(FontStyle::from_bits_truncate(3).contains(FontStyle::BOLD));
        assert!(!FontStyle::from_bits_truncate(3).contains(FontStyle::UNDERLINE));
    }
}
