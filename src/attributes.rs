//! The 32-bit word stored for each token.
//!
//! ```text
//!  3322 2222 2222 1111 1111 1100 0000 0000
//!  1098 7654 3210 9876 5432 1098 7654 3210
//! -------------------------------------------
//!  bbbb bbbb ffff ffff fFFF FBTT LLLL LLLL
//! -------------------------------------------
//!  - L = language id (8 bits)
//!  - T = standard token type (2 bits)
//!  - B = balanced brackets (1 bit)
//!  - F = font style (4 bits)
//!  - f = foreground color id (9 bits)
//!  - b = background color id (8 bits)
//! ```
//! This is the layout used by VSCode so clients can decode the words the same way.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::themes::FontStyle;

const LANGUAGE_ID_MASK: u32 = 0b0000_0000_0000_0000_0000_0000_1111_1111;
const TOKEN_TYPE_MASK: u32 = 0b0000_0000_0000_0000_0000_0011_0000_0000;
const BALANCED_BRACKETS_MASK: u32 = 0b0000_0000_0000_0000_0000_0100_0000_0000;
const FONT_STYLE_MASK: u32 = 0b0000_0000_0000_0000_0111_1000_0000_0000;
const FOREGROUND_MASK: u32 = 0b0000_0000_1111_1111_1000_0000_0000_0000;
const BACKGROUND_MASK: u32 = 0b1111_1111_0000_0000_0000_0000_0000_0000;

const LANGUAGE_ID_OFFSET: u32 = 0;
const TOKEN_TYPE_OFFSET: u32 = 8;
const BALANCED_BRACKETS_OFFSET: u32 = 10;
const FONT_STYLE_OFFSET: u32 = 11;
const FOREGROUND_OFFSET: u32 = 15;
const BACKGROUND_OFFSET: u32 = 24;

/// The highest color id that fits in the foreground field
pub const MAX_FOREGROUND_ID: u32 = FOREGROUND_MASK >> FOREGROUND_OFFSET;
/// The highest color id that fits in the background field
pub const MAX_BACKGROUND_ID: u32 = BACKGROUND_MASK >> BACKGROUND_OFFSET;

/// The coarse class of a token, used by editors for bracket matching and the like.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StandardTokenType {
    #[allow(missing_docs)]
    Other = 0,
    #[allow(missing_docs)]
    Comment = 1,
    #[allow(missing_docs)]
    String = 2,
    #[allow(missing_docs)]
    RegEx = 3,
}

impl StandardTokenType {
    fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            1 => StandardTokenType::Comment,
            2 => StandardTokenType::String,
            3 => StandardTokenType::RegEx,
            _ => StandardTokenType::Other,
        }
    }
}

/// A packed token attribute word.
///
/// Every field update goes through [`TokenAttributes::set`], which leaves a field untouched
/// when given its "not set" value.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenAttributes(pub u32);

impl TokenAttributes {
    /// Returns a new word with the given fields replaced.
    ///
    /// The "not set" values are: `0` for the language id and both colors, `None` for the
    /// token type, the balanced brackets flag and the font style.
    /// If every argument is "not set", `self` is returned as is.
    pub fn set(
        self,
        language_id: u8,
        token_type: Option<StandardTokenType>,
        balanced_brackets: Option<bool>,
        font_style: Option<FontStyle>,
        foreground: u32,
        background: u32,
    ) -> Self {
        let mut language_id = u32::from(language_id);
        if language_id == 0 {
            language_id = self.language_id().into();
        }

        let token_type = match token_type {
            Some(t) => t as u32,
            None => self.token_type() as u32,
        };

        let balanced_brackets = balanced_brackets.unwrap_or(self.contains_balanced_brackets());

        let font_style = match font_style {
            Some(f) => u32::from(f.bits()),
            None => u32::from(self.font_style().bits()),
        };

        let foreground = if foreground == 0 {
            self.foreground()
        } else {
            foreground
        };

        let background = if background == 0 {
            self.background()
        } else {
            background
        };

        Self(
            ((language_id << LANGUAGE_ID_OFFSET) & LANGUAGE_ID_MASK)
                | ((token_type << TOKEN_TYPE_OFFSET) & TOKEN_TYPE_MASK)
                | ((u32::from(balanced_brackets) << BALANCED_BRACKETS_OFFSET)
                    & BALANCED_BRACKETS_MASK)
                | ((font_style << FONT_STYLE_OFFSET) & FONT_STYLE_MASK)
                | ((foreground << FOREGROUND_OFFSET) & FOREGROUND_MASK)
                | ((background << BACKGROUND_OFFSET) & BACKGROUND_MASK),
        )
    }

    /// The raw word
    #[inline]
    pub fn bits(&self) -> u32 {
        self.0
    }

    #[inline]
    pub fn language_id(&self) -> u8 {
        ((self.0 & LANGUAGE_ID_MASK) >> LANGUAGE_ID_OFFSET) as u8
    }

    #[inline]
    pub fn token_type(&self) -> StandardTokenType {
        StandardTokenType::from_bits((self.0 & TOKEN_TYPE_MASK) >> TOKEN_TYPE_OFFSET)
    }

    #[inline]
    pub fn contains_balanced_brackets(&self) -> bool {
        self.0 & BALANCED_BRACKETS_MASK != 0
    }

    #[inline]
    pub fn font_style(&self) -> FontStyle {
        FontStyle::from_bits_truncate(((self.0 & FONT_STYLE_MASK) >> FONT_STYLE_OFFSET) as u8)
    }

    /// The foreground color id, to look up in the theme color map
    #[inline]
    pub fn foreground(&self) -> u32 {
        (self.0 & FOREGROUND_MASK) >> FOREGROUND_OFFSET
    }

    /// The background color id, to look up in the theme color map
    #[inline]
    pub fn background(&self) -> u32 {
        (self.0 & BACKGROUND_MASK) >> BACKGROUND_OFFSET
    }

    /// 32 binary digits, most significant bit first
    pub fn to_binary_string(&self) -> String {
        format!("{:032b}", self.0)
    }

    /// Parses the output of [`TokenAttributes::to_binary_string`].
    pub fn from_binary_string(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b == b'0' || b == b'1') {
            return None;
        }
        u32::from_str_radix(s, 2).ok().map(Self)
    }
}

impl From<u32> for TokenAttributes {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Debug for TokenAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAttributes")
            .field("bits", &self.to_binary_string())
            .field("language_id", &self.language_id())
            .field("token_type", &self.token_type())
            .field("balanced_brackets", &self.contains_balanced_brackets())
            .field("font_style", &self.font_style().bits())
            .field("foreground", &self.foreground())
            .field("background", &self.background())
            .finish()
    }
}
