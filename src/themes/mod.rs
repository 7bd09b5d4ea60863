mod color;
mod color_map;
mod compiled;
mod font_style;
mod raw;
mod selector;

pub use color::Color;
pub use color_map::ColorMap;
pub use compiled::{CompiledTheme, DefaultStyle, StyleAttributes, ThemeRule, ThemeType};
pub use font_style::FontStyle;
pub use raw::{Colors, RawTheme, TokenColorRule, TokenColorSettings};
pub use selector::{Parent, ThemeSelector, parse_selector};
