use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

pub(crate) type OcraResult<T> = Result<T, Error>;

/// Where something was declared in a grammar or theme document, when the document
/// was parsed with location tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// The filename given when parsing the document
    pub filename: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub char: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.filename, self.line, self.char)
    }
}

/// Errors that can occur during ocra usage
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// An I/O error occurred when reading a grammar or theme file
    /// or a dump file if the `dump` feature is enabled
    Io(io::Error),

    /// A JSON value could not be turned into a grammar, a theme or a grammar state.
    Json(serde_json::Error),

    /// The JSON or PLIST reader rejected a document.
    #[allow(missing_docs)]
    Document {
        message: String,
        line: usize,
        column: usize,
    },

    /// Bitcode encoding or decoding failed.
    #[cfg(feature = "dump")]
    Bitcode(bitcode::Error),

    /// An invalid hex color was encountered.
    /// Can only happen when loading a theme.
    #[allow(missing_docs)]
    InvalidHexColor { value: String, reason: String },

    /// A theme referenced a color that is not part of the frozen color palette.
    MissingColor(String),

    /// A color got an id too large for the token attribute field it is stored in.
    #[allow(missing_docs)]
    ColorIdOverflow { color: String, id: u32, max: u32 },

    /// The grammar provider does not know that scope name.
    GrammarNotFound(String),

    /// The theme provider does not know that theme.
    ThemeNotFound(String),

    /// No language was registered with that name or alias.
    LanguageNotFound(String),

    /// An `include` could not be resolved when its rule was first used.
    #[allow(missing_docs)]
    UnresolvedInclude {
        grammar: String,
        include: String,
        location: Option<SourceLocation>,
    },

    /// A regex compilation error occurred during tokenization.
    /// This can happen because some regex patterns are modified at runtime so we can't validate
    /// them all ahead.
    TokenizeRegex(String),

    /// A grammar state was created with a different grammar than the one used to resume.
    /// Discard the state and tokenize from the start of the text.
    #[allow(missing_docs)]
    StateMismatch { scope_name: String, reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Json(err) => write!(f, "JSON error: {}", err),
            Error::Document {
                message,
                line,
                column,
            } => write!(f, "parse error at {}:{}: {}", line, column, message),
            #[cfg(feature = "dump")]
            Error::Bitcode(err) => write!(f, "bitcode error: {}", err),
            Error::InvalidHexColor { value, reason } => {
                write!(f, "invalid hex color '{}': {}", value, reason)
            }
            Error::MissingColor(color) => {
                write!(f, "color '{}' is missing from the color palette", color)
            }
            Error::ColorIdOverflow { color, id, max } => write!(
                f,
                "color '{}' has id {} but token attributes can only store ids up to {}",
                color, id, max
            ),
            Error::GrammarNotFound(name) => write!(f, "grammar '{}' not found", name),
            Error::ThemeNotFound(name) => write!(f, "theme '{}' not found", name),
            Error::LanguageNotFound(name) => write!(f, "language '{}' not found", name),
            Error::UnresolvedInclude {
                grammar,
                include,
                location,
            } => {
                write!(f, "grammar '{}': unresolved include '{}'", grammar, include)?;
                if let Some(loc) = location {
                    write!(f, " at {}", loc)?;
                }
                Ok(())
            }
            Error::TokenizeRegex(message) => write!(f, "regex compilation error: {}", message),
            Error::StateMismatch { scope_name, reason } => write!(
                f,
                "grammar state belongs to a different grammar than '{}': {}",
                scope_name, reason
            ),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            #[cfg(feature = "dump")]
            Error::Bitcode(err) => Some(err),
            Error::Document { .. }
            | Error::InvalidHexColor { .. }
            | Error::MissingColor(_)
            | Error::ColorIdOverflow { .. }
            | Error::GrammarNotFound(_)
            | Error::ThemeNotFound(_)
            | Error::LanguageNotFound(_)
            | Error::UnresolvedInclude { .. }
            | Error::TokenizeRegex(_)
            | Error::StateMismatch { .. } => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Json(err)
    }
}

#[cfg(feature = "dump")]
impl From<bitcode::Error> for Error {
    fn from(err: bitcode::Error) -> Self {
        Error::Bitcode(err)
    }
}
