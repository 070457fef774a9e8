//! Source locations for diagnostics.
//!
//! Every error raised while loading a build file, expanding a property or
//! running a target can carry the place in the build file it came from.

use std::fmt;
use std::path::{Path, PathBuf};

/// A position in a build file, or [`Location::Unknown`] when none applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Location {
    /// No source information available
    #[default]
    Unknown,
    /// A 1-based line/column position inside a file
    File { path: PathBuf, line: usize, column: usize },
}

impl Location {
    /// Create a file location.
    pub fn new(path: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Location::File { path: path.into(), line, column }
    }

    /// Map a byte offset inside `source` to a line/column location.
    ///
    /// Columns count characters, not bytes. Offsets past the end clamp to
    /// the end of the source.
    pub fn from_offset(path: &Path, source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let mut line = 1;
        let mut column = 1;

        for (i, c) in source.char_indices() {
            if i >= offset {
                break;
            }
            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }

        Location::new(path, line, column)
    }

    /// Whether this location points somewhere.
    pub fn is_known(&self) -> bool {
        matches!(self, Location::File { .. })
    }

    /// The location reached after reading `text` from this location.
    ///
    /// A newline moves to column 1 of the next line. Used to point at a
    /// token inside an expression whose text starts here. Unknown locations
    /// stay unknown.
    pub fn advance(&self, text: &str) -> Self {
        match self {
            Location::Unknown => Location::Unknown,
            Location::File { path, line, column } => {
                let (mut line, mut column) = (*line, *column);
                for c in text.chars() {
                    if c == '\n' {
                        line += 1;
                        column = 1;
                    } else {
                        column += 1;
                    }
                }
                Location::File { path: path.clone(), line, column }
            }
        }
    }

    /// Prefix used when rendering an error message (`"file:1:2: "`).
    pub fn prefix(&self) -> String {
        match self {
            Location::Unknown => String::new(),
            known => format!("{}: ", known),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Unknown => write!(f, "<unknown location>"),
            Location::File { path, line, column } => {
                write!(f, "{}:{}:{}", path.display(), line, column)
            }
        }
    }
}
