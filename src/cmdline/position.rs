//! Position and mark translation between editor and Neovim conventions
//!
//! The editor counts lines from 0; Neovim counts them from 1. Columns are
//! carried through unchanged in both directions.

use serde::{Deserialize, Serialize};

/// Register addressing the cursor
pub const CURSOR_REGISTER: &str = ".";

/// Register addressing the start of the last visual selection
pub const SELECTION_START_REGISTER: &str = "'<";

/// Register addressing the end of the last visual selection
pub const SELECTION_END_REGISTER: &str = "'>";

/// Editor position: zero-based line and column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Neovim position: one-based line, column as the editor reports it
///
/// Signed because readback may report 0 (or less) for an unset register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExternalPosition {
    pub line: i64,
    pub column: i64,
}

/// Translate an editor position for Neovim
pub fn to_external(position: Position) -> ExternalPosition {
    ExternalPosition {
        line: position.line as i64 + 1,
        column: position.column as i64,
    }
}

/// Translate a Neovim position back
///
/// Returns `None` when Neovim reports no usable position (line ≤ 0 or a
/// negative column) instead of inventing a negative editor position.
pub fn from_external(position: ExternalPosition) -> Option<Position> {
    if position.line <= 0 || position.column < 0 {
        return None;
    }
    Some(Position {
        line: (position.line - 1) as usize,
        column: position.column as usize,
    })
}

/// Register name for a user mark
pub fn mark_register(name: char) -> String {
    format!("'{name}")
}
