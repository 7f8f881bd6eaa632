//! Editor collaborator contract and editor-state snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cmdline::position::Position;

/// Default width used when re-expanding indentation tabs
pub const DEFAULT_TAB_WIDTH: usize = 4;

// ============================================================================
// Marks
// ============================================================================

/// A named position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    pub name: char,
    pub position: Position,
}

/// Marks keyed by their single-character name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarkSet(BTreeMap<char, Position>);

impl MarkSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a mark, replacing any mark with the same name
    pub fn insert(&mut self, name: char, position: Position) -> Option<Position> {
        self.0.insert(name, position)
    }

    pub fn remove(&mut self, name: char) -> Option<Position> {
        self.0.remove(&name)
    }

    #[cfg(test)]
    pub fn get(&self, name: char) -> Option<Position> {
        self.0.get(&name).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Mark> + '_ {
        self.0.iter().map(|(&name, &position)| Mark { name, position })
    }
}

impl FromIterator<Mark> for MarkSet {
    fn from_iter<I: IntoIterator<Item = Mark>>(iter: I) -> Self {
        Self(iter.into_iter().map(|m| (m.name, m.position)).collect())
    }
}

// ============================================================================
// Snapshot and request
// ============================================================================

/// Editor state at the moment a command is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditorSnapshot {
    /// Buffer content, one entry per line, without line terminators
    pub lines: Vec<String>,
    #[serde(default)]
    pub cursor: Position,
    #[serde(default)]
    pub selection_start: Position,
    #[serde(default)]
    pub marks: MarkSet,
}

impl EditorSnapshot {
    /// Snapshot of `text` split on `\n`, cursor and selection at the origin
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: split_lines(text),
            cursor: Position::default(),
            selection_start: Position::default(),
            marks: MarkSet::new(),
        }
    }

    /// Whether `position` names a line that exists in this snapshot
    pub fn contains(&self, position: Position) -> bool {
        position.line < self.lines.len()
    }
}

/// Split text into lines the way the buffer stores them
///
/// An empty text is one empty line; a trailing newline does not add one.
pub fn split_lines(text: &str) -> Vec<String> {
    let trimmed = text.strip_suffix('\n').unwrap_or(text);
    trimmed.split('\n').map(str::to_string).collect()
}

/// A raw command plus the editor state it was entered against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    command: String,
    snapshot: EditorSnapshot,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, snapshot: EditorSnapshot) -> Self {
        Self {
            command: command.into(),
            snapshot,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn snapshot(&self) -> &EditorSnapshot {
        &self.snapshot
    }
}

// ============================================================================
// Editor collaborator
// ============================================================================

/// What the command-line bridge needs from the host editor
pub trait Editor: Send {
    /// Current buffer content
    fn lines(&self) -> Vec<String>;

    /// Replace the whole buffer
    fn replace_all(&mut self, lines: Vec<String>);

    fn cursor(&self) -> Position;

    fn selection_start(&self) -> Position;

    fn marks(&self) -> MarkSet;

    fn set_mark(&mut self, name: char, position: Position);

    /// Remove a mark; returns whether it existed
    fn remove_mark(&mut self, name: char) -> bool;

    /// Collapse the selection to a zero-width selection at `position`
    fn set_selection(&mut self, position: Position);

    /// Whether indentation should be re-expanded to spaces after delegation
    fn expand_tabs_on_delegation(&self) -> bool;

    /// Convert leading tabs to spaces across the buffer
    fn indentation_to_spaces(&mut self);

    /// Show a message on the status line
    fn set_status_message(&mut self, message: String);

    fn snapshot(&self) -> EditorSnapshot {
        EditorSnapshot {
            lines: self.lines(),
            cursor: self.cursor(),
            selection_start: self.selection_start(),
            marks: self.marks(),
        }
    }
}

// ============================================================================
// In-memory editor
// ============================================================================

/// Plain in-memory editor used by the CLI
///
/// Positions are clamped so they always refer to an existing line.
#[derive(Debug, Clone)]
pub struct InMemoryEditor {
    lines: Vec<String>,
    cursor: Position,
    selection_start: Position,
    marks: MarkSet,
    expand_tab: bool,
    tab_width: usize,
    status: Option<String>,
}

impl InMemoryEditor {
    pub fn new(snapshot: EditorSnapshot) -> Self {
        let mut editor = Self {
            lines: Vec::new(),
            cursor: snapshot.cursor,
            selection_start: snapshot.selection_start,
            marks: snapshot.marks,
            expand_tab: false,
            tab_width: DEFAULT_TAB_WIDTH,
            status: None,
        };
        editor.replace_all(snapshot.lines);
        editor
    }

    pub fn with_expand_tab(mut self, expand_tab: bool, tab_width: usize) -> Self {
        self.expand_tab = expand_tab;
        self.tab_width = tab_width.max(1);
        self
    }

    /// Last status-line message, if any
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    fn clamp(&self, position: Position) -> Position {
        let last_line = self.lines.len().saturating_sub(1);
        Position::new(position.line.min(last_line), position.column)
    }
}

impl Editor for InMemoryEditor {
    fn lines(&self) -> Vec<String> {
        self.lines.clone()
    }

    fn replace_all(&mut self, lines: Vec<String>) {
        self.lines = if lines.is_empty() {
            vec![String::new()]
        } else {
            lines
        };
        self.cursor = self.clamp(self.cursor);
        self.selection_start = self.clamp(self.selection_start);
        let clamped: MarkSet = self
            .marks
            .iter()
            .map(|mark| Mark {
                name: mark.name,
                position: self.clamp(mark.position),
            })
            .collect();
        self.marks = clamped;
    }

    fn cursor(&self) -> Position {
        self.cursor
    }

    fn selection_start(&self) -> Position {
        self.selection_start
    }

    fn marks(&self) -> MarkSet {
        self.marks.clone()
    }

    fn set_mark(&mut self, name: char, position: Position) {
        let position = self.clamp(position);
        self.marks.insert(name, position);
    }

    fn remove_mark(&mut self, name: char) -> bool {
        self.marks.remove(name).is_some()
    }

    fn set_selection(&mut self, position: Position) {
        let position = self.clamp(position);
        self.cursor = position;
        self.selection_start = position;
    }

    fn expand_tabs_on_delegation(&self) -> bool {
        self.expand_tab
    }

    fn indentation_to_spaces(&mut self) {
        let tab_width = self.tab_width;
        for line in &mut self.lines {
            *line = expand_leading_tabs(line, tab_width);
        }
    }

    fn set_status_message(&mut self, message: String) {
        self.status = Some(message);
    }
}

/// Expand tabs in the leading whitespace of `line` to tab stops of `tab_width`
pub fn expand_leading_tabs(line: &str, tab_width: usize) -> String {
    let indent_len = line
        .find(|c: char| c != ' ' && c != '\t')
        .unwrap_or(line.len());
    let (indent, rest) = line.split_at(indent_len);
    if !indent.contains('\t') {
        return line.to_string();
    }

    let mut column = 0;
    for c in indent.chars() {
        column = match c {
            '\t' => (column / tab_width + 1) * tab_width,
            _ => column + 1,
        };
    }
    format!("{}{}", " ".repeat(column), rest)
}
