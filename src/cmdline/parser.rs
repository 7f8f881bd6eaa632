//! Local command parsing and classification
//!
//! The parser recognizes a small command grammar. Commands it can run on
//! the editor directly come back as executable values; commands whose
//! shape it knows but whose semantics need Neovim come back marked
//! external-capable; anything else is a parse error. `classify` folds those
//! three outcomes into the routing decision.

use std::fmt::Debug;

use regex::Regex;

use crate::cmdline::editor::Editor;
use crate::cmdline::position::Position;

// ============================================================================
// Errors
// ============================================================================

/// The local grammar rejected the input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("E492: Not an editor command: {0}")]
    UnknownCommand(String),

    #[error("E488: Trailing characters: {0}")]
    TrailingCharacters(String),
}

/// A locally executed command failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalExecutionError {
    #[error("E471: Argument required")]
    ArgumentRequired,

    #[error("E475: Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("E191: Argument must be a letter or forward/backward quote")]
    InvalidMarkName,

    #[error("{0} needs Neovim and cannot run locally")]
    RequiresDelegation(String),
}

// ============================================================================
// Parser contract
// ============================================================================

/// A parsed command the editor can run
pub trait LocalCommand: Debug + Send {
    /// Full command name
    fn name(&self) -> &str;

    /// The grammar knows the command's shape but Neovim owns its semantics
    fn external_capable(&self) -> bool {
        false
    }

    fn execute(&self, editor: &mut dyn Editor) -> Result<(), LocalExecutionError>;
}

/// Successful parse result
#[derive(Debug)]
pub enum ParsedCommand {
    /// Nothing to do (blank input)
    Empty,
    Command(Box<dyn LocalCommand>),
}

/// Local grammar
pub trait CommandParser: Send + Sync {
    fn parse(&self, input: &str) -> Result<ParsedCommand, ParseError>;
}

// ============================================================================
// Classification
// ============================================================================

/// Why a command goes to Neovim
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationReason {
    /// The local grammar does not understand the input
    ParseFailed(ParseError),
    /// The local grammar understands it but defers to Neovim
    ExternalCapable(String),
}

/// Routing decision for one input
#[derive(Debug)]
pub enum Classification {
    Empty,
    Local(Box<dyn LocalCommand>),
    NeedsDelegation(DelegationReason),
}

/// Classify `input` with `parser`
pub fn classify<P: CommandParser + ?Sized>(parser: &P, input: &str) -> Classification {
    match parser.parse(input) {
        Ok(ParsedCommand::Empty) => Classification::Empty,
        Ok(ParsedCommand::Command(command)) if command.external_capable() => {
            Classification::NeedsDelegation(DelegationReason::ExternalCapable(
                command.name().to_string(),
            ))
        }
        Ok(ParsedCommand::Command(command)) => Classification::Local(command),
        Err(e) => Classification::NeedsDelegation(DelegationReason::ParseFailed(e)),
    }
}

// ============================================================================
// Built-in commands
// ============================================================================

/// Target of a bare line-number command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTarget {
    /// One-based line number as typed; 0 means the first line
    Number(usize),
    Current,
    Last,
}

/// `:{N}`, `:.` and `:$`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GotoLine {
    pub target: LineTarget,
}

impl LocalCommand for GotoLine {
    fn name(&self) -> &str {
        "goto"
    }

    fn execute(&self, editor: &mut dyn Editor) -> Result<(), LocalExecutionError> {
        let last_line = editor.lines().len().saturating_sub(1);
        let line = match self.target {
            LineTarget::Number(n) => n.saturating_sub(1).min(last_line),
            LineTarget::Current => editor.cursor().line,
            LineTarget::Last => last_line,
        };
        editor.set_selection(Position::new(line, first_non_blank(editor, line)));
        Ok(())
    }
}

fn first_non_blank(editor: &dyn Editor, line: usize) -> usize {
    editor
        .lines()
        .get(line)
        .and_then(|text| text.find(|c: char| !c.is_whitespace()))
        .unwrap_or(0)
}

/// `:delm[arks] {marks}` and `:delm[arks]!`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteMarks {
    pub all: bool,
    pub arguments: String,
}

impl DeleteMarks {
    /// Mark names selected by the argument, e.g. `a-d x`
    fn selected(&self) -> Result<Vec<char>, LocalExecutionError> {
        let chars: Vec<char> = self.arguments.chars().filter(|c| !c.is_whitespace()).collect();
        let mut names = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if !c.is_ascii_alphabetic() {
                return Err(LocalExecutionError::InvalidArgument(self.arguments.clone()));
            }
            if chars.get(i + 1) == Some(&'-') {
                let end = *chars
                    .get(i + 2)
                    .ok_or_else(|| LocalExecutionError::InvalidArgument(self.arguments.clone()))?;
                let same_case = (c.is_ascii_lowercase() && end.is_ascii_lowercase())
                    || (c.is_ascii_uppercase() && end.is_ascii_uppercase());
                if !same_case || end < c {
                    return Err(LocalExecutionError::InvalidArgument(self.arguments.clone()));
                }
                names.extend(c..=end);
                i += 3;
            } else {
                names.push(c);
                i += 1;
            }
        }
        Ok(names)
    }
}

impl LocalCommand for DeleteMarks {
    fn name(&self) -> &str {
        "delmarks"
    }

    fn execute(&self, editor: &mut dyn Editor) -> Result<(), LocalExecutionError> {
        let names = match (self.all, self.arguments.trim().is_empty()) {
            (true, true) => editor
                .marks()
                .iter()
                .map(|mark| mark.name)
                .filter(char::is_ascii_lowercase)
                .collect(),
            (true, false) => {
                return Err(LocalExecutionError::InvalidArgument(self.arguments.clone()));
            }
            (false, true) => return Err(LocalExecutionError::ArgumentRequired),
            (false, false) => self.selected()?,
        };
        for name in names {
            editor.remove_mark(name);
        }
        Ok(())
    }
}

/// `:ma[rk] {a-zA-Z}` and `:k{a-zA-Z}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetMark {
    pub arguments: String,
}

impl LocalCommand for SetMark {
    fn name(&self) -> &str {
        "mark"
    }

    fn execute(&self, editor: &mut dyn Editor) -> Result<(), LocalExecutionError> {
        let mut chars = self.arguments.trim().chars();
        let name = match (chars.next(), chars.next()) {
            (Some(name), None) if name.is_ascii_alphabetic() => name,
            (None, _) => return Err(LocalExecutionError::ArgumentRequired),
            _ => return Err(LocalExecutionError::InvalidMarkName),
        };
        let cursor = editor.cursor();
        editor.set_mark(name, cursor);
        Ok(())
    }
}

/// `:noh[lsearch]`; there is no search highlighting to clear
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoHighlight;

impl LocalCommand for NoHighlight {
    fn name(&self) -> &str {
        "nohlsearch"
    }

    fn execute(&self, _editor: &mut dyn Editor) -> Result<(), LocalExecutionError> {
        Ok(())
    }
}

/// A command the grammar recognizes but only Neovim can run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub name: String,
    pub text: String,
}

impl LocalCommand for ExternalCommand {
    fn name(&self) -> &str {
        &self.name
    }

    fn external_capable(&self) -> bool {
        true
    }

    fn execute(&self, _editor: &mut dyn Editor) -> Result<(), LocalExecutionError> {
        Err(LocalExecutionError::RequiresDelegation(self.name.clone()))
    }
}

// ============================================================================
// Built-in parser
// ============================================================================

/// How a recognized command name is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    DeleteMarks,
    SetMark,
    NoHighlight,
    External,
}

/// Command names as `(full name, shortest abbreviation length, kind)`
const COMMANDS: &[(&str, usize, Kind)] = &[
    ("write", 1, Kind::External),
    ("wq", 2, Kind::External),
    ("xit", 1, Kind::External),
    ("substitute", 1, Kind::External),
    ("global", 1, Kind::External),
    ("vglobal", 1, Kind::External),
    ("normal", 4, Kind::External),
    ("sort", 3, Kind::External),
    ("delmarks", 4, Kind::DeleteMarks),
    ("mark", 2, Kind::SetMark),
    ("k", 1, Kind::SetMark),
    ("nohlsearch", 3, Kind::NoHighlight),
];

fn lookup(name: &str) -> Option<(&'static str, Kind)> {
    COMMANDS
        .iter()
        .find(|(full, min_len, _)| name.len() >= *min_len && full.starts_with(name))
        .map(|(full, _, kind)| (*full, *kind))
}

/// Parser for the built-in command subset
#[derive(Debug, Clone)]
pub struct BuiltinParser {
    line_regex: Regex,
    range_regex: Regex,
    command_regex: Regex,
}

impl BuiltinParser {
    /// Create a parser with compiled regex patterns
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // 42, . or $
            line_regex: Regex::new(r"^(?:(?P<number>\d+)|(?P<current>\.)|(?P<last>\$))$")?,

            // %s/a/b/, 1,3d, 'a,'bsort, .+1, /pat/d
            range_regex: Regex::new(r"^(?:%|[\d.$'+\-,;/?])")?,

            // name, optional bang, arguments
            command_regex: Regex::new(r"^(?P<name>[A-Za-z]+)(?P<bang>!)?(?P<args>.*)$")?,
        })
    }

    fn parse_named(&self, input: &str) -> Result<ParsedCommand, ParseError> {
        let unknown = || ParseError::UnknownCommand(input.to_string());

        let captures = self.command_regex.captures(input).ok_or_else(unknown)?;
        let name = captures.name("name").map_or("", |m| m.as_str());
        let bang = captures.name("bang").is_some();
        let args = captures.name("args").map_or("", |m| m.as_str());

        // `:ka` is `:k a`; `:kx` otherwise reads as an unknown command name
        if let Some(mark) = name.strip_prefix('k').filter(|rest| rest.len() == 1) {
            if !bang && args.trim().is_empty() {
                return Ok(ParsedCommand::Command(Box::new(SetMark {
                    arguments: mark.to_string(),
                })));
            }
        }

        let (full, kind) = lookup(name).ok_or_else(unknown)?;
        let command: Box<dyn LocalCommand> = match kind {
            Kind::External => Box::new(ExternalCommand {
                name: full.to_string(),
                text: input.to_string(),
            }),
            Kind::DeleteMarks => Box::new(DeleteMarks {
                all: bang,
                arguments: args.trim().to_string(),
            }),
            Kind::SetMark if !bang => Box::new(SetMark {
                arguments: args.trim().to_string(),
            }),
            Kind::NoHighlight if !bang && args.trim().is_empty() => Box::new(NoHighlight),
            Kind::SetMark | Kind::NoHighlight => {
                let trailing = if bang { format!("!{args}") } else { args.to_string() };
                return Err(ParseError::TrailingCharacters(trailing.trim().to_string()));
            }
        };
        Ok(ParsedCommand::Command(command))
    }
}

impl Default for BuiltinParser {
    fn default() -> Self {
        Self::new().expect("Failed to compile regex patterns")
    }
}

impl CommandParser for BuiltinParser {
    fn parse(&self, input: &str) -> Result<ParsedCommand, ParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(ParsedCommand::Empty);
        }

        if let Some(captures) = self.line_regex.captures(input) {
            let target = if let Some(number) = captures.name("number") {
                // Digits only; overflow means "past the end" and clamps
                LineTarget::Number(number.as_str().parse().unwrap_or(usize::MAX))
            } else if captures.name("current").is_some() {
                LineTarget::Current
            } else {
                LineTarget::Last
            };
            return Ok(ParsedCommand::Command(Box::new(GotoLine { target })));
        }

        if self.range_regex.is_match(input) {
            return Ok(ParsedCommand::Command(Box::new(ExternalCommand {
                name: "range".to_string(),
                text: input.to_string(),
            })));
        }

        self.parse_named(input)
    }
}
