//! Command-line execution
//!
//! - **Position**: editor/Neovim coordinate translation
//! - **Editor**: the editor collaborator and state snapshots
//! - **Parser**: local grammar and three-way classification
//! - **Router**: local execution or delegation to Neovim

pub mod editor;
pub mod parser;
pub mod position;
pub mod router;

pub use editor::{Editor, EditorSnapshot, InMemoryEditor};
pub use parser::BuiltinParser;
pub use router::{CommandRouter, DelegationStatus, NvimDelegate, RouteOutcome, run_cmd_line};
