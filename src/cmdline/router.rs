//! Execution router
//!
//! Every non-empty command runs exactly once: locally when the built-in
//! grammar can execute it, in Neovim otherwise. Neovim is the last resort,
//! so a failed delegation is logged and reported in the outcome but never
//! returned as an error.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cmdline::editor::{CommandRequest, Editor};
use crate::cmdline::parser::{
    Classification, CommandParser, DelegationReason, LocalExecutionError, classify,
};
use crate::nvim::{NvimConfig, ProcessSession, SessionError, SessionReport};
use crate::rpc::RpcError;

/// Runs a command outside the local grammar
#[async_trait]
pub trait Delegate: Send + Sync {
    async fn delegate(
        &self,
        request: &CommandRequest,
        editor: &mut dyn Editor,
    ) -> Result<SessionReport, SessionError>;
}

/// Delegates to a fresh embedded Neovim per command
#[derive(Debug, Clone)]
pub struct NvimDelegate {
    config: NvimConfig,
}

impl NvimDelegate {
    pub fn new(config: NvimConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Delegate for NvimDelegate {
    async fn delegate(
        &self,
        request: &CommandRequest,
        editor: &mut dyn Editor,
    ) -> Result<SessionReport, SessionError> {
        ProcessSession::from_config(&self.config)
            .run(request, editor)
            .await
    }
}

/// How a delegated execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationStatus {
    Completed(SessionReport),
    /// The session failed; the editor keeps whatever was applied before
    Failed(String),
}

/// Terminal state of one routed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Blank input or a command that parses to nothing
    Empty,
    LocalExecuted,
    DelegatedExecuted {
        reason: DelegationReason,
        status: DelegationStatus,
    },
}

/// Errors the user should see
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("{0}")]
    LocalExecution(#[from] LocalExecutionError),
}

/// Routes commands between the local grammar and a delegate
pub struct CommandRouter<P, D> {
    parser: P,
    delegate: D,
}

impl<P: CommandParser, D: Delegate> CommandRouter<P, D> {
    pub fn new(parser: P, delegate: D) -> Self {
        Self { parser, delegate }
    }

    /// Route one command against `editor`
    pub async fn route(
        &self,
        input: &str,
        editor: &mut dyn Editor,
    ) -> Result<RouteOutcome, RouterError> {
        if input.is_empty() {
            return Ok(RouteOutcome::Empty);
        }

        let reason = match classify(&self.parser, input) {
            Classification::Empty => {
                debug!("Command {:?} is empty", input);
                return Ok(RouteOutcome::Empty);
            }
            Classification::Local(command) => {
                debug!("Executing {} locally", command.name());
                command.execute(editor)?;
                return Ok(RouteOutcome::LocalExecuted);
            }
            Classification::NeedsDelegation(reason) => reason,
        };

        match &reason {
            DelegationReason::ParseFailed(e) => {
                debug!("Local parse failed ({}), delegating {:?}", e, input)
            }
            DelegationReason::ExternalCapable(name) => {
                debug!("{} needs Neovim, delegating {:?}", name, input)
            }
        }

        let request = CommandRequest::new(input, editor.snapshot());
        let status = match self.delegate.delegate(&request, editor).await {
            Ok(report) => {
                info!("Delegated command {:?} completed", input);
                DelegationStatus::Completed(report)
            }
            Err(e) if e.rpc_error().is_some_and(RpcError::is_channel_closed) => {
                warn!("Neovim went away while running {:?}: {}", input, e);
                DelegationStatus::Failed(e.to_string())
            }
            Err(e) => {
                warn!("Delegated command {:?} failed: {}", input, e);
                DelegationStatus::Failed(e.to_string())
            }
        };

        Ok(RouteOutcome::DelegatedExecuted { reason, status })
    }
}

/// Route `input` and put a local failure on the status line
pub async fn run_cmd_line<P: CommandParser, D: Delegate>(
    router: &CommandRouter<P, D>,
    input: &str,
    editor: &mut dyn Editor,
) -> Result<RouteOutcome, RouterError> {
    let result = router.route(input, editor).await;
    if let Err(e) = &result {
        editor.set_status_message(e.to_string());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmdline::editor::{EditorSnapshot, InMemoryEditor, MarkSet};
    use crate::cmdline::parser::{BuiltinParser, ParseError};
    use crate::cmdline::position::Position;
    use crate::io::ProcessError;
    use crate::nvim::testing::{FakeNvim, FakeNvimConfig, FakeProcessFlags, FakeProcessManager};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[cfg(feature = "test-logging")]
    crate::setup_test_logging!();

    /// Runs each delegation in a fake Neovim and remembers every session
    struct FakeNvimDelegate {
        config: FakeNvimConfig,
        fail_spawn: bool,
        sessions: Mutex<Vec<(Arc<FakeProcessFlags>, FakeNvim)>>,
    }

    impl FakeNvimDelegate {
        fn new(config: FakeNvimConfig) -> Self {
            Self {
                config,
                fail_spawn: false,
                sessions: Mutex::new(Vec::new()),
            }
        }

        fn sessions(&self) -> Vec<(Arc<FakeProcessFlags>, FakeNvim)> {
            self.sessions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Delegate for FakeNvimDelegate {
        async fn delegate(
            &self,
            request: &CommandRequest,
            editor: &mut dyn Editor,
        ) -> Result<SessionReport, SessionError> {
            let manager = if self.fail_spawn {
                FakeProcessManager::failing_spawn()
            } else {
                FakeProcessManager::new(self.config.clone())
            };
            self.sessions
                .lock()
                .unwrap()
                .push((manager.flags(), manager.nvim()));
            ProcessSession::new(manager, Duration::from_secs(5))
                .run(request, editor)
                .await
        }
    }

    fn router(delegate: FakeNvimDelegate) -> CommandRouter<BuiltinParser, FakeNvimDelegate> {
        CommandRouter::new(BuiltinParser::default(), delegate)
    }

    fn editor(lines: &[&str]) -> InMemoryEditor {
        InMemoryEditor::new(EditorSnapshot {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            cursor: Position::new(0, 0),
            selection_start: Position::new(0, 0),
            marks: MarkSet::new(),
        })
    }

    #[tokio::test]
    async fn test_write_is_delegated() {
        let router = router(FakeNvimDelegate::new(FakeNvimConfig::default()));
        let mut editor = editor(&["a", "b"]);

        let outcome = router.route("w", &mut editor).await.unwrap();

        let RouteOutcome::DelegatedExecuted { reason, status } = outcome else {
            panic!("expected delegation, got {outcome:?}");
        };
        assert_eq!(reason, DelegationReason::ExternalCapable("write".to_string()));
        let DelegationStatus::Completed(report) = status else {
            panic!("expected completion, got {status:?}");
        };
        assert_eq!(report.cursor, Some(Position::new(0, 0)));
        assert_eq!(editor.lines(), vec!["a", "b"]);
        assert_eq!(editor.cursor(), Position::new(0, 0));

        let sessions = router.delegate.sessions();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].0.stopped());
        assert_eq!(sessions[0].1.keys(), vec![":", "w", "<CR>"]);
    }

    #[tokio::test]
    async fn test_empty_input_does_nothing() {
        let router = router(FakeNvimDelegate::new(FakeNvimConfig::default()));
        let mut editor = editor(&["a"]);

        assert_eq!(router.route("", &mut editor).await, Ok(RouteOutcome::Empty));
        assert_eq!(router.route("  ", &mut editor).await, Ok(RouteOutcome::Empty));

        assert!(router.delegate.sessions().is_empty());
        assert_eq!(editor.lines(), vec!["a"]);
        assert_eq!(editor.status(), None);
    }

    #[tokio::test]
    async fn test_unparseable_input_falls_back_and_swallows_failure() {
        let router = router(FakeNvimDelegate::new(FakeNvimConfig {
            failing_method: Some("nvim_input".to_string()),
            ..Default::default()
        }));
        let mut editor = editor(&["a", "b"]);

        let outcome = router.route(":::", &mut editor).await.unwrap();

        let RouteOutcome::DelegatedExecuted { reason, status } = outcome else {
            panic!("expected delegation, got {outcome:?}");
        };
        assert!(matches!(
            reason,
            DelegationReason::ParseFailed(ParseError::UnknownCommand(_))
        ));
        assert!(matches!(status, DelegationStatus::Failed(_)));
        assert_eq!(editor.lines(), vec!["a", "b"]);
        assert_eq!(editor.status(), None);

        let sessions = router.delegate.sessions();
        assert!(sessions[0].0.stopped());
    }

    #[tokio::test]
    async fn test_local_commands_never_spawn() {
        let router = router(FakeNvimDelegate::new(FakeNvimConfig::default()));
        let mut editor = editor(&["a", "  b", "c"]);
        editor.set_mark('a', Position::new(0, 0));

        for input in ["2", "$", "noh", "delm a", "mark b"] {
            let outcome = router.route(input, &mut editor).await.unwrap();
            assert_eq!(outcome, RouteOutcome::LocalExecuted, "{input}");
        }

        assert!(router.delegate.sessions().is_empty());
        assert_eq!(editor.cursor(), Position::new(2, 0));
        assert_eq!(editor.marks().get('a'), None);
        assert_eq!(editor.marks().get('b'), Some(Position::new(2, 0)));
    }

    #[tokio::test]
    async fn test_local_failure_goes_to_status_line() {
        let router = router(FakeNvimDelegate::new(FakeNvimConfig::default()));
        let mut editor = editor(&["a"]);

        let result = run_cmd_line(&router, "delm", &mut editor).await;

        assert_eq!(
            result,
            Err(RouterError::LocalExecution(
                LocalExecutionError::ArgumentRequired
            ))
        );
        assert_eq!(editor.status(), Some("E471: Argument required"));
        assert!(router.delegate.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_nvim_crash_is_swallowed() {
        let router = router(FakeNvimDelegate::new(FakeNvimConfig {
            crash_on: Some("nvim_get_mode".to_string()),
            ..Default::default()
        }));
        let mut editor = editor(&["a"]);

        let outcome = run_cmd_line(&router, "w", &mut editor).await.unwrap();

        let RouteOutcome::DelegatedExecuted { status, .. } = outcome else {
            panic!("expected delegation, got {outcome:?}");
        };
        let DelegationStatus::Failed(message) = status else {
            panic!("expected failure");
        };
        assert!(message.contains(&RpcError::ChannelClosed.to_string()));
        assert_eq!(editor.status(), None);
        assert!(router.delegate.sessions()[0].0.stopped());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_swallowed() {
        let mut delegate = FakeNvimDelegate::new(FakeNvimConfig::default());
        delegate.fail_spawn = true;
        let router = router(delegate);
        let mut editor = editor(&["a"]);

        let outcome = run_cmd_line(&router, "s/a/b/", &mut editor).await.unwrap();

        let RouteOutcome::DelegatedExecuted { status, .. } = outcome else {
            panic!("expected delegation, got {outcome:?}");
        };
        let DelegationStatus::Failed(message) = status else {
            panic!("expected failure");
        };
        assert!(message.contains(&ProcessError::NotFound("nvim".to_string()).to_string()));
        assert_eq!(editor.lines(), vec!["a"]);
        assert_eq!(editor.status(), None);
    }

    #[tokio::test]
    async fn test_delegation_sees_current_editor_state() {
        let router = router(FakeNvimDelegate::new(FakeNvimConfig {
            lines_after_execute: Some(vec!["b".to_string()]),
            ..Default::default()
        }));
        let mut editor = editor(&["a"]);
        editor.set_mark('m', Position::new(0, 0));

        router.route("g/a/d", &mut editor).await.unwrap();

        let sessions = router.delegate.sessions();
        assert_eq!(sessions[0].1.position("'m").map(|p| p.line), Some(1));
        assert_eq!(editor.lines(), vec!["b"]);
    }
}
