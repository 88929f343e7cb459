//! # Process/IPC Session Module / 进程与 IPC 会话模块
//!
//! Owns one child process's full lifecycle: the deterministic command line,
//! the duplex channel endpoint opened before launch, the accept loop that
//! keeps admitting peers until cancelled, typed message dispatch into the
//! result tracker, and the completion checks after exit.
//!
//! 拥有单个子进程的完整生命周期：确定性的命令行、
//! 启动前打开的双工通道端点、在取消前持续接纳对端的接受循环、
//! 向结果跟踪器的类型化消息分发，以及退出后的完成性检查。

use crate::core::models::{TestModule, exit_code};
use crate::core::protocol::{
    CommandLineOptionsMessage, HandshakeMessage, ProtocolError, SessionMessage,
    codec, handshake_property, negotiate_version, server_handshake,
};
use crate::core::tracker::{ResultTracker, SessionMode};
use crate::infra::channel::{ChannelName, ChannelServer};
use crate::infra::process::{CapturedOutput, spawn_and_capture};
use crate::reporting::TestReporter;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

/// How long disposal waits for the accept loop and its connections to wind
/// down after cancellation.
const CONNECTION_LOOP_SHUTDOWN: Duration = Duration::from_secs(30);

/// Per-session launch options shared by every module of the run.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub mode: SessionMode,
    pub results_directory: Option<PathBuf>,
    pub diagnostics_directory: Option<PathBuf>,
    /// Unmatched command-line tokens forwarded to every module verbatim.
    pub pass_through: Vec<String>,
}

/// What one finished session hands back to the queue.
#[derive(Debug)]
pub struct SessionOutcome {
    pub exit_code: i32,
    /// Only filled in help mode, when the module answered with its option
    /// list.
    pub help_options: Option<CommandLineOptionsMessage>,
}

/// Per-connection protocol state. A connection becomes `Negotiated` the
/// moment the handshake reply is sent and `Active` on its first dispatched
/// message; `Rejected` connections are closed without further reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    AwaitingHandshake,
    Negotiated,
    Active,
    Rejected,
}

/// One child process plus its channel endpoint and tracker.
pub struct ModuleSession {
    module: TestModule,
    options: SessionOptions,
    reporter: Arc<TestReporter>,
    channel_name: ChannelName,
}

impl ModuleSession {
    pub fn new(module: TestModule, options: SessionOptions, reporter: Arc<TestReporter>) -> Self {
        Self {
            module,
            options,
            reporter,
            channel_name: ChannelName::fresh(),
        }
    }

    /// The endpoint this session will listen on. Fixed at construction so a
    /// caller can observe it before the child launches.
    pub fn channel_name(&self) -> &ChannelName {
        &self.channel_name
    }

    /// Runs the module to completion and returns its outcome. Never panics
    /// on misbehaving peers; a protocol violation tears down this session
    /// and poisons this module's exit code only.
    pub async fn run(self) -> SessionOutcome {
        let display_name = self.module.display_name();

        // A run command that points into the filesystem must exist before
        // we bind anything. Bare command names resolve via PATH at spawn.
        if self.module.run_command.contains(std::path::MAIN_SEPARATOR)
            && !std::path::Path::new(&self.module.run_command).exists()
        {
            tracing::error!(module = %display_name, "run command not found");
            self.reporter.handshake_failure(
                &display_name,
                self.module.target_framework.as_deref(),
                exit_code::GENERIC_FAILURE,
                &CapturedOutput::default(),
            );
            return SessionOutcome {
                exit_code: exit_code::GENERIC_FAILURE,
                help_options: None,
            };
        }

        let tracker = Arc::new(ResultTracker::new(
            self.module.clone(),
            self.options.mode,
            Arc::clone(&self.reporter),
        ));

        // The endpoint must listen before the child starts, so even the
        // earliest connection attempt finds it.
        let server = match ChannelServer::bind(self.channel_name.clone()) {
            Ok(server) => Arc::new(server),
            Err(err) => {
                tracing::error!(module = %display_name, "failed to bind channel endpoint: {err}");
                return SessionOutcome {
                    exit_code: exit_code::GENERIC_FAILURE,
                    help_options: None,
                };
            }
        };
        let endpoint_argument = server.name().as_endpoint_argument();

        let cancel = CancellationToken::new();
        let violation = Arc::new(AtomicBool::new(false));
        let cleanup_failure = Arc::new(AtomicBool::new(false));

        let accept_loop = tokio::spawn(accept_loop(
            Arc::clone(&server),
            Arc::clone(&tracker),
            cancel.clone(),
            Arc::clone(&violation),
            Arc::clone(&cleanup_failure),
        ));

        let command = self.build_command(&endpoint_argument);
        tracing::debug!(
            module = %self.module.display_name_with_frameworks(),
            "launching: {:?}",
            command.as_std()
        );

        let (status, output) = spawn_and_capture(command).await;

        // The child is gone and both streams are drained; no new peer can
        // be meaningful anymore.
        cancel.cancel();
        match tokio::time::timeout(CONNECTION_LOOP_SHUTDOWN, accept_loop).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::warn!(module = %display_name, "connection loop task failed: {err}");
            }
            Err(_) => {
                tracing::warn!(module = %display_name, "connection loop did not stop in time");
            }
        }
        if let Err(err) = server.unlink() {
            cleanup_failure.store(true, Ordering::SeqCst);
            tracing::error!(module = %display_name, "failed to remove channel endpoint: {err}");
        }

        let mut code = match status {
            Ok(status) => status.code().unwrap_or(exit_code::GENERIC_FAILURE),
            Err(err) => {
                tracing::error!(module = %display_name, "failed to launch module: {err}");
                exit_code::GENERIC_FAILURE
            }
        };

        if violation.load(Ordering::SeqCst) && code == exit_code::SUCCESS {
            code = exit_code::GENERIC_FAILURE;
        }

        // Every observed sessionUid must have paired start/end counts once
        // the process is gone.
        if tracker.has_mismatched_sessions() {
            self.reporter.session_bookkeeping_violation(&display_name);
            if code == exit_code::SUCCESS {
                code = exit_code::GENERIC_FAILURE;
            }
        }

        match tracker.handshake_info() {
            Some(info) => {
                self.reporter
                    .module_run_completed(&info.execution_id, code, &output);
            }
            None => {
                self.reporter.handshake_failure(
                    &display_name,
                    self.module.target_framework.as_deref(),
                    code,
                    &output,
                );
                // A module that never handshook ran zero tests; its exit
                // code alone cannot make that a success.
                if self.options.mode != SessionMode::Help && code == exit_code::SUCCESS {
                    code = exit_code::GENERIC_FAILURE;
                }
            }
        }

        // A failure while releasing connections downgrades an otherwise
        // clean exit.
        if cleanup_failure.load(Ordering::SeqCst) && code == exit_code::SUCCESS {
            code = exit_code::GENERIC_FAILURE;
        }

        SessionOutcome {
            exit_code: code,
            help_options: tracker.take_help_options(),
        }
    }

    /// Builds the child command with its deterministic argument order: the
    /// module's own arguments verbatim, then mode flags, then directories,
    /// then pass-through tokens, then the trailing server/channel triple.
    /// Some runners only accept certain flags positionally, so this order
    /// is fixed.
    fn build_command(&self, endpoint_argument: &str) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.module.run_command);
        cmd.args(build_arguments(&self.module, &self.options, endpoint_argument));

        if let Some(dir) = &self.module.working_directory {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.module.environment {
            let expanded = shellexpand::env(value)
                .map(|expanded| expanded.into_owned())
                .unwrap_or_else(|_| value.clone());
            cmd.env(key, expanded);
        }
        cmd
    }
}

/// The argument vector after the run command, in its fixed order.
pub fn build_arguments(
    module: &TestModule,
    options: &SessionOptions,
    endpoint_argument: &str,
) -> Vec<String> {
    let mut args = module.run_arguments.clone();

    match options.mode {
        SessionMode::Run => {}
        SessionMode::Discovery => args.push("--list-tests".to_string()),
        SessionMode::Help => args.push("--help".to_string()),
    }

    if let Some(dir) = &options.results_directory {
        args.push("--results-directory".to_string());
        args.push(dir.display().to_string());
    }
    if let Some(dir) = &options.diagnostics_directory {
        args.push("--diagnostic-output-directory".to_string());
        args.push(dir.display().to_string());
    }

    args.extend(options.pass_through.iter().cloned());

    args.push("--server".to_string());
    args.push("testingplatform".to_string());
    args.push("--client-channel".to_string());
    args.push(endpoint_argument.to_string());
    args
}

/// Keeps accepting peer connections until cancelled. A module may connect
/// more than once: a controller process plus the test host it launches.
async fn accept_loop(
    server: Arc<ChannelServer>,
    tracker: Arc<ResultTracker>,
    cancel: CancellationToken,
    violation: Arc<AtomicBool>,
    cleanup_failure: Arc<AtomicBool>,
) {
    let mut connections = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    connections.push(tokio::spawn(connection_loop(
                        stream,
                        Arc::clone(&tracker),
                        cancel.clone(),
                        Arc::clone(&violation),
                        Arc::clone(&cleanup_failure),
                    )));
                }
                Err(err) => {
                    tracing::error!("channel accept failed: {err}");
                    break;
                }
            }
        }
    }

    // All accepted connections are released before the session finishes.
    for result in futures::future::join_all(connections).await {
        if let Err(err) = result {
            tracing::warn!("failed to join connection task: {err}");
        }
    }
}

/// Reads and dispatches messages of one accepted connection until the peer
/// closes, the session is cancelled, or a protocol violation kills it.
async fn connection_loop(
    stream: UnixStream,
    tracker: Arc<ResultTracker>,
    cancel: CancellationToken,
    violation: Arc<AtomicBool>,
    cleanup_failure: Arc<AtomicBool>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut state = ConnectionState::AwaitingHandshake;
    let mut peer_handshake: Option<HandshakeMessage> = None;

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = codec::read_message(&mut read_half) => message,
        };

        let message = match message {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(err) => {
                // A frame we cannot decode leaves the channel state
                // unknowable; treat it like any other protocol violation.
                fatal_violation(
                    &tracker,
                    peer_handshake.as_ref(),
                    &format!("undecodable frame: {err}"),
                    &violation,
                    &cancel,
                );
                break;
            }
        };

        let reply = match handle_message(&tracker, &mut state, &mut peer_handshake, message) {
            Ok(reply) => reply,
            Err(protocol_error) => {
                fatal_violation(
                    &tracker,
                    peer_handshake.as_ref(),
                    &protocol_error.to_string(),
                    &violation,
                    &cancel,
                );
                break;
            }
        };

        if let Err(err) = codec::write_message(&mut write_half, &reply).await {
            tracing::warn!("failed to answer module message: {err}");
            break;
        }

        // An incompatible peer got its empty-version reply; nothing it
        // sends afterwards can mean anything.
        if state == ConnectionState::Rejected {
            break;
        }
    }

    if let Err(err) = write_half.shutdown().await {
        // A peer that already hung up is a closed connection, not a close
        // failure.
        if err.kind() == std::io::ErrorKind::NotConnected {
            return;
        }
        cleanup_failure.store(true, Ordering::SeqCst);
        match &peer_handshake {
            Some(handshake) => tracing::error!(
                module = %tracker.module().display_name(),
                "failed to close connection (handshake context below): {err}\n{}",
                handshake.describe()
            ),
            None => tracing::error!(
                module = %tracker.module().display_name(),
                "failed to close connection before any handshake: {err}"
            ),
        }
    }
}

/// Logs a violation with full detail, then makes it fatal to the session:
/// the flag poisons the module's exit code and the token tears the whole
/// channel down so the unrecoverable stream is never read again.
fn fatal_violation(
    tracker: &ResultTracker,
    peer_handshake: Option<&HandshakeMessage>,
    detail: &str,
    violation: &AtomicBool,
    cancel: &CancellationToken,
) {
    match peer_handshake {
        Some(handshake) => tracing::error!(
            module = %tracker.module().display_name(),
            "protocol violation: {detail}\nhandshake context:\n{}",
            handshake.describe()
        ),
        None => tracing::error!(
            module = %tracker.module().display_name(),
            "protocol violation before handshake: {detail}"
        ),
    }
    violation.store(true, Ordering::SeqCst);
    cancel.cancel();
}

/// The per-connection state machine plus dispatch into the tracker.
/// Returns the reply the peer gets for this request.
fn handle_message(
    tracker: &ResultTracker,
    state: &mut ConnectionState,
    peer_handshake: &mut Option<HandshakeMessage>,
    message: SessionMessage,
) -> Result<SessionMessage, ProtocolError> {
    // Unknown kinds are skipped wherever they appear; that is the whole
    // point of the serializer-id framing.
    if let SessionMessage::Unknown { serializer_id } = message {
        tracing::debug!("skipping message with unsupported serializer id {serializer_id}");
        return Ok(SessionMessage::Void);
    }

    match (*state, message) {
        (ConnectionState::AwaitingHandshake, SessionMessage::Handshake(handshake)) => {
            let advertised = handshake
                .get(handshake_property::SUPPORTED_PROTOCOL_VERSIONS)
                .unwrap_or_default()
                .to_string();
            let negotiated = negotiate_version(&advertised);
            tracker.on_handshake(&handshake, negotiated)?;
            *peer_handshake = Some(handshake);
            *state = match negotiated {
                Some(_) => ConnectionState::Negotiated,
                None => ConnectionState::Rejected,
            };
            Ok(SessionMessage::Handshake(server_handshake(
                negotiated.unwrap_or(""),
            )))
        }

        (ConnectionState::AwaitingHandshake, other) => Err(ProtocolError::MessageBeforeHandshake {
            kind: other.kind_name(),
        }),

        (
            ConnectionState::Negotiated | ConnectionState::Active,
            SessionMessage::Handshake(_),
        ) => Err(ProtocolError::DuplicateHandshake),

        (ConnectionState::Negotiated | ConnectionState::Active, message) => {
            *state = ConnectionState::Active;
            match &message {
                SessionMessage::CommandLineOptions(options) => {
                    tracker.on_command_line_options(options)?
                }
                SessionMessage::DiscoveredTests(discovered) => {
                    tracker.on_discovered_tests(discovered)?
                }
                SessionMessage::TestResults(results) => tracker.on_test_results(results)?,
                SessionMessage::FileArtifacts(artifacts) => {
                    tracker.on_file_artifacts(artifacts)?
                }
                SessionMessage::SessionEvent(event) => tracker.on_session_event(event)?,
                SessionMessage::Void => {}
                SessionMessage::Handshake(_) | SessionMessage::Unknown { .. } => unreachable!(),
            }
            Ok(SessionMessage::Void)
        }

        (ConnectionState::Rejected, _) => {
            // The loop closes rejected connections right after the reply;
            // nothing should ever be dispatched here.
            Err(ProtocolError::MessageBeforeHandshake { kind: "post-rejection" })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn module() -> TestModule {
        TestModule {
            run_command: "testhost".to_string(),
            run_arguments: vec!["exec".to_string(), "tests.dll".to_string()],
            working_directory: None,
            environment: BTreeMap::new(),
            target_framework: Some("net9.0".to_string()),
            architecture: None,
            target_path: None,
            project_path: None,
            supports_session_protocol: true,
        }
    }

    #[test]
    fn argument_order_is_deterministic() {
        let options = SessionOptions {
            mode: SessionMode::Discovery,
            results_directory: Some(PathBuf::from("/tmp/results")),
            diagnostics_directory: Some(PathBuf::from("/tmp/diag")),
            pass_through: vec!["--filter".to_string(), "slow".to_string()],
        };
        let args = build_arguments(&module(), &options, "/tmp/chan.sock");
        assert_eq!(
            args,
            vec![
                "exec",
                "tests.dll",
                "--list-tests",
                "--results-directory",
                "/tmp/results",
                "--diagnostic-output-directory",
                "/tmp/diag",
                "--filter",
                "slow",
                "--server",
                "testingplatform",
                "--client-channel",
                "/tmp/chan.sock",
            ]
        );
    }

    #[test]
    fn run_mode_adds_no_mode_flag() {
        let args = build_arguments(&module(), &SessionOptions::default(), "chan");
        assert!(!args.contains(&"--list-tests".to_string()));
        assert!(!args.contains(&"--help".to_string()));
        assert_eq!(args[0], "exec");
        assert_eq!(args[args.len() - 2], "--client-channel");
    }
}
