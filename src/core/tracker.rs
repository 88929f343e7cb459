//! # Result Tracker Module / 结果跟踪模块
//!
//! Per-module accumulator sitting between the IPC dispatch and the
//! reporter. It validates handshake consistency, classifies outcome bytes,
//! and keeps the per-session start/end ledger whose mismatch turns an
//! otherwise green process exit into a run failure.
//!
//! 位于 IPC 分发与报告器之间的按模块累加器。
//! 它校验握手一致性、分类结果字节，并维护每会话的开始/结束账本，
//! 其不匹配会将本来正常的进程退出变为运行失败。

use crate::core::models::TestModule;
use crate::core::protocol::{
    CommandLineOptionsMessage, DiscoveredTestsMessage, FileArtifactsMessage, HandshakeMessage,
    ProtocolError, SessionEventMessage, TestResultsMessage, handshake_property,
    outcome_from_state,
};
use crate::reporting::TestReporter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the session was started for. Help mode changes which messages are
/// legal; discovery mode changes what gets counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    Run,
    Discovery,
    Help,
}

/// Identity a module proves during its first handshake. Later handshakes
/// (more connections, retries) must agree with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInfo {
    pub target_framework: String,
    pub architecture: String,
    pub execution_id: String,
}

#[derive(Debug, Default)]
struct SessionCounters {
    started: u32,
    ended: u32,
}

#[derive(Default)]
struct TrackerState {
    handshake: Option<HandshakeInfo>,
    sessions: HashMap<String, SessionCounters>,
    help_options: Option<CommandLineOptionsMessage>,
}

/// The per-module state machine fed by every inbound message.
pub struct ResultTracker {
    module: TestModule,
    mode: SessionMode,
    reporter: Arc<TestReporter>,
    state: Mutex<TrackerState>,
}

/// .NET-style duration ticks are 100 ns each.
fn duration_from_ticks(ticks: Option<i64>) -> Duration {
    Duration::from_nanos(ticks.unwrap_or(0).max(0) as u64 * 100)
}

impl ResultTracker {
    pub fn new(module: TestModule, mode: SessionMode, reporter: Arc<TestReporter>) -> Self {
        Self {
            module,
            mode,
            reporter,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Handles a handshake that already went through version negotiation.
    /// `negotiated` is `None` when the peer's advertised versions were
    /// incompatible; that degrades the module to a reported handshake
    /// failure instead of crashing anything.
    pub fn on_handshake(
        &self,
        message: &HandshakeMessage,
        negotiated: Option<&str>,
    ) -> Result<(), ProtocolError> {
        if message
            .get(handshake_property::SUPPORTED_PROTOCOL_VERSIONS)
            .is_none()
        {
            return Err(ProtocolError::MissingVersionList);
        }

        if negotiated.is_none() {
            self.reporter.handshake_version_rejected(
                &self.module.display_name(),
                message
                    .get(handshake_property::SUPPORTED_PROTOCOL_VERSIONS)
                    .unwrap_or_default(),
            );
            return Ok(());
        }

        let execution_id = message
            .get(handshake_property::EXECUTION_ID)
            .unwrap_or_default()
            .to_string();
        let architecture = message
            .get(handshake_property::ARCHITECTURE)
            .unwrap_or_default()
            .to_lowercase();
        let target_framework = message
            .get(handshake_property::FRAMEWORK)
            .unwrap_or_default()
            .to_string();

        let current = HandshakeInfo {
            target_framework,
            architecture,
            execution_id,
        };

        {
            let mut state = self.state.lock().unwrap();
            match &state.handshake {
                None => state.handshake = Some(current.clone()),
                Some(previous) => {
                    // A module may handshake once per connection; the
                    // identity must stay stable across all of them.
                    if previous.execution_id != current.execution_id {
                        return Err(ProtocolError::InconsistentHandshake {
                            field: "execution id",
                            previous: previous.execution_id.clone(),
                            current: current.execution_id,
                        });
                    }
                    if previous.architecture != current.architecture {
                        return Err(ProtocolError::InconsistentHandshake {
                            field: "architecture",
                            previous: previous.architecture.clone(),
                            current: current.architecture,
                        });
                    }
                    if previous.target_framework != current.target_framework {
                        return Err(ProtocolError::InconsistentHandshake {
                            field: "target framework",
                            previous: previous.target_framework.clone(),
                            current: current.target_framework,
                        });
                    }
                }
            }
        }

        // Only the test host itself starts a visible run; a controller
        // process handshaking as well must not double-count retries.
        if message.get(handshake_property::HOST_TYPE) == Some("TestHost") {
            let instance_id = message
                .get(handshake_property::INSTANCE_ID)
                .unwrap_or_default();
            self.reporter.module_run_started(
                &self.module.display_name(),
                &current.target_framework,
                &current.architecture,
                &current.execution_id,
                instance_id,
            );
        }

        tracing::debug!(
            module = %self.module.display_name(),
            "handshake accepted:\n{}",
            message.describe()
        );
        Ok(())
    }

    pub fn on_discovered_tests(
        &self,
        message: &DiscoveredTestsMessage,
    ) -> Result<(), ProtocolError> {
        if self.mode == SessionMode::Help {
            return Err(ProtocolError::DiscoveryInHelpMode);
        }
        self.require_handshake("DiscoveredTests")?;

        if self.mode == SessionMode::Discovery {
            for test in &message.tests {
                self.reporter
                    .test_discovered(&message.execution_id, &test.display_name, &test.uid);
            }
        }
        Ok(())
    }

    pub fn on_test_results(&self, message: &TestResultsMessage) -> Result<(), ProtocolError> {
        if self.mode == SessionMode::Help {
            // Help sessions produce no results worth counting.
            return Ok(());
        }
        self.require_handshake("TestResults")?;

        for result in &message.successful {
            let outcome = outcome_from_state(result.state)?;
            self.reporter.test_completed(
                &message.execution_id,
                &result.uid,
                &result.display_name,
                outcome,
                duration_from_ticks(result.duration_ticks),
                result.reason.as_deref(),
                None,
                None,
                result.standard_output.as_deref(),
                result.error_output.as_deref(),
            );
        }

        for result in &message.failed {
            let outcome = outcome_from_state(result.state)?;
            self.reporter.test_completed(
                &message.execution_id,
                &result.uid,
                &result.display_name,
                outcome,
                duration_from_ticks(result.duration_ticks),
                result.reason.as_deref(),
                result.error_message.as_deref(),
                result.error_stack_trace.as_deref(),
                result.standard_output.as_deref(),
                result.error_output.as_deref(),
            );
        }
        Ok(())
    }

    pub fn on_file_artifacts(&self, message: &FileArtifactsMessage) -> Result<(), ProtocolError> {
        if self.mode == SessionMode::Help {
            return Ok(());
        }
        self.require_handshake("FileArtifacts")?;

        for artifact in &message.artifacts {
            self.reporter.artifact_added(
                &self.module.display_name(),
                artifact.test_display_name.as_deref(),
                &artifact.full_path,
            );
        }
        Ok(())
    }

    pub fn on_session_event(&self, message: &SessionEventMessage) -> Result<(), ProtocolError> {
        self.require_handshake("SessionEvent")?;

        let mut state = self.state.lock().unwrap();
        let counters = state
            .sessions
            .entry(message.session_uid.clone())
            .or_default();

        if message.is_start() {
            counters.started += 1;
        } else if message.is_end() {
            counters.ended += 1;
            // An end overtaking its start is detected immediately, not at
            // drain time.
            if counters.ended > counters.started {
                return Err(ProtocolError::SessionEndWithoutStart {
                    session_uid: message.session_uid.clone(),
                });
            }
        } else {
            tracing::debug!(
                session_type = %message.session_type,
                "ignoring unrecognized session event type"
            );
        }
        Ok(())
    }

    pub fn on_command_line_options(
        &self,
        message: &CommandLineOptionsMessage,
    ) -> Result<(), ProtocolError> {
        if self.mode != SessionMode::Help {
            return Err(ProtocolError::OptionsOutsideHelpMode);
        }
        self.state.lock().unwrap().help_options = Some(message.clone());
        Ok(())
    }

    /// Whether any observed sessionUid has unequal start and end counts.
    /// Queried once the process exited and both streams drained.
    pub fn has_mismatched_sessions(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .sessions
            .values()
            .any(|counters| counters.started != counters.ended)
    }

    pub fn handshake_info(&self) -> Option<HandshakeInfo> {
        self.state.lock().unwrap().handshake.clone()
    }

    pub fn take_help_options(&self) -> Option<CommandLineOptionsMessage> {
        self.state.lock().unwrap().help_options.take()
    }

    pub fn module(&self) -> &TestModule {
        &self.module
    }

    fn require_handshake(&self, kind: &'static str) -> Result<(), ProtocolError> {
        if self.state.lock().unwrap().handshake.is_none() {
            return Err(ProtocolError::MessageBeforeHandshake { kind });
        }
        Ok(())
    }
}
