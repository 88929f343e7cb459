//! Shared helpers for the integration tests: an inspectable terminal sink,
//! reporter construction and a minimal session-protocol client.

#![allow(dead_code)]

use module_runner::core::models::TestModule;
use module_runner::core::protocol::{
    HandshakeMessage, PROTOCOL_VERSION, SESSION_END, SESSION_START, SessionEventMessage,
    SessionMessage, SuccessfulTestResult, TestResultsMessage, codec, handshake_property,
    test_state,
};
use module_runner::reporting::terminal::PlainTerminal;
use module_runner::reporting::{ReporterOptions, TestReporter};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UnixStream;

/// A `Write` sink shared between the test and the terminal back-end it
/// hands to the reporter.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A reporter writing plainly into a shared buffer, with progress disabled
/// so test output stays deterministic.
pub fn buffer_reporter(options: ReporterOptions) -> (Arc<TestReporter>, SharedBuffer) {
    let buffer = SharedBuffer::default();
    let backend = PlainTerminal::with_size_probe(buffer.clone(), Box::new(|| (120, 40)));
    let reporter = Arc::new(TestReporter::new(Box::new(backend), options));
    (reporter, buffer)
}

/// A module that runs `sh -c <script>`.
pub fn shell_module(name: &str, script: &str) -> TestModule {
    TestModule {
        run_command: "sh".to_string(),
        run_arguments: vec!["-c".to_string(), script.to_string()],
        working_directory: None,
        environment: BTreeMap::new(),
        target_framework: Some("net9.0".to_string()),
        architecture: Some("x64".to_string()),
        target_path: Some(std::path::PathBuf::from(format!("/modules/{name}.dll"))),
        project_path: None,
        supports_session_protocol: true,
    }
}

/// Connects to a session endpoint, retrying until the server has bound it.
pub async fn connect_with_retry(path: &Path) -> UnixStream {
    for _ in 0..100 {
        if let Ok(stream) = UnixStream::connect(path).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("endpoint {} never became connectable", path.display());
}

/// A fake test-host client driving one connection of the session protocol.
pub struct FakeModuleClient {
    pub stream: UnixStream,
}

impl FakeModuleClient {
    pub async fn connect(path: &Path) -> Self {
        Self {
            stream: connect_with_retry(path).await,
        }
    }

    pub fn handshake_message(execution_id: &str, instance_id: &str) -> HandshakeMessage {
        let mut properties = BTreeMap::new();
        properties.insert(handshake_property::PID, "12345".to_string());
        properties.insert(handshake_property::ARCHITECTURE, "x64".to_string());
        properties.insert(handshake_property::FRAMEWORK, "net9.0".to_string());
        properties.insert(handshake_property::OS, "linux".to_string());
        properties.insert(
            handshake_property::SUPPORTED_PROTOCOL_VERSIONS,
            PROTOCOL_VERSION.to_string(),
        );
        properties.insert(handshake_property::HOST_TYPE, "TestHost".to_string());
        properties.insert(handshake_property::EXECUTION_ID, execution_id.to_string());
        properties.insert(handshake_property::INSTANCE_ID, instance_id.to_string());
        HandshakeMessage::new(properties)
    }

    /// Sends one message and reads the server's reply.
    pub async fn round_trip(&mut self, message: &SessionMessage) -> Option<SessionMessage> {
        codec::write_message(&mut self.stream, message).await.ok()?;
        codec::read_message(&mut self.stream).await.ok().flatten()
    }

    /// Performs the handshake, returning the server's reply.
    pub async fn handshake(&mut self, execution_id: &str, instance_id: &str) -> Option<SessionMessage> {
        self.round_trip(&SessionMessage::Handshake(Self::handshake_message(
            execution_id,
            instance_id,
        )))
        .await
    }

    pub async fn send_session_event(&mut self, kind: &str, session_uid: &str, execution_id: &str) {
        self.round_trip(&SessionMessage::SessionEvent(SessionEventMessage {
            session_type: kind.to_string(),
            session_uid: session_uid.to_string(),
            execution_id: execution_id.to_string(),
        }))
        .await;
    }

    /// Sends `count` passed results in one message.
    pub async fn send_passed_results(&mut self, execution_id: &str, session_uid: &str, count: usize) {
        let successful = (0..count)
            .map(|index| SuccessfulTestResult {
                uid: format!("test-{index}"),
                display_name: format!("test_case_{index}"),
                state: test_state::PASSED,
                duration_ticks: Some(10_000),
                reason: None,
                standard_output: None,
                error_output: None,
                session_uid: session_uid.to_string(),
            })
            .collect();
        self.round_trip(&SessionMessage::TestResults(TestResultsMessage {
            execution_id: execution_id.to_string(),
            instance_id: "inst-1".to_string(),
            successful,
            failed: Vec::new(),
        }))
        .await;
    }

    /// The usual well-behaved conversation: handshake, one session with
    /// `passed` green tests, paired start/end events.
    pub async fn run_happy_session(&mut self, execution_id: &str, passed: usize) {
        self.handshake(execution_id, "inst-1").await;
        self.send_session_event(SESSION_START, "session-1", execution_id)
            .await;
        self.send_passed_results(execution_id, "session-1", passed)
            .await;
        self.send_session_event(SESSION_END, "session-1", execution_id)
            .await;
    }
}
