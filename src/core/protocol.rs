//! # Session Protocol Module / 会话协议模块
//!
//! The closed set of messages exchanged with a test-runner process over its
//! duplex channel, the byte-identified handshake and version negotiation.
//! The wire encoding itself lives in [`codec`].
//!
//! 与测试运行器进程通过双工通道交换的封闭消息集合、
//! 以字节标识的握手以及版本协商。线上编码本身位于 [`codec`]。

pub mod codec;

use crate::core::models::TestOutcome;
use std::collections::BTreeMap;
use thiserror::Error;

/// The single protocol version this side speaks.
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Separator of the peer's advertised supported-version list.
pub const VERSION_LIST_SEPARATOR: char = ';';

/// Fixed small-integer property keys of the handshake, chosen for
/// compactness over string keys.
/// 握手消息的固定小整数属性键，为紧凑性而非字符串键。
pub mod handshake_property {
    pub const PID: u8 = 0;
    pub const ARCHITECTURE: u8 = 1;
    pub const FRAMEWORK: u8 = 2;
    pub const OS: u8 = 3;
    pub const SUPPORTED_PROTOCOL_VERSIONS: u8 = 4;
    pub const HOST_TYPE: u8 = 5;
    pub const MODULE_PATH: u8 = 6;
    pub const EXECUTION_ID: u8 = 7;
    pub const INSTANCE_ID: u8 = 8;

    /// Name used when logging a handshake property, `?` for keys newer
    /// than this implementation.
    pub fn name(key: u8) -> &'static str {
        match key {
            PID => "PID",
            ARCHITECTURE => "Architecture",
            FRAMEWORK => "Framework",
            OS => "OS",
            SUPPORTED_PROTOCOL_VERSIONS => "SupportedProtocolVersions",
            HOST_TYPE => "HostType",
            MODULE_PATH => "ModulePath",
            EXECUTION_ID => "ExecutionId",
            INSTANCE_ID => "InstanceId",
            _ => "?",
        }
    }
}

/// State bytes carried by test-result messages.
/// 测试结果消息携带的状态字节。
pub mod test_state {
    pub const PASSED: u8 = 2;
    pub const SKIPPED: u8 = 3;
    pub const FAILED: u8 = 4;
    pub const ERROR: u8 = 5;
    pub const TIMEOUT: u8 = 6;
    pub const CANCELLED: u8 = 7;
}

/// Serializer identifiers framing every message on the wire. Anything else
/// decodes to [`SessionMessage::Unknown`] and is skipped.
/// 在线路上为每条消息定界的序列化器标识。其他任何值都会解码为
/// [`SessionMessage::Unknown`] 并被跳过。
pub mod serializer_id {
    pub const VOID: u32 = 0;
    pub const HANDSHAKE: u32 = 1;
    pub const COMMAND_LINE_OPTIONS: u32 = 2;
    pub const DISCOVERED_TESTS: u32 = 3;
    pub const TEST_RESULTS: u32 = 4;
    pub const FILE_ARTIFACTS: u32 = 5;
    pub const SESSION_EVENT: u32 = 6;
}

/// Session-event kind strings a module reports around each test session.
pub const SESSION_START: &str = "TestSessionStart";
pub const SESSION_END: &str = "TestSessionEnd";

/// Everything that can go wrong inside the protocol or the per-module
/// bookkeeping built on top of it. Violations of the first kind are fatal
/// to the session; the channel is never read again afterwards.
///
/// 协议或其上构建的按模块记账中可能出错的一切。
/// 第一类违规对会话是致命的；此后不会再读取该通道。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("received {kind} before a successful handshake")]
    MessageBeforeHandshake { kind: &'static str },

    #[error("received a second handshake on a connection that already negotiated")]
    DuplicateHandshake,

    #[error(
        "handshake reported a different {field} than an earlier connection \
         (was '{previous}', now '{current}')"
    )]
    InconsistentHandshake {
        field: &'static str,
        previous: String,
        current: String,
    },

    #[error("command-line options are only legal in help mode")]
    OptionsOutsideHelpMode,

    #[error("discovered-test message received in help mode")]
    DiscoveryInHelpMode,

    #[error("unknown test state byte {0}")]
    UnknownTestState(u8),

    #[error("session '{session_uid}' reported more ends than starts")]
    SessionEndWithoutStart { session_uid: String },

    #[error("handshake carries no supported-version list")]
    MissingVersionList,
}

/// First message in either direction on every connection: a map from small
/// integer keys to string values, exchanged exactly once per session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandshakeMessage {
    pub properties: BTreeMap<u8, String>,
}

impl HandshakeMessage {
    pub fn new(properties: BTreeMap<u8, String>) -> Self {
        Self { properties }
    }

    pub fn get(&self, key: u8) -> Option<&str> {
        self.properties.get(&key).map(String::as_str)
    }

    /// Renders every property on its own line for diagnostics.
    pub fn describe(&self) -> String {
        let mut text = String::new();
        for (key, value) in &self.properties {
            text.push_str(&format!(
                "{}: {}\n",
                handshake_property::name(*key),
                value
            ));
        }
        text
    }
}

/// One command-line option a module advertises in help mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLineOption {
    pub name: String,
    pub description: String,
    pub is_hidden: bool,
    pub is_builtin: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLineOptionsMessage {
    pub module_path: String,
    pub options: Vec<CommandLineOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTest {
    pub uid: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredTestsMessage {
    pub execution_id: String,
    pub instance_id: String,
    pub tests: Vec<DiscoveredTest>,
}

/// A test that finished without failure; `state` is still carried because
/// both passed and skipped units travel in this list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuccessfulTestResult {
    pub uid: String,
    pub display_name: String,
    pub state: u8,
    pub duration_ticks: Option<i64>,
    pub reason: Option<String>,
    pub standard_output: Option<String>,
    pub error_output: Option<String>,
    pub session_uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedTestResult {
    pub uid: String,
    pub display_name: String,
    pub state: u8,
    pub duration_ticks: Option<i64>,
    pub reason: Option<String>,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
    pub standard_output: Option<String>,
    pub error_output: Option<String>,
    pub session_uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResultsMessage {
    pub execution_id: String,
    pub instance_id: String,
    pub successful: Vec<SuccessfulTestResult>,
    pub failed: Vec<FailedTestResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileArtifact {
    pub full_path: String,
    pub display_name: String,
    pub description: Option<String>,
    pub test_uid: Option<String>,
    pub test_display_name: Option<String>,
    pub session_uid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileArtifactsMessage {
    pub execution_id: String,
    pub instance_id: String,
    pub artifacts: Vec<FileArtifact>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEventMessage {
    /// [`SESSION_START`] or [`SESSION_END`]; anything else is preserved
    /// verbatim so a newer peer does not break framing.
    pub session_type: String,
    pub session_uid: String,
    pub execution_id: String,
}

impl SessionEventMessage {
    pub fn is_start(&self) -> bool {
        self.session_type == SESSION_START
    }

    pub fn is_end(&self) -> bool {
        self.session_type == SESSION_END
    }
}

/// The closed message set of the session protocol, exhaustively matched at
/// every dispatch site.
/// 会话协议的封闭消息集合，在每个分发点都进行穷尽匹配。
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    Handshake(HandshakeMessage),
    CommandLineOptions(CommandLineOptionsMessage),
    DiscoveredTests(DiscoveredTestsMessage),
    TestResults(TestResultsMessage),
    FileArtifacts(FileArtifactsMessage),
    SessionEvent(SessionEventMessage),
    /// Placeholder for message kinds newer than this implementation;
    /// carried through so the sender can be answered and skipped.
    Unknown { serializer_id: u32 },
    /// The empty acknowledgement sent for every non-handshake request.
    Void,
}

impl SessionMessage {
    /// Short, stable name used in logs and protocol errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SessionMessage::Handshake(_) => "Handshake",
            SessionMessage::CommandLineOptions(_) => "CommandLineOptions",
            SessionMessage::DiscoveredTests(_) => "DiscoveredTests",
            SessionMessage::TestResults(_) => "TestResults",
            SessionMessage::FileArtifacts(_) => "FileArtifacts",
            SessionMessage::SessionEvent(_) => "SessionEvent",
            SessionMessage::Unknown { .. } => "Unknown",
            SessionMessage::Void => "Void",
        }
    }
}

/// Maps a wire state byte to an outcome, refusing bytes this implementation
/// does not know. Misclassifying pass/fail would corrupt the final exit
/// code, so unknown values are a hard error rather than a skip.
pub fn outcome_from_state(state: u8) -> Result<TestOutcome, ProtocolError> {
    match state {
        test_state::PASSED => Ok(TestOutcome::Passed),
        test_state::SKIPPED => Ok(TestOutcome::Skipped),
        test_state::FAILED => Ok(TestOutcome::Failed),
        test_state::ERROR => Ok(TestOutcome::Error),
        test_state::TIMEOUT => Ok(TestOutcome::Timeout),
        test_state::CANCELLED => Ok(TestOutcome::Cancelled),
        other => Err(ProtocolError::UnknownTestState(other)),
    }
}

/// Intersects the peer's semicolon-delimited version list with the single
/// version this side supports. `None` means incompatible, which is terminal
/// for the session: no further meaningful reporting happens, though the
/// process is still allowed to exit before cleanup.
pub fn negotiate_version(advertised: &str) -> Option<&'static str> {
    advertised
        .split(VERSION_LIST_SEPARATOR)
        .any(|candidate| candidate.trim() == PROTOCOL_VERSION)
        .then_some(PROTOCOL_VERSION)
}

/// Builds the server half of the handshake: identity of this orchestrator
/// plus the negotiated version (empty when negotiation failed, which the
/// peer understands as a rejection).
pub fn server_handshake(negotiated_version: &str) -> HandshakeMessage {
    let mut properties = BTreeMap::new();
    properties.insert(handshake_property::PID, std::process::id().to_string());
    properties.insert(
        handshake_property::ARCHITECTURE,
        std::env::consts::ARCH.to_string(),
    );
    properties.insert(
        handshake_property::FRAMEWORK,
        format!("module-runner {}", env!("CARGO_PKG_VERSION")),
    );
    properties.insert(handshake_property::OS, std::env::consts::OS.to_string());
    properties.insert(
        handshake_property::SUPPORTED_PROTOCOL_VERSIONS,
        negotiated_version.to_string(),
    );
    HandshakeMessage::new(properties)
}
