//! # Wire Codec Module / 线路编解码模块
//!
//! Binary framing of session messages. Every frame is
//! `[length: u32][serializer id: u32][payload]`, and every payload is a
//! field count followed by `field id / field size / value` triples, so a
//! reader can skip fields (and whole messages) it does not recognize.
//!
//! 会话消息的二进制帧格式。每个帧为
//! `[长度: u32][序列化器标识: u32][负载]`，每个负载是字段计数，
//! 后跟 `字段标识 / 字段大小 / 值` 三元组，
//! 因此读取方可以跳过它不认识的字段（以及整条消息）。

use super::{
    CommandLineOption, CommandLineOptionsMessage, DiscoveredTest, DiscoveredTestsMessage,
    FailedTestResult, FileArtifact, FileArtifactsMessage, HandshakeMessage, SessionEventMessage,
    SessionMessage, SuccessfulTestResult, TestResultsMessage, serializer_id,
};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. A runner streaming more than this in one
/// message is misbehaving; refusing early keeps a bad peer from ballooning
/// memory.
pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Field identifiers of each payload, grouped per message kind.
pub mod field {
    pub mod command_line_options {
        pub const MODULE_PATH: u16 = 1;
        pub const OPTION_LIST: u16 = 2;

        pub const OPTION_NAME: u16 = 1;
        pub const OPTION_DESCRIPTION: u16 = 2;
        pub const OPTION_IS_HIDDEN: u16 = 3;
        pub const OPTION_IS_BUILTIN: u16 = 4;
    }

    pub mod discovered_tests {
        pub const EXECUTION_ID: u16 = 1;
        pub const INSTANCE_ID: u16 = 2;
        pub const TEST_LIST: u16 = 3;

        pub const TEST_UID: u16 = 1;
        pub const TEST_DISPLAY_NAME: u16 = 2;
    }

    pub mod test_results {
        pub const EXECUTION_ID: u16 = 1;
        pub const INSTANCE_ID: u16 = 2;
        pub const SUCCESSFUL_LIST: u16 = 3;
        pub const FAILED_LIST: u16 = 4;

        pub const UID: u16 = 1;
        pub const DISPLAY_NAME: u16 = 2;
        pub const STATE: u16 = 3;
        pub const DURATION: u16 = 4;
        pub const REASON: u16 = 5;
        pub const ERROR_MESSAGE: u16 = 6;
        pub const ERROR_STACK_TRACE: u16 = 7;
        pub const STANDARD_OUTPUT: u16 = 8;
        pub const ERROR_OUTPUT: u16 = 9;
        pub const SESSION_UID: u16 = 10;
    }

    pub mod file_artifacts {
        pub const EXECUTION_ID: u16 = 1;
        pub const INSTANCE_ID: u16 = 2;
        pub const ARTIFACT_LIST: u16 = 3;

        pub const FULL_PATH: u16 = 1;
        pub const DISPLAY_NAME: u16 = 2;
        pub const DESCRIPTION: u16 = 3;
        pub const TEST_UID: u16 = 4;
        pub const TEST_DISPLAY_NAME: u16 = 5;
        pub const SESSION_UID: u16 = 6;
    }

    pub mod session_event {
        pub const SESSION_TYPE: u16 = 1;
        pub const SESSION_UID: u16 = 2;
        pub const EXECUTION_ID: u16 = 3;
    }
}

/// Why a frame could not be decoded. I/O errors and malformed payloads are
/// kept apart so the session can tell a vanished peer from a corrupt one.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("channel i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the limit of {MAX_FRAME_BYTES} bytes")]
    FrameTooLarge(u32),

    #[error("frame ends before its declared field sizes are satisfied")]
    Truncated,

    #[error("string field is not valid utf-8")]
    InvalidUtf8,
}

// ---------------------------------------------------------------------------
// payload writer
// ---------------------------------------------------------------------------

struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    fn u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn string_field(&mut self, id: u16, value: &str) {
        self.u16(id);
        self.u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    fn byte_field(&mut self, id: u16, value: u8) {
        self.u16(id);
        self.u32(1);
        self.u8(value);
    }

    fn i64_field(&mut self, id: u16, value: i64) {
        self.u16(id);
        self.u32(8);
        self.i64(value);
    }

    /// A nested list: the field value is an element count followed by the
    /// elements, each with its own field count.
    fn list_field(&mut self, id: u16, elements: &[Vec<u8>]) {
        let payload_len: usize = 4 + elements.iter().map(Vec::len).sum::<usize>();
        self.u16(id);
        self.u32(payload_len as u32);
        self.u32(elements.len() as u32);
        for element in elements {
            self.buf.extend_from_slice(element);
        }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }
}

// ---------------------------------------------------------------------------
// payload reader
// ---------------------------------------------------------------------------

struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn string(&mut self, len: usize) -> Result<String, DecodeError> {
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    fn skip(&mut self, len: usize) -> Result<(), DecodeError> {
        self.take(len).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// encoding
// ---------------------------------------------------------------------------

/// Encodes a message into `(serializer id, payload)`.
pub fn encode_message(message: &SessionMessage) -> (u32, Vec<u8>) {
    match message {
        SessionMessage::Handshake(handshake) => {
            (serializer_id::HANDSHAKE, encode_handshake(handshake))
        }
        SessionMessage::CommandLineOptions(options) => (
            serializer_id::COMMAND_LINE_OPTIONS,
            encode_command_line_options(options),
        ),
        SessionMessage::DiscoveredTests(discovered) => (
            serializer_id::DISCOVERED_TESTS,
            encode_discovered_tests(discovered),
        ),
        SessionMessage::TestResults(results) => {
            (serializer_id::TEST_RESULTS, encode_test_results(results))
        }
        SessionMessage::FileArtifacts(artifacts) => (
            serializer_id::FILE_ARTIFACTS,
            encode_file_artifacts(artifacts),
        ),
        SessionMessage::SessionEvent(event) => {
            (serializer_id::SESSION_EVENT, encode_session_event(event))
        }
        SessionMessage::Unknown { serializer_id } => (*serializer_id, Vec::new()),
        SessionMessage::Void => (serializer_id::VOID, Vec::new()),
    }
}

fn encode_handshake(handshake: &HandshakeMessage) -> Vec<u8> {
    let mut writer = PayloadWriter::new();
    writer.u16(handshake.properties.len() as u16);
    for (key, value) in &handshake.properties {
        writer.u8(*key);
        writer.u32(value.len() as u32);
        writer.buf.extend_from_slice(value.as_bytes());
    }
    writer.finish()
}

fn encode_command_line_options(message: &CommandLineOptionsMessage) -> Vec<u8> {
    use field::command_line_options::*;

    let mut writer = PayloadWriter::new();
    writer.u16(2);
    writer.string_field(MODULE_PATH, &message.module_path);

    let elements: Vec<Vec<u8>> = message
        .options
        .iter()
        .map(|option| {
            let mut element = PayloadWriter::new();
            element.u16(4);
            element.string_field(OPTION_NAME, &option.name);
            element.string_field(OPTION_DESCRIPTION, &option.description);
            element.byte_field(OPTION_IS_HIDDEN, option.is_hidden as u8);
            element.byte_field(OPTION_IS_BUILTIN, option.is_builtin as u8);
            element.finish()
        })
        .collect();
    writer.list_field(OPTION_LIST, &elements);
    writer.finish()
}

fn encode_discovered_tests(message: &DiscoveredTestsMessage) -> Vec<u8> {
    use field::discovered_tests::*;

    let mut writer = PayloadWriter::new();
    writer.u16(3);
    writer.string_field(EXECUTION_ID, &message.execution_id);
    writer.string_field(INSTANCE_ID, &message.instance_id);

    let elements: Vec<Vec<u8>> = message
        .tests
        .iter()
        .map(|test| {
            let mut element = PayloadWriter::new();
            element.u16(2);
            element.string_field(TEST_UID, &test.uid);
            element.string_field(TEST_DISPLAY_NAME, &test.display_name);
            element.finish()
        })
        .collect();
    writer.list_field(TEST_LIST, &elements);
    writer.finish()
}

fn encode_successful_result(result: &SuccessfulTestResult) -> Vec<u8> {
    use field::test_results::*;

    let mut element = PayloadWriter::new();
    let field_count = 4
        + result.duration_ticks.is_some() as u16
        + result.reason.is_some() as u16
        + result.standard_output.is_some() as u16
        + result.error_output.is_some() as u16;
    element.u16(field_count);
    element.string_field(UID, &result.uid);
    element.string_field(DISPLAY_NAME, &result.display_name);
    element.byte_field(STATE, result.state);
    if let Some(duration) = result.duration_ticks {
        element.i64_field(DURATION, duration);
    }
    if let Some(reason) = &result.reason {
        element.string_field(REASON, reason);
    }
    if let Some(output) = &result.standard_output {
        element.string_field(STANDARD_OUTPUT, output);
    }
    if let Some(output) = &result.error_output {
        element.string_field(ERROR_OUTPUT, output);
    }
    element.string_field(SESSION_UID, &result.session_uid);
    element.finish()
}

fn encode_failed_result(result: &FailedTestResult) -> Vec<u8> {
    use field::test_results::*;

    let mut element = PayloadWriter::new();
    let field_count = 4
        + result.duration_ticks.is_some() as u16
        + result.reason.is_some() as u16
        + result.error_message.is_some() as u16
        + result.error_stack_trace.is_some() as u16
        + result.standard_output.is_some() as u16
        + result.error_output.is_some() as u16;
    element.u16(field_count);
    element.string_field(UID, &result.uid);
    element.string_field(DISPLAY_NAME, &result.display_name);
    element.byte_field(STATE, result.state);
    if let Some(duration) = result.duration_ticks {
        element.i64_field(DURATION, duration);
    }
    if let Some(reason) = &result.reason {
        element.string_field(REASON, reason);
    }
    if let Some(message) = &result.error_message {
        element.string_field(ERROR_MESSAGE, message);
    }
    if let Some(stack) = &result.error_stack_trace {
        element.string_field(ERROR_STACK_TRACE, stack);
    }
    if let Some(output) = &result.standard_output {
        element.string_field(STANDARD_OUTPUT, output);
    }
    if let Some(output) = &result.error_output {
        element.string_field(ERROR_OUTPUT, output);
    }
    element.string_field(SESSION_UID, &result.session_uid);
    element.finish()
}

fn encode_test_results(message: &TestResultsMessage) -> Vec<u8> {
    use field::test_results::*;

    let mut writer = PayloadWriter::new();
    writer.u16(4);
    writer.string_field(EXECUTION_ID, &message.execution_id);
    writer.string_field(INSTANCE_ID, &message.instance_id);

    let successful: Vec<Vec<u8>> = message
        .successful
        .iter()
        .map(encode_successful_result)
        .collect();
    writer.list_field(SUCCESSFUL_LIST, &successful);

    let failed: Vec<Vec<u8>> = message.failed.iter().map(encode_failed_result).collect();
    writer.list_field(FAILED_LIST, &failed);
    writer.finish()
}

fn encode_file_artifacts(message: &FileArtifactsMessage) -> Vec<u8> {
    use field::file_artifacts::*;

    let mut writer = PayloadWriter::new();
    writer.u16(3);
    writer.string_field(EXECUTION_ID, &message.execution_id);
    writer.string_field(INSTANCE_ID, &message.instance_id);

    let elements: Vec<Vec<u8>> = message
        .artifacts
        .iter()
        .map(|artifact| {
            let mut element = PayloadWriter::new();
            let field_count = 3
                + artifact.description.is_some() as u16
                + artifact.test_uid.is_some() as u16
                + artifact.test_display_name.is_some() as u16;
            element.u16(field_count);
            element.string_field(FULL_PATH, &artifact.full_path);
            element.string_field(DISPLAY_NAME, &artifact.display_name);
            if let Some(description) = &artifact.description {
                element.string_field(DESCRIPTION, description);
            }
            if let Some(uid) = &artifact.test_uid {
                element.string_field(TEST_UID, uid);
            }
            if let Some(name) = &artifact.test_display_name {
                element.string_field(TEST_DISPLAY_NAME, name);
            }
            element.string_field(SESSION_UID, &artifact.session_uid);
            element.finish()
        })
        .collect();
    writer.list_field(ARTIFACT_LIST, &elements);
    writer.finish()
}

fn encode_session_event(message: &SessionEventMessage) -> Vec<u8> {
    use field::session_event::*;

    let mut writer = PayloadWriter::new();
    writer.u16(3);
    writer.string_field(SESSION_TYPE, &message.session_type);
    writer.string_field(SESSION_UID, &message.session_uid);
    writer.string_field(EXECUTION_ID, &message.execution_id);
    writer.finish()
}

// ---------------------------------------------------------------------------
// decoding
// ---------------------------------------------------------------------------

/// Decodes a payload for the given serializer id. Unrecognized ids become
/// [`SessionMessage::Unknown`], never an error.
pub fn decode_payload(id: u32, payload: &[u8]) -> Result<SessionMessage, DecodeError> {
    match id {
        serializer_id::VOID => Ok(SessionMessage::Void),
        serializer_id::HANDSHAKE => decode_handshake(payload),
        serializer_id::COMMAND_LINE_OPTIONS => decode_command_line_options(payload),
        serializer_id::DISCOVERED_TESTS => decode_discovered_tests(payload),
        serializer_id::TEST_RESULTS => decode_test_results(payload),
        serializer_id::FILE_ARTIFACTS => decode_file_artifacts(payload),
        serializer_id::SESSION_EVENT => decode_session_event(payload),
        other => Ok(SessionMessage::Unknown { serializer_id: other }),
    }
}

fn decode_handshake(payload: &[u8]) -> Result<SessionMessage, DecodeError> {
    let mut reader = PayloadReader::new(payload);
    let count = reader.u16()?;
    let mut properties = BTreeMap::new();
    for _ in 0..count {
        let key = reader.u8()?;
        let len = reader.u32()? as usize;
        let value = reader.string(len)?;
        properties.insert(key, value);
    }
    Ok(SessionMessage::Handshake(HandshakeMessage::new(properties)))
}

fn decode_command_line_options(payload: &[u8]) -> Result<SessionMessage, DecodeError> {
    use field::command_line_options::*;

    let mut reader = PayloadReader::new(payload);
    let mut message = CommandLineOptionsMessage::default();
    let count = reader.u16()?;
    for _ in 0..count {
        let id = reader.u16()?;
        let size = reader.u32()? as usize;
        match id {
            MODULE_PATH => message.module_path = reader.string(size)?,
            OPTION_LIST => {
                let length = reader.u32()?;
                for _ in 0..length {
                    let mut option = CommandLineOption {
                        name: String::new(),
                        description: String::new(),
                        is_hidden: false,
                        is_builtin: false,
                    };
                    let fields = reader.u16()?;
                    for _ in 0..fields {
                        let field_id = reader.u16()?;
                        let field_size = reader.u32()? as usize;
                        match field_id {
                            OPTION_NAME => option.name = reader.string(field_size)?,
                            OPTION_DESCRIPTION => option.description = reader.string(field_size)?,
                            OPTION_IS_HIDDEN => option.is_hidden = reader.u8()? != 0,
                            OPTION_IS_BUILTIN => option.is_builtin = reader.u8()? != 0,
                            _ => reader.skip(field_size)?,
                        }
                    }
                    message.options.push(option);
                }
            }
            _ => reader.skip(size)?,
        }
    }
    Ok(SessionMessage::CommandLineOptions(message))
}

fn decode_discovered_tests(payload: &[u8]) -> Result<SessionMessage, DecodeError> {
    use field::discovered_tests::*;

    let mut reader = PayloadReader::new(payload);
    let mut message = DiscoveredTestsMessage::default();
    let count = reader.u16()?;
    for _ in 0..count {
        let id = reader.u16()?;
        let size = reader.u32()? as usize;
        match id {
            EXECUTION_ID => message.execution_id = reader.string(size)?,
            INSTANCE_ID => message.instance_id = reader.string(size)?,
            TEST_LIST => {
                let length = reader.u32()?;
                for _ in 0..length {
                    let mut test = DiscoveredTest {
                        uid: String::new(),
                        display_name: String::new(),
                    };
                    let fields = reader.u16()?;
                    for _ in 0..fields {
                        let field_id = reader.u16()?;
                        let field_size = reader.u32()? as usize;
                        match field_id {
                            TEST_UID => test.uid = reader.string(field_size)?,
                            TEST_DISPLAY_NAME => test.display_name = reader.string(field_size)?,
                            _ => reader.skip(field_size)?,
                        }
                    }
                    message.tests.push(test);
                }
            }
            _ => reader.skip(size)?,
        }
    }
    Ok(SessionMessage::DiscoveredTests(message))
}

fn decode_successful_result(reader: &mut PayloadReader<'_>) -> Result<SuccessfulTestResult, DecodeError> {
    use field::test_results::*;

    let mut result = SuccessfulTestResult::default();
    let fields = reader.u16()?;
    for _ in 0..fields {
        let field_id = reader.u16()?;
        let field_size = reader.u32()? as usize;
        match field_id {
            UID => result.uid = reader.string(field_size)?,
            DISPLAY_NAME => result.display_name = reader.string(field_size)?,
            STATE => result.state = reader.u8()?,
            DURATION => result.duration_ticks = Some(reader.i64()?),
            REASON => result.reason = Some(reader.string(field_size)?),
            STANDARD_OUTPUT => result.standard_output = Some(reader.string(field_size)?),
            ERROR_OUTPUT => result.error_output = Some(reader.string(field_size)?),
            SESSION_UID => result.session_uid = reader.string(field_size)?,
            _ => reader.skip(field_size)?,
        }
    }
    Ok(result)
}

fn decode_failed_result(reader: &mut PayloadReader<'_>) -> Result<FailedTestResult, DecodeError> {
    use field::test_results::*;

    let mut result = FailedTestResult::default();
    let fields = reader.u16()?;
    for _ in 0..fields {
        let field_id = reader.u16()?;
        let field_size = reader.u32()? as usize;
        match field_id {
            UID => result.uid = reader.string(field_size)?,
            DISPLAY_NAME => result.display_name = reader.string(field_size)?,
            STATE => result.state = reader.u8()?,
            DURATION => result.duration_ticks = Some(reader.i64()?),
            REASON => result.reason = Some(reader.string(field_size)?),
            ERROR_MESSAGE => result.error_message = Some(reader.string(field_size)?),
            ERROR_STACK_TRACE => result.error_stack_trace = Some(reader.string(field_size)?),
            STANDARD_OUTPUT => result.standard_output = Some(reader.string(field_size)?),
            ERROR_OUTPUT => result.error_output = Some(reader.string(field_size)?),
            SESSION_UID => result.session_uid = reader.string(field_size)?,
            _ => reader.skip(field_size)?,
        }
    }
    Ok(result)
}

fn decode_test_results(payload: &[u8]) -> Result<SessionMessage, DecodeError> {
    use field::test_results::*;

    let mut reader = PayloadReader::new(payload);
    let mut message = TestResultsMessage::default();
    let count = reader.u16()?;
    for _ in 0..count {
        let id = reader.u16()?;
        let size = reader.u32()? as usize;
        match id {
            EXECUTION_ID => message.execution_id = reader.string(size)?,
            INSTANCE_ID => message.instance_id = reader.string(size)?,
            SUCCESSFUL_LIST => {
                let length = reader.u32()?;
                for _ in 0..length {
                    message.successful.push(decode_successful_result(&mut reader)?);
                }
            }
            FAILED_LIST => {
                let length = reader.u32()?;
                for _ in 0..length {
                    message.failed.push(decode_failed_result(&mut reader)?);
                }
            }
            _ => reader.skip(size)?,
        }
    }
    Ok(SessionMessage::TestResults(message))
}

fn decode_file_artifacts(payload: &[u8]) -> Result<SessionMessage, DecodeError> {
    use field::file_artifacts::*;

    let mut reader = PayloadReader::new(payload);
    let mut message = FileArtifactsMessage::default();
    let count = reader.u16()?;
    for _ in 0..count {
        let id = reader.u16()?;
        let size = reader.u32()? as usize;
        match id {
            EXECUTION_ID => message.execution_id = reader.string(size)?,
            INSTANCE_ID => message.instance_id = reader.string(size)?,
            ARTIFACT_LIST => {
                let length = reader.u32()?;
                for _ in 0..length {
                    let mut artifact = FileArtifact::default();
                    let fields = reader.u16()?;
                    for _ in 0..fields {
                        let field_id = reader.u16()?;
                        let field_size = reader.u32()? as usize;
                        match field_id {
                            FULL_PATH => artifact.full_path = reader.string(field_size)?,
                            DISPLAY_NAME => artifact.display_name = reader.string(field_size)?,
                            DESCRIPTION => artifact.description = Some(reader.string(field_size)?),
                            TEST_UID => artifact.test_uid = Some(reader.string(field_size)?),
                            TEST_DISPLAY_NAME => {
                                artifact.test_display_name = Some(reader.string(field_size)?)
                            }
                            SESSION_UID => artifact.session_uid = reader.string(field_size)?,
                            _ => reader.skip(field_size)?,
                        }
                    }
                    message.artifacts.push(artifact);
                }
            }
            _ => reader.skip(size)?,
        }
    }
    Ok(SessionMessage::FileArtifacts(message))
}

fn decode_session_event(payload: &[u8]) -> Result<SessionMessage, DecodeError> {
    use field::session_event::*;

    let mut reader = PayloadReader::new(payload);
    let mut session_type = String::new();
    let mut session_uid = String::new();
    let mut execution_id = String::new();
    let count = reader.u16()?;
    for _ in 0..count {
        let id = reader.u16()?;
        let size = reader.u32()? as usize;
        match id {
            SESSION_TYPE => session_type = reader.string(size)?,
            SESSION_UID => session_uid = reader.string(size)?,
            EXECUTION_ID => execution_id = reader.string(size)?,
            _ => reader.skip(size)?,
        }
    }
    Ok(SessionMessage::SessionEvent(SessionEventMessage {
        session_type,
        session_uid,
        execution_id,
    }))
}

// ---------------------------------------------------------------------------
// framing
// ---------------------------------------------------------------------------

/// Writes one framed message and flushes it.
pub async fn write_message<W>(writer: &mut W, message: &SessionMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (id, payload) = encode_message(message);
    let total = 4 + payload.len() as u32;
    writer.write_all(&total.to_le_bytes()).await?;
    writer.write_all(&id.to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Reads one framed message. `Ok(None)` is a clean end of stream, which only
/// happens on a frame boundary; anything truncated mid-frame is an error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<SessionMessage>, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut length_bytes = [0u8; 4];
    match reader.read_exact(&mut length_bytes).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let total = u32::from_le_bytes(length_bytes);
    if total > MAX_FRAME_BYTES {
        return Err(DecodeError::FrameTooLarge(total));
    }
    if total < 4 {
        return Err(DecodeError::Truncated);
    }

    let mut frame = vec![0u8; total as usize];
    reader.read_exact(&mut frame).await?;

    let id = u32::from_le_bytes(frame[..4].try_into().unwrap());
    decode_payload(id, &frame[4..]).map(Some)
}
