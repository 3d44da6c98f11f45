//! Legacy server-mode protocol.
//!
//! The tool runs as `cmake -E server --experimental` and speaks JSON over
//! its standard input and output. Every message is framed:
//!
//! ```text
//! [== "CMake Server" ==[
//! {"type":"hello", ...}
//! ]== "CMake Server" ==]
//! ```
//!
//! A session waits for `hello`, sends the `handshake` and then requests
//! `configure`, `compute`, `codemodel`, `cmakeInputs` and `cache` in order.
//! When a request fails, the cache is still requested before the error is
//! reported.

use std::process::Stdio;

use camino::Utf8PathBuf;
use cms_config::ConfigEntry;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::diagnostics::DiagnosticsParser;
use crate::error::ReaderError;
use crate::params::BuildDirParameters;
use crate::process::{ToolCommand, kill};
use crate::server_model::{ServerCache, ServerCodemodel, ServerInputs};

const START_MARKER: &[u8] = b"[== \"CMake Server\" ==[";
const END_MARKER: &[u8] = b"]== \"CMake Server\" ==]";

/// Protocol major version the session speaks.
const PROTOCOL_MAJOR: u32 = 1;

// ============================================================================
// Framing
// ============================================================================

/// Errors of the server framing layer.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Reading or writing the pipe failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A frame did not contain valid JSON.
    #[error("invalid server message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Frames JSON values with the server markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerCodec;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

impl Decoder for ServerCodec {
    type Item = Value;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        let Some(start) = find(src, START_MARKER) else {
            // Keep what could be the beginning of a split start marker.
            let keep = START_MARKER.len() - 1;
            if src.len() > keep {
                let discard = src.len() - keep;
                src.advance(discard);
            }
            return Ok(None);
        };
        let body_start = start + START_MARKER.len();
        let Some(body_len) = find(&src[body_start..], END_MARKER) else {
            return Ok(None);
        };
        let frame = src.split_to(body_start + body_len + END_MARKER.len());
        let value = serde_json::from_slice(&frame[body_start..body_start + body_len])?;
        Ok(Some(value))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Value>, CodecError> {
        let frame = self.decode(src)?;
        if frame.is_none() {
            src.clear();
        }
        Ok(frame)
    }
}

impl Encoder<Value> for ServerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Value, dst: &mut BytesMut) -> Result<(), CodecError> {
        let body = serde_json::to_vec(&item)?;
        dst.reserve(body.len() + START_MARKER.len() + END_MARKER.len() + 4);
        dst.extend_from_slice(b"\n");
        dst.extend_from_slice(START_MARKER);
        dst.extend_from_slice(b"\n");
        dst.extend_from_slice(&body);
        dst.extend_from_slice(b"\n");
        dst.extend_from_slice(END_MARKER);
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, Copy, Deserialize)]
struct ProtocolVersion {
    major: u32,
    #[serde(default)]
    minor: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Hello {
        #[serde(default)]
        supported_protocol_versions: Vec<ProtocolVersion>,
    },
    #[serde(rename_all = "camelCase")]
    Reply {
        in_reply_to: String,
        #[serde(flatten)]
        data: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        in_reply_to: String,
        error_message: String,
    },
    Message {
        message: String,
    },
    Signal {
        name: String,
    },
    #[serde(other)]
    Other,
}

/// Everything a session collected.
#[derive(Debug, Default)]
pub struct ServerReplies {
    /// The `codemodel` reply.
    pub codemodel: ServerCodemodel,
    /// The `cmakeInputs` reply.
    pub inputs: ServerInputs,
    /// The cache, also filled after a failed configure.
    pub cache: Vec<ConfigEntry>,
    /// The first error the server reported.
    pub error: Option<ReaderError>,
}

// ============================================================================
// Session
// ============================================================================

/// One conversation with a server over a reader/writer pair.
pub struct ServerSession<R, W> {
    reader: FramedRead<R, ServerCodec>,
    writer: FramedWrite<W, ServerCodec>,
    build_dir: Utf8PathBuf,
    cookie: u64,
}

impl<R, W> ServerSession<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Wraps the server's output (`reader`) and input (`writer`).
    pub fn new(reader: R, writer: W, build_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            reader: FramedRead::new(reader, ServerCodec),
            writer: FramedWrite::new(writer, ServerCodec),
            build_dir: build_dir.into(),
            cookie: 0,
        }
    }

    fn codec_error(&self, err: CodecError) -> ReaderError {
        match err {
            CodecError::Io(e) => ReaderError::io(&self.build_dir, e),
            CodecError::Json(e) => ReaderError::malformed(&self.build_dir, e),
        }
    }

    async fn next_message(&mut self) -> Result<ServerMessage, ReaderError> {
        let frame = match self.reader.next().await {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(self.codec_error(e)),
            None => {
                return Err(ReaderError::ServerError(
                    "Connection to CMake server lost".to_owned(),
                ));
            }
        };
        serde_json::from_value(frame).map_err(|e| ReaderError::malformed(&self.build_dir, e))
    }

    async fn send(&mut self, kind: &str, mut payload: Map<String, Value>) -> Result<(), ReaderError> {
        self.cookie += 1;
        payload.insert("type".to_owned(), Value::from(kind));
        payload.insert("cookie".to_owned(), Value::from(self.cookie.to_string()));
        let sent = self.writer.send(Value::Object(payload)).await;
        sent.map_err(|e| self.codec_error(e))
    }

    /// Sends a request and waits for its reply.
    ///
    /// Interleaved `message` output is fed to `parser`.
    pub async fn request(
        &mut self,
        kind: &str,
        payload: Map<String, Value>,
        parser: &mut DiagnosticsParser,
    ) -> Result<Map<String, Value>, ReaderError> {
        self.send(kind, payload).await?;
        loop {
            match self.next_message().await? {
                ServerMessage::Reply { in_reply_to, data } if in_reply_to == kind => return Ok(data),
                ServerMessage::Error {
                    in_reply_to,
                    error_message,
                } if in_reply_to == kind => return Err(ReaderError::ServerError(error_message)),
                ServerMessage::Message { message } => {
                    for line in message.lines() {
                        tracing::info!("{line}");
                        parser.push_line(line);
                    }
                }
                ServerMessage::Signal { name } => tracing::trace!(signal = %name, "Ignoring server signal"),
                other => tracing::trace!(message = ?other, "Ignoring server message"),
            }
        }
    }

    async fn request_as<T: DeserializeOwned>(
        &mut self,
        kind: &str,
        parser: &mut DiagnosticsParser,
    ) -> Result<T, ReaderError> {
        let data = self.request(kind, Map::new(), parser).await?;
        serde_json::from_value(Value::Object(data))
            .map_err(|e| ReaderError::malformed(self.build_dir.join(kind), e))
    }

    /// Waits for `hello` and performs the handshake.
    pub async fn handshake(&mut self, params: &BuildDirParameters) -> Result<(), ReaderError> {
        let versions = loop {
            if let ServerMessage::Hello {
                supported_protocol_versions,
            } = self.next_message().await?
            {
                break supported_protocol_versions;
            }
        };
        let Some(version) = versions.iter().find(|v| v.major == PROTOCOL_MAJOR) else {
            return Err(ReaderError::ServerError(format!(
                "CMake server does not support protocol version {PROTOCOL_MAJOR}"
            )));
        };
        tracing::debug!(major = version.major, minor = version.minor, "Server hello");

        let mut payload = Map::new();
        payload.insert("protocolVersion".to_owned(), json!({ "major": PROTOCOL_MAJOR }));
        payload.insert("sourceDirectory".to_owned(), Value::from(params.source_dir.as_str()));
        payload.insert("buildDirectory".to_owned(), Value::from(params.build_dir.as_str()));
        if let Some(generator) = &params.tool.generator {
            payload.insert("generator".to_owned(), Value::from(generator.as_str()));
        }
        self.request("handshake", payload, &mut DiagnosticsParser::new())
            .await
            .map(drop)
    }

    async fn run_requests(
        &mut self,
        cache_arguments: &[String],
        parser: &mut DiagnosticsParser,
        replies: &mut ServerReplies,
    ) -> Result<(), ReaderError> {
        let mut payload = Map::new();
        if !cache_arguments.is_empty() {
            // Older servers drop the first cache argument.
            let args: Vec<&str> = std::iter::once("")
                .chain(cache_arguments.iter().map(String::as_str))
                .collect();
            payload.insert("cacheArguments".to_owned(), json!(args));
        }
        self.request("configure", payload, parser).await?;
        self.request("compute", Map::new(), parser).await?;
        replies.codemodel = self.request_as("codemodel", parser).await?;
        replies.inputs = self.request_as("cmakeInputs", parser).await?;
        let cache: ServerCache = self.request_as("cache", parser).await?;
        replies.cache = cache.entries();
        Ok(())
    }

    /// Configures and reads the whole model.
    ///
    /// A server-reported error still requests the cache; the error is
    /// returned in [`ServerReplies::error`].
    pub async fn configure(&mut self, cache_arguments: &[String], parser: &mut DiagnosticsParser) -> ServerReplies {
        let mut replies = ServerReplies::default();
        match self.run_requests(cache_arguments, parser, &mut replies).await {
            Ok(()) => tracing::info!("CMake project was parsed successfully"),
            Err(err @ ReaderError::ServerError(_)) => {
                tracing::warn!(error = %err, "Server reported an error, reading cache");
                match self.request_as::<ServerCache>("cache", parser).await {
                    Ok(cache) => replies.cache = cache.entries(),
                    Err(e) => tracing::debug!(error = %e, "No cache after server error"),
                }
                replies.error = Some(err);
            }
            Err(err) => replies.error = Some(err),
        }
        replies
    }
}

/// Starts a server for `params` and runs one configure session.
///
/// Bounded by the parameters' timeout and by `cancel`; both kill the
/// server.
pub async fn run_server(
    params: &BuildDirParameters,
    cache_arguments: &[String],
    parser: &mut DiagnosticsParser,
    cancel: &CancellationToken,
) -> Result<ServerReplies, ReaderError> {
    let command = ToolCommand::server(params);
    let mut child = command.spawn(Stdio::piped())?;
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        kill(&mut child).await;
        return Err(ReaderError::ServerError("CMake server pipes unavailable".to_owned()));
    };
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(line = %line, "Server stderr");
            }
        });
    }

    let mut session = ServerSession::new(stdout, stdin, params.build_dir.clone());
    let work = async {
        session.handshake(params).await?;
        Ok(session.configure(cache_arguments, parser).await)
    };
    let deadline = async {
        match params.timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };

    let result = tokio::select! {
        result = work => result,
        () = cancel.cancelled() => Err(ReaderError::Cancelled),
        () = deadline => Err(ReaderError::Timeout(params.timeout.unwrap_or_default())),
    };
    parser.flush();
    kill(&mut child).await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn frame(value: &Value) -> String {
        let mut buf = BytesMut::new();
        ServerCodec.encode(value.clone(), &mut buf).unwrap();
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn test_decode_split_frames() {
        let text = frame(&json!({"type": "hello"})) + &frame(&json!({"type": "signal", "name": "dirty"}));
        let mut codec = ServerCodec;
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in text.as_bytes().chunks(7) {
            buf.extend_from_slice(chunk);
            while let Some(value) = codec.decode(&mut buf).unwrap() {
                decoded.push(value);
            }
        }
        assert_eq!(decoded, [json!({"type": "hello"}), json!({"type": "signal", "name": "dirty"})]);
    }

    #[test]
    fn test_decode_skips_noise_before_marker() {
        let mut buf = BytesMut::from("some startup noise\n");
        buf.extend_from_slice(frame(&json!({"type": "hello"})).as_bytes());
        assert_eq!(ServerCodec.decode(&mut buf).unwrap(), Some(json!({"type": "hello"})));
        assert_eq!(ServerCodec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_decode_invalid_json() {
        let mut buf = BytesMut::from("[== \"CMake Server\" ==[\n{oops\n]== \"CMake Server\" ==]\n");
        assert!(matches!(ServerCodec.decode(&mut buf), Err(CodecError::Json(_))));
    }

    fn codemodel() -> Value {
        json!({"configurations": [{"name": "", "projects": [
            {"name": "Demo", "sourceDirectory": "/s", "targets": [
                {"name": "app", "type": "EXECUTABLE", "sourceDirectory": "/s", "buildDirectory": "/b",
                 "artifacts": ["/b/app"], "fileGroups": [
                    {"language": "CXX", "compileFlags": "-O2", "sources": ["main.cpp"],
                     "includePath": [{"path": "/s/include"}], "defines": ["X=1"]}
                 ]}
            ]},
            {"name": "Sub", "sourceDirectory": "/s/sub", "targets": [
                {"name": "app", "type": "EXECUTABLE", "sourceDirectory": "/s", "buildDirectory": "/b"}
            ]}
        ]}]})
    }

    /// Plays the server side of a session.
    async fn fake_server(io: DuplexStream, fail_configure: bool) {
        let (read, write) = tokio::io::split(io);
        let mut reader = FramedRead::new(read, ServerCodec);
        let mut writer = FramedWrite::new(write, ServerCodec);
        writer
            .send(json!({"type": "hello", "supportedProtocolVersions": [{"major": 1, "minor": 2}]}))
            .await
            .unwrap();

        while let Some(Ok(request)) = reader.next().await {
            let kind = request["type"].as_str().unwrap_or_default().to_owned();
            let cookie = request["cookie"].clone();
            let data = match kind.as_str() {
                "configure" => {
                    assert_eq!(request["cacheArguments"], json!(["", "-DA:BOOL=ON"]));
                    writer
                        .send(json!({"type": "message", "inReplyTo": "configure",
                                     "message": "CMake Error at CMakeLists.txt:3 (message):\n  boom"}))
                        .await
                        .unwrap();
                    if fail_configure {
                        writer
                            .send(json!({"type": "error", "inReplyTo": "configure", "cookie": cookie,
                                         "errorMessage": "Configuration failed."}))
                            .await
                            .unwrap();
                        continue;
                    }
                    json!({})
                }
                "codemodel" => codemodel(),
                "cmakeInputs" => json!({"sourceDirectory": "/s", "buildFiles": [
                    {"isCMake": false, "isTemporary": false, "sources": ["CMakeLists.txt"]}
                ]}),
                "cache" => json!({"cache": [
                    {"key": "CMAKE_BUILD_TYPE", "value": "Debug", "type": "STRING",
                     "properties": {"HELPSTRING": "Build type", "STRINGS": "Debug;Release"}}
                ]}),
                _ => json!({}),
            };
            let mut reply = data.as_object().cloned().unwrap_or_default();
            reply.insert("type".into(), json!("reply"));
            reply.insert("inReplyTo".into(), json!(kind));
            reply.insert("cookie".into(), cookie);
            writer.send(Value::Object(reply)).await.unwrap();
        }
    }

    async fn session(fail_configure: bool) -> (ServerReplies, DiagnosticsParser) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(fake_server(server, fail_configure));
        let (read, write) = tokio::io::split(client);
        let mut session = ServerSession::new(read, write, "/b");
        let params = BuildDirParameters::new("/s", "/b");
        session.handshake(&params).await.unwrap();
        let mut parser = DiagnosticsParser::new();
        let replies = session.configure(&["-DA:BOOL=ON".to_owned()], &mut parser).await;
        parser.flush();
        (replies, parser)
    }

    #[tokio::test]
    async fn test_session_reads_all_replies() {
        let (replies, parser) = session(false).await;
        assert!(replies.error.is_none());
        assert_eq!(replies.codemodel.configurations[0].projects.len(), 2);
        assert_eq!(replies.inputs.build_files.len(), 1);
        assert_eq!(replies.cache.len(), 1);
        assert_eq!(replies.cache[0].allowed_values, ["Debug", "Release"]);
        assert_eq!(parser.diagnostics().len(), 1);
    }

    #[tokio::test]
    async fn test_error_still_reads_cache() {
        let (replies, _) = session(true).await;
        let err = replies.error.unwrap();
        assert_eq!(err.to_string(), "Configuration failed.");
        assert_eq!(replies.cache.len(), 1);
        assert!(replies.codemodel.configurations.is_empty());
    }

    #[tokio::test]
    async fn test_connection_lost() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let (read, write) = tokio::io::split(client);
        let mut session = ServerSession::new(read, write, "/b");
        let err = session.handshake(&BuildDirParameters::new("/s", "/b")).await.unwrap_err();
        assert!(err.to_string().contains("Connection to CMake server lost"));
    }
}
