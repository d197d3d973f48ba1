//! JSON-RPC 2.0 MCP server over a byte stream.
//!
//! Frames are either newline-delimited JSON or `Content-Length` framed, and
//! each response uses the framing of the request it answers. Tool calls run
//! in their own tasks and responses are serialized through a single writer
//! task, so a long `wait_for_job` never blocks the other requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::tool_handlers::{ToolCallError, ToolRuntime};

const MCP_JSONRPC_VERSION: &str = "2.0";
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_ERROR_PARSE: i64 = -32700;
const MCP_ERROR_INVALID_REQUEST: i64 = -32600;
const MCP_ERROR_METHOD_NOT_FOUND: i64 = -32601;
const MCP_ERROR_INVALID_PARAMS: i64 = -32602;
const MCP_CONTENT_TYPE_TEXT: &str = "text";
const MCP_SERVER_NAME: &str = "sidekick";
const CONTENT_LENGTH_HEADER: &str = "content-length";
pub const MCP_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
pub const MCP_MAX_HEADER_BYTES: usize = 8 * 1024;
const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McpServeReport {
    pub processed_frames: usize,
    pub error_count: usize,
}

/// Wire framing of one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum McpFraming {
    #[default]
    Newline,
    ContentLength,
}

#[derive(Debug, Clone, PartialEq)]
pub struct McpFrame {
    pub framing: McpFraming,
    pub value: Value,
}

/// Decoder failures. Only `InvalidJson` leaves the stream in sync; the rest
/// end the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum McpFrameError {
    #[error("failed to parse mcp JSON frame: {message}")]
    InvalidJson {
        framing: McpFraming,
        consumed: usize,
        message: String,
    },
    #[error("invalid mcp header '{0}': expected 'Name: value' format")]
    InvalidHeader(String),
    #[error("invalid Content-Length header value '{0}'")]
    InvalidContentLength(String),
    #[error("mcp frame is missing Content-Length header")]
    MissingContentLength,
    #[error("mcp frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },
    #[error("unexpected eof while reading mcp frame")]
    Truncated,
}

impl McpFrameError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InvalidJson { .. })
    }
}

/// Decodes the first frame in `buffer`.
///
/// Returns `Ok(None)` when more bytes are needed (or, at `eof`, when only
/// whitespace remains). On success also returns the number of bytes consumed.
pub fn decode_mcp_frame(
    buffer: &[u8],
    eof: bool,
) -> Result<Option<(McpFrame, usize)>, McpFrameError> {
    let skipped = buffer
        .iter()
        .take_while(|byte| byte.is_ascii_whitespace())
        .count();
    let rest = &buffer[skipped..];
    match rest.first() {
        None => Ok(None),
        Some(b'{') | Some(b'[') => decode_newline_frame(rest, skipped, eof),
        Some(_) => decode_content_length_frame(rest, skipped, eof),
    }
}

fn decode_newline_frame(
    rest: &[u8],
    skipped: usize,
    eof: bool,
) -> Result<Option<(McpFrame, usize)>, McpFrameError> {
    let (line, consumed) = match rest.iter().position(|byte| *byte == b'\n') {
        Some(end) => (&rest[..end], skipped + end + 1),
        None if eof => (rest, skipped + rest.len()),
        None if rest.len() > MCP_MAX_FRAME_BYTES => {
            return Err(McpFrameError::FrameTooLarge {
                limit: MCP_MAX_FRAME_BYTES,
            })
        }
        None => return Ok(None),
    };
    if line.len() > MCP_MAX_FRAME_BYTES {
        return Err(McpFrameError::FrameTooLarge {
            limit: MCP_MAX_FRAME_BYTES,
        });
    }
    parse_frame_body(line, McpFraming::Newline, consumed).map(Some)
}

fn decode_content_length_frame(
    rest: &[u8],
    skipped: usize,
    eof: bool,
) -> Result<Option<(McpFrame, usize)>, McpFrameError> {
    let Some((header_len, body_start)) = find_header_end(rest) else {
        if rest.len() > MCP_MAX_HEADER_BYTES {
            return Err(McpFrameError::FrameTooLarge {
                limit: MCP_MAX_HEADER_BYTES,
            });
        }
        return if eof {
            Err(McpFrameError::Truncated)
        } else {
            Ok(None)
        };
    };
    if header_len > MCP_MAX_HEADER_BYTES {
        return Err(McpFrameError::FrameTooLarge {
            limit: MCP_MAX_HEADER_BYTES,
        });
    }

    let headers = String::from_utf8_lossy(&rest[..header_len]);
    let mut content_length = None;
    for line in headers.lines().map(|line| line.trim_end_matches('\r')) {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| McpFrameError::InvalidHeader(line.to_string()))?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH_HEADER) {
            let parsed = value
                .trim()
                .parse::<usize>()
                .map_err(|_| McpFrameError::InvalidContentLength(value.trim().to_string()))?;
            content_length = Some(parsed);
        }
    }
    let content_length = content_length.ok_or(McpFrameError::MissingContentLength)?;
    if content_length > MCP_MAX_FRAME_BYTES {
        return Err(McpFrameError::FrameTooLarge {
            limit: MCP_MAX_FRAME_BYTES,
        });
    }

    let body_end = body_start + content_length;
    if rest.len() < body_end {
        return if eof {
            Err(McpFrameError::Truncated)
        } else {
            Ok(None)
        };
    }
    parse_frame_body(
        &rest[body_start..body_end],
        McpFraming::ContentLength,
        skipped + body_end,
    )
    .map(Some)
}

/// Length of the header block and offset of the body, accepting either CRLF
/// or bare LF line endings.
fn find_header_end(bytes: &[u8]) -> Option<(usize, usize)> {
    let crlf = bytes
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|index| (index, index + 4));
    let lf = bytes
        .windows(2)
        .position(|window| window == b"\n\n")
        .map(|index| (index, index + 2));
    match (crlf, lf) {
        (Some(crlf), Some(lf)) => Some(if crlf.0 <= lf.0 { crlf } else { lf }),
        (found, None) | (None, found) => found,
    }
}

fn parse_frame_body(
    body: &[u8],
    framing: McpFraming,
    consumed: usize,
) -> Result<(McpFrame, usize), McpFrameError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => Ok((McpFrame { framing, value }, consumed)),
        Err(error) => Err(McpFrameError::InvalidJson {
            framing,
            consumed,
            message: error.to_string(),
        }),
    }
}

pub fn encode_mcp_frame(framing: McpFraming, value: &Value) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(value).context("failed to encode mcp jsonrpc response")?;
    Ok(match framing {
        McpFraming::Newline => {
            let mut encoded = body;
            encoded.push(b'\n');
            encoded
        }
        McpFraming::ContentLength => {
            let mut encoded = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
            encoded.extend_from_slice(&body);
            encoded
        }
    })
}

#[derive(Debug, Clone)]
struct McpJsonRpcRequest {
    id: Option<Value>,
    method: String,
    params: Map<String, Value>,
}

#[derive(Debug, Clone)]
struct McpDispatchError {
    id: Value,
    code: i64,
    message: String,
}

impl McpDispatchError {
    fn new(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            code,
            message: message.into(),
        }
    }
}

/// Shared state of one serving session.
struct McpSession {
    runtime: Arc<ToolRuntime>,
    responses: mpsc::UnboundedSender<Vec<u8>>,
    error_count: AtomicUsize,
}

impl McpSession {
    fn respond(&self, framing: McpFraming, frame: &Value) {
        match encode_mcp_frame(framing, frame) {
            Ok(encoded) => {
                if self.responses.send(encoded).is_err() {
                    tracing::warn!("mcp writer closed before response was sent");
                }
            }
            Err(error) => tracing::warn!(%error, "failed to encode mcp response"),
        }
    }

    fn respond_error(&self, framing: McpFraming, error: McpDispatchError) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.respond(framing, &jsonrpc_error_frame(error.id, error.code, error.message));
    }
}

/// Serves MCP requests from stdin to stdout until stdin closes.
pub async fn serve_mcp_stdio(runtime: Arc<ToolRuntime>) -> Result<McpServeReport> {
    let (report, _) = serve_mcp_jsonrpc(tokio::io::stdin(), tokio::io::stdout(), runtime).await?;
    Ok(report)
}

/// Serves MCP requests from `reader` until it closes, then waits for in-flight
/// tool calls and returns the writer once every response is flushed and every
/// background job started in the session is terminal.
pub async fn serve_mcp_jsonrpc<R, W>(
    mut reader: R,
    writer: W,
    runtime: Arc<ToolRuntime>,
) -> Result<(McpServeReport, W)>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (responses, outbound) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer_task = tokio::spawn(write_responses(writer, outbound));
    let session = Arc::new(McpSession {
        runtime: Arc::clone(&runtime),
        responses,
        error_count: AtomicUsize::new(0),
    });
    let mut calls = JoinSet::new();
    let mut processed_frames = 0usize;
    let mut buffer = Vec::<u8>::new();
    let mut chunk = vec![0_u8; READ_CHUNK_BYTES];
    let mut eof = false;
    let mut last_framing = McpFraming::default();

    'session: loop {
        loop {
            match decode_mcp_frame(&buffer, eof) {
                Ok(Some((frame, consumed))) => {
                    buffer.drain(..consumed);
                    processed_frames = processed_frames.saturating_add(1);
                    last_framing = frame.framing;
                    handle_frame(&session, &mut calls, frame);
                }
                Ok(None) => break,
                Err(McpFrameError::InvalidJson {
                    framing,
                    consumed,
                    message,
                }) => {
                    buffer.drain(..consumed);
                    processed_frames = processed_frames.saturating_add(1);
                    last_framing = framing;
                    session.respond_error(
                        framing,
                        McpDispatchError::new(
                            Value::Null,
                            MCP_ERROR_PARSE,
                            format!("failed to parse mcp JSON frame: {message}"),
                        ),
                    );
                }
                Err(error) => {
                    tracing::warn!(%error, "closing mcp session on unreadable input");
                    session.respond_error(
                        last_framing,
                        McpDispatchError::new(
                            Value::Null,
                            MCP_ERROR_PARSE,
                            format!("failed to read mcp frame: {error}"),
                        ),
                    );
                    break 'session;
                }
            }
        }
        if eof {
            break;
        }
        let read = reader
            .read(&mut chunk)
            .await
            .context("failed to read mcp input")?;
        if read == 0 {
            eof = true;
        } else {
            buffer.extend_from_slice(&chunk[..read]);
        }
    }

    while let Some(joined) = calls.join_next().await {
        if let Err(error) = joined {
            tracing::warn!(%error, "mcp tool call task failed");
        }
    }
    let error_count = session.error_count.load(Ordering::Relaxed);
    drop(session);
    let writer = writer_task
        .await
        .context("mcp writer task failed")?
        .context("failed to write mcp response")?;
    runtime.wait_for_background_jobs().await;
    Ok((
        McpServeReport {
            processed_frames,
            error_count,
        },
        writer,
    ))
}

async fn write_responses<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<Vec<u8>>) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(encoded) = outbound.recv().await {
        writer
            .write_all(&encoded)
            .await
            .context("failed to write mcp frame")?;
        writer.flush().await.context("failed to flush mcp frame output")?;
    }
    Ok(writer)
}

fn handle_frame(session: &Arc<McpSession>, calls: &mut JoinSet<()>, frame: McpFrame) {
    let framing = frame.framing;
    let McpJsonRpcRequest { id, method, params } = match parse_jsonrpc_request(&frame.value) {
        Ok(request) => request,
        Err(error) => {
            session.respond_error(framing, error);
            return;
        }
    };
    let Some(id) = id else {
        tracing::debug!(%method, "mcp notification received");
        return;
    };

    match method.as_str() {
        "initialize" => session.respond(framing, &jsonrpc_result_frame(id, handle_initialize())),
        "ping" => session.respond(framing, &jsonrpc_result_frame(id, json!({}))),
        "tools/list" => session.respond(
            framing,
            &jsonrpc_result_frame(id, handle_tools_list(&session.runtime)),
        ),
        "tools/call" => {
            let session = Arc::clone(session);
            calls.spawn(async move {
                match handle_tools_call(&session.runtime, &id, &params).await {
                    Ok(result) => session.respond(framing, &jsonrpc_result_frame(id, result)),
                    Err(error) => session.respond_error(framing, error),
                }
            });
        }
        other => session.respond_error(
            framing,
            McpDispatchError::new(
                id,
                MCP_ERROR_METHOD_NOT_FOUND,
                format!("unsupported method '{other}'"),
            ),
        ),
    }
}

fn parse_jsonrpc_request(value: &Value) -> Result<McpJsonRpcRequest, McpDispatchError> {
    let Some(object) = value.as_object() else {
        return Err(McpDispatchError::new(
            Value::Null,
            MCP_ERROR_INVALID_REQUEST,
            "jsonrpc request must be an object",
        ));
    };
    let id = object.get("id").cloned();
    let error_id = id.clone().unwrap_or(Value::Null);
    let jsonrpc = object
        .get("jsonrpc")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if jsonrpc != MCP_JSONRPC_VERSION {
        return Err(McpDispatchError::new(
            error_id,
            MCP_ERROR_INVALID_REQUEST,
            format!("jsonrpc must be '{MCP_JSONRPC_VERSION}'"),
        ));
    }
    let method = object
        .get("method")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            McpDispatchError::new(
                error_id.clone(),
                MCP_ERROR_INVALID_REQUEST,
                "jsonrpc request must include non-empty method",
            )
        })?;
    let params = match object.get("params") {
        Some(Value::Object(params)) => params.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => {
            return Err(McpDispatchError::new(
                error_id,
                MCP_ERROR_INVALID_PARAMS,
                "jsonrpc request params must be an object",
            ))
        }
    };
    Ok(McpJsonRpcRequest {
        id,
        method: method.to_string(),
        params,
    })
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION")
        },
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        }
    })
}

fn handle_tools_list(runtime: &ToolRuntime) -> Value {
    json!({
        "tools": runtime
            .descriptors()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema
                })
            })
            .collect::<Vec<_>>()
    })
}

async fn handle_tools_call(
    runtime: &ToolRuntime,
    id: &Value,
    params: &Map<String, Value>,
) -> Result<Value, McpDispatchError> {
    let tool_name = params
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            McpDispatchError::new(
                id.clone(),
                MCP_ERROR_INVALID_PARAMS,
                "tools/call requires non-empty field 'name'",
            )
        })?;
    let arguments = match params.get("arguments") {
        Some(Value::Object(arguments)) => arguments.clone(),
        None | Some(Value::Null) => Map::new(),
        Some(_) => {
            return Err(McpDispatchError::new(
                id.clone(),
                MCP_ERROR_INVALID_PARAMS,
                "tools/call field 'arguments' must be an object",
            ))
        }
    };

    tracing::debug!(tool = tool_name, "mcp tool call");
    match runtime.call(tool_name, &arguments).await {
        Ok(response) => Ok(mcp_tool_call_result(&response.text, response.is_error)),
        Err(error @ ToolCallError::UnknownTool(_)) => Err(McpDispatchError::new(
            id.clone(),
            MCP_ERROR_INVALID_PARAMS,
            error.to_string(),
        )),
    }
}

fn mcp_tool_call_result(text: &str, is_error: bool) -> Value {
    json!({
        "content": [{
            "type": MCP_CONTENT_TYPE_TEXT,
            "text": text
        }],
        "isError": is_error,
    })
}

fn jsonrpc_result_frame(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "result": result,
    })
}

fn jsonrpc_error_frame(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": MCP_JSONRPC_VERSION,
        "id": id,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}
