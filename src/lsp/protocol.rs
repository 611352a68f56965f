/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! JSON-RPC message types and the Content-Length frame codec.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

fn default_null() -> serde_json::Value {
    serde_json::Value::Null
}

/// An outbound or inbound request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id, echoed by the matching response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters. Omitted from the wire when null.
    #[serde(default = "default_null", skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl RequestMessage {
    /// Builds a request with the current protocol version.
    pub fn new(id: RequestId, method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// A response to a request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request being answered.
    pub id: Option<RequestId>,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    /// Builds a successful response.
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Builds an error response.
    pub fn failure(id: RequestId, code: i64, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code,
                message,
                data: None,
            }),
        }
    }
}

/// A notification: no id, no response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters. Omitted from the wire when null.
    #[serde(default = "default_null", skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl NotificationMessage {
    /// Builds a notification with the current protocol version.
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC request id.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (what this client always sends).
    Number(i64),
    /// String id (servers may use these for their own requests).
    String(String),
}

/// The error member of a failed response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// A decoded inbound message, classified by shape.
#[derive(Debug)]
pub enum IncomingMessage {
    /// Answer to one of our requests.
    Response(ResponseMessage),
    /// Request issued by the server.
    Request(RequestMessage),
    /// Notification issued by the server.
    Notification(NotificationMessage),
}

/// A frame that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Header block is not UTF-8.
    #[error("frame header is not valid UTF-8")]
    InvalidHeader,
    /// Header block carries no usable `Content-Length`.
    #[error("frame header has no valid Content-Length: {0:?}")]
    MissingContentLength(String),
    /// Body is not UTF-8.
    #[error("frame body of {0} bytes is not valid UTF-8")]
    InvalidBody(usize),
    /// Declared body length exceeds [`MAX_CONTENT_LENGTH`].
    #[error("frame declares {0} bytes, limit is {MAX_CONTENT_LENGTH}")]
    TooLarge(usize),
    /// No header terminator within [`MAX_HEADER_LENGTH`] bytes.
    #[error("frame header exceeds {MAX_HEADER_LENGTH} bytes")]
    HeaderTooLarge,
}

impl FrameError {
    /// Returns true if the stream cannot be resynchronised after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::TooLarge(_) | Self::HeaderTooLarge)
    }
}

/// Classifies a decoded JSON value as a response, request, or notification.
///
/// # Errors
///
/// Returns a description of the problem if the value matches none of the
/// three JSON-RPC message shapes.
pub fn classify(value: serde_json::Value) -> Result<IncomingMessage, String> {
    let has_method = value.get("method").is_some_and(serde_json::Value::is_string);
    let has_id = value.get("id").is_some_and(|id| !id.is_null());

    // A null id is legal on an error for a request the server could not parse
    let is_response = has_id
        || value.get("result").is_some()
        || value.get("error").is_some();

    match (has_method, is_response) {
        (true, true) => serde_json::from_value(value)
            .map(IncomingMessage::Request)
            .map_err(|e| format!("malformed request: {e}")),
        (true, false) => serde_json::from_value(value)
            .map(IncomingMessage::Notification)
            .map_err(|e| format!("malformed notification: {e}")),
        (false, true) => serde_json::from_value(value)
            .map(IncomingMessage::Response)
            .map_err(|e| format!("malformed response: {e}")),
        (false, false) => Err(format!(
            "message has neither method nor id nor result: {value}"
        )),
    }
}

/// Largest body accepted from a server.
pub const MAX_CONTENT_LENGTH: usize = 64 * 1024 * 1024;

/// Largest header block accepted before the blank line.
pub const MAX_HEADER_LENGTH: usize = 8 * 1024;

/// Encodes a message body as a Content-Length framed byte vector.
pub fn encode_frame(body: &str) -> Vec<u8> {
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(body.as_bytes());
    frame
}

/// Parses one Content-Length framed message off the front of `buffer`.
///
/// Returns `Ok(None)` when more bytes are needed. A malformed frame is
/// consumed from the buffer before the error is returned, so the caller
/// can report it and keep reading.
///
/// # Errors
///
/// Returns a [`FrameError`] for a non-UTF-8 header, a missing or invalid
/// `Content-Length`, or a non-UTF-8 body. Oversized frames are also errors;
/// see [`FrameError::is_fatal`].
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>, FrameError> {
    let Some(header_end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") else {
        if buffer.len() > MAX_HEADER_LENGTH {
            return Err(FrameError::HeaderTooLarge);
        }
        return Ok(None);
    };

    let Ok(headers) = std::str::from_utf8(&buffer[..header_end]) else {
        buffer.advance(header_end + 4);
        return Err(FrameError::InvalidHeader);
    };

    let content_length = headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok());

    let Some(content_length) = content_length else {
        let headers = headers.to_string();
        buffer.advance(header_end + 4);
        return Err(FrameError::MissingContentLength(headers));
    };

    if content_length > MAX_CONTENT_LENGTH {
        buffer.advance(header_end + 4);
        return Err(FrameError::TooLarge(content_length));
    }

    let total_len = header_end + 4 + content_length;
    if buffer.len() < total_len {
        return Ok(None);
    }

    buffer.advance(header_end + 4);
    let body = buffer.split_to(content_length);
    String::from_utf8(body.to_vec())
        .map(Some)
        .map_err(|_| FrameError::InvalidBody(content_length))
}
