// src/message.rs

//! Wire message model.
//!
//! Defines the three message kinds exchanged over a connection, the
//! text codec for them, and the two structured error types used to
//! signal request failures.
//!
//! The wire format is one JSON object per frame, discriminated by a
//! truthy `request` / `response` / `notification` field:
//!
//! ```text
//! { "request": true, "id": 3, "method": "join", "data": { ... } }
//! { "response": true, "id": 3, "ok": true, "data": { ... } }
//! { "response": true, "id": 3, "ok": false, "errorCode": 403, "errorReason": "..." }
//! { "notification": true, "method": "bye", "data": { ... } }
//! ```
//!
//! Parsing and serialization here are pure and synchronous; transport
//! concerns live in [`crate::transport`].

use serde_json::{json, Value};
use thiserror::Error;

use crate::{Error, Result};

/// A correlated message expecting exactly one [`Response`].
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Identifies this exchange among the sender's outstanding requests.
    pub id: u64,
    /// Name of the remote operation.
    pub method: String,
    /// Request payload; `{}` when the sender supplied none.
    pub data: Value,
}

/// Success or failure reply, correlated to a [`Request`] by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered.
    pub id: u64,
    /// `Ok(data)` for a success response, `Err(coded)` for a failure one.
    pub result: std::result::Result<Value, CodedError>,
}

impl Response {
    /// Build a success response for `id`.
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            result: Ok(data),
        }
    }

    /// Build a failure response for `id`.
    pub fn err(id: u64, error: CodedError) -> Self {
        Self {
            id,
            result: Err(error),
        }
    }
}

/// A fire-and-forget message with no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Name of the remote operation.
    pub method: String,
    /// Notification payload; `{}` when the sender supplied none.
    pub data: Value,
}

/// The wire-level sum type.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// Application-level failure reported in answer to a request.
///
/// Carried on the wire as `errorCode`/`errorReason` of a failure
/// [`Response`], and surfaced to the caller awaiting
/// [`Peer::request`](crate::Peer::request) as
/// [`Error::Response`](crate::Error::Response).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct CodedError {
    pub code: i64,
    pub message: String,
}

impl CodedError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// A [`CodedError`] bound to the inbound [`Request`] it answers.
///
/// Used only on the answering side, via
/// [`Peer::respond_error`](crate::Peer::respond_error), to build a
/// failure [`Response`] carrying the bound request's id.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct RequestError {
    /// The request being rejected.
    pub request: Request,
    #[source]
    pub error: CodedError,
}

impl RequestError {
    pub fn new(request: Request, code: i64, message: impl Into<String>) -> Self {
        Self {
            request,
            error: CodedError::new(code, message),
        }
    }

    /// The failure response this error describes.
    pub(crate) fn into_response(self) -> Response {
        Response::err(self.request.id, self.error)
    }
}

/// Discriminator truthiness, matching the protocol's JS lineage:
/// absent, `null`, `false`, `0` and `""` are falsy; everything else
/// is truthy.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn data_or_default(object: &serde_json::Map<String, Value>) -> Value {
    match object.get("data") {
        Some(Value::Null) | None => json!({}),
        Some(data) => data.clone(),
    }
}

impl Message {
    /// Parse one raw text frame into a [`Message`].
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidFormat`] if `raw` is not valid JSON or decodes
    ///   to something other than an object.
    /// - [`Error::UnknownKind`] if none of the three discriminator
    ///   fields is truthy.
    /// - [`Error::InvalidField`] if a mandatory field (`id`, `method`,
    ///   `errorCode`, `errorReason`) is missing or ill-typed.
    pub fn parse(raw: &str) -> Result<Message> {
        let value: Value =
            serde_json::from_str(raw).map_err(|err| Error::InvalidFormat(err.to_string()))?;

        let object = value
            .as_object()
            .ok_or_else(|| Error::InvalidFormat("not a JSON object".into()))?;

        // Dispatch order matters: request, then response, then notification.
        if truthy(object.get("request")) {
            let method = object
                .get("method")
                .and_then(Value::as_str)
                .ok_or(Error::InvalidField("method"))?;
            let id = object
                .get("id")
                .and_then(Value::as_u64)
                .ok_or(Error::InvalidField("id"))?;

            Ok(Message::Request(Request {
                id,
                method: method.to_owned(),
                data: data_or_default(object),
            }))
        } else if truthy(object.get("response")) {
            let id = object
                .get("id")
                .and_then(Value::as_u64)
                .ok_or(Error::InvalidField("id"))?;

            if truthy(object.get("ok")) {
                Ok(Message::Response(Response::ok(id, data_or_default(object))))
            } else {
                let code = object
                    .get("errorCode")
                    .and_then(Value::as_i64)
                    .ok_or(Error::InvalidField("errorCode"))?;
                let reason = object
                    .get("errorReason")
                    .and_then(Value::as_str)
                    .ok_or(Error::InvalidField("errorReason"))?;

                Ok(Message::Response(Response::err(
                    id,
                    CodedError::new(code, reason),
                )))
            }
        } else if truthy(object.get("notification")) {
            let method = object
                .get("method")
                .and_then(Value::as_str)
                .ok_or(Error::InvalidField("method"))?;

            Ok(Message::Notification(Notification {
                method: method.to_owned(),
                data: data_or_default(object),
            }))
        } else {
            Err(Error::UnknownKind)
        }
    }

    /// Serialize this message to one text frame.
    ///
    /// The structural inverse of [`Message::parse`] for well-formed
    /// messages. `data` is always emitted, even when defaulted, so
    /// both directions stay symmetric.
    pub fn serialize(&self) -> String {
        let value = match self {
            Message::Request(request) => json!({
                "request": true,
                "id": request.id,
                "method": request.method,
                "data": request.data,
            }),
            Message::Response(response) => match &response.result {
                Ok(data) => json!({
                    "response": true,
                    "id": response.id,
                    "ok": true,
                    "data": data,
                }),
                Err(error) => json!({
                    "response": true,
                    "id": response.id,
                    "ok": false,
                    "errorCode": error.code,
                    "errorReason": error.message,
                }),
            },
            Message::Notification(notification) => json!({
                "notification": true,
                "method": notification.method,
                "data": notification.data,
            }),
        };

        value.to_string()
    }
}
