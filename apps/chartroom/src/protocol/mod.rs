//! JSON envelopes exchanged with the route server.
//!
//! Every text frame is an object with a `type` discriminator. Inbound frames
//! are decoded in two steps: first into an [`Envelope`] (type, optional
//! `request_id` echo, optional `binary` flag, remaining fields), then into
//! the closed [`ServerMessage`] sum type. Types this client does not know
//! land in [`ServerMessage::Other`] instead of failing.

pub mod tiles;

use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tracing::warn;

pub use tiles::{Extent, TileCrop, TileRangeWire, TiledImageHeader, Waypoint};

pub const TYPE_SET_SESSION: &str = "set_session";
pub const TYPE_UNAUTHORIZED: &str = "unauthorized";
pub const TYPE_RESULT: &str = "result";
pub const TYPE_TILED_IMAGE: &str = "tiled-image";
pub const TYPE_WAYPOINTS: &str = "waypoints";
pub const TYPE_DOCX: &str = "docx";
pub const TYPE_PNG: &str = "png";

const RESULT_EXCEPTION: &str = "exception";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid `{kind}` message: {source}")]
    Body {
        kind: String,
        source: serde_json::Error,
    },
    #[error("payload for `{0}` must be a json object")]
    PayloadNotObject(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub binary: bool,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether the next binary frame on the connection belongs to this
    /// message. Documents always carry one.
    pub fn announces_binary(&self) -> bool {
        self.binary || matches!(self.kind.as_str(), TYPE_DOCX | TYPE_PNG)
    }

    fn decode_body<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.body.clone())).map_err(|source| {
            ProtocolError::Body {
                kind: self.kind.clone(),
                source,
            }
        })
    }
}

/// A server-side exception reported while processing a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: String,
    pub message: String,
    pub trace: Option<String>,
    /// Name of the server handler that raised, when reported.
    pub event: Option<String>,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Docx,
    Png,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DocumentMeta {
    #[serde(skip_deserializing, default = "default_format")]
    pub format: DocumentFormat,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub filename: String,
}

fn default_format() -> DocumentFormat {
    DocumentFormat::Png
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SetSession {
        session_id: String,
    },
    Unauthorized {
        reason: String,
    },
    Fault(Fault),
    Outcome {
        result: String,
        message: Option<String>,
    },
    TiledImage(TiledImageHeader),
    Waypoints(Vec<Waypoint>),
    Document(DocumentMeta),
    Other {
        kind: String,
        body: Value,
    },
}

#[derive(Deserialize)]
struct SessionBody {
    session_id: String,
}

#[derive(Deserialize)]
struct UnauthorizedBody {
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct ResultBody {
    result: String,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    exception_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    traceback: Option<String>,
}

#[derive(Deserialize)]
struct WaypointsBody {
    #[serde(default)]
    waypoints: Vec<Waypoint>,
}

impl ServerMessage {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, ProtocolError> {
        let message = match envelope.kind.as_str() {
            TYPE_SET_SESSION => {
                let body: SessionBody = envelope.decode_body()?;
                ServerMessage::SetSession {
                    session_id: body.session_id,
                }
            }
            TYPE_UNAUTHORIZED => {
                let body: UnauthorizedBody = envelope.decode_body()?;
                ServerMessage::Unauthorized {
                    reason: body.reason,
                }
            }
            TYPE_RESULT => {
                let body: ResultBody = envelope.decode_body()?;
                if body.result == RESULT_EXCEPTION {
                    ServerMessage::Fault(Fault {
                        kind: body.exception_type.unwrap_or_else(|| "UnknownError".into()),
                        message: body.message.unwrap_or_default(),
                        trace: body.traceback,
                        event: body.event,
                    })
                } else {
                    ServerMessage::Outcome {
                        result: body.result,
                        message: body.message,
                    }
                }
            }
            TYPE_TILED_IMAGE => ServerMessage::TiledImage(envelope.decode_body()?),
            TYPE_WAYPOINTS => {
                let body: WaypointsBody = envelope.decode_body()?;
                ServerMessage::Waypoints(body.waypoints)
            }
            TYPE_DOCX | TYPE_PNG => {
                let mut meta: DocumentMeta = envelope.decode_body()?;
                meta.format = if envelope.kind == TYPE_DOCX {
                    DocumentFormat::Docx
                } else {
                    DocumentFormat::Png
                };
                ServerMessage::Document(meta)
            }
            other => ServerMessage::Other {
                kind: other.to_string(),
                body: Value::Object(envelope.body.clone()),
            },
        };
        Ok(message)
    }

    pub fn as_fault(&self) -> Option<&Fault> {
        match self {
            ServerMessage::Fault(fault) => Some(fault),
            _ => None,
        }
    }
}

/// A decoded inbound message, with the binary payload that followed it if
/// it announced one.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub kind: String,
    pub request_id: Option<String>,
    pub message: ServerMessage,
    pub attachment: Option<Bytes>,
}

impl Inbound {
    /// Fails only when the frame is not an envelope at all. A known type
    /// with a body that does not match keeps its routing fields and lands in
    /// [`ServerMessage::Other`], so request correlation and the binary side
    /// channel stay aligned.
    pub fn decode(text: &str) -> Result<(Self, bool), ProtocolError> {
        let envelope = Envelope::parse(text)?;
        let follows = envelope.announces_binary();
        let message = ServerMessage::from_envelope(&envelope).unwrap_or_else(|err| {
            warn!(
                target = "chartroom::protocol",
                error = %err,
                "keeping malformed message as untyped"
            );
            ServerMessage::Other {
                kind: envelope.kind.clone(),
                body: Value::Object(envelope.body.clone()),
            }
        });
        Ok((
            Self {
                kind: envelope.kind,
                request_id: envelope.request_id,
                message,
                attachment: None,
            },
            follows,
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub kind: String,
    pub request_id: Option<String>,
    pub payload: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            request_id: None,
            payload: Map::new(),
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Result<Self, ProtocolError> {
        match payload {
            Value::Object(map) => {
                self.payload = map;
                Ok(self)
            }
            Value::Null => Ok(self),
            _ => Err(ProtocolError::PayloadNotObject(self.kind)),
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut object = self.payload.clone();
        object.insert("type".into(), Value::String(self.kind.clone()));
        if let Some(id) = &self.request_id {
            object.insert("request_id".into(), Value::String(id.clone()));
        }
        Ok(serde_json::to_string(&Value::Object(object))?)
    }
}

/// Requests this client knows how to phrase, with the response types the
/// server answers them with.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    GetLowResMap,
    GetWaypointsMap,
    GetWaypoints,
    UpdateWaypoints(Vec<Waypoint>),
    GetPng,
    GetDocx,
    Step(u32),
}

impl ClientRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientRequest::GetLowResMap => "get-low-res-map",
            ClientRequest::GetWaypointsMap => "get-waypoints-map",
            ClientRequest::GetWaypoints => "get-waypoints",
            ClientRequest::UpdateWaypoints(_) => "update-wps",
            ClientRequest::GetPng => "get-png",
            ClientRequest::GetDocx => "get-docx",
            ClientRequest::Step(_) => "step",
        }
    }

    pub fn expected_responses(&self) -> &'static [&'static str] {
        Self::expected_for_kind(self.kind())
    }

    /// Reply types for a request known only by its wire type. Unknown
    /// types complete on `result`.
    pub fn expected_for_kind(kind: &str) -> &'static [&'static str] {
        match kind {
            "get-low-res-map" | "get-waypoints-map" => &[TYPE_TILED_IMAGE, TYPE_RESULT],
            "get-waypoints" | "update-wps" => &[TYPE_WAYPOINTS, TYPE_RESULT],
            "get-png" => &[TYPE_PNG, TYPE_RESULT],
            "get-docx" => &[TYPE_DOCX, TYPE_RESULT],
            _ => &[TYPE_RESULT],
        }
    }

    pub fn to_message(&self) -> OutboundMessage {
        let mut message = OutboundMessage::new(self.kind());
        match self {
            ClientRequest::UpdateWaypoints(waypoints) => {
                let list = waypoints
                    .iter()
                    .map(|wp| serde_json::to_value(wp).unwrap_or(Value::Null))
                    .collect();
                message.payload.insert("waypoints".into(), Value::Array(list));
            }
            ClientRequest::Step(step) => {
                message.payload.insert("step".into(), Value::from(*step));
            }
            _ => {}
        }
        message
    }
}
