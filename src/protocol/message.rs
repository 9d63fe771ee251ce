//! JSON-RPC message envelope

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_lsp::jsonrpc::{Id, Request, Response};

/// A single protocol message as it travels over any transport.
///
/// Requests carry an id and expect a correlated [`Response`]; notifications
/// are requests without an id.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Response(Response),
}

// `Request` also accepts a body without `method`, so the shape is decided
// by the presence of that key rather than by trying each variant.
impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let is_request = value
            .as_object()
            .ok_or_else(|| de::Error::custom("message is not a JSON object"))?
            .contains_key("method");

        if is_request {
            Request::deserialize(value)
                .map(Self::Request)
                .map_err(de::Error::custom)
        } else {
            Response::deserialize(value)
                .map(Self::Response)
                .map_err(de::Error::custom)
        }
    }
}

impl Message {
    pub fn request(id: i64, method: &str, params: Value) -> Self {
        Self::Request(
            Request::build(method.to_string())
                .id(id)
                .params(params)
                .finish(),
        )
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Self::Request(Request::build(method.to_string()).params(params).finish())
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Self::Request(request) if request.id().is_none())
    }

    /// Method name for requests and notifications
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(request) => Some(request.method()),
            Self::Response(_) => None,
        }
    }

    pub fn id(&self) -> Option<&Id> {
        match self {
            Self::Request(request) => request.id(),
            Self::Response(response) => Some(response.id()),
        }
    }
}

impl From<Request> for Message {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Response> for Message {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}
