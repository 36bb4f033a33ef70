//! Command-handler boundary types.
//!
//! Protocol adapters (REST and friends) are external collaborators with
//! a narrow interface: they hand a [Request] to a handler and get back a
//! future-wrapped [Response]. Handlers must never block the calling
//! thread.

use crate::*;
use std::collections::BTreeMap;

/// A protocol-agnostic command request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    /// The command name.
    pub command: String,

    /// Command arguments.
    pub args: BTreeMap<String, String>,
}

/// A command response.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Whether the command succeeded.
    pub success: bool,

    /// The result value, if any.
    pub value: Option<String>,

    /// The error description, if the command failed.
    pub error: Option<String>,
}

impl Response {
    /// Construct a success response.
    pub fn ok(value: Option<String>) -> Self {
        Self {
            success: true,
            value,
            error: None,
        }
    }

    /// Construct a failure response.
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            value: None,
            error: Some(error.into()),
        }
    }
}

/// Handles command requests without blocking the caller.
pub trait RequestHandler: 'static + Send + Sync + std::fmt::Debug {
    /// The command names this handler accepts.
    fn supported_commands(&self) -> Vec<String>;

    /// Handle a request, returning a future-wrapped response.
    fn handle(&self, req: Request) -> BoxFut<'_, MeshResult<Response>>;
}

/// Trait-object [RequestHandler].
pub type DynRequestHandler = std::sync::Arc<dyn RequestHandler>;
