//! Pure-serde models of every externally visible document: declarative
//! graphs, per-edge message conversion rules, addon manifests, and app
//! configuration. This crate holds data shapes and their structural
//! validation only; no I/O and no runtime behavior.

mod config;
mod conversion;
mod graph;
mod manifest;

pub use config::{AppConfig, LogLevel, PredefinedGraph};
pub use conversion::{ConversionMode, ConversionType, MsgConversion, PerPropertyRule};
pub use graph::{Connection, Dest, Graph, MessageFlow, Node, NodeType};
pub use manifest::{AddonKind, Api, Manifest, MsgDecl, PropertyDoc};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The schema seam: graph payloads and property documents are validated
/// through this interface. The runtime consumes it and never implements
/// more than the permissive default.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, doc: &serde_json::Value) -> Result<()>;
}

/// Accepts every document.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveSchema;

impl SchemaValidator for PermissiveSchema {
    fn validate(&self, _doc: &serde_json::Value) -> Result<()> {
        Ok(())
    }
}
