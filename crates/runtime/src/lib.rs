//! The graph runtime: apps host engines, an engine runs one graph of
//! extensions grouped onto runloop threads, and typed messages (commands,
//! results, data, audio and video frames) flow between them — across
//! threads through mailboxes, and across processes through protocol
//! addons.
//!
//! The crate layering, leaves first: `value` (dynamic trees), `message`
//! (the message model), `models` (declarative documents), and this crate
//! (scheduling, lifecycle, routing, and the protocol seam).

pub mod addon;
mod app;
mod connection;
mod convert;
mod engine;
mod env;
mod error;
mod extension;
mod group;
pub mod metadata;
pub mod protocol;
mod remote;
pub(crate) mod runloop;
pub mod telemetry;
pub mod testing;

pub use addon::{
    register_addon_as_extension, register_addon_as_protocol, AddonFactory, AddonLoader,
    AddonRegistry, ExtensionAddon,
};
pub use app::{App, AppOptions, ENV_APP_BASE_DIR, ENV_DISABLE_ADDON_UNREGISTER};
pub use env::{Env, EnvProxy, ResultHandler};
pub use error::{Error, ErrorCode, Result};
pub use extension::{Extension, LifecycleState};
pub use protocol::{Protocol, ProtocolAddon, ProtocolEvents, ProtocolRole};
pub use telemetry::Telemetry;

// Re-export the sibling crates under their conventional names, so
// embedding hosts and extensions depend on `runtime` alone.
pub use message;
pub use models;
pub use value;
