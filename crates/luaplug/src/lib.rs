//! luaplug: run broker plugin logic as Lua scripts.
//!
//! The host loads a [`Plugin`] with a script path. The script's `init()`
//! registers callbacks through the `plug` namespace; the host then feeds
//! events to [`Plugin::dispatch`] and gets a [`StatusCode`] back. Everything
//! the host offers scripts (logging, publishing, client introspection,
//! subscriptions) goes through the [`Host`] trait, so the bridge itself never
//! links against a broker.
//!
//! ```text
//! host ──init──▶ Plugin ──▶ Interpreter (mlua) ──▶ script init()
//!   ▲                │                              │
//!   │                └──dispatch──▶ callback ◀──────┘ plug.register
//!   └──── Host trait ◀── plug.log / plug.publish / plug.client_*
//! ```
//!
//! [`StandaloneHost`] is an in-process host used by the `luaplug` CLI and
//! the tests.

pub mod config;
mod dispatch;
pub mod error;
pub mod events;
pub mod host;
pub mod interpreter;
pub mod plugin;
mod primitives;
mod registry;
pub mod standalone;
pub mod status;
pub mod translate;

pub use config::PluginConfig;
pub use error::{Error, Result};
pub use events::{AclAccess, ClientRef, EventKind, EventPayload};
pub use host::{Host, Publish, log_level};
pub use interpreter::Interpreter;
pub use plugin::{API_VERSION, LifecycleState, Plugin, load_script, negotiate_version};
pub use standalone::{ClientInfo, PublishedMessage, StandaloneHost};
pub use status::StatusCode;
pub use translate::{ReturnConvention, translate};
