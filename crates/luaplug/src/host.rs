//! Interface the bridge needs from the host broker.
//!
//! Everything the broker does (delivery, persistence, client bookkeeping) is
//! behind this trait. The bridge only calls it while holding the plugin gate,
//! but implementations must still be `Send + Sync` because the gate may be
//! entered from any broker thread.

use crate::events::{ClientRef, EventKind};
use crate::status::StatusCode;

/// Severity values of the host log sink.
pub mod log_level {
    pub const INFO: i32 = 0x01;
    pub const NOTICE: i32 = 0x02;
    pub const WARNING: i32 = 0x04;
    pub const ERR: i32 = 0x08;
    pub const DEBUG: i32 = 0x10;

    /// Constants exported to scripts.
    pub const NAMED: [(&str, i32); 5] = [
        ("LOG_DEBUG", DEBUG),
        ("LOG_INFO", INFO),
        ("LOG_NOTICE", NOTICE),
        ("LOG_WARNING", WARNING),
        ("LOG_ERR", ERR),
    ];
}

/// A message handed to [`Host::publish_copy`].
///
/// `payload` is only borrowed for the call; hosts that queue the message
/// must copy it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Publish<'a> {
    pub client_id: Option<&'a str>,
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: u8,
    pub retain: bool,
}

/// Bridge → host operations.
pub trait Host: Send + Sync + 'static {
    /// Write a line to the host log. `level` is passed through unchecked.
    fn log_write(&self, level: i32, message: &str);

    /// Fire-and-forget publish of a copy of `msg`.
    fn publish_copy(&self, msg: Publish<'_>) -> StatusCode;

    /// Start delivering `kind` to this plugin.
    fn subscribe(&self, kind: EventKind) -> StatusCode;

    /// Stop delivering `kind` to this plugin.
    fn unsubscribe(&self, kind: EventKind) -> StatusCode;

    fn client_address(&self, client: ClientRef) -> Option<String>;

    fn client_id(&self, client: ClientRef) -> Option<String>;

    fn client_username(&self, client: ClientRef) -> Option<String>;
}
