//! In-process [`Host`] implementation.
//!
//! Used by the command-line harness and the test suites: it remembers every
//! publish, subscription and log line so callers can inspect what a script
//! did, and it can be told to refuse requests to exercise failure paths.

use crate::events::{ClientRef, EventKind};
use crate::host::{Host, Publish, log_level};
use crate::status::StatusCode;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// A message the host accepted, with its own copy of the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedMessage {
    pub client_id: Option<String>,
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retain: bool,
}

/// Connection details the standalone host can resolve.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub address: Option<String>,
    pub username: Option<String>,
}

#[derive(Default)]
struct HostState {
    clients: HashMap<u64, ClientInfo>,
    next_token: u64,
    subscriptions: BTreeSet<EventKind>,
    declined_kinds: BTreeSet<EventKind>,
    pinned_kinds: BTreeSet<EventKind>,
    publish_status: Option<StatusCode>,
    published: Vec<PublishedMessage>,
    logs: Vec<(i32, String)>,
    unsubscribe_calls: usize,
}

/// Host that lives entirely inside the current process.
#[derive(Default)]
pub struct StandaloneHost {
    state: Mutex<HostState>,
}

impl StandaloneHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HostState> {
        // A panic while holding this lock only happens in a failing test;
        // the recorded data is still usable.
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Add a client and return the handle events should carry for it.
    pub fn add_client(&self, info: ClientInfo) -> ClientRef {
        let mut state = self.state();
        state.next_token = state.next_token.saturating_add(1);
        let token = state.next_token;
        state.clients.insert(token, info);
        ClientRef::new(token)
    }

    /// Forget a client; later lookups through its handle fail.
    pub fn remove_client(&self, client: ClientRef) -> Option<ClientInfo> {
        self.state().clients.remove(&client.token())
    }

    pub fn find_client(&self, id: &str) -> Option<ClientRef> {
        self.state()
            .clients
            .iter()
            .find(|(_, info)| info.id == id)
            .map(|(token, _)| ClientRef::new(*token))
    }

    /// Refuse future `subscribe` calls for `kind`.
    pub fn decline_subscriptions(&self, kind: EventKind) {
        self.state().declined_kinds.insert(kind);
    }

    /// Refuse future `unsubscribe` calls for `kind`; the subscription stays.
    pub fn decline_unsubscribes(&self, kind: EventKind) {
        self.state().pinned_kinds.insert(kind);
    }

    /// Answer every future publish with `status` (`None` restores success).
    pub fn set_publish_status(&self, status: Option<StatusCode>) {
        self.state().publish_status = status;
    }

    pub fn subscriptions(&self) -> Vec<EventKind> {
        self.state().subscriptions.iter().copied().collect()
    }

    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        self.state().subscriptions.contains(&kind)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.state().unsubscribe_calls
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state().published.clone()
    }

    pub fn logs(&self) -> Vec<(i32, String)> {
        self.state().logs.clone()
    }

    /// Whether any log line at `level` contains `needle`.
    pub fn logged(&self, level: i32, needle: &str) -> bool {
        self.state()
            .logs
            .iter()
            .any(|(lvl, line)| *lvl == level && line.contains(needle))
    }

    fn lookup<F>(&self, client: ClientRef, field: F) -> Option<String>
    where
        F: FnOnce(&ClientInfo) -> Option<String>,
    {
        self.state().clients.get(&client.token()).and_then(field)
    }
}

impl Host for StandaloneHost {
    fn log_write(&self, level: i32, message: &str) {
        match level {
            log_level::DEBUG => tracing::debug!(target: "luaplug::host", "{message}"),
            log_level::INFO | log_level::NOTICE => {
                tracing::info!(target: "luaplug::host", "{message}");
            }
            log_level::WARNING => tracing::warn!(target: "luaplug::host", "{message}"),
            log_level::ERR => tracing::error!(target: "luaplug::host", "{message}"),
            other => tracing::info!(target: "luaplug::host", host_level = other, "{message}"),
        }
        self.state().logs.push((level, message.to_string()));
    }

    fn publish_copy(&self, msg: Publish<'_>) -> StatusCode {
        let mut state = self.state();
        if let Some(status) = state.publish_status {
            return status;
        }
        state.published.push(PublishedMessage {
            client_id: msg.client_id.map(str::to_string),
            topic: msg.topic.to_string(),
            payload: msg.payload.to_vec(),
            qos: msg.qos,
            retain: msg.retain,
        });
        StatusCode::SUCCESS
    }

    fn subscribe(&self, kind: EventKind) -> StatusCode {
        let mut state = self.state();
        if state.declined_kinds.contains(&kind) {
            return StatusCode::NOT_SUPPORTED;
        }
        state.subscriptions.insert(kind);
        StatusCode::SUCCESS
    }

    fn unsubscribe(&self, kind: EventKind) -> StatusCode {
        let mut state = self.state();
        state.unsubscribe_calls += 1;
        if state.pinned_kinds.contains(&kind) {
            return StatusCode::NOT_SUPPORTED;
        }
        if state.subscriptions.remove(&kind) {
            StatusCode::SUCCESS
        } else {
            StatusCode::NOT_SUPPORTED
        }
    }

    fn client_address(&self, client: ClientRef) -> Option<String> {
        self.lookup(client, |info| info.address.clone())
    }

    fn client_id(&self, client: ClientRef) -> Option<String> {
        self.lookup(client, |info| Some(info.id.clone()))
    }

    fn client_username(&self, client: ClientRef) -> Option<String> {
        self.lookup(client, |info| info.username.clone())
    }
}
