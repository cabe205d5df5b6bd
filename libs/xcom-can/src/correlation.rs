//! Request/response correlation
//!
//! Every outbound request gets a token and a one-shot channel. The receive
//! path resolves the oldest pending call that the inbound frame answers:
//!
//! - same service kind,
//! - sent to the frame's source, or to a group the source belongs to,
//! - same info/parameter id, when the frame carries one (error frames don't).
//!
//! An error frame from any other source (the gateway itself) falls back to
//! the oldest pending call of its kind.
//!
//! A resolution nobody waits for is discarded. Dropping a [`PendingCall`]
//! (timeout, caller gave up) removes its entry, so a late answer can never be
//! picked up by a later call.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::addresses::Address;
use crate::codec::{Response, ServiceKind};
use crate::error::{Result, XcomError};
use crate::fault::ProtocolError;

/// Outcome delivered to a waiting call
pub type Resolution = std::result::Result<Response, ProtocolError>;

#[derive(Debug)]
struct PendingEntry {
    kind: ServiceKind,
    destination: Address,
    object_id: u16,
    tx: oneshot::Sender<Resolution>,
}

impl PendingEntry {
    fn answers(&self, kind: ServiceKind, source: Address, object_id: Option<u16>) -> bool {
        self.kind == kind
            && self.destination.is_answered_by(source)
            && object_id.map_or(true, |id| id == self.object_id)
    }
}

#[derive(Debug, Default)]
struct TableInner {
    next_token: u64,
    entries: BTreeMap<u64, PendingEntry>,
}

/// Pending requests keyed by token
#[derive(Debug, Default)]
pub struct CorrelationTable {
    inner: Mutex<TableInner>,
}

impl CorrelationTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a call before its request goes on the wire
    pub fn begin(
        self: &Arc<Self>,
        kind: ServiceKind,
        destination: Address,
        object_id: u16,
    ) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let token = {
            let mut inner = self.inner.lock();
            inner.next_token += 1;
            let token = inner.next_token;
            inner.entries.insert(
                token,
                PendingEntry {
                    kind,
                    destination,
                    object_id,
                    tx,
                },
            );
            token
        };

        PendingCall {
            token,
            kind,
            destination,
            table: Arc::clone(self),
            rx,
        }
    }

    /// Hand an inbound result to the oldest call it answers
    ///
    /// Returns `false` when no active call matched; the result is dropped.
    pub fn resolve(
        &self,
        kind: ServiceKind,
        source: Address,
        object_id: Option<u16>,
        result: Resolution,
    ) -> bool {
        let mut inner = self.inner.lock();
        let live = |entry: &&PendingEntry| !entry.tx.is_closed();
        let mut token = inner
            .entries
            .iter()
            .find(|(_, entry)| live(entry) && entry.answers(kind, source, object_id))
            .map(|(token, _)| *token);

        // The gateway reports absent or busy devices from its own address
        if token.is_none() && object_id.is_none() {
            token = inner
                .entries
                .iter()
                .find(|(_, entry)| live(entry) && entry.kind == kind)
                .map(|(token, _)| *token);
            if let Some(token) = token {
                debug!(
                    "{} error from address {} assigned to oldest pending call {}",
                    kind, source, token
                );
            }
        }

        let Some(token) = token else {
            debug!(
                "Ignoring {} result from address {} (object {:?}): no pending call",
                kind, source, object_id
            );
            return false;
        };

        let Some(entry) = inner.entries.remove(&token) else {
            return false;
        };
        // Receiver gone means the caller stopped waiting between lookup and send
        entry.tx.send(result).is_ok()
    }

    /// Drop every pending call; their waiters fail with `NotStarted`
    pub fn close_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    fn remove(&self, token: u64) {
        self.inner.lock().entries.remove(&token);
    }
}

/// Handle of one in-flight request
#[derive(Debug)]
pub struct PendingCall {
    token: u64,
    kind: ServiceKind,
    destination: Address,
    table: Arc<CorrelationTable>,
    rx: oneshot::Receiver<Resolution>,
}

impl PendingCall {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Wait for the matching response, error frame or deadline
    pub async fn wait(mut self, timeout: Duration) -> Result<Response> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(error))) => Err(XcomError::Protocol(error)),
            Ok(Err(_)) => Err(XcomError::NotStarted),
            Err(_) => Err(XcomError::Timeout {
                kind: self.kind,
                destination: self.destination.value(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.table.remove(self.token);
    }
}
