//! The background aggregator.
//!
//! [`Background`] receives messages from any number of producer tabs and
//! consumers. Tab state is reconciled synchronously on arrival, under one lock,
//! and the resulting snapshot update is queued in the same critical section, so
//! the writer sees updates in exactly the order tab state evolved.

use std::sync::{Arc, Mutex, PoisonError};

use aq_core::{
    AggregatorConfig, Clock, Inbound, Plan, SanitizedExport, Snapshot, SnapshotUpdate, TabId,
    TabTracker, plan,
};
use aq_db::SnapshotStore;
use serde::Serialize;

use crate::queue::{Pending, QueueError, UpdateQueue};

/// Response to one inbound message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub success: bool,
    /// The full snapshot, for `get_data`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Snapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub const fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn with_data(snapshot: Snapshot) -> Self {
        Self {
            success: true,
            data: Some(snapshot),
            error: None,
        }
    }

    pub fn failed(err: &QueueError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
        }
    }
}

enum Dispatched {
    Read(Pending<Snapshot>),
    Write(Pending<()>),
    Ignored,
}

/// The aggregator instance: tab tracker, writer queue and injected clock.
pub struct Background {
    queue: UpdateQueue,
    tabs: Mutex<TabTracker>,
    config: AggregatorConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Background {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Background")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Background {
    /// Starts the writer over `store`.
    pub fn spawn<S>(store: S, config: AggregatorConfig, clock: Arc<dyn Clock>) -> Result<Self, QueueError>
    where
        S: SnapshotStore + 'static,
    {
        let queue = UpdateQueue::spawn(store)?;
        tracing::debug!(
            session_timeout_secs = config.session_timeout.num_seconds(),
            local_offset = %config.local_offset,
            "background aggregator started"
        );
        Ok(Self {
            queue,
            tabs: Mutex::new(TabTracker::new()),
            config,
            clock,
        })
    }

    /// Handles one message. Never fails: internal errors become a
    /// `success: false` reply.
    pub async fn handle(&self, inbound: Inbound) -> Reply {
        match self.dispatch(inbound) {
            Dispatched::Read(pending) => match pending.wait().await {
                Ok(snapshot) => Reply::with_data(snapshot),
                Err(err) => Reply::failed(&err),
            },
            Dispatched::Write(pending) => match pending.wait().await {
                Ok(()) => Reply::ok(),
                Err(err) => Reply::failed(&err),
            },
            Dispatched::Ignored => Reply::ok(),
        }
    }

    /// Parses and handles one wire message.
    ///
    /// Malformed payloads are logged and dropped; unknown types are ignored.
    pub async fn handle_json(&self, input: &str) -> Reply {
        match Inbound::from_json(input) {
            Ok(Some(inbound)) => self.handle(inbound).await,
            Ok(None) => Reply::ok(),
            Err(err) => {
                tracing::warn!(error = %err, "dropping malformed message");
                Reply::ok()
            }
        }
    }

    /// The browser closed `tab_id`.
    pub async fn tab_removed(&self, tab_id: TabId) -> Reply {
        self.handle(Inbound::TabRemoved { tab_id }).await
    }

    /// Current snapshot, after every update queued so far.
    pub async fn snapshot(&self) -> Result<Snapshot, QueueError> {
        self.queue.read().await
    }

    /// Sanitized export of the current snapshot.
    pub async fn export(&self) -> Result<SanitizedExport, QueueError> {
        let snapshot = self.queue.read().await?;
        Ok(snapshot.export(self.clock.now()))
    }

    /// Drains queued updates and stops the writer.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        tracing::debug!("background aggregator stopped");
    }

    fn dispatch(&self, inbound: Inbound) -> Dispatched {
        let mut tabs = self.tabs.lock().unwrap_or_else(PoisonError::into_inner);
        match plan(&mut tabs, inbound, self.clock.now()) {
            Plan::Read => Dispatched::Read(self.queue.submit_read()),
            Plan::Ignore => Dispatched::Ignored,
            Plan::Update(SnapshotUpdate::ClearAll) => Dispatched::Write(self.queue.submit_clear()),
            Plan::Update(update) => {
                let config = self.config;
                Dispatched::Write(self.queue.submit(move |snapshot| update.apply(snapshot, &config)))
            }
        }
    }
}
