//! ChannelStore — redb-backed message channels.
//!
//! Each channel is a table keyed by a monotonically increasing sequence
//! number, so iteration order is send order. Values are JSON-serialized
//! [`StoredMessage`] records carrying the visibility deadline and the
//! token of the latest delivery.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pixgrid_core::epoch_ms;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::channel::{Delivery, MessageChannel, Receipt, ReceiveOptions};
use crate::error::{ChannelError, ChannelResult};

macro_rules! map_err {
    ($variant:ident) => {
        |e| ChannelError::$variant(e.to_string())
    };
}

/// Last sequence number handed out, per channel.
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("channel_sequences");

/// How often a waiting receiver rechecks for messages whose visibility
/// timeout lapsed.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredMessage {
    id: String,
    body: String,
    visible_at_ms: u64,
    receive_count: u32,
    /// Token of the latest delivery; `None` until first received.
    receipt: Option<String>,
}

/// Opens channels that live in one redb database.
#[derive(Clone)]
pub struct ChannelStore {
    db: Arc<Database>,
    notifiers: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
    poll_interval: Duration,
}

impl ChannelStore {
    /// Open (or create) a persistent channel store at the given path.
    pub fn open(path: &Path) -> ChannelResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        debug!(?path, "channel store opened");
        Self::from_db(db)
    }

    /// Create an ephemeral in-memory channel store (for testing).
    pub fn open_in_memory() -> ChannelResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        debug!("in-memory channel store opened");
        Self::from_db(db)
    }

    fn from_db(db: Database) -> ChannelResult<Self> {
        let txn = db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(Self {
            db: Arc::new(db),
            notifiers: Arc::new(Mutex::new(HashMap::new())),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override how often waiting receivers rescan for expired visibility.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Get a handle to the named channel, creating it if absent. Handles
    /// to the same name share messages and wake each other's receivers.
    pub fn channel(&self, name: &str) -> ChannelResult<RedbChannel> {
        let notify = {
            let mut notifiers = self
                .notifiers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            notifiers
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Notify::new()))
                .clone()
        };

        let channel = RedbChannel {
            db: self.db.clone(),
            name: name.to_string(),
            table_name: format!("channel/{name}"),
            notify,
            poll_interval: self.poll_interval,
        };

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(channel.table()).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(channel = %name, "channel ready");
        Ok(channel)
    }
}

/// A single channel inside a [`ChannelStore`].
#[derive(Clone)]
pub struct RedbChannel {
    db: Arc<Database>,
    name: String,
    table_name: String,
    notify: Arc<Notify>,
    poll_interval: Duration,
}

impl RedbChannel {
    fn table(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.table_name)
    }

    /// Hide up to `max` visible messages for `visibility` and hand them out.
    fn claim(&self, max: usize, visibility: Duration) -> ChannelResult<Vec<Delivery>> {
        let now = epoch_ms();
        let visible_at_ms = now.saturating_add(visibility.as_millis() as u64);

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut deliveries = Vec::new();
        {
            let mut table = txn.open_table(self.table()).map_err(map_err!(Table))?;

            let mut ready = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (key, value) = entry.map_err(map_err!(Read))?;
                let msg: StoredMessage =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                if msg.visible_at_ms <= now {
                    ready.push((key.value(), msg));
                    if ready.len() >= max {
                        break;
                    }
                }
            }

            for (seq, mut msg) in ready {
                let receipt = Receipt::mint(seq);
                msg.visible_at_ms = visible_at_ms;
                msg.receive_count += 1;
                msg.receipt = Some(receipt.token.clone());

                let value = serde_json::to_vec(&msg).map_err(map_err!(Serialize))?;
                table
                    .insert(seq, value.as_slice())
                    .map_err(map_err!(Write))?;

                deliveries.push(Delivery {
                    message_id: msg.id,
                    body: msg.body,
                    receipt,
                    receive_count: msg.receive_count,
                });
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(deliveries)
    }
}

#[async_trait]
impl MessageChannel for RedbChannel {
    async fn send(&self, body: &str) -> ChannelResult<String> {
        let now = epoch_ms();
        let msg = StoredMessage {
            id: Uuid::new_v4().to_string(),
            body: body.to_string(),
            visible_at_ms: now,
            receive_count: 0,
            receipt: None,
        };
        let value = serde_json::to_vec(&msg).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let last = sequences
                .get(self.name.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            seq = last + 1;
            sequences
                .insert(self.name.as_str(), seq)
                .map_err(map_err!(Write))?;

            let mut table = txn.open_table(self.table()).map_err(map_err!(Table))?;
            table
                .insert(seq, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        self.notify.notify_waiters();
        trace!(channel = %self.name, seq, message_id = %msg.id, "message sent");
        Ok(msg.id)
    }

    async fn receive(&self, opts: &ReceiveOptions) -> ChannelResult<Vec<Delivery>> {
        let max = opts.max_messages.max(1);
        let deadline = Instant::now() + opts.wait;

        loop {
            // Register before scanning so a send between the scan and the
            // wait still wakes us.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deliveries = self.claim(max, opts.visibility_timeout)?;
            if !deliveries.is_empty() {
                trace!(channel = %self.name, count = deliveries.len(), "messages delivered");
                return Ok(deliveries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let nap = (deadline - now).min(self.poll_interval);
            let _ = tokio::time::timeout(nap, notified).await;
        }
    }

    async fn delete(&self, receipt: &Receipt) -> ChannelResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(self.table()).map_err(map_err!(Table))?;
            let current: Option<StoredMessage> = match table.get(receipt.seq).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match current {
                Some(msg) if msg.receipt.as_deref() == Some(receipt.token.as_str()) => {
                    table.remove(receipt.seq).map_err(map_err!(Write))?;
                }
                _ => return Err(ChannelError::InvalidReceipt(receipt.to_string())),
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        trace!(channel = %self.name, %receipt, "message deleted");
        Ok(())
    }

    async fn approximate_length(&self) -> ChannelResult<u64> {
        let now = epoch_ms();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(self.table()).map_err(map_err!(Table))?;
        let mut visible = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let msg: StoredMessage =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if msg.visible_at_ms <= now {
                visible += 1;
            }
        }
        Ok(visible)
    }
}
