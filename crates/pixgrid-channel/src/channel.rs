//! The channel contract consumed by the gateway, workers and fleet controller.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::ChannelResult;

/// Options for a single `receive` call.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveOptions {
    /// Upper bound on deliveries returned.
    pub max_messages: usize,
    /// How long to long-poll when nothing is visible.
    pub wait: Duration,
    /// How long delivered messages stay hidden from other receivers.
    pub visibility_timeout: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(30),
        }
    }
}

/// Opaque token identifying one delivery of a message.
///
/// Displayed as `{seq}:{token}`; a redelivery mints a new token, so a
/// receipt from an earlier delivery can no longer delete the message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt {
    pub(crate) seq: u64,
    pub(crate) token: String,
}

impl Receipt {
    pub(crate) fn mint(seq: u64) -> Self {
        Self {
            seq,
            token: Uuid::new_v4().simple().to_string(),
        }
    }
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.seq, self.token)
    }
}

/// One delivery of a message.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message_id: String,
    pub body: String,
    pub receipt: Receipt,
    /// How many times this message has been delivered, this one included.
    pub receive_count: u32,
}

/// At-least-once message channel with visibility timeouts.
///
/// A received message is hidden for the visibility timeout and reappears
/// unless it is deleted with the receipt of its latest delivery.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Enqueue `body`. Returns the new message id.
    async fn send(&self, body: &str) -> ChannelResult<String>;

    /// Receive up to `opts.max_messages` visible messages, waiting up to
    /// `opts.wait` for one to appear. May return an empty vec.
    async fn receive(&self, opts: &ReceiveOptions) -> ChannelResult<Vec<Delivery>>;

    /// Acknowledge a delivery, removing the message for good.
    async fn delete(&self, receipt: &Receipt) -> ChannelResult<()>;

    /// Number of messages currently visible to receivers.
    async fn approximate_length(&self) -> ChannelResult<u64>;
}
