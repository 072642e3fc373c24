use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::invoice::LNInvoice;
use crate::model::{Payment, ReverseSwapInfo, SwapInfo};
use crate::prelude::*;

/// A lazy, unbounded sequence of events for one subscriber
pub type EventStream<T> = UnboundedReceiverStream<T>;

/// Payment, channel and service lifecycle events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SdkEvent {
    /// One of our invoices was paid
    InvoicePaid {
        /// Payment hash, hex
        payment_hash: String,
        /// The invoice, if we still know it
        bolt11: Option<String>,
    },
    /// An outgoing payment settled
    PaymentSucceed {
        /// The payment
        details: Payment,
    },
    /// An outgoing payment failed
    PaymentFailed {
        /// Failure reason
        error: String,
        /// Node id of the destination, if known
        node_id: Option<String>,
        /// The invoice, if any
        invoice: Option<LNInvoice>,
    },
    /// A sync completed
    Synced,
    /// The chain advanced
    NewBlock {
        /// New tip
        block: u32,
    },
    /// A submarine swap changed
    SwapUpdated {
        /// The swap
        details: SwapInfo,
    },
    /// A reverse swap changed
    ReverseSwapUpdated {
        /// The reverse swap
        details: ReverseSwapInfo,
    },
    /// A backup upload started
    BackupStarted,
    /// A backup upload finished
    BackupSucceeded,
    /// A backup upload failed
    BackupFailed {
        /// Failure reason
        error: String,
    },
}

/// A log line for the log stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Formatted line
    pub line: String,
    /// Level name
    pub level: String,
}

/// Fan-out of events to subscribers.
///
/// Delivery is best-effort: emitting never blocks, and a subscriber that went away is
/// dropped on the next emit.
pub struct EventBus<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        EventBus { subscribers: Mutex::new(Vec::new()) }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> EventStream<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).push(tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Deliver an event to every live subscriber
    pub fn emit(&self, event: T) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers, as of the last emit
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Drop all subscribers, ending their streams
    pub fn close(&self) {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
