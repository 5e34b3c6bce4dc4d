//! Cross-window change notifications.
//!
//! One named broadcast channel shared by every window of the process. A window
//! publishes after its own mutation settles; every other window receives the
//! change and refetches. Delivery is best effort: nothing is persisted, and
//! windows that subscribe later never see earlier events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::config::NotifierConfig;
use crate::state::data::AnimeId;

/// What changed on the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Refetch or merge just this record
    Entity(AnimeId),
    /// Reload the whole collection
    Collection,
}

/// Window label, e.g. "main" or "details"
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowId(Arc<str>);

impl WindowId {
    pub fn new(label: &str) -> Self {
        Self(Arc::from(label))
    }

    pub fn label(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: WindowId,
    pub sequence: u64,
    pub change: Change,
}

/// Handle to the process-wide channel. Cheap to clone, one clone per window.
#[derive(Debug, Clone)]
pub struct Notifier {
    channel: Arc<str>,
    sender: broadcast::Sender<Envelope>,
    next_sequence: Arc<AtomicU64>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(&NotifierConfig::default())
    }
}

impl Notifier {
    pub fn new(config: &NotifierConfig) -> Self {
        // broadcast::channel panics on zero capacity
        let capacity = config.capacity.max(1);
        let (sender, _receiver) = broadcast::channel(capacity);
        Self {
            channel: Arc::from(config.channel.as_str()),
            sender,
            next_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Announce a change to every other subscribed window
    pub fn publish(&self, origin: &WindowId, change: Change) -> Envelope {
        let envelope = Envelope {
            origin: origin.clone(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed) + 1,
            change,
        };

        if self.sender.receiver_count() > 0 {
            // Only fails when every receiver is gone, which is fine
            let _ = self.sender.send(envelope.clone());
        }
        debug!(
            "[{}] {} published {:?} (#{})",
            self.channel,
            origin.label(),
            envelope.change,
            envelope.sequence
        );

        envelope
    }

    /// Start receiving changes published by other windows
    pub fn subscribe(&self, window: &WindowId) -> Subscription {
        Subscription {
            channel: self.channel.clone(),
            window: window.clone(),
            receiver: Some(self.sender.subscribe()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// One window's registration on the channel.
///
/// Dropping it or calling [`Subscription::unsubscribe`] releases the slot.
#[derive(Debug)]
pub struct Subscription {
    channel: Arc<str>,
    window: WindowId,
    receiver: Option<broadcast::Receiver<Envelope>>,
}

impl Subscription {
    /// Wait for the next change from another window.
    ///
    /// Returns `None` once unsubscribed or when the channel is gone. A lagging
    /// subscriber gets `Change::Collection` since it missed events.
    pub async fn recv(&mut self) -> Option<Change> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.recv().await {
                Ok(envelope) if envelope.origin == self.window => continue,
                Ok(envelope) => return Some(envelope.change),
                Err(RecvError::Lagged(missed)) => {
                    warn!(
                        "[{}] {} missed {} changes, forcing reload",
                        self.channel,
                        self.window.label(),
                        missed
                    );
                    return Some(Change::Collection);
                }
                Err(RecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]
    pub fn try_recv(&mut self) -> Option<Change> {
        loop {
            let receiver = self.receiver.as_mut()?;
            match receiver.try_recv() {
                Ok(envelope) if envelope.origin == self.window => continue,
                Ok(envelope) => return Some(envelope.change),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(
                        "[{}] {} missed {} changes, forcing reload",
                        self.channel,
                        self.window.label(),
                        missed
                    );
                    return Some(Change::Collection);
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.receiver = None;
                    return None;
                }
            }
        }
    }

    pub fn unsubscribe(&mut self) {
        if self.receiver.take().is_some() {
            debug!("[{}] {} unsubscribed", self.channel, self.window.label());
        }
    }

    pub fn is_active(&self) -> bool {
        self.receiver.is_some()
    }
}
