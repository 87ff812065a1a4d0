//! ConnectionRegistry - 通知配信のライブクライアント側
//!
//! One registry is created per process and injected into the dispatcher as
//! its `DeliveryChannel`. Each connected client gets a bounded
//! `tokio::sync::mpsc` receiver keyed by recipient; a user may hold several
//! connections (tabs, devices).
//!
//! # Delivery rules
//! - `try_send` only, the sweep never waits on a slow client
//! - a full buffer drops the push for that connection (the client polls)
//! - closed connections are pruned on the next push

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::{DeliveryError, Notification, Recipient};
use crate::ports::DeliveryChannel;

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Recipient, Vec<mpsc::Sender<Notification>>>>,
    buffer: usize,
}

impl ConnectionRegistry {
    /// `buffer` is the per-connection queue depth (at least 1).
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Register a client connection for `recipient`.
    pub fn connect(&self, recipient: Recipient) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.lock().entry(recipient).or_default().push(tx);
        rx
    }

    /// Live connections for `recipient` (closed ones are not counted).
    pub fn connection_count(&self, recipient: &Recipient) -> usize {
        self.lock()
            .get(recipient)
            .map(|senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Recipient, Vec<mpsc::Sender<Notification>>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl DeliveryChannel for ConnectionRegistry {
    fn push(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let recipient = notification.recipient;
        let mut connections = self.lock();
        let Some(senders) = connections.get_mut(&recipient) else {
            return Err(DeliveryError::NotConnected(recipient.to_string()));
        };

        let mut delivered = 0usize;
        let mut full = 0usize;
        senders.retain(|tx| match tx.try_send(notification.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                full += 1;
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        if senders.is_empty() {
            connections.remove(&recipient);
            return Err(DeliveryError::Closed(recipient.to_string()));
        }
        if delivered == 0 && full > 0 {
            return Err(DeliveryError::Backpressure(recipient.to_string()));
        }
        Ok(())
    }
}
