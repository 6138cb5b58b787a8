//! A small typed wrapper over `tokio::sync::mpsc`, used by
//! [`crate::runtime::instance::TreeNodeInstance`] for its per-type
//! inbound message queues.

use tokio::sync::mpsc;

/// The sending half of a bounded channel of `T`s.
pub struct MessageTx<T> {
    inner: mpsc::Sender<T>,
}

/// The receiving half of a bounded channel of `T`s.
pub struct MessageRx<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> Clone for MessageTx<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

pub fn new_message_channel<T>(bound: usize) -> (MessageTx<T>, MessageRx<T>) {
    let (tx, rx) = mpsc::channel(bound);
    (MessageTx { inner: tx }, MessageRx { inner: rx })
}

impl<T> MessageTx<T> {
    /// Enqueues `value`. Returns `false` if the receiving half has
    /// already been dropped (the instance has shut down).
    pub async fn send(&self, value: T) -> bool {
        self.inner.send(value).await.is_ok()
    }

    /// Enqueues `value` without waiting for room in the queue. Returns
    /// `false` if the queue is full or the receiving half is gone.
    pub fn try_send(&self, value: T) -> bool {
        self.inner.try_send(value).is_ok()
    }
}

impl<T> MessageRx<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }
}
