//! Transport abstraction over the sync wire protocol.

use crate::error::{SyncError, SyncResult};
use citesync_protocol::{ChangeNotification, PullRequest, PullResponse, PushRequest, PushResponse};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// The client's connection to a sync server.
///
/// Implementations own retry-free request execution; retry and backoff
/// policy belongs to the session. All methods may be called from a
/// background sync thread.
pub trait SyncTransport: Send + Sync {
    /// Requests the batch of changes after a checkpoint.
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse>;

    /// Submits local updates and tombstones.
    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Opens a change-notification subscription.
    ///
    /// The receiver yields a notification whenever another client's push
    /// lands on the server. Disconnection closes the channel.
    fn subscribe(&self) -> SyncResult<Receiver<ChangeNotification>>;

    /// Returns true if the transport considers itself connected.
    fn is_connected(&self) -> bool;

    /// Tears down the connection and any subscription.
    fn close(&self);
}

/// Scripted transport for tests.
///
/// Pull and push responses are queued ahead of time and consumed in
/// order. An exhausted queue yields a retryable transport error, which
/// lets tests exercise the retry path without a network.
#[derive(Default)]
pub struct MockTransport {
    pulls: Mutex<VecDeque<SyncResult<PullResponse>>>,
    pushes: Mutex<VecDeque<SyncResult<PushResponse>>>,
    pull_log: Mutex<Vec<PullRequest>>,
    push_log: Mutex<Vec<PushRequest>>,
    notifier: Mutex<Option<Sender<ChangeNotification>>>,
    connected: AtomicBool,
}

impl MockTransport {
    /// Creates a connected transport with empty queues.
    #[must_use]
    pub fn new() -> Self {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    /// Queues the next pull response.
    pub fn queue_pull(&self, response: PullResponse) {
        self.pulls.lock().push_back(Ok(response));
    }

    /// Queues a pull failure.
    pub fn queue_pull_error(&self, error: SyncError) {
        self.pulls.lock().push_back(Err(error));
    }

    /// Queues the next push response.
    pub fn queue_push(&self, response: PushResponse) {
        self.pushes.lock().push_back(Ok(response));
    }

    /// Queues a push failure.
    pub fn queue_push_error(&self, error: SyncError) {
        self.pushes.lock().push_back(Err(error));
    }

    /// Returns the pull requests observed so far.
    #[must_use]
    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.pull_log.lock().clone()
    }

    /// Returns the push requests observed so far.
    #[must_use]
    pub fn push_requests(&self) -> Vec<PushRequest> {
        self.push_log.lock().clone()
    }

    /// Delivers a change notification to the active subscriber, if any.
    pub fn notify(&self, notification: ChangeNotification) {
        if let Some(sender) = self.notifier.lock().as_ref() {
            let _ = sender.send(notification);
        }
    }

    /// Simulates a dropped connection.
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.notifier.lock().take();
    }
}

impl SyncTransport for MockTransport {
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.pull_log.lock().push(*request);
        self.pulls
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport_retryable("pull queue exhausted")))
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        self.push_log.lock().push(request.clone());
        self.pushes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::transport_retryable("push queue exhausted")))
    }

    fn subscribe(&self) -> SyncResult<Receiver<ChangeNotification>> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        let (sender, receiver) = mpsc::channel();
        *self.notifier.lock() = Some(sender);
        Ok(receiver)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citesync_protocol::{Checkpoint, ItemId};

    #[test]
    fn queued_responses_are_consumed_in_order() {
        let transport = MockTransport::new();
        let first = Checkpoint::new(1, ItemId::new());
        let second = Checkpoint::new(2, ItemId::new());
        transport.queue_pull(PullResponse::caught_up(first));
        transport.queue_pull(PullResponse::caught_up(second));

        let request = PullRequest::new(Checkpoint::origin(), 10);
        assert_eq!(transport.pull(&request).unwrap().to, first);
        assert_eq!(transport.pull(&request).unwrap().to, second);
        assert_eq!(transport.pull_requests().len(), 2);

        // Exhausted queue reads as a retryable outage.
        let err = transport.pull(&request).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn disconnect_fails_fast() {
        let transport = MockTransport::new();
        transport.disconnect();
        assert!(!transport.is_connected());
        let request = PullRequest::new(Checkpoint::origin(), 10);
        assert!(matches!(
            transport.pull(&request),
            Err(SyncError::NotConnected)
        ));
    }

    #[test]
    fn notifications_reach_the_subscriber() {
        let transport = MockTransport::new();
        let receiver = transport.subscribe().unwrap();
        let id = ItemId::new();
        transport.notify(ChangeNotification::new(vec![id]));

        let notification = receiver.recv().unwrap();
        assert_eq!(notification.changed_ids, vec![id]);
    }
}
