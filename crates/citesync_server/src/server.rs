//! The sync request handlers.

use crate::change_log::{Applied, ChangeLog, ItemState};
use crate::config::ServerConfig;
use crate::error::ServerResult;
use citesync_protocol::{
    from_cbor, to_cbor, ChangeNotification, Checkpoint, ItemId, PullRequest, PullResponse,
    PushRequest, PushResponse,
};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info};

/// Authoritative sync endpoint for one shared collection.
///
/// Handlers take the state lock per request, so concurrent pushes from
/// different clients serialize and each sees a consistent revision to
/// compare against. Per-item rejections travel in the response; a
/// handler only errors when the request itself is unusable.
pub struct SyncServer {
    config: ServerConfig,
    log: Mutex<ChangeLog>,
    subscribers: Mutex<Vec<Sender<ChangeNotification>>>,
}

impl SyncServer {
    /// Creates a server with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Creates a server with the given configuration.
    #[must_use]
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            config,
            log: Mutex::new(ChangeLog::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Serves one pull request.
    #[must_use]
    pub fn handle_pull(&self, request: &PullRequest) -> PullResponse {
        let limit = request.limit.min(self.config.max_pull_batch);
        let (changes, to) = self.log.lock().changes_since(request.since, limit);
        debug!(since = ?request.since, returned = changes.len(), "pull");
        PullResponse::new(changes, to)
    }

    /// Serves one push request.
    ///
    /// Every submission is judged independently; one stale item never
    /// fails the batch. Accepted changes are fanned out to subscribed
    /// clients after the state lock is released.
    pub fn handle_push(&self, request: &PushRequest) -> PushResponse {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        {
            let mut log = self.log.lock();
            for update in &request.updates {
                match log.apply_update(update) {
                    Applied::Accepted(change) => accepted.push(change),
                    Applied::Rejected(change) => rejected.push(change),
                }
            }
            for tombstone in &request.tombstones {
                match log.apply_tombstone(tombstone) {
                    Applied::Accepted(change) => accepted.push(change),
                    Applied::Rejected(change) => rejected.push(change),
                }
            }
        }

        info!(
            accepted = accepted.len(),
            rejected = rejected.len(),
            "push"
        );
        if !accepted.is_empty() {
            self.notify(ChangeNotification::new(
                accepted.iter().map(|a| a.id).collect(),
            ));
        }
        PushResponse::new(accepted, rejected)
    }

    /// Serves a CBOR-encoded pull request, for mounting behind an HTTP
    /// framework.
    pub fn handle_pull_bytes(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let request: PullRequest = from_cbor(body)?;
        Ok(to_cbor(&self.handle_pull(&request))?)
    }

    /// Serves a CBOR-encoded push request.
    pub fn handle_push_bytes(&self, body: &[u8]) -> ServerResult<Vec<u8>> {
        let request: PushRequest = from_cbor(body)?;
        Ok(to_cbor(&self.handle_push(&request))?)
    }

    /// Opens a change-notification subscription.
    ///
    /// The receiver gets one notification per push that changed server
    /// state. Dropped receivers are swept out on the next fan-out.
    pub fn subscribe(&self) -> Receiver<ChangeNotification> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.lock().push(sender);
        receiver
    }

    fn notify(&self, notification: ChangeNotification) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(notification.clone()).is_ok());
    }

    /// Drops tombstones older than the configured retention window.
    ///
    /// Returns the number pruned. Meant to be called periodically by
    /// whatever hosts the server.
    pub fn prune_tombstones(&self) -> usize {
        let mut log = self.log.lock();
        let horizon = log
            .head()
            .server_time
            .saturating_sub(self.config.tombstone_retention);
        log.prune_tombstones(horizon)
    }

    /// Returns the server's state for an item.
    #[must_use]
    pub fn item(&self, id: &ItemId) -> Option<ItemState> {
        self.log.lock().item(id).cloned()
    }

    /// Returns the position of the newest change.
    #[must_use]
    pub fn head(&self) -> Checkpoint {
        self.log.lock().head()
    }

    /// Returns the number of live items.
    #[must_use]
    pub fn live_items(&self) -> usize {
        self.log.lock().live_items()
    }
}

impl Default for SyncServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use citesync_protocol::{ItemUpdate, TombstoneUpdate};

    #[test]
    fn push_then_pull_round_trips() {
        let server = SyncServer::new();
        let response = server.handle_push(&PushRequest::new(
            vec![ItemUpdate::create(1, b"one".to_vec())],
            vec![],
        ));
        assert_eq!(response.accepted.len(), 1);
        let id = response.accepted[0].id;

        let pulled = server.handle_pull(&PullRequest::new(Checkpoint::origin(), 100));
        assert_eq!(pulled.changes.len(), 1);
        assert_eq!(pulled.changes[0].id, id);
        assert_eq!(pulled.to, server.head());
    }

    #[test]
    fn pull_limit_is_capped_by_config() {
        let server = SyncServer::with_config(ServerConfig::new().with_max_pull_batch(2));
        for i in 0..5u8 {
            server.handle_push(&PushRequest::new(
                vec![ItemUpdate::create(u64::from(i), vec![i])],
                vec![],
            ));
        }

        let pulled = server.handle_pull(&PullRequest::new(Checkpoint::origin(), 100));
        assert_eq!(pulled.changes.len(), 2);
    }

    #[test]
    fn mixed_batch_judges_items_independently() {
        let server = SyncServer::new();
        let created = server.handle_push(&PushRequest::new(
            vec![ItemUpdate::create(1, b"a".to_vec())],
            vec![],
        ));
        let id = created.accepted[0].id;

        let response = server.handle_push(&PushRequest::new(
            vec![
                ItemUpdate::update(1, id, 99, b"stale".to_vec()),
                ItemUpdate::create(2, b"fresh".to_vec()),
            ],
            vec![TombstoneUpdate::new(3, ItemId::new(), 1)],
        ));
        assert_eq!(response.accepted.len(), 1);
        assert_eq!(response.accepted[0].reference, 2);
        assert_eq!(response.rejected.len(), 2);
    }

    #[test]
    fn accepted_pushes_notify_subscribers() {
        let server = SyncServer::new();
        let receiver = server.subscribe();

        let response = server.handle_push(&PushRequest::new(
            vec![ItemUpdate::create(1, b"a".to_vec())],
            vec![],
        ));
        let notification = receiver.recv().unwrap();
        assert_eq!(notification.changed_ids, vec![response.accepted[0].id]);

        // A push that changes nothing stays silent.
        server.handle_push(&PushRequest::new(
            vec![ItemUpdate::update(1, ItemId::new(), 1, vec![])],
            vec![],
        ));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn byte_handlers_speak_cbor() {
        let server = SyncServer::new();
        let body = to_cbor(&PullRequest::new(Checkpoint::origin(), 10)).unwrap();
        let response = server.handle_pull_bytes(&body).unwrap();
        let decoded: PullResponse = from_cbor(&response).unwrap();
        assert!(decoded.changes.is_empty());

        let err = server.handle_pull_bytes(&[0xFF, 0x13]).unwrap_err();
        assert!(err.is_client_fault());
    }
}
