//! HTTP transport adapter.
//!
//! Speaks the wire protocol as CBOR bodies over POST. The actual HTTP
//! stack is behind the [`HttpClient`] trait so the engine does not pin
//! one; applications plug in whichever blocking client they already
//! ship.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use citesync_protocol::{
    from_cbor, to_cbor, ChangeNotification, PullRequest, PullResponse, PushRequest, PushResponse,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Minimal blocking HTTP client surface.
pub trait HttpClient: Send + Sync + 'static {
    /// Posts a CBOR body and returns the response body.
    ///
    /// An `Err` is a transport-level failure (connection refused,
    /// timeout, non-2xx status) and is treated as retryable.
    fn post(&self, url: &str, body: &[u8]) -> Result<Vec<u8>, String>;

    /// Returns true if the client believes the server is reachable.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// [`SyncTransport`] over an [`HttpClient`].
///
/// Endpoints are `POST {base}/sync/pull`, `POST {base}/sync/push` and a
/// long-poll on `POST {base}/sync/events` for the subscription channel.
/// One subscription is active at a time: a new `subscribe` retires the
/// previous poller thread, and `close` retires them all.
pub struct HttpTransport<C: HttpClient> {
    client: Arc<C>,
    base_url: String,
    poll_interval: Duration,
    closed: Arc<AtomicBool>,
    subscription: Mutex<Option<Arc<AtomicBool>>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport against the given base URL.
    pub fn new(client: C, base_url: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(1),
            closed: Arc::new(AtomicBool::new(false)),
            subscription: Mutex::new(None),
        }
    }

    /// Sets the delay between event long-poll attempts.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn exchange<Q: Serialize, R: DeserializeOwned>(&self, path: &str, request: &Q) -> SyncResult<R> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        let body = to_cbor(request)?;
        let url = self.endpoint(path);
        debug!(url = %url, bytes = body.len(), "http exchange");
        let response = self
            .client
            .post(&url, &body)
            .map_err(SyncError::transport_retryable)?;
        Ok(from_cbor(&response)?)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn pull(&self, request: &PullRequest) -> SyncResult<PullResponse> {
        self.exchange("/sync/pull", request)
    }

    fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.exchange("/sync/push", request)
    }

    fn subscribe(&self) -> SyncResult<Receiver<ChangeNotification>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::NotConnected);
        }
        let (sender, receiver) = mpsc::channel();
        let client = Arc::clone(&self.client);
        let closed = Arc::clone(&self.closed);
        let retired = Arc::new(AtomicBool::new(false));
        if let Some(previous) = self
            .subscription
            .lock()
            .replace(Arc::clone(&retired))
        {
            previous.store(true, Ordering::SeqCst);
        }
        let url = self.endpoint("/sync/events");
        let interval = self.poll_interval;

        thread::Builder::new()
            .name("citesync-events".into())
            .spawn(move || {
                while !closed.load(Ordering::SeqCst) && !retired.load(Ordering::SeqCst) {
                    match client.post(&url, &[]) {
                        Ok(body) if body.is_empty() => {
                            // Long poll timed out server-side; poll again.
                        }
                        Ok(body) => match from_cbor::<ChangeNotification>(&body) {
                            Ok(notification) => {
                                if sender.send(notification).is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "discarding malformed event body");
                            }
                        },
                        Err(err) => {
                            debug!(error = %err, "event poll failed, backing off");
                            thread::sleep(interval);
                        }
                    }
                }
            })
            .map_err(|err| SyncError::transport_fatal(err.to_string()))?;

        Ok(receiver)
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
