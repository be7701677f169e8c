use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gw_protocol::action::{Response, StreamFrameKind};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::GwError;

/// Abstraction over "a single serialized writer for this session's
/// WebSocket". Kept as a trait so `gw-core` stays transport-agnostic; the
/// gateway service supplies the axum-backed implementation.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), GwError>;
}

enum Waiter {
    Single(oneshot::Sender<Response>),
    Stream(mpsc::Sender<StreamItem>),
}

#[derive(Debug)]
pub enum StreamItem {
    Chunk(Response),
    Done,
    Error(Response),
}

/// Correlates outbound calls with their eventual inbound [`Response`] by a
/// freshly minted echo token. Exactly one waiter exists per outstanding
/// token; every waiter is removed by response, timeout, or [`Correlator::close`].
pub struct Correlator {
    sink: Arc<dyn FrameSink>,
    waiters: Mutex<HashMap<String, Waiter>>,
    call_timeout: Duration,
}

impl Correlator {
    pub fn new(sink: Arc<dyn FrameSink>, call_timeout: Duration) -> Self {
        Self {
            sink,
            waiters: Mutex::new(HashMap::new()),
            call_timeout,
        }
    }

    fn new_echo() -> String {
        Uuid::new_v4().to_string()
    }

    /// Sends `envelope` (already missing its echo) after stamping a fresh
    /// token, awaits the correlated response, and guarantees the waiter map
    /// entry is gone by the time this returns, on every exit path.
    pub async fn call(
        &self,
        build: impl FnOnce(String) -> gw_protocol::ActionEnvelope,
    ) -> Result<Response, GwError> {
        let echo = Self::new_echo();
        let envelope = build(echo.clone());

        let (tx, rx) = oneshot::channel();
        {
            let mut waiters = self.waiters.lock().await;
            waiters.insert(echo.clone(), Waiter::Single(tx));
        }

        let wire = gw_protocol::encode_action(&envelope)?;
        if let Err(e) = self.sink.send_text(wire).await {
            self.waiters.lock().await.remove(&echo);
            return Err(e);
        }

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_canceled)) => Err(GwError::SessionClosing),
            Err(_elapsed) => {
                self.remove_waiter(&echo).await;
                warn!(echo = %echo, timeout_secs = self.call_timeout.as_secs(), "rpc call timed out");
                Err(GwError::CallTimeout { echo })
            }
        }
    }

    /// Like [`Correlator::call`] but the reply is a sequence of frames
    /// terminated by a sentinel. The idle timeout is measured from the last
    /// received frame, not from call start: each [`StreamReceiver::recv`]
    /// rearms its own timeout window, so a stream that keeps producing
    /// frames never expires, but one that stalls between frames does.
    pub async fn stream(
        self: &Arc<Self>,
        build: impl FnOnce(String) -> gw_protocol::ActionEnvelope,
        buffer: usize,
    ) -> Result<StreamReceiver, GwError> {
        let echo = Self::new_echo();
        let envelope = build(echo.clone());

        let (tx, rx) = mpsc::channel(buffer);
        {
            let mut waiters = self.waiters.lock().await;
            waiters.insert(echo.clone(), Waiter::Stream(tx));
        }

        let wire = gw_protocol::encode_action(&envelope)?;
        if let Err(e) = self.sink.send_text(wire).await {
            self.waiters.lock().await.remove(&echo);
            return Err(e);
        }

        Ok(StreamReceiver {
            correlator: self.clone(),
            echo,
            rx,
            idle_timeout: self.call_timeout,
            expired: false,
        })
    }

    async fn remove_waiter(&self, echo: &str) {
        self.waiters.lock().await.remove(echo);
    }

    /// Routes an inbound [`Response`] to its waiter, if any. A response
    /// carrying an unknown token is a benign late arrival (e.g. after the
    /// caller's timeout already fired) and is logged at debug, not treated
    /// as an error.
    pub async fn deliver(&self, response: Response) {
        let Some(echo) = response.echo.clone() else {
            debug!("dropping response with no echo token");
            return;
        };

        let mut waiters = self.waiters.lock().await;
        let Some(waiter) = waiters.get(&echo) else {
            debug!(echo = %echo, "response for unknown or already-resolved token");
            return;
        };

        match waiter {
            Waiter::Single(_) => {
                if let Some(Waiter::Single(tx)) = waiters.remove(&echo) {
                    let _ = tx.send(response);
                }
            }
            Waiter::Stream(tx) => {
                let tx = tx.clone();
                let kind = response.stream_frame_kind();
                let done = matches!(kind, StreamFrameKind::Sentinel | StreamFrameKind::Error);
                let item = match kind {
                    StreamFrameKind::Chunk => StreamItem::Chunk(response),
                    StreamFrameKind::Sentinel => StreamItem::Done,
                    StreamFrameKind::Error => StreamItem::Error(response),
                };
                drop(waiters);
                let _ = tx.send(item).await;
                if done {
                    self.waiters.lock().await.remove(&echo);
                }
            }
        }
    }

    /// Completes every outstanding waiter with a closing error so no caller
    /// hangs past session teardown, and empties the map.
    pub async fn close(&self) {
        let mut waiters = self.waiters.lock().await;
        for (_echo, waiter) in waiters.drain() {
            match waiter {
                Waiter::Single(tx) => {
                    // Dropping the sender resolves the waiting `rx.await` with
                    // a `RecvError`, which `call` maps to `SessionClosing`.
                    let _ = tx;
                }
                Waiter::Stream(tx) => {
                    let _ = tx.try_send(StreamItem::Error(error_response("session is closing")));
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn pending_count(&self) -> usize {
        self.waiters.lock().await.len()
    }
}

fn error_response(message: &str) -> Response {
    Response {
        status: "error".into(),
        retcode: -1,
        data: serde_json::Value::Null,
        message: message.to_string(),
        echo: None,
        wording: String::new(),
        stream: None,
    }
}

/// A stream's receiving half. Each [`StreamReceiver::recv`] call is bounded
/// by the correlator's idle timeout; once that fires the receiver yields one
/// final [`StreamItem::Error`], clears its own waiter entry so the
/// correlator doesn't carry a dead stream to session teardown, and returns
/// `None` forever after.
pub struct StreamReceiver {
    correlator: Arc<Correlator>,
    echo: String,
    rx: mpsc::Receiver<StreamItem>,
    idle_timeout: Duration,
    expired: bool,
}

impl StreamReceiver {
    pub async fn recv(&mut self) -> Option<StreamItem> {
        if self.expired {
            return None;
        }

        match timeout(self.idle_timeout, self.rx.recv()).await {
            Ok(item) => item,
            Err(_elapsed) => {
                self.expired = true;
                self.correlator.remove_waiter(&self.echo).await;
                warn!(
                    echo = %self.echo,
                    idle_secs = self.idle_timeout.as_secs(),
                    "stream idle timeout"
                );
                Some(StreamItem::Error(error_response("stream idle timeout")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::Action;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct RecordingSink {
        sent: TokioMutex<Vec<String>>,
        fail: AtomicUsize,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                sent: TokioMutex::new(Vec::new()),
                fail: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn send_text(&self, text: String) -> Result<(), GwError> {
            if self.fail.load(Ordering::SeqCst) > 0 {
                return Err(GwError::Send("forced failure".into()));
            }
            self.sent.lock().await.push(text);
            Ok(())
        }
    }

    fn test_action() -> impl FnOnce(String) -> gw_protocol::ActionEnvelope {
        |echo| Action::GetLoginInfo.into_envelope(Some(echo))
    }

    #[tokio::test]
    async fn call_resolves_and_clears_waiter() {
        let sink = Arc::new(RecordingSink::new());
        let correlator = Arc::new(Correlator::new(sink.clone(), Duration::from_secs(5)));

        let corr2 = correlator.clone();
        let sink2 = sink.clone();
        let handle = tokio::spawn(async move { corr2.call(test_action()).await });

        // Pull the echo the call used out of what was actually sent.
        let echo = loop {
            let sent = sink2.sent.lock().await;
            if let Some(wire) = sent.first() {
                let v: serde_json::Value = serde_json::from_str(wire).unwrap();
                break v["echo"].as_str().unwrap().to_string();
            }
            drop(sent);
            tokio::task::yield_now().await;
        };

        assert_eq!(correlator.pending_count().await, 1);
        correlator
            .deliver(Response {
                status: "ok".into(),
                retcode: 0,
                data: serde_json::json!({"user_id": 42}),
                message: String::new(),
                echo: Some(echo),
                wording: String::new(),
                stream: None,
            })
            .await;

        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.data["user_id"], 42);
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn call_times_out_and_clears_waiter() {
        let sink = Arc::new(RecordingSink::new());
        let correlator = Correlator::new(sink, Duration::from_millis(20));
        let result = correlator.call(test_action()).await;
        assert!(matches!(result, Err(GwError::CallTimeout { .. })));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn stream_delivers_chunks_and_completes_on_sentinel() {
        let sink = Arc::new(RecordingSink::new());
        let correlator = Arc::new(Correlator::new(sink.clone(), Duration::from_secs(5)));
        let mut rx = correlator.stream(test_action(), 8).await.unwrap();

        let echo = loop {
            let sent = sink.sent.lock().await;
            if let Some(wire) = sent.first() {
                let v: serde_json::Value = serde_json::from_str(wire).unwrap();
                break v["echo"].as_str().unwrap().to_string();
            }
            drop(sent);
            tokio::task::yield_now().await;
        };

        correlator
            .deliver(Response {
                status: "ok".into(),
                retcode: 0,
                data: serde_json::json!({"data_type": "data_chunk"}),
                message: String::new(),
                echo: Some(echo.clone()),
                wording: String::new(),
                stream: Some("stream-action".into()),
            })
            .await;
        assert!(matches!(rx.recv().await, Some(StreamItem::Chunk(_))));

        correlator
            .deliver(Response {
                status: "ok".into(),
                retcode: 0,
                data: serde_json::json!({"data_type": "data_complete"}),
                message: String::new(),
                echo: Some(echo),
                wording: String::new(),
                stream: Some("stream-action".into()),
            })
            .await;
        assert!(matches!(rx.recv().await, Some(StreamItem::Done)));
        assert_eq!(correlator.pending_count().await, 0);
    }

    #[tokio::test]
    async fn stream_idle_timeout_yields_error_and_clears_waiter() {
        let sink = Arc::new(RecordingSink::new());
        let correlator = Arc::new(Correlator::new(sink, Duration::from_millis(20)));
        let mut rx = correlator.stream(test_action(), 8).await.unwrap();

        assert!(matches!(rx.recv().await, Some(StreamItem::Error(_))));
        assert_eq!(correlator.pending_count().await, 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn delivering_unknown_echo_is_a_noop() {
        let sink = Arc::new(RecordingSink::new());
        let correlator = Correlator::new(sink, Duration::from_secs(5));
        correlator
            .deliver(Response {
                status: "ok".into(),
                retcode: 0,
                data: serde_json::Value::Null,
                message: String::new(),
                echo: Some("never-registered".into()),
                wording: String::new(),
                stream: None,
            })
            .await;
        assert_eq!(correlator.pending_count().await, 0);
    }
}
