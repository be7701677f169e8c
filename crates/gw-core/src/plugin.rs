use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use gw_protocol::Event;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{error, warn};

use crate::broadcast::BroadcastBus;

/// The coarse event category a plugin declares interest in. Mirrors
/// `Event`'s top-level discriminator; a plugin interested in more than one
/// variant lists each explicitly, since Rust handler signatures can't be
/// introspected at runtime the way the source's single-typed-parameter
/// dispatch could.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventVariant {
    Message,
    Notice,
    Request,
    Meta,
}

impl EventVariant {
    pub fn of(event: &Event) -> Self {
        match event {
            Event::Message(_) => EventVariant::Message,
            Event::Notice(_) => EventVariant::Notice,
            Event::Request(_) => EventVariant::Request,
            Event::Meta(_) => EventVariant::Meta,
            Event::Response(_) => unreachable!("responses never reach the dispatcher"),
        }
    }
}

/// A handler participating in event dispatch and, optionally, the
/// broadcast bus. Returning `true` from [`Plugin::handle`] consumes the
/// event, short-circuiting lower-priority plugins for the same variant.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    fn interests(&self) -> &'static [EventVariant];

    /// Higher runs first within a variant's plugin list.
    fn priority(&self) -> i32 {
        0
    }

    fn consumers_count(&self) -> usize {
        1
    }

    fn publishes(&self) -> &'static [&'static str] {
        &[]
    }

    fn subscribes(&self) -> &'static [&'static str] {
        &[]
    }

    async fn handle(&self, event: Arc<Event>, broadcast: Arc<BroadcastBus>) -> bool;

    /// Invoked when a broadcast event this plugin subscribed to fires.
    /// Default no-op for plugins that only participate in ordinary dispatch.
    async fn on_broadcast(&self, _name: &str, _payload: Arc<serde_json::Value>) {}
}

struct Job {
    event: Arc<Event>,
    completion: oneshot::Sender<bool>,
}

/// Owns one plugin's bounded queue and its fixed worker pool for the
/// lifetime of a session.
pub struct PluginRuntime {
    plugin: Arc<dyn Plugin>,
    sender: mpsc::Sender<Job>,
    workers: JoinSet<()>,
}

impl PluginRuntime {
    pub fn spawn(plugin: Arc<dyn Plugin>, queue_capacity: usize, broadcast: Arc<BroadcastBus>) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let mut workers = JoinSet::new();

        for _ in 0..plugin.consumers_count().max(1) {
            let plugin = plugin.clone();
            let receiver = receiver.clone();
            let broadcast = broadcast.clone();
            workers.spawn(async move {
                loop {
                    let job = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else { break };

                    let consumed = run_handler_panic_safe(plugin.as_ref(), job.event, broadcast.clone()).await;
                    let _ = job.completion.send(consumed);
                }
            });
        }

        Self {
            plugin,
            sender,
            workers,
        }
    }

    pub fn name(&self) -> &str {
        self.plugin.name()
    }

    pub fn priority(&self) -> i32 {
        self.plugin.priority()
    }

    pub fn interests(&self) -> &'static [EventVariant] {
        self.plugin.interests()
    }

    /// Enqueues the event and awaits whether this plugin consumed it.
    /// Blocks if the plugin's queue is full — backpressure is deliberate
    /// here (see concurrency model), it reaches only this plugin's fan-out.
    pub async fn dispatch(&self, event: Arc<Event>) -> bool {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(Job {
                event,
                completion: tx,
            })
            .await
            .is_err()
        {
            warn!(plugin = self.name(), "plugin queue closed, dropping event");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Cancels all workers and waits up to `timeout` for them to finish
    /// in-flight handlers before giving up.
    pub async fn drain(mut self, timeout: Duration) {
        self.workers.abort_all();
        let _ = tokio::time::timeout(timeout, async {
            while self.workers.join_next().await.is_some() {}
        })
        .await;
    }
}

/// Invokes a plugin's handler, converting any panic into a `true` result
/// (fail-closed: a broken plugin halts the chain for this event rather
/// than letting the panic silently swallow subsequent plugins' turn).
async fn run_handler_panic_safe(
    plugin: &dyn Plugin,
    event: Arc<Event>,
    broadcast: Arc<BroadcastBus>,
) -> bool {
    let fut = AssertUnwindSafe(plugin.handle(event, broadcast));
    match fut.catch_unwind().await {
        Ok(consumed) => consumed,
        Err(_panic) => {
            error!(plugin = plugin.name(), "plugin handler panicked");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_protocol::event::{GroupMessage, GroupOrPrivateMessage, Sender};

    struct AlwaysConsumes;

    #[async_trait]
    impl Plugin for AlwaysConsumes {
        fn name(&self) -> &str {
            "always_consumes"
        }
        fn interests(&self) -> &'static [EventVariant] {
            &[EventVariant::Message]
        }
        async fn handle(&self, _event: Arc<Event>, _broadcast: Arc<BroadcastBus>) -> bool {
            true
        }
    }

    struct Panics;

    #[async_trait]
    impl Plugin for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn interests(&self) -> &'static [EventVariant] {
            &[EventVariant::Message]
        }
        async fn handle(&self, _event: Arc<Event>, _broadcast: Arc<BroadcastBus>) -> bool {
            panic!("boom");
        }
    }

    fn sample_event() -> Arc<Event> {
        Arc::new(Event::Message(GroupOrPrivateMessage::Group(GroupMessage {
            self_id: 1,
            message_id: 1,
            group_id: 1,
            user_id: 1,
            time: 0,
            sender: Sender {
                user_id: 1,
                nickname: None,
                card: None,
            },
            message: vec![],
        })))
    }

    #[tokio::test]
    async fn dispatch_returns_handler_result() {
        let broadcast = Arc::new(BroadcastBus::new());
        let runtime = PluginRuntime::spawn(Arc::new(AlwaysConsumes), 8, broadcast);
        let consumed = runtime.dispatch(sample_event()).await;
        assert!(consumed);
    }

    #[tokio::test]
    async fn panicking_handler_is_treated_as_consumed() {
        let broadcast = Arc::new(BroadcastBus::new());
        let runtime = PluginRuntime::spawn(Arc::new(Panics), 8, broadcast);
        let consumed = runtime.dispatch(sample_event()).await;
        assert!(consumed);
    }
}
