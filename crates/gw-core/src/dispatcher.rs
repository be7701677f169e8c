use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gw_protocol::Event;
use tokio::task::JoinSet;

use crate::broadcast::{check_for_cycles, BroadcastBus};
use crate::error::GwError;
use crate::plugin::{EventVariant, Plugin, PluginRuntime};

/// Builds the static `variant -> ordered plugin list` map at session start
/// and fans out each event to it. Plugins within a variant run strictly in
/// priority order (highest first); the first one to return `true` stops
/// the chain for that event.
pub struct EventDispatcher {
    by_variant: HashMap<EventVariant, Vec<Arc<PluginRuntime>>>,
    broadcast: Arc<BroadcastBus>,
    background: tokio::sync::Mutex<JoinSet<()>>,
}

impl EventDispatcher {
    /// Validates the broadcast publish/subscribe graph is acyclic, then
    /// spawns one [`PluginRuntime`] per plugin and indexes it under every
    /// variant it declared interest in, sorted by priority descending.
    pub async fn build(
        plugins: Vec<Arc<dyn Plugin>>,
        queue_capacity: usize,
    ) -> Result<Self, GwError> {
        check_for_cycles(&plugins)?;

        let broadcast = Arc::new(BroadcastBus::new());
        broadcast.register_all(&plugins).await;

        let mut runtimes_by_variant: HashMap<EventVariant, Vec<Arc<PluginRuntime>>> = HashMap::new();
        for plugin in plugins {
            let runtime = Arc::new(PluginRuntime::spawn(plugin, queue_capacity, broadcast.clone()));
            for variant in runtime.interests() {
                runtimes_by_variant.entry(*variant).or_default().push(runtime.clone());
            }
        }
        for list in runtimes_by_variant.values_mut() {
            list.sort_by_key(|r| std::cmp::Reverse(r.priority()));
        }

        Ok(Self {
            by_variant: runtimes_by_variant,
            broadcast,
            background: tokio::sync::Mutex::new(JoinSet::new()),
        })
    }

    pub fn broadcast(&self) -> Arc<BroadcastBus> {
        self.broadcast.clone()
    }

    /// Dispatches one event sequentially through its variant's plugin
    /// list, in priority order, stopping at the first plugin that
    /// consumes it.
    pub async fn dispatch_event(&self, event: Arc<Event>) {
        let variant = EventVariant::of(&event);
        let Some(runtimes) = self.by_variant.get(&variant) else {
            return;
        };
        for runtime in runtimes {
            let consumed = runtime.dispatch(event.clone()).await;
            if consumed {
                break;
            }
        }
    }

    /// Spawns [`Self::dispatch_event`] into the dispatcher's tracked task
    /// set instead of awaiting it, so the session read loop keeps reading
    /// frames while plugins work. The task set keeps a strong handle to
    /// every spawned dispatch so none is silently dropped.
    pub async fn spawn_dispatch(self: &Arc<Self>, event: Arc<Event>) {
        let this = self.clone();
        let mut background = self.background.lock().await;
        background.spawn(async move { this.dispatch_event(event).await });
        while background.try_join_next().is_some() {}
    }

    /// Cancels every plugin's worker pool and waits up to `timeout` total
    /// for in-flight handlers to finish.
    pub async fn drain(self, timeout: Duration) {
        {
            let mut background = self.background.lock().await;
            background.abort_all();
            while background.join_next().await.is_some() {}
        }

        // A plugin interested in more than one variant is cloned into each
        // variant's bucket, so the same Arc can still appear later in this
        // iteration; dedupe fully before unwrapping anything, otherwise the
        // first sighting's try_unwrap fails against a sibling clone that
        // hasn't been dropped yet.
        let mut seen = std::collections::HashSet::new();
        let mut unique = Vec::new();
        for runtime in self.by_variant.into_values().flatten() {
            if seen.insert(Arc::as_ptr(&runtime) as usize) {
                unique.push(runtime);
            }
        }
        for runtime in unique {
            if let Ok(runtime) = Arc::try_unwrap(runtime) {
                runtime.drain(timeout).await;
            }
        }
    }
}
