use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::GwError;
use crate::plugin::Plugin;

/// Inter-plugin publish/subscribe bus. Plugins declare the names they
/// publish and subscribe to as static metadata (see [`Plugin::publishes`]/
/// [`Plugin::subscribes`]); there is no source-level introspection.
pub struct BroadcastBus {
    listeners: RwLock<HashMap<String, Vec<Arc<dyn Plugin>>>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Registers every plugin under each broadcast name it subscribes to.
    /// Call once at session startup, after [`check_for_cycles`] has passed.
    pub async fn register_all(&self, plugins: &[Arc<dyn Plugin>]) {
        let mut listeners = self.listeners.write().await;
        for plugin in plugins {
            for name in plugin.subscribes() {
                listeners
                    .entry((*name).to_string())
                    .or_default()
                    .push(plugin.clone());
            }
        }
    }

    /// Invokes every listener of `name` concurrently; a listener's panic or
    /// error does not prevent the others from running.
    pub async fn publish(&self, name: &str, payload: Value) {
        let payload = Arc::new(payload);
        let listeners = {
            let guard = self.listeners.read().await;
            guard.get(name).cloned().unwrap_or_default()
        };

        let futures = listeners
            .into_iter()
            .map(|plugin| {
                let payload = payload.clone();
                let name = name.to_string();
                async move { plugin.on_broadcast(&name, payload).await }
            });
        futures_util::future::join_all(futures).await;
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the directed `publisher -> subscriber` graph from declared
/// metadata and runs a DFS cycle check, the same algorithm the upstream
/// predecessor used over an AST-derived graph — only the graph's source
/// changes, not the check.
pub fn check_for_cycles(plugins: &[Arc<dyn Plugin>]) -> Result<(), GwError> {
    let mut publishers_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for publisher in plugins {
        for event_name in publisher.publishes() {
            for subscriber in plugins {
                if subscriber.subscribes().contains(event_name) {
                    publishers_of
                        .entry(publisher.name())
                        .or_default()
                        .push(subscriber.name());
                }
            }
        }
    }

    let mut visiting = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack = Vec::new();

    for plugin in plugins {
        if !visited.contains(plugin.name()) {
            if let Some(cycle) = dfs(plugin.name(), &publishers_of, &mut visiting, &mut visited, &mut stack) {
                return Err(GwError::BroadcastCycle(cycle.join(" -> ")));
            }
        }
    }
    Ok(())
}

fn dfs<'a>(
    node: &'a str,
    edges: &HashMap<&'a str, Vec<&'a str>>,
    visiting: &mut HashSet<&'a str>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visiting.insert(node);
    stack.push(node);

    if let Some(neighbors) = edges.get(node) {
        for &next in neighbors {
            if visiting.contains(next) {
                let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
            if !visited.contains(next) {
                if let Some(cycle) = dfs(next, edges, visiting, visited, stack) {
                    return Some(cycle);
                }
            }
        }
    }

    stack.pop();
    visiting.remove(node);
    visited.insert(node);
    None
}
