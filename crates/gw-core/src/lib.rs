//! Runtime spine shared by the gateway: RPC correlation, the typed action
//! client, the Redis-backed journal, media side-loading, and the plugin
//! dispatcher/broadcast bus.

pub mod broadcast;
pub mod client;
pub mod config;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod journal;
pub mod media;
pub mod plugin;

pub use broadcast::BroadcastBus;
pub use client::{ActionClient, MessageFields, Target};
pub use config::Settings;
pub use correlator::{Correlator, FrameSink, StreamItem, StreamReceiver};
pub use dispatcher::EventDispatcher;
pub use error::GwError;
pub use journal::{ConversationKey, Journal, JournalQueue, Kind};
pub use media::MediaPipeline;
pub use plugin::{EventVariant, Plugin, PluginRuntime};
