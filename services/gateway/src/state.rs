use std::sync::Arc;

use gw_core::{Journal, JournalQueue, MediaPipeline, Settings};

/// Builds the set of plugins for one new session. Plugins are
/// session-scoped (see the lifecycle rules), so a fresh set is built per
/// WebSocket accept rather than shared across sessions.
pub type PluginFactory = Arc<dyn Fn() -> Vec<Arc<dyn gw_core::Plugin>> + Send + Sync>;

/// Process-scoped singletons shared by every session: everything here
/// outlives individual WebSocket connections.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub journal: Journal,
    pub journal_queue: Arc<JournalQueue>,
    pub media: Arc<MediaPipeline>,
    pub http: reqwest::Client,
    pub plugin_factory: PluginFactory,
}

impl AppState {
    pub async fn new(settings: Settings, plugin_factory: PluginFactory) -> Result<Self, gw_core::GwError> {
        let redis_client = redis::Client::open(settings.redis_url.clone())?;
        let conn = redis_client.get_connection_manager().await?;
        let journal = Journal::new(conn);

        let mut http_builder = reqwest::Client::builder();
        if let Some(proxy) = &settings.http_proxy {
            http_builder = http_builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let http = http_builder.build()?;

        let media = Arc::new(MediaPipeline::new(http.clone(), settings.media_root.clone(), journal.clone()));
        let journal_queue = Arc::new(JournalQueue::spawn(
            journal.clone(),
            settings.plugin_queue_capacity,
            settings.journal_consumers,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            journal,
            journal_queue,
            media,
            http,
            plugin_factory,
        })
    }
}
