use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gw_core::{ActionClient, ConversationKey, Correlator, EventDispatcher, FrameSink, GwError, Kind};
use gw_protocol::{Event, GroupOrPrivateMessage};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::auth::{extract_bearer, verify_token};
use crate::state::AppState;

const PLUGIN_DRAIN_TIMEOUT: Duration = Duration::from_secs(3);
/// Raised well above the upstream protocol's default so large inline
/// media frames are never rejected by the transport layer.
const MAX_FRAME_SIZE: usize = 1 << 30;

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let ws = ws
        .max_message_size(MAX_FRAME_SIZE)
        .max_frame_size(MAX_FRAME_SIZE);
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, headers))
}

async fn handle_socket(socket: WebSocket, state: AppState, client_id: String, headers: HeaderMap) {
    let Some(provided) = extract_bearer(&headers) else {
        close_with_code(socket, 1008, "missing bearer token").await;
        return;
    };
    if !verify_token(&provided, &state.settings.auth_secret) {
        warn!(client_id, "rejected websocket: bad token");
        close_with_code(socket, 1008, "invalid token").await;
        return;
    }

    info!(client_id, "session authenticated");
    if let Err(e) = run_session(socket, state, client_id.clone()).await {
        error!(client_id, error = %e, "session ended with error");
    }
}

async fn close_with_code(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

/// Wraps the session's WebSocket sink behind a mutex so every writer
/// (outbound RPC calls, action client replies) serializes onto one
/// connection, per the concurrency model's single-writer rule.
struct WsSink {
    inner: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&self, text: String) -> Result<(), GwError> {
        self.inner
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| GwError::Send(e.to_string()))
    }
}

impl WsSink {
    /// Best-effort close: the connection may already be gone, in which case
    /// this is a no-op rather than something worth propagating.
    async fn close(&self, code: u16, reason: &'static str) {
        let _ = self
            .inner
            .lock()
            .await
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
}

async fn run_session(socket: WebSocket, state: AppState, client_id: String) -> Result<(), GwError> {
    let (raw_sink, mut stream) = socket.split();
    let sink = Arc::new(WsSink {
        inner: Mutex::new(raw_sink),
    });

    let result = drive_session(sink.clone(), &mut stream, &state, &client_id).await;
    if result.is_err() {
        sink.close(1011, "unhandled error in session loop").await;
    }
    result
}

async fn drive_session(
    sink: Arc<WsSink>,
    stream: &mut SplitStream<WebSocket>,
    state: &AppState,
    client_id: &str,
) -> Result<(), GwError> {
    let correlator = Arc::new(Correlator::new(
        sink as Arc<dyn FrameSink>,
        Duration::from_secs(state.settings.call_timeout_secs),
    ));
    let action_client = Arc::new(ActionClient::new(
        correlator.clone(),
        state.journal.clone(),
        state.media.clone(),
    ));
    tokio::spawn(action_client.clone().bootstrap_login());

    let plugins = (state.plugin_factory)();
    let dispatcher = Arc::new(
        EventDispatcher::build(plugins, state.settings.plugin_queue_capacity).await?,
    );

    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                error!(client_id, error = %e, "websocket read error");
                break;
            }
            None => {
                debug!(client_id, "websocket stream closed");
                break;
            }
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let event = match gw_protocol::decode_event(&text) {
            Ok(event) => event,
            Err(e) => {
                debug!(client_id, error = %e, "dropping undecodable frame");
                continue;
            }
        };

        if !matches!(event, Event::Meta(_)) {
            debug!(client_id, ?event, "inbound event");
        }

        match event {
            Event::Response(response) => {
                correlator.deliver(response).await;
            }
            other => {
                let shared = Arc::new(other);
                dispatcher.spawn_dispatch(shared.clone()).await;
                if let Err(e) = journal_event(state, action_client.self_id(), &shared).await {
                    warn!(client_id, error = %e, "journal write failed");
                }
            }
        }
    }

    correlator.close().await;
    if let Ok(dispatcher) = Arc::try_unwrap(dispatcher) {
        dispatcher.drain(PLUGIN_DRAIN_TIMEOUT).await;
    }
    info!(client_id, "session torn down");
    Ok(())
}

/// Routes a non-response event to the journal, building the right
/// conversation key for its kind, and — for message events — optimistically
/// stamps each media segment's `local_path` before enqueueing the write,
/// then spawns the actual download in the background.
async fn journal_event(state: &AppState, self_id: i64, event: &Event) -> Result<(), GwError> {
    match event {
        Event::Message(GroupOrPrivateMessage::Group(m)) => {
            let key = ConversationKey::conversation(m.self_id, Kind::Group, m.group_id);
            let mut m = m.clone();
            stamp_and_spawn_media(state, key.clone(), m.message_id, &mut m.message);
            let payload = serde_json::to_value(&m).map_err(gw_protocol::DecodeError::from)?;
            state
                .journal_queue
                .enqueue(gw_core::journal::JournalWriteJob {
                    key,
                    field: m.message_id.to_string(),
                    timestamp: m.time,
                    payload,
                })
                .await?;
        }
        Event::Message(GroupOrPrivateMessage::Private(m)) => {
            let key = ConversationKey::conversation(m.self_id, Kind::Private, m.user_id);
            let mut m = m.clone();
            stamp_and_spawn_media(state, key.clone(), m.message_id, &mut m.message);
            let payload = serde_json::to_value(&m).map_err(gw_protocol::DecodeError::from)?;
            state
                .journal_queue
                .enqueue(gw_core::journal::JournalWriteJob {
                    key,
                    field: m.message_id.to_string(),
                    timestamp: m.time,
                    payload,
                })
                .await?;
        }
        Event::Notice(n) => {
            let payload = serde_json::to_value(n).map_err(gw_protocol::DecodeError::from)?;
            state
                .journal
                .append_unkeyed(self_id, Kind::Notice, now_ts(), &payload)
                .await?;
        }
        Event::Request(r) => {
            let payload = serde_json::to_value(r).map_err(gw_protocol::DecodeError::from)?;
            state
                .journal
                .append_unkeyed(self_id, Kind::Request, now_ts(), &payload)
                .await?;
        }
        Event::Meta(m) => {
            let payload = serde_json::to_value(m).map_err(gw_protocol::DecodeError::from)?;
            state
                .journal
                .append_unkeyed(self_id, Kind::Meta, now_ts(), &payload)
                .await?;
        }
        Event::Response(_) => unreachable!("responses are routed to the correlator"),
    }
    Ok(())
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// For every media segment carrying an inbound `url`, sets `local_path` to
/// the file the download will eventually produce and spawns the download
/// itself; the journal write this precedes therefore never points at a
/// file that download hasn't been told to create.
fn stamp_and_spawn_media(
    state: &AppState,
    key: ConversationKey,
    message_id: i64,
    segments: &mut [gw_protocol::Segment],
) {
    for (index, segment) in segments.iter_mut().enumerate() {
        let default_ext = match segment {
            gw_protocol::Segment::Video(_) => "mp4",
            _ => "jpg",
        };
        let Some(media) = segment.media_mut() else {
            continue;
        };
        let Some(url) = media.url.clone() else {
            continue;
        };

        let expected = state.media.expected_path(message_id, index, &url, default_ext);
        media.local_path = Some(expected.to_string_lossy().into_owned());

        let media_pipeline = state.media.clone();
        let key_for_task = key.clone();
        tokio::spawn(async move {
            if let Err(e) = media_pipeline
                .download_segment(
                    key_for_task,
                    message_id,
                    message_id.to_string(),
                    index,
                    &url,
                    default_ext,
                )
                .await
            {
                warn!(message_id, index, error = %e, "media download failed permanently");
            }
        });
    }
}
