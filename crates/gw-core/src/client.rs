use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use gw_protocol::action::Response;
use gw_protocol::{Action, Segment, SelfMessage};
use tracing::warn;

use crate::correlator::{Correlator, StreamReceiver};
use crate::error::GwError;
use crate::journal::{ConversationKey, Journal, Kind};
use crate::media::MediaPipeline;

/// Sentinel `self_id` used until `get_login_info` resolves. Plugins
/// observing events before login completes must tolerate this value.
pub const UNRESOLVED_SELF_ID: i64 = 1;

/// Convenience fields accepted by [`ActionClient::send_message`], assembled
/// into segments in a fixed order: text, at, image, reply, face, dice,
/// rps, file, video, record.
#[derive(Debug, Clone, Default)]
pub struct MessageFields {
    pub text: Option<String>,
    pub at: Option<String>,
    pub image: Option<String>,
    pub reply: Option<String>,
    pub face: Option<String>,
    pub dice: bool,
    pub rps: bool,
    pub file: Option<String>,
    pub video: Option<String>,
    pub record: Option<String>,
}

impl MessageFields {
    fn into_segments(self) -> Vec<Segment> {
        let mut segments = Vec::new();
        if let Some(text) = self.text {
            segments.push(Segment::text(text));
        }
        if let Some(at) = self.at {
            segments.push(Segment::at(at));
        }
        if let Some(image) = self.image {
            segments.push(Segment::image(image));
        }
        if let Some(reply) = self.reply {
            segments.push(Segment::reply(reply));
        }
        if let Some(face) = self.face {
            segments.push(Segment::Face(gw_protocol::segment::FaceData { id: face }));
        }
        if self.dice {
            segments.push(Segment::Dice(Default::default()));
        }
        if self.rps {
            segments.push(Segment::Rps(Default::default()));
        }
        if let Some(file) = self.file {
            segments.push(Segment::File(gw_protocol::segment::MediaData {
                file: Some(file),
                ..Default::default()
            }));
        }
        if let Some(video) = self.video {
            segments.push(Segment::Video(gw_protocol::segment::MediaData {
                file: Some(video),
                ..Default::default()
            }));
        }
        if let Some(record) = self.record {
            segments.push(Segment::Record(gw_protocol::segment::MediaData {
                file: Some(record),
                ..Default::default()
            }));
        }
        segments
    }
}

/// One of the two valid targets for [`ActionClient::send_message`].
#[derive(Debug, Clone, Copy)]
pub enum Target {
    Group(i64),
    Private(i64),
}

/// Typed facade over the upstream action family: each method builds a
/// payload and delegates to the correlator's `call`/`stream`.
pub struct ActionClient {
    correlator: Arc<Correlator>,
    journal: Journal,
    media: Arc<MediaPipeline>,
    self_id: AtomicI64,
}

impl ActionClient {
    pub fn new(correlator: Arc<Correlator>, journal: Journal, media: Arc<MediaPipeline>) -> Self {
        Self {
            correlator,
            journal,
            media,
            self_id: AtomicI64::new(UNRESOLVED_SELF_ID),
        }
    }

    pub fn self_id(&self) -> i64 {
        self.self_id.load(Ordering::SeqCst)
    }

    /// Issues `get_login_info` and stores the resolved `self_id`. Meant to
    /// be spawned, not awaited, at session start; failures are logged, not
    /// propagated, since a session can still do useful work before login
    /// resolves (plugins only see the sentinel id in the meantime).
    pub async fn bootstrap_login(self: Arc<Self>) {
        match self.correlator.call(|echo| Action::GetLoginInfo.into_envelope(Some(echo))).await {
            Ok(response) => match response.data.get("user_id").and_then(|v| v.as_i64()) {
                Some(user_id) => self.self_id.store(user_id, Ordering::SeqCst),
                None => warn!("get_login_info response missing user_id"),
            },
            Err(e) => warn!(error = %e, "get_login_info failed, self_id remains unresolved"),
        }
    }

    /// Sends a message built either from an explicit segment list or from
    /// [`MessageFields`] convenience fields, in the fixed assembly order.
    /// Rejects an `at` segment addressed to a private target before
    /// sending anything. On success, synthesizes and journals a
    /// [`SelfMessage`].
    pub async fn send_message(
        &self,
        target: Target,
        mut segments: Vec<Segment>,
    ) -> Result<SelfMessage, GwError> {
        if let Target::Private(_) = target {
            if segments.iter().any(|s| matches!(s, Segment::At(_))) {
                return Err(GwError::PrivateMessageWithAt);
            }
        }

        let action = match target {
            Target::Group(group_id) => Action::SendGroupMsg {
                group_id,
                message: segments.clone(),
            },
            Target::Private(user_id) => Action::SendPrivateMsg {
                user_id,
                message: segments.clone(),
            },
        };

        let response = self
            .correlator
            .call(|echo| action.into_envelope(Some(echo)))
            .await?;

        let message_id = response
            .data
            .get("message_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| GwError::UnexpectedResponseShape("send response missing message_id".into()))?;

        let self_id = self.self_id();
        let (kind, conv_id) = match target {
            Target::Group(id) => (Kind::Group, id),
            Target::Private(id) => (Kind::Private, id),
        };
        let key = ConversationKey::conversation(self_id, kind, conv_id);
        self.save_inline_media(&key, message_id, &mut segments).await;

        let time = Utc::now().timestamp();
        let self_message = SelfMessage {
            self_id,
            message_id,
            group_id: match target {
                Target::Group(id) => Some(id),
                Target::Private(_) => None,
            },
            user_id: match target {
                Target::Private(id) => Some(id),
                Target::Group(_) => None,
            },
            time,
            message: segments,
        };

        let payload = serde_json::to_value(&self_message)
            .map_err(gw_protocol::DecodeError::from)?;
        self.journal
            .append(&key, &message_id.to_string(), time, &payload)
            .await?;

        Ok(self_message)
    }

    /// For every outbound media segment carrying an inline base64 blob
    /// (as opposed to a `file://`/`http://` URI the upstream already owns),
    /// decodes it to `media_root` and stamps `local_path` so the journaled
    /// copy of this self-sent message points at the same file a plugin
    /// reading the journal later would find. Failures are logged, not
    /// propagated: the message has already been sent, so this is best-effort
    /// bookkeeping, not something worth failing the send over.
    async fn save_inline_media(
        &self,
        key: &ConversationKey,
        message_id: i64,
        segments: &mut [Segment],
    ) {
        for (index, segment) in segments.iter_mut().enumerate() {
            let Some(media) = segment.media_mut() else {
                continue;
            };
            let Some(file) = media.file.clone() else {
                continue;
            };
            if !is_inline_blob(&file) {
                continue;
            }

            match self
                .media
                .save_inline_base64(key.clone(), message_id, message_id.to_string(), index, &file)
                .await
            {
                Ok(path) => media.local_path = Some(path.to_string_lossy().into_owned()),
                Err(e) => warn!(message_id, index, error = %e, "inline media save failed"),
            }
        }
    }

    pub async fn send_with_fields(
        &self,
        target: Target,
        fields: MessageFields,
    ) -> Result<SelfMessage, GwError> {
        self.send_message(target, fields.into_segments()).await
    }

    /// Escape hatch for upstream actions this client does not model
    /// explicitly: calls `action` with `params` and awaits a single reply.
    pub async fn call_raw(&self, action: &str, params: serde_json::Value) -> Result<Response, GwError> {
        let action = Action::Raw {
            action: action.to_string(),
            params,
        };
        self.correlator
            .call(|echo| action.into_envelope(Some(echo)))
            .await
    }

    /// Same escape hatch as [`Self::call_raw`] for actions whose reply is a
    /// stream of frames rather than a single response.
    pub async fn stream_raw(
        &self,
        action: &str,
        params: serde_json::Value,
        buffer: usize,
    ) -> Result<StreamReceiver, GwError> {
        let action = Action::Raw {
            action: action.to_string(),
            params,
        };
        self.correlator
            .stream(|echo| action.into_envelope(Some(echo)), buffer)
            .await
    }
}

/// An outbound media segment's `file` is either a base64 blob or a
/// `file://`/`http://` URI the upstream already owns; only the former needs
/// side-loading into local storage.
fn is_inline_blob(file: &str) -> bool {
    !file.starts_with("http://") && !file.starts_with("https://") && !file.starts_with("file://")
}
