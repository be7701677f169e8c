use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::segment::Segment;

/// An outbound call to the upstream server.
///
/// `echo` is present iff the caller expects a correlated reply; the
/// dedicated `call_raw`/`stream_raw` variant is the escape hatch for
/// upstream actions this crate does not model explicitly.
#[derive(Debug, Clone, Serialize)]
pub struct ActionEnvelope {
    pub action: String,
    pub params: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

/// Typed surface over the action family this gateway supports directly.
/// Anything else goes through [`Action::Raw`].
#[derive(Debug, Clone)]
pub enum Action {
    SendGroupMsg { group_id: i64, message: Vec<Segment> },
    SendPrivateMsg { user_id: i64, message: Vec<Segment> },
    GetLoginInfo,
    DeleteMsg { message_id: i64 },
    GetMsg { message_id: i64 },
    SendPoke { user_id: i64, group_id: Option<i64> },
    SetMsgEmojiLike { message_id: i64, emoji_id: String },
    GetGroupMsgHistory { group_id: i64, message_seq: i64, count: i64 },
    GetFriendMsgHistory { user_id: i64, message_seq: i64, count: i64 },
    GetRecord { file: String, out_format: String },
    GetImage { file: String },
    GetFile { file_id: String },
    /// Escape hatch: any action name/params pair not modeled above.
    Raw { action: String, params: Value },
}

impl Action {
    pub fn name(&self) -> &str {
        match self {
            Action::SendGroupMsg { .. } => "send_group_msg",
            Action::SendPrivateMsg { .. } => "send_private_msg",
            Action::GetLoginInfo => "get_login_info",
            Action::DeleteMsg { .. } => "delete_msg",
            Action::GetMsg { .. } => "get_msg",
            Action::SendPoke { .. } => "send_poke",
            Action::SetMsgEmojiLike { .. } => "set_msg_emoji_like",
            Action::GetGroupMsgHistory { .. } => "get_group_msg_history",
            Action::GetFriendMsgHistory { .. } => "get_friend_msg_history",
            Action::GetRecord { .. } => "get_record",
            Action::GetImage { .. } => "get_image",
            Action::GetFile { .. } => "get_file",
            Action::Raw { action, .. } => action,
        }
    }

    fn params(&self) -> Value {
        match self {
            Action::SendGroupMsg { group_id, message } => {
                serde_json::json!({ "group_id": group_id, "message": message })
            }
            Action::SendPrivateMsg { user_id, message } => {
                serde_json::json!({ "user_id": user_id, "message": message })
            }
            Action::GetLoginInfo => serde_json::json!({}),
            Action::DeleteMsg { message_id } => serde_json::json!({ "message_id": message_id }),
            Action::GetMsg { message_id } => serde_json::json!({ "message_id": message_id }),
            Action::SendPoke { user_id, group_id } => {
                serde_json::json!({ "user_id": user_id, "group_id": group_id })
            }
            Action::SetMsgEmojiLike { message_id, emoji_id } => {
                serde_json::json!({ "message_id": message_id, "emoji_id": emoji_id })
            }
            Action::GetGroupMsgHistory {
                group_id,
                message_seq,
                count,
            } => serde_json::json!({
                "group_id": group_id, "message_seq": message_seq, "count": count
            }),
            Action::GetFriendMsgHistory {
                user_id,
                message_seq,
                count,
            } => serde_json::json!({
                "user_id": user_id, "message_seq": message_seq, "count": count
            }),
            Action::GetRecord { file, out_format } => {
                serde_json::json!({ "file": file, "out_format": out_format })
            }
            Action::GetImage { file } => serde_json::json!({ "file": file }),
            Action::GetFile { file_id } => serde_json::json!({ "file_id": file_id }),
            Action::Raw { params, .. } => params.clone(),
        }
    }

    /// Builds the wire envelope, attaching `echo` when a reply is expected.
    pub fn into_envelope(self, echo: Option<String>) -> ActionEnvelope {
        let params = self.params();
        ActionEnvelope {
            action: self.name().to_string(),
            params,
            echo,
        }
    }
}

/// The correlated reply to an outbound [`Action`], or one frame of a stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub echo: Option<String>,
    #[serde(default)]
    pub wording: String,
    #[serde(default)]
    pub stream: Option<String>,
}

/// The `data_type` values that appear inside a stream frame's `data` object.
pub mod stream_data_type {
    pub const DATA_CHUNK: &str = "data_chunk";
    pub const FILE_CHUNK: &str = "file_chunk";
    pub const DATA_COMPLETE: &str = "data_complete";
    pub const FILE_COMPLETE: &str = "file_complete";
    pub const FILE_INFO: &str = "file_info";
    pub const ERROR: &str = "error";
}

/// How one stream-response frame should be handled by the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFrameKind {
    Chunk,
    Sentinel,
    Error,
}

impl Response {
    pub fn is_stream(&self) -> bool {
        self.stream.as_deref() == Some("stream-action")
    }

    fn data_type(&self) -> Option<&str> {
        self.data.get("data_type").and_then(Value::as_str)
    }

    /// Classifies a stream frame per the sentinel/error/chunk rules: a
    /// `data_complete`/`file_complete` `data_type` ends the stream, an
    /// `error` `data_type` or a non-ok top-level status is an error, and
    /// everything else is a chunk to yield to the caller.
    pub fn stream_frame_kind(&self) -> StreamFrameKind {
        if self.status != "ok" {
            return StreamFrameKind::Error;
        }
        match self.data_type() {
            Some(stream_data_type::DATA_COMPLETE | stream_data_type::FILE_COMPLETE) => {
                StreamFrameKind::Sentinel
            }
            Some(stream_data_type::ERROR) => StreamFrameKind::Error,
            _ => StreamFrameKind::Chunk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_send_group_msg_envelope() {
        let action = Action::SendGroupMsg {
            group_id: 7,
            message: vec![Segment::text("hi")],
        };
        let envelope = action.into_envelope(Some("T1".to_string()));
        assert_eq!(envelope.action, "send_group_msg");
        assert_eq!(envelope.echo.as_deref(), Some("T1"));
        assert_eq!(envelope.params["group_id"], 7);
    }

    #[test]
    fn classifies_stream_sentinel() {
        let resp = Response {
            status: "ok".into(),
            retcode: 0,
            data: serde_json::json!({ "type": "response", "data_type": "data_complete" }),
            message: String::new(),
            echo: Some("T2".into()),
            wording: String::new(),
            stream: Some("stream-action".into()),
        };
        assert_eq!(resp.stream_frame_kind(), StreamFrameKind::Sentinel);
    }

    #[test]
    fn classifies_non_ok_status_as_error() {
        let resp = Response {
            status: "failed".into(),
            retcode: 100,
            data: Value::Null,
            message: "boom".into(),
            echo: Some("T3".into()),
            wording: String::new(),
            stream: None,
        };
        assert_eq!(resp.stream_frame_kind(), StreamFrameKind::Error);
    }
}
