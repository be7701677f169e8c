use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;
use crate::segment::Segment;

/// A decoded inbound frame, or a correlated response to an outbound call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Message(GroupOrPrivateMessage),
    Notice(NoticeEvent),
    Request(RequestEvent),
    Meta(MetaEvent),
    Response(crate::action::Response),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum GroupOrPrivateMessage {
    Group(GroupMessage),
    Private(PrivateMessage),
}

impl GroupOrPrivateMessage {
    pub fn self_id(&self) -> i64 {
        match self {
            GroupOrPrivateMessage::Group(m) => m.self_id,
            GroupOrPrivateMessage::Private(m) => m.self_id,
        }
    }

    pub fn message_id(&self) -> i64 {
        match self {
            GroupOrPrivateMessage::Group(m) => m.message_id,
            GroupOrPrivateMessage::Private(m) => m.message_id,
        }
    }

    pub fn time(&self) -> i64 {
        match self {
            GroupOrPrivateMessage::Group(m) => m.time,
            GroupOrPrivateMessage::Private(m) => m.time,
        }
    }

    pub fn segments(&self) -> &[Segment] {
        match self {
            GroupOrPrivateMessage::Group(m) => &m.message,
            GroupOrPrivateMessage::Private(m) => &m.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: i64,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub card: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub self_id: i64,
    pub message_id: i64,
    pub group_id: i64,
    pub user_id: i64,
    pub time: i64,
    pub sender: Sender,
    pub message: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateMessage {
    pub self_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub time: i64,
    pub sender: Sender,
    pub message: Vec<Segment>,
}

/// The bot's own record of a message it sent, journaled alongside inbound
/// messages under the same conversation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfMessage {
    pub self_id: i64,
    pub message_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    pub time: i64,
    pub message: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice_type", rename_all = "snake_case")]
pub enum NoticeEvent {
    GroupRecall {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        operator_id: i64,
        message_id: i64,
        time: i64,
    },
    GroupIncrease {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        operator_id: i64,
        sub_type: String,
        time: i64,
    },
    GroupDecrease {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        operator_id: i64,
        sub_type: String,
        time: i64,
    },
    GroupAdmin {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        sub_type: String,
        time: i64,
    },
    GroupBan {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        operator_id: i64,
        duration: i64,
        sub_type: String,
        time: i64,
    },
    GroupUpload {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        time: i64,
        file: Value,
    },
    GroupCard {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        card_new: String,
        card_old: String,
        time: i64,
    },
    GroupMsgEmojiLike {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        message_id: i64,
        time: i64,
        likes: Value,
    },
    FriendAdd {
        self_id: i64,
        user_id: i64,
        time: i64,
    },
    FriendRecall {
        self_id: i64,
        user_id: i64,
        message_id: i64,
        time: i64,
    },
    BotOffline {
        self_id: i64,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        message: Option<String>,
        time: i64,
    },
    Essence {
        self_id: i64,
        group_id: i64,
        sender_id: i64,
        operator_id: i64,
        message_id: i64,
        sub_type: String,
        time: i64,
    },
    Notify(NotifyEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sub_type", rename_all = "snake_case")]
pub enum NotifyEvent {
    Poke {
        self_id: i64,
        group_id: Option<i64>,
        user_id: i64,
        target_id: i64,
        time: i64,
    },
    ProfileLike {
        self_id: i64,
        user_id: i64,
        time: i64,
    },
    InputStatus {
        self_id: i64,
        user_id: i64,
        status_text: Option<String>,
        time: i64,
    },
    LuckyKing {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        target_id: i64,
        time: i64,
    },
    Honor {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        honor_type: String,
        time: i64,
    },
    Title {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        title: String,
        time: i64,
    },
    GroupName {
        self_id: i64,
        group_id: i64,
        name_new: String,
        time: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request_type", rename_all = "snake_case")]
pub enum RequestEvent {
    Friend {
        self_id: i64,
        user_id: i64,
        comment: String,
        flag: String,
        time: i64,
    },
    Group {
        self_id: i64,
        group_id: i64,
        user_id: i64,
        comment: String,
        flag: String,
        sub_type: String,
        time: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "meta_event_type", rename_all = "snake_case")]
pub enum MetaEvent {
    Lifecycle {
        self_id: i64,
        sub_type: String,
        time: i64,
    },
    Heartbeat {
        self_id: i64,
        interval: i64,
        time: i64,
    },
}

/// Decodes one raw upstream JSON value into a typed [`Event`].
///
/// A frame without `post_type` but with an `echo` field is a [`Event::Response`].
pub(crate) fn decode_value(value: Value) -> Result<Event, DecodeError> {
    let post_type = value.get("post_type").and_then(Value::as_str);

    match post_type {
        Some("message") => {
            let m: GroupOrPrivateMessage = serde_json::from_value(value)?;
            Ok(Event::Message(m))
        }
        Some("notice") => {
            let n: NoticeEvent = serde_json::from_value(value)?;
            Ok(Event::Notice(n))
        }
        Some("request") => {
            let r: RequestEvent = serde_json::from_value(value)?;
            Ok(Event::Request(r))
        }
        Some("meta_event") => {
            let m: MetaEvent = serde_json::from_value(value)?;
            Ok(Event::Meta(m))
        }
        Some(other) => Err(DecodeError::UnknownVariant {
            post_type: Some(other.to_string()),
            sub_type: None,
        }),
        None => {
            if value.get("echo").is_some() || value.get("status").is_some() {
                let r: crate::action::Response = serde_json::from_value(value)?;
                Ok(Event::Response(r))
            } else {
                Err(DecodeError::MissingField("post_type"))
            }
        }
    }
}
