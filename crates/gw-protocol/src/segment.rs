use serde::{Deserialize, Serialize};

/// One element of a message's content array.
///
/// Media-bearing variants carry `url` only on inbound frames and `local_path`
/// only on the journaled representation; neither is ever present on an
/// outbound frame built by this crate's constructors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    Text(TextData),
    At(AtData),
    Image(MediaData),
    Reply(ReplyData),
    Face(FaceData),
    Dice(DiceData),
    Rps(RpsData),
    File(MediaData),
    Video(MediaData),
    Record(MediaData),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtData {
    pub qq: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceData {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DiceData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpsData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// Shared shape for image/video/record/file segments.
///
/// `file` is the outbound payload (a base64 blob or a `file://`/`http://`
/// URI). `url` is populated by the upstream server on inbound frames only.
/// `local_path` is never sent or received over the wire; the media pipeline
/// fills it in on the journaled copy of the message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Segment {
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    pub fn at(qq: impl Into<String>) -> Self {
        Segment::At(AtData { qq: qq.into() })
    }

    pub fn image(file: impl Into<String>) -> Self {
        Segment::Image(MediaData {
            file: Some(file.into()),
            ..Default::default()
        })
    }

    pub fn reply(id: impl Into<String>) -> Self {
        Segment::Reply(ReplyData { id: id.into() })
    }

    /// Returns the media sub-object for segment kinds that carry one.
    pub fn media(&self) -> Option<&MediaData> {
        match self {
            Segment::Image(d) | Segment::File(d) | Segment::Video(d) | Segment::Record(d) => {
                Some(d)
            }
            _ => None,
        }
    }

    pub fn media_mut(&mut self) -> Option<&mut MediaData> {
        match self {
            Segment::Image(d) | Segment::File(d) | Segment::Video(d) | Segment::Record(d) => {
                Some(d)
            }
            _ => None,
        }
    }

    /// `true` for segment kinds the media pipeline must side-load.
    pub fn is_media(&self) -> bool {
        self.media().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_inbound_image_segment() {
        let raw = r#"{"type":"image","data":{"url":"http://x/y.png"}}"#;
        let seg: Segment = serde_json::from_str(raw).unwrap();
        match &seg {
            Segment::Image(d) => {
                assert_eq!(d.url.as_deref(), Some("http://x/y.png"));
                assert!(d.local_path.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn outbound_text_segment_round_trips() {
        let seg = Segment::text("hi");
        let json = serde_json::to_string(&seg).unwrap();
        assert_eq!(json, r#"{"type":"text","data":{"text":"hi"}}"#);
        let back: Segment = serde_json::from_str(&json).unwrap();
        assert_eq!(seg, back);
    }

    #[test]
    fn outbound_media_segment_omits_url_and_local_path() {
        let seg = Segment::image("base64-blob");
        let json = serde_json::to_string(&seg).unwrap();
        assert!(!json.contains("url"));
        assert!(!json.contains("local_path"));
    }

    #[test]
    fn journaled_media_segment_can_carry_local_path() {
        let mut seg = Segment::image("http://x/y.png");
        seg.media_mut().unwrap().local_path = Some("/media/1_0.png".to_string());
        assert_eq!(
            seg.media().unwrap().local_path.as_deref(),
            Some("/media/1_0.png")
        );
    }
}
