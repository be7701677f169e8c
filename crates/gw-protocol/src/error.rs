use thiserror::Error;

/// Errors raised while decoding an inbound frame or encoding an outbound one.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event variant: post_type={post_type:?} sub_type={sub_type:?}")]
    UnknownVariant {
        post_type: Option<String>,
        sub_type: Option<String>,
    },

    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),
}
