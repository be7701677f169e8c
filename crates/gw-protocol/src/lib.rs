//! Wire types for the upstream chat protocol: inbound events, message
//! segments, outbound actions, and the response envelope that ties them
//! together via correlation tokens.

pub mod action;
pub mod error;
pub mod event;
pub mod segment;

pub use action::{Action, ActionEnvelope};
pub use error::DecodeError;
pub use event::{
    Event, GroupOrPrivateMessage, MetaEvent, NoticeEvent, RequestEvent, SelfMessage, Sender,
};
pub use segment::Segment;

/// Parses one raw upstream frame into a typed [`Event`].
///
/// A frame that lacks `post_type` but carries an `echo` field is classified
/// as a [`Event::Response`]. An unrecognized `post_type`/sub-discriminator
/// pair is not a hard error: it is reported as [`DecodeError::UnknownVariant`]
/// so the caller can log and skip it, since the upstream protocol is
/// versioned and additive.
pub fn decode_event(raw: &str) -> Result<Event, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    event::decode_value(value)
}

/// Serializes an outbound action envelope to the wire format expected by
/// the upstream server.
pub fn encode_action(envelope: &ActionEnvelope) -> Result<String, DecodeError> {
    Ok(serde_json::to_string(envelope)?)
}
