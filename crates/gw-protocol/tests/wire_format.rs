use gw_protocol::{decode_event, encode_action, Action, Event, GroupOrPrivateMessage};
use gw_protocol::event::NoticeEvent;

#[test]
fn outbound_action_round_trips_through_decode() {
    let action = Action::SendGroupMsg {
        group_id: 7,
        message: vec![gw_protocol::Segment::text("hi")],
    };
    let envelope = action.into_envelope(Some("T1".to_string()));
    let wire = encode_action(&envelope).unwrap();

    let value: serde_json::Value = serde_json::from_str(&wire).unwrap();
    assert_eq!(value["action"], "send_group_msg");
    assert_eq!(value["echo"], "T1");
    assert_eq!(value["params"]["group_id"], 7);
}

#[test]
fn private_message_decodes_distinctly_from_group() {
    let raw = r#"{
        "post_type":"message","message_type":"private","self_id":42,
        "user_id":9,"message_id":55,"time":1700,
        "sender":{"user_id":9},
        "message":[{"type":"text","data":{"text":"hey"}}]
    }"#;
    let ev = decode_event(raw).unwrap();
    assert!(matches!(ev, Event::Message(GroupOrPrivateMessage::Private(_))));
}

#[test]
fn friend_recall_notice_decodes() {
    let raw = r#"{
        "post_type":"notice","notice_type":"friend_recall",
        "self_id":42,"user_id":9,"message_id":321,"time":1700
    }"#;
    let ev = decode_event(raw).unwrap();
    assert!(matches!(
        ev,
        Event::Notice(NoticeEvent::FriendRecall { message_id: 321, .. })
    ));
}
