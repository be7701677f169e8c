//! End-to-end check of the dispatcher's priority ordering and
//! short-circuit behavior across two independent plugins sharing interest
//! in the same event variant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gw_core::{BroadcastBus, EventDispatcher, EventVariant, Plugin};
use gw_protocol::event::{GroupMessage, GroupOrPrivateMessage, Sender};
use gw_protocol::Event;

struct RecordsAndStops {
    name: &'static str,
    priority: i32,
    ran: Arc<AtomicBool>,
    consume: bool,
}

#[async_trait]
impl Plugin for RecordsAndStops {
    fn name(&self) -> &str {
        self.name
    }
    fn interests(&self) -> &'static [EventVariant] {
        &[EventVariant::Message]
    }
    fn priority(&self) -> i32 {
        self.priority
    }
    async fn handle(&self, _event: Arc<Event>, _broadcast: Arc<BroadcastBus>) -> bool {
        self.ran.store(true, Ordering::SeqCst);
        self.consume
    }
}

fn sample_group_message() -> Arc<Event> {
    Arc::new(Event::Message(GroupOrPrivateMessage::Group(GroupMessage {
        self_id: 42,
        message_id: 1,
        group_id: 7,
        user_id: 9,
        time: 1700,
        sender: Sender {
            user_id: 9,
            nickname: None,
            card: None,
        },
        message: vec![],
    })))
}

#[tokio::test]
async fn high_priority_consumer_prevents_low_priority_from_running() {
    let high_ran = Arc::new(AtomicBool::new(false));
    let low_ran = Arc::new(AtomicBool::new(false));

    let high: Arc<dyn Plugin> = Arc::new(RecordsAndStops {
        name: "high",
        priority: 10,
        ran: high_ran.clone(),
        consume: true,
    });
    let low: Arc<dyn Plugin> = Arc::new(RecordsAndStops {
        name: "low",
        priority: 5,
        ran: low_ran.clone(),
        consume: false,
    });

    let dispatcher = EventDispatcher::build(vec![low, high], 16).await.unwrap();
    dispatcher.dispatch_event(sample_group_message()).await;

    assert!(high_ran.load(Ordering::SeqCst));
    assert!(!low_ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn non_consuming_plugins_all_run() {
    let first_ran = Arc::new(AtomicBool::new(false));
    let second_ran = Arc::new(AtomicBool::new(false));

    let first: Arc<dyn Plugin> = Arc::new(RecordsAndStops {
        name: "first",
        priority: 10,
        ran: first_ran.clone(),
        consume: false,
    });
    let second: Arc<dyn Plugin> = Arc::new(RecordsAndStops {
        name: "second",
        priority: 5,
        ran: second_ran.clone(),
        consume: false,
    });

    let dispatcher = EventDispatcher::build(vec![first, second], 16).await.unwrap();
    dispatcher.dispatch_event(sample_group_message()).await;

    assert!(first_ran.load(Ordering::SeqCst));
    assert!(second_ran.load(Ordering::SeqCst));
}
