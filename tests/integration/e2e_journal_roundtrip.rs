//! Exercises the journal's write/read/delete path against a real Redis,
//! matching scenario 4 and 6 from the design's testable-properties list:
//! a group message round-trips by id, and deleting it clears both the
//! hash entry and its time-index score.

use gw_core::journal::{ConversationKey, Journal, Kind};
use redis::AsyncCommands;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::redis::Redis;

async fn connect(container: &testcontainers::ContainerAsync<Redis>) -> redis::aio::ConnectionManager {
    let url = format!(
        "redis://127.0.0.1:{}/",
        container.get_host_port_ipv4(6379).await.unwrap()
    );
    redis::Client::open(url)
        .unwrap()
        .get_connection_manager()
        .await
        .unwrap()
}

#[tokio::test]
async fn group_message_round_trips_by_id() {
    let redis = Redis::default().start().await.unwrap();
    let conn = connect(&redis).await;
    let journal = Journal::new(conn);

    let key = ConversationKey::conversation(42, Kind::Group, 7);
    let payload = serde_json::json!({
        "message_id": 100,
        "group_id": 7,
        "time": 1700,
        "message": [{"type": "image", "data": {"url": "http://x/y.png"}}]
    });

    journal.append(&key, "100", 1700, &payload).await.unwrap();

    let fetched = journal.get(&key, "100").await.unwrap().unwrap();
    assert_eq!(fetched["group_id"], 7);

    let mut raw_conn = connect(&redis).await;
    let score: Option<f64> = raw_conn.zscore("bot:42:group:7:time_map", "100").await.unwrap();
    assert_eq!(score, Some(1700.0));
}

#[tokio::test]
async fn delete_clears_hash_and_time_index() {
    let redis = Redis::default().start().await.unwrap();
    let conn = connect(&redis).await;
    let journal = Journal::new(conn);

    let key = ConversationKey::conversation(42, Kind::Group, 7);
    let payload = serde_json::json!({"message_id": 101});
    journal.append(&key, "101", 1700, &payload).await.unwrap();
    journal.delete(&key, "101").await.unwrap();

    assert!(journal.get(&key, "101").await.unwrap().is_none());

    let mut raw_conn = connect(&redis).await;
    let score: Option<f64> = raw_conn.zscore("bot:42:group:7:time_map", "101").await.unwrap();
    assert_eq!(score, None);
}

#[tokio::test]
async fn query_page_returns_newest_first() {
    let redis = Redis::default().start().await.unwrap();
    let conn = connect(&redis).await;
    let journal = Journal::new(conn);

    let key = ConversationKey::conversation(42, Kind::Group, 7);
    for (id, ts) in [("1", 100), ("2", 200), ("3", 300)] {
        journal
            .append(&key, id, ts, &serde_json::json!({"message_id": id}))
            .await
            .unwrap();
    }

    let page = journal.query_page(&key, 0, 2).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0]["message_id"], "3");
    assert_eq!(page[1]["message_id"], "2");
}
