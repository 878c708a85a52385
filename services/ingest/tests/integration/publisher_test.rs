use std::time::Duration;

use chrono::Utc;

use inflow_domain::OutboxMessage;
use inflow_ingest::outbox::publisher::{CycleStats, OutboxPublisher};

use crate::helpers::{MockOutboxRepo, MockStreamPublisher, queued_envelope};

fn publisher(
    outbox: MockOutboxRepo,
    stream: MockStreamPublisher,
) -> OutboxPublisher<MockOutboxRepo, MockStreamPublisher> {
    OutboxPublisher {
        outbox,
        stream,
        poll_interval: Duration::from_millis(10),
        max_batch_size: 100,
    }
}

fn row(created_offset_secs: i64) -> OutboxMessage {
    let envelope = queued_envelope("t1", None);
    let mut row = OutboxMessage::for_envelope(&envelope, "inflow:events");
    row.created_at = Utc::now() + chrono::Duration::seconds(created_offset_secs);
    row
}

#[tokio::test]
async fn should_publish_each_unpublished_row_and_mark_it() {
    let outbox = MockOutboxRepo::new(vec![row(0), row(1)]);
    let rows = outbox.rows_handle();
    let stream = MockStreamPublisher::new();
    let published = stream.published_handle();

    let stats = publisher(outbox, stream).run_cycle().await.unwrap();

    assert_eq!(
        stats,
        CycleStats {
            published: 2,
            failed: 0
        }
    );
    let rows = rows.lock().unwrap();
    assert!(rows.iter().all(|row| row.published_at.is_some()));
    assert!(rows.iter().all(|row| row.last_error.is_none()));

    let published = published.lock().unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].0, "inflow:events");
    let field_names: Vec<&str> = published[0].1.iter().map(|(name, _)| *name).collect();
    assert_eq!(
        field_names,
        ["event_id", "tenant_id", "event_type", "correlation_id", "message"]
    );
}

#[tokio::test]
async fn should_publish_oldest_rows_first() {
    let newer = row(10);
    let older = row(-10);
    let older_event = older.event_id;
    let outbox = MockOutboxRepo::new(vec![newer, older]);
    let stream = MockStreamPublisher::new();
    let published = stream.published_handle();

    publisher(outbox, stream).run_cycle().await.unwrap();

    let published = published.lock().unwrap();
    let first_event_id = published[0]
        .1
        .iter()
        .find(|(name, _)| *name == "event_id")
        .map(|(_, value)| value.clone())
        .unwrap();
    assert_eq!(first_event_id, older_event.to_string());
}

#[tokio::test]
async fn should_record_the_failure_and_retry_on_the_next_cycle() {
    let outbox = MockOutboxRepo::new(vec![row(0)]);
    let rows = outbox.rows_handle();
    let stream = MockStreamPublisher::failing(1);
    let publisher = publisher(outbox, stream);

    let first = publisher.run_cycle().await.unwrap();
    assert_eq!(
        first,
        CycleStats {
            published: 0,
            failed: 1
        }
    );
    {
        let rows = rows.lock().unwrap();
        assert!(rows[0].published_at.is_none(), "row stays eligible");
        assert_eq!(rows[0].publish_attempts, 1);
        assert!(rows[0].last_error.is_some());
    }

    // The broker recovered; the same row goes out on the next cycle.
    let second = publisher.run_cycle().await.unwrap();
    assert_eq!(second.published, 1);
    let rows = rows.lock().unwrap();
    assert!(rows[0].published_at.is_some());
    assert!(rows[0].last_error.is_none(), "cleared on success");
}

#[tokio::test]
async fn should_not_republish_a_marked_row() {
    let outbox = MockOutboxRepo::new(vec![row(0)]);
    let stream = MockStreamPublisher::new();
    let published = stream.published_handle();
    let publisher = publisher(outbox, stream);

    publisher.run_cycle().await.unwrap();
    let second = publisher.run_cycle().await.unwrap();

    assert_eq!(second, CycleStats::default());
    assert_eq!(
        published.lock().unwrap().len(),
        1,
        "exactly one broker entry per row"
    );
}

#[tokio::test]
async fn should_prune_only_old_published_rows() {
    let mut old_published = row(0);
    old_published.published_at = Some(Utc::now() - chrono::Duration::hours(48));
    let mut fresh_published = row(0);
    fresh_published.published_at = Some(Utc::now());
    let unpublished = row(0);

    let outbox = MockOutboxRepo::new(vec![old_published, fresh_published, unpublished]);
    let rows = outbox.rows_handle();

    use inflow_ingest::domain::repository::OutboxRepository as _;
    let removed = outbox
        .prune_published_before(Utc::now() - chrono::Duration::hours(24))
        .await
        .unwrap();

    assert_eq!(removed, 1);
    let rows = rows.lock().unwrap();
    assert_eq!(rows.len(), 2);
    assert!(
        rows.iter().any(|row| row.published_at.is_none()),
        "unpublished rows are never pruned"
    );
}
