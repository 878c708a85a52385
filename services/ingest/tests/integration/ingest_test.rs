use std::sync::Arc;

use uuid::Uuid;

use inflow_domain::EventStatus;
use inflow_ingest::error::IngestServiceError;
use inflow_ingest::usecase::ingest::{IngestEventUseCase, IngestRequest};

use crate::helpers::{MockEventRepo, queued_envelope};

const STREAM: &str = "inflow:events";

fn usecase(repo: MockEventRepo) -> IngestEventUseCase<MockEventRepo> {
    IngestEventUseCase {
        events: repo,
        allowed_event_types: Arc::new(vec![
            "user.created".to_owned(),
            "order.placed".to_owned(),
        ]),
        stream_name: STREAM.to_owned(),
    }
}

fn request(tenant: &str, key: Option<&str>) -> IngestRequest {
    IngestRequest {
        event_type: "user.created".to_owned(),
        source: "crm".to_owned(),
        tenant_id: tenant.to_owned(),
        payload: Some(serde_json::json!({"id": 1})),
        header_idempotency_key: key.map(str::to_owned),
        ..IngestRequest::default()
    }
}

#[tokio::test]
async fn should_admit_a_new_event_with_its_outbox_row() {
    let repo = MockEventRepo::new();
    let events = repo.events_handle();
    let outbox = repo.outbox_handle();
    let uc = usecase(repo);

    let outcome = uc.execute(request("t1", Some("k1"))).await.unwrap();

    assert_eq!(outcome.status, EventStatus::Queued);
    assert!(!outcome.idempotency_replayed);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, outcome.event_id);
    assert_eq!(events[0].status, EventStatus::Queued);
    assert_eq!(events[0].idempotency_key.as_deref(), Some("k1"));
    assert_eq!(events[0].attempts, 0);
    events[0].check_invariants().unwrap();

    let outbox = outbox.lock().unwrap();
    assert_eq!(outbox.len(), 1, "outbox row written in the same transaction");
    assert_eq!(outbox[0].event_id, outcome.event_id);
    assert_eq!(outbox[0].stream_name, STREAM);
    assert!(outbox[0].published_at.is_none());
}

#[tokio::test]
async fn should_replay_a_duplicate_submission_without_republishing() {
    let repo = MockEventRepo::new();
    let events = repo.events_handle();
    let outbox = repo.outbox_handle();
    let uc = usecase(repo);

    let first = uc.execute(request("t1", Some("k1"))).await.unwrap();
    let second = uc.execute(request("t1", Some("k1"))).await.unwrap();

    assert!(second.idempotency_replayed);
    assert_eq!(second.event_id, first.event_id);
    assert_eq!(second.status, EventStatus::Queued);
    assert_eq!(events.lock().unwrap().len(), 1, "still exactly one event");
    assert_eq!(outbox.lock().unwrap().len(), 1, "no second outbox row");
}

#[tokio::test]
async fn should_report_the_current_status_on_replay() {
    let mut existing = queued_envelope("t1", Some("k1"));
    existing.begin_processing().unwrap();
    existing.succeed().unwrap();
    let event_id = existing.id;
    let uc = usecase(MockEventRepo::with_event(existing));

    let outcome = uc.execute(request("t1", Some("k1"))).await.unwrap();

    assert!(outcome.idempotency_replayed);
    assert_eq!(outcome.event_id, event_id);
    assert_eq!(outcome.status, EventStatus::Succeeded);
}

#[tokio::test]
async fn should_treat_distinct_keys_as_distinct_events() {
    // A prior submission persisted under the header key "H"; re-sending the
    // same body without the header uses the body key "B" and is a new event.
    let repo = MockEventRepo::new();
    let events = repo.events_handle();
    let uc = usecase(repo);

    let mut with_header = request("t1", Some("H"));
    with_header.idempotency_key = Some("B".to_owned());
    let first = uc.execute(with_header).await.unwrap();
    assert_eq!(
        events.lock().unwrap()[0].idempotency_key.as_deref(),
        Some("H"),
        "header key wins over the body key"
    );

    let mut without_header = request("t1", None);
    without_header.idempotency_key = Some("B".to_owned());
    let second = uc.execute(without_header).await.unwrap();

    assert!(!second.idempotency_replayed);
    assert_ne!(second.event_id, first.event_id);
    assert_eq!(events.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn should_repair_a_received_event_left_by_a_failed_ingestion() {
    let mut stranded = queued_envelope("t1", Some("k1"));
    stranded.status = EventStatus::Received;
    let event_id = stranded.id;
    let repo = MockEventRepo::with_event(stranded);
    let events = repo.events_handle();
    let outbox = repo.outbox_handle();
    let uc = usecase(repo);

    let outcome = uc.execute(request("t1", Some("k1"))).await.unwrap();

    assert!(outcome.idempotency_replayed);
    assert_eq!(outcome.event_id, event_id);
    assert_eq!(outcome.status, EventStatus::Queued);
    assert_eq!(events.lock().unwrap()[0].status, EventStatus::Queued);
    let outbox = outbox.lock().unwrap();
    assert_eq!(outbox.len(), 1, "missing outbox row inserted by the repair");
    assert_eq!(outbox[0].event_id, event_id);
}

#[tokio::test]
async fn should_return_conflict_when_the_conflicting_key_cannot_be_resolved() {
    // Same event id resubmitted under a different key: the insert conflicts
    // on the primary key, and the key lookup finds nothing.
    let existing = queued_envelope("t1", Some("other-key"));
    let event_id = existing.id;
    let uc = usecase(MockEventRepo::with_event(existing));

    let mut reused = request("t1", Some("k1"));
    reused.event_id = Some(event_id);
    let result = uc.execute(reused).await;

    assert!(
        matches!(result, Err(IngestServiceError::Conflict)),
        "expected Conflict, got {result:?}"
    );
}

#[tokio::test]
async fn should_return_conflict_when_no_idempotency_key_was_sent() {
    let existing = queued_envelope("t1", None);
    let event_id = existing.id;
    let uc = usecase(MockEventRepo::with_event(existing));

    let mut reused = request("t1", None);
    reused.event_id = Some(event_id);
    let result = uc.execute(reused).await;

    assert!(matches!(result, Err(IngestServiceError::Conflict)));
}

#[tokio::test]
async fn should_surface_transient_storage_failure_as_internal() {
    let repo = MockEventRepo::new();
    *repo.fail_transient.lock().unwrap() = true;
    let uc = usecase(repo);

    let result = uc.execute(request("t1", Some("k1"))).await;

    assert!(matches!(result, Err(IngestServiceError::Internal(_))));
}

#[tokio::test]
async fn should_reject_blank_required_fields() {
    let uc = usecase(MockEventRepo::new());
    let mut bad = request("  ", Some("k1"));
    bad.source = String::new();
    let result = uc.execute(bad).await;

    let Err(IngestServiceError::Validation(errors)) = result else {
        panic!("expected Validation, got {result:?}");
    };
    assert!(errors.contains_key("tenant_id"));
    assert!(errors.contains_key("source"));
}

#[tokio::test]
async fn should_reject_an_unregistered_event_type() {
    let uc = usecase(MockEventRepo::new());
    let mut bad = request("t1", None);
    bad.event_type = "unknown.type".to_owned();
    let result = uc.execute(bad).await;

    let Err(IngestServiceError::Validation(errors)) = result else {
        panic!("expected Validation, got {result:?}");
    };
    assert_eq!(errors["event_type"], "is not a registered event type");
}

#[tokio::test]
async fn should_accept_any_event_type_with_an_empty_allow_list() {
    let uc = IngestEventUseCase {
        events: MockEventRepo::new(),
        allowed_event_types: Arc::new(vec![]),
        stream_name: STREAM.to_owned(),
    };
    let mut req = request("t1", None);
    req.event_type = "anything.goes".to_owned();
    assert!(uc.execute(req).await.is_ok());
}

#[tokio::test]
async fn should_reject_a_missing_payload() {
    let uc = usecase(MockEventRepo::new());
    let mut bad = request("t1", None);
    bad.payload = None;
    let result = uc.execute(bad).await;

    let Err(IngestServiceError::Validation(errors)) = result else {
        panic!("expected Validation, got {result:?}");
    };
    assert_eq!(errors["payload"], "is required");
}

#[tokio::test]
async fn should_reject_a_future_occurred_at() {
    let uc = usecase(MockEventRepo::new());
    let mut bad = request("t1", None);
    bad.occurred_at = Some(chrono::Utc::now() + chrono::Duration::hours(1));
    let result = uc.execute(bad).await;

    let Err(IngestServiceError::Validation(errors)) = result else {
        panic!("expected Validation, got {result:?}");
    };
    assert!(errors.contains_key("occurred_at"));
}

#[tokio::test]
async fn should_keep_the_client_supplied_event_id() {
    let repo = MockEventRepo::new();
    let uc = usecase(repo);
    let id = Uuid::new_v4();
    let mut req = request("t1", None);
    req.event_id = Some(id);

    let outcome = uc.execute(req).await.unwrap();
    assert_eq!(outcome.event_id, id);
}
