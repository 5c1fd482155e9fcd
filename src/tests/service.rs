use super::common::record;
use crate::app::errors::AppError;
use crate::app::{AppFactory, AppPaths};
use crate::eid::RecordId;
use crate::records::{
    Feedback, JsonRecordStore, Message, RecordField, RecordStore, RecordUpdate,
};
use crate::semantic::{SearchError, SearchFilters};

fn paths(tmp: &tempfile::TempDir) -> AppPaths {
    AppPaths::from_base(tmp.path().to_string_lossy().to_string())
}

#[tokio::test]
async fn test_feedback_and_search_through_service() {
    let tmp = tempfile::tempdir().unwrap();
    let service = AppFactory::create_app_service(&paths(&tmp)).await.unwrap();

    service
        .import(vec![
            record("1", "Genel", "vacation days", Feedback::Unset),
            record("2", "IK", "payroll date", Feedback::Unset),
        ])
        .unwrap();

    let transition = service
        .set_feedback(&RecordId::from("1"), Feedback::Positive)
        .unwrap();
    assert_eq!(transition.old_feedback, Feedback::Unset);
    assert_eq!(transition.new_feedback, Feedback::Positive);
    service.flush().await.unwrap();

    let results = service
        .search("vacation", &SearchFilters::default(), None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "1");

    let status = service.status().await.unwrap();
    assert_eq!(status.records, 2);
    assert_eq!(status.positive_records, 1);
    assert_eq!(status.indexed_points, Some(1));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_edit_through_service() {
    let tmp = tempfile::tempdir().unwrap();
    let service = AppFactory::create_app_service(&paths(&tmp)).await.unwrap();
    service
        .import(vec![record("1", "Genel", "vacation days", Feedback::Positive)])
        .unwrap();
    service.flush().await.unwrap();

    let (updated, edit) = service
        .edit_record(
            &RecordId::from("1"),
            RecordUpdate {
                schema: Some("IK".to_string()),
                conversation: Some(vec![Message::new("user", "sick leave rules")]),
                ..Default::default()
            },
        )
        .unwrap();
    service.flush().await.unwrap();

    assert_eq!(updated.schema, "IK");
    assert!(edit.changed_fields.contains(&RecordField::Schema));
    assert!(edit.changed_fields.contains(&RecordField::Conversation));

    let results = service
        .search(
            "sick leave",
            &SearchFilters {
                schema: Some("IK".to_string()),
                kind: None,
            },
            Some(5),
            None,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_record_is_not_found() {
    let tmp = tempfile::tempdir().unwrap();
    let service = AppFactory::create_app_service(&paths(&tmp)).await.unwrap();

    let result = service.set_feedback(&RecordId::from("nope"), Feedback::Positive);
    assert!(matches!(result, Err(AppError::NotFound(_))));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_index_survives_restart() {
    let tmp = tempfile::tempdir().unwrap();

    {
        let service = AppFactory::create_app_service(&paths(&tmp)).await.unwrap();
        service
            .import(vec![
                record("1", "Genel", "vacation days", Feedback::Positive),
                record("2", "Genel", "payroll date", Feedback::Positive),
            ])
            .unwrap();
        service.flush().await.unwrap();
        service.shutdown().await.unwrap();
    }

    let service = AppFactory::create_app_service(&paths(&tmp)).await.unwrap();
    let status = service.status().await.unwrap();
    assert_eq!(status.records, 2);
    assert_eq!(status.indexed_points, Some(2));

    let report = service.seeder().run(&Default::default(), |_| {}).await.unwrap();
    assert_eq!(report.imported, 2);
    assert_eq!(service.status().await.unwrap().indexed_points, Some(2));

    service.shutdown().await.unwrap();
}

fn unreachable_qdrant(tmp: &tempfile::TempDir) {
    std::fs::write(
        tmp.path().join("config.yaml"),
        "index:\n  backend: qdrant\n  url: http://127.0.0.1:1\n  timeout_ms: 500\nsync:\n  max_retries: 0\n",
    )
    .unwrap();
}

#[tokio::test]
async fn test_mutations_commit_while_index_is_unreachable() {
    let tmp = tempfile::tempdir().unwrap();
    unreachable_qdrant(&tmp);

    let service = AppFactory::create_app_service(&paths(&tmp)).await.unwrap();
    service
        .import(vec![record("1", "Genel", "vacation days", Feedback::Unset)])
        .unwrap();

    let transition = service
        .set_feedback(&RecordId::from("1"), Feedback::Positive)
        .unwrap();
    assert_eq!(transition.new_feedback, Feedback::Positive);
    service.flush().await.unwrap();

    let status = service.status().await.unwrap();
    assert_eq!(status.positive_records, 1);
    assert_eq!(status.indexed_points, None);

    let search = service
        .search("vacation", &SearchFilters::default(), None, None)
        .await;
    assert!(matches!(
        search,
        Err(AppError::Search(SearchError::SearchUnavailable(_)))
    ));

    service.shutdown().await.unwrap();

    let reopened = JsonRecordStore::load(tmp.path()).unwrap();
    let stored = reopened.get_record(&RecordId::from("1")).await.unwrap();
    assert_eq!(stored.feedback, Feedback::Positive);
}
