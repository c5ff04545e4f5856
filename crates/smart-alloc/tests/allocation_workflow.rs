use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use smart_alloc::allocation::{
    parse_applicants, Actor, AllocationEngine, AllocationService, ApplicationId,
    ApplicationRepository, ApplicationStatus, Dataset, EngineConfig, FeatureExtractor,
    FeatureSchema, ImportError, InventoryRepository, LoggingNotifier, MemoryAuditLog,
    MemoryHousingStore, MemoryRunTracker, PlacementFailure, PredictorConfig, PriorityPredictor,
    RoomId, RunStatus,
};

const SESSION: &str = "2024/2025";

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

type Service = AllocationService<MemoryHousingStore, MemoryAuditLog, MemoryRunTracker>;

fn service_for(store: Arc<MemoryHousingStore>) -> (Service, Arc<MemoryAuditLog>) {
    let predictor = PriorityPredictor::without_model(&PredictorConfig::default());
    let audit = Arc::new(MemoryAuditLog::new());
    let engine = AllocationEngine::new(
        store,
        audit.clone(),
        Arc::new(predictor),
        EngineConfig::default(),
    );
    let service = AllocationService::new(
        Arc::new(engine),
        Arc::new(MemoryRunTracker::new()),
        Arc::new(LoggingNotifier),
        FeatureExtractor::new(FeatureSchema::Legacy, 500.0),
    );
    (service, audit)
}

fn loaded_store() -> Arc<MemoryHousingStore> {
    let mut dataset = Dataset::from_path(&fixture("dataset.json")).expect("dataset loads");
    let added = dataset
        .add_applicants_csv(&fixture("applicants.csv"), SESSION)
        .expect("csv loads");
    assert_eq!(added, 3);
    Arc::new(dataset.into_store().expect("store builds"))
}

#[test]
fn session_run_places_applicants_in_priority_order() {
    let store = loaded_store();
    let (service, audit) = service_for(store.clone());

    let report = service
        .run_session(SESSION, Actor::User("registrar".to_string()))
        .expect("run completes");

    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.total_applications, 7);
    assert_eq!(report.run.successful_allocations, 6);
    assert_eq!(report.run.waiting_list_count, 1);

    let placed: Vec<(&str, &str, u16)> = report
        .placements
        .iter()
        .map(|p| (p.application_id.as_str(), p.room_id.as_str(), p.bed_space))
        .collect();
    assert_eq!(
        placed,
        vec![
            ("app-001", "qh-001", 1),
            ("app-005", "uh-201", 1),
            ("app-002", "qh-101", 1),
            ("app-101", "kh-101", 1),
            ("app-003", "kh-101", 2),
            ("app-102", "qh-101", 2),
        ]
    );

    let expected_by_hostel: BTreeMap<String, u32> = [
        ("Kings Hall".to_string(), 2),
        ("Queens Hall".to_string(), 3),
        ("Unity Hall".to_string(), 1),
    ]
    .into_iter()
    .collect();
    assert_eq!(report.allocations_by_hostel, expected_by_hostel);

    assert_eq!(report.waiting_list.len(), 1);
    let waiting = &report.waiting_list[0];
    assert_eq!(waiting.application_id, ApplicationId::new("app-103"));
    assert_eq!(waiting.position, 1);
    assert_eq!(waiting.reason, PlacementFailure::NoAvailableBed);

    let disabled = store
        .fetch_application(&ApplicationId::new("app-002"))
        .expect("readable")
        .expect("exists");
    assert_eq!(disabled.priority_score, Some(95.0));
    assert_eq!(disabled.status, ApplicationStatus::Allocated);

    for room in store.rooms().expect("rooms readable") {
        let occupied = room.bed_spaces.iter().filter(|bed| bed.is_occupied).count();
        assert_eq!(usize::from(room.current_occupancy), occupied);
        assert!(room.current_occupancy <= room.capacity);
    }
    let maintenance = store
        .fetch_room(&RoomId::new("kh-102"))
        .expect("readable")
        .expect("exists");
    assert_eq!(maintenance.current_occupancy, 0);

    assert!(!audit.events().expect("audit readable").is_empty());
}

#[test]
fn other_sessions_and_non_pending_applications_are_untouched() {
    let store = loaded_store();
    let (service, _) = service_for(store.clone());

    service
        .run_session(SESSION, Actor::System)
        .expect("run completes");

    let approved = store
        .fetch_application(&ApplicationId::new("app-004"))
        .expect("readable")
        .expect("exists");
    assert_eq!(approved.status, ApplicationStatus::Approved);
    assert_eq!(approved.priority_score, None);

    let earlier = store.list_pending("2023/2024").expect("readable");
    assert_eq!(earlier.len(), 1);
    assert_eq!(earlier[0].id, ApplicationId::new("app-900"));

    let rerun = service
        .run_session(SESSION, Actor::System)
        .expect("second run completes");
    assert_eq!(rerun.run.total_applications, 1);
    assert!(rerun.placements.is_empty());
}

#[test]
fn malformed_applicant_rows_are_reported_with_line_numbers() {
    let csv = "application_id,student_id,full_name,gender,level,gpa,submitted_at\n\
               app-1,stu-1,Ok Row,F,100,3.0,2024-08-01\n\
               app-2,stu-2,Bad Row,M,200,three,2024-08-01\n";

    let err = parse_applicants(csv.as_bytes(), SESSION).expect_err("gpa column is invalid");
    match err {
        ImportError::InvalidRow { row, reason } => {
            assert_eq!(row, 3);
            assert!(reason.contains("gpa"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
