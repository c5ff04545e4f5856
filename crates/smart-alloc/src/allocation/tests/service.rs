use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;

use super::common::*;
use crate::allocation::audit::AuditAction;
use crate::allocation::domain::{
    Actor, AllocationRun, ApplicationId, Gender, HostelGenderType, RoomId, RunId, RunStatus,
};
use crate::allocation::engine::AllocationEngine;
use crate::allocation::engine::OverrideRequest;
use crate::allocation::features::{FeatureExtractor, FeatureRecord, FeatureSchema};
use crate::allocation::memory::{MemoryHousingStore, MemoryRunTracker};
use crate::allocation::repository::{
    ApplicationRepository, InventoryRepository, RunTracker, RunTrackingError,
};
use crate::allocation::scoring::{ModelStatus, ScoringMethod};
use crate::allocation::service::{AllocationService, AllocationServiceError};

fn admin() -> Actor {
    Actor::User("registrar".to_string())
}

#[test]
fn run_session_completes_with_counts_and_report() {
    let (hostels, rooms) = two_room_inventory();
    let applications = vec![
        applicant("m90", Gender::Male, 200, 0),
        applicant("m70", Gender::Male, 200, 1),
        applicant("m60", Gender::Male, 200, 2),
        applicant("f80", Gender::Female, 200, 3),
    ];
    let store = store_with(hostels, rooms, applications);
    let scorer = FixedScorer::new(&[("m90", 90.0), ("m70", 70.0), ("m60", 60.0), ("f80", 80.0)]);
    let (service, audit, notifier) = build_service(store.clone(), scorer);

    let report = service.run_session(SESSION, admin()).expect("run completes");

    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.total_applications, 4);
    assert_eq!(report.run.successful_allocations, 3);
    assert_eq!(report.run.waiting_list_count, 1);
    assert!(report.run.started_at.is_some());
    assert!(report.run.completed_at.is_some());
    assert_eq!(report.allocations_by_hostel.get("kings hall"), Some(&1));
    assert_eq!(report.allocations_by_hostel.get("unity hall"), Some(&2));
    assert_eq!(report.average_priority_score, Some(80.0));
    assert_eq!(report.waiting_list[0].application_id.as_str(), "m60");

    let stored = service.run_status(&report.run.id).expect("run tracked");
    assert_eq!(stored, report.run);
    assert_eq!(service.report(&report.run.id), Some(report.clone()));

    let batch_events = audit.events_of(AuditAction::BatchAllocationRun).expect("audit readable");
    assert_eq!(batch_events.len(), 1);
    assert_eq!(batch_events[0].actor, admin());
    assert_eq!(batch_events[0].details["status"], "completed");
    assert_eq!(batch_events[0].details["successful_allocations"], 3);
    assert_eq!(
        batch_events[0].subject.run_id.as_ref(),
        Some(&report.run.id)
    );
    assert_eq!(audit.events_of(AuditAction::AllocationCreated).expect("audit readable").len(), 3);
    assert_eq!(notifier.sent().len(), 3);
    assert_capacity_invariant(&store.rooms().expect("rooms readable"));
}

#[test]
fn second_run_for_same_session_finds_nothing_pending() {
    let (hostels, rooms) = two_room_inventory();
    let store = store_with(hostels, rooms, vec![applicant("m1", Gender::Male, 100, 0)]);
    let (service, _, _) = build_service(store.clone(), FixedScorer::default());

    service.run_session(SESSION, admin()).expect("first run");
    let second = service.run_session(SESSION, admin()).expect("second run");

    assert_eq!(second.run.total_applications, 0);
    assert!(second.placements.is_empty());
    assert_eq!(second.average_priority_score, None);
    assert_eq!(active_allocations(&store).len(), 1);
}

#[test]
fn empty_session_completes_with_zero_counts() {
    let (hostels, rooms) = two_room_inventory();
    let store = store_with(hostels, rooms, Vec::new());
    let (service, audit, notifier) = build_service(store, FixedScorer::default());

    let report = service.run_session("2030/2031", admin()).expect("run completes");

    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.run.total_applications, 0);
    assert!(report.allocations_by_hostel.is_empty());
    assert!(notifier.sent().is_empty());
    assert_eq!(audit.events_of(AuditAction::BatchAllocationRun).expect("audit readable").len(), 1);
}

#[test]
fn infrastructure_failure_marks_run_failed() {
    let (hostels, rooms) = two_room_inventory();
    let inner = MemoryHousingStore::with_data(
        hostels,
        rooms,
        vec![applicant("m1", Gender::Male, 100, 0)],
    )
    .expect("fixture loads");
    let store = Arc::new(InterferingStore::rooms_offline(inner));
    let (service, audit, _) = build_service(store, FixedScorer::default());

    let run = service.create_run(SESSION, admin()).expect("run created");
    let err = service.execute_run(&run.id).expect_err("run fails");
    assert!(err.to_string().contains("inventory database offline"));

    let failed = service.run_status(&run.id).expect("run tracked");
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(failed
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("inventory database offline")));
    assert!(service.report(&run.id).is_none());

    let batch_events = audit.events_of(AuditAction::BatchAllocationRun).expect("audit readable");
    assert_eq!(batch_events.len(), 1);
    assert_eq!(batch_events[0].details["status"], "failed");
}

#[test]
fn run_is_not_completed_when_its_audit_record_fails() {
    let (hostels, rooms) = two_room_inventory();
    let store = store_with(hostels, rooms, vec![applicant("m1", Gender::Male, 100, 0)]);
    let audit = Arc::new(RejectingAudit::rejecting(AuditAction::BatchAllocationRun));
    let engine = AllocationEngine::new(
        store,
        audit.clone(),
        Arc::new(FixedScorer::default()),
        plain_config(),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let service = AllocationService::new(
        Arc::new(engine),
        Arc::new(MemoryRunTracker::new()),
        notifier.clone(),
        FeatureExtractor::new(FeatureSchema::Legacy, 500.0),
    );

    let run = service.create_run(SESSION, admin()).expect("run created");
    let err = service.execute_run(&run.id).expect_err("audit failure fails the run");
    assert!(matches!(err, AllocationServiceError::Audit(_)));
    assert!(err.to_string().contains("audit disk full"));

    let stored = service.run_status(&run.id).expect("run tracked");
    assert_eq!(stored.status, RunStatus::Failed);
    assert!(stored
        .error_message
        .as_deref()
        .is_some_and(|message| message.contains("audit disk full")));
    assert!(service.report(&run.id).is_none());
    assert!(notifier.sent().is_empty());
    assert!(audit
        .inner
        .events_of(AuditAction::BatchAllocationRun)
        .expect("audit readable")
        .is_empty());
}

#[test]
fn racing_start_and_cancel_never_both_succeed() {
    let tracker = Arc::new(MemoryRunTracker::new());

    for round in 0..200 {
        let id = RunId::new(format!("run-race-{round}"));
        tracker
            .create_run(AllocationRun::new(id.clone(), SESSION, admin(), Utc::now()))
            .expect("run created");
        let barrier = Arc::new(Barrier::new(2));

        let starter = {
            let (tracker, barrier, id) = (Arc::clone(&tracker), Arc::clone(&barrier), id.clone());
            thread::spawn(move || {
                barrier.wait();
                tracker.mark_running(&id).is_ok()
            })
        };
        let canceller = {
            let (tracker, barrier, id) = (Arc::clone(&tracker), Arc::clone(&barrier), id.clone());
            thread::spawn(move || {
                barrier.wait();
                tracker.mark_cancelled(&id).is_ok()
            })
        };
        let started = starter.join().expect("starter thread");
        let cancelled = canceller.join().expect("canceller thread");

        assert!(started ^ cancelled, "round {round}: exactly one transition wins");
        let stored = tracker
            .fetch_run(&id)
            .expect("run readable")
            .expect("run exists");
        let expected = if started {
            RunStatus::Running
        } else {
            RunStatus::Cancelled
        };
        assert_eq!(stored.status, expected);
    }
}

#[test]
fn pending_run_can_be_cancelled_but_finished_run_cannot() {
    let (hostels, rooms) = two_room_inventory();
    let store = store_with(hostels, rooms, vec![applicant("m1", Gender::Male, 100, 0)]);
    let (service, _, _) = build_service(store, FixedScorer::default());

    let pending = service.create_run(SESSION, admin()).expect("run created");
    let cancelled = service.cancel_run(&pending.id).expect("pending run cancels");
    assert_eq!(cancelled.status, RunStatus::Cancelled);

    let err = service
        .execute_run(&pending.id)
        .expect_err("cancelled run cannot start");
    assert!(matches!(
        err,
        AllocationServiceError::Run(RunTrackingError::State(_))
    ));

    let finished = service.run_session(SESSION, admin()).expect("run completes");
    let err = service
        .cancel_run(&finished.run.id)
        .expect_err("completed run cannot be cancelled");
    assert!(matches!(
        err,
        AllocationServiceError::Run(RunTrackingError::State(_))
    ));
}

#[test]
fn unknown_run_is_reported_as_not_found() {
    let (hostels, rooms) = two_room_inventory();
    let store = store_with(hostels, rooms, Vec::new());
    let (service, _, _) = build_service(store, FixedScorer::default());

    let err = service
        .run_status(&RunId::new("run-missing"))
        .expect_err("unknown run");
    assert!(matches!(
        err,
        AllocationServiceError::Run(RunTrackingError::NotFound(_))
    ));
}

#[test]
fn notification_failure_does_not_fail_the_run() {
    let hostels = vec![hostel("unity", HostelGenderType::Mixed)];
    let rooms = vec![room("unity-1", "unity", "1", 1)];
    let store = store_with(hostels, rooms, vec![applicant("a", Gender::Male, 100, 0)]);
    let (engine, _) = build_engine(store.clone(), FixedScorer::default(), plain_config());
    let service = AllocationService::new(
        Arc::new(engine),
        Arc::new(MemoryRunTracker::new()),
        Arc::new(FailingNotifier),
        FeatureExtractor::new(FeatureSchema::Legacy, 500.0),
    );

    let report = service.run_session(SESSION, admin()).expect("run completes");

    assert_eq!(report.run.status, RunStatus::Completed);
    assert_eq!(report.placements.len(), 1);
    assert!(store.list_pending(SESSION).expect("readable").is_empty());
}

#[test]
fn override_notifies_the_student() {
    let (hostels, rooms) = two_room_inventory();
    let store = store_with(hostels, rooms, vec![applicant("m1", Gender::Male, 100, 0)]);
    let (service, _, notifier) = build_service(store, FixedScorer::default());

    let allocation = service
        .override_allocation(OverrideRequest {
            application_id: ApplicationId::new("m1"),
            room_id: RoomId::new("unity-201"),
            bed_space: None,
            actor: admin(),
            reason: "placed before the run".to_string(),
        })
        .expect("override applies");

    assert_eq!(allocation.bed_space, Some(1));
    assert_eq!(notifier.sent(), vec![allocation.id]);
}

#[tokio::test]
async fn spawned_run_completes_in_background() {
    let (hostels, rooms) = two_room_inventory();
    let applications = vec![
        applicant("m1", Gender::Male, 100, 0),
        applicant("f1", Gender::Female, 100, 1),
    ];
    let store = store_with(hostels, rooms, applications);
    let (service, _, _) = build_service(store, FixedScorer::default());

    let (run, handle) = service.spawn_run(SESSION, admin()).expect("run spawned");
    assert_eq!(run.status, RunStatus::Pending);

    let report = handle
        .await
        .expect("task joins")
        .expect("run completes");
    assert_eq!(report.run.id, run.id);
    assert_eq!(report.run.successful_allocations, 2);
    assert_eq!(
        service.run_status(&run.id).expect("run tracked").status,
        RunStatus::Completed
    );
}

#[test]
fn adhoc_prediction_uses_domain_formula() {
    let (hostels, rooms) = two_room_inventory();
    let store = store_with(hostels, rooms, Vec::new());
    let (service, _, _) = build_service(store, FixedScorer::default());

    let mut record = FeatureRecord::default();
    record
        .insert("gpa", 5.0)
        .insert("level", 500)
        .insert("distance", 500)
        .insert("disability", true);
    let scored = service.predict_adhoc(&record);

    assert_eq!(scored.prediction.score, 100.0);
    assert_eq!(scored.prediction.scoring_method, ScoringMethod::DomainKnowledge);
    assert_eq!(scored.features.schema, FeatureSchema::Legacy);
    assert_eq!(service.model_info().status, ModelStatus::NotConfigured);
}
