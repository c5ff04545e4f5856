use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::allocation::audit::{AuditAction, AuditError, AuditEvent, AuditQuery, AuditSink};
use crate::allocation::domain::{
    Allocation, AllocationId, Application, ApplicationId, ApplicationStatus,
    Gender, Hostel, HostelGenderType, HostelId, Room, RoomId, StudentId, StudentProfile,
    WaitingListEntry,
};
use crate::allocation::engine::{AllocationEngine, EngineConfig};
use crate::allocation::features::{FeatureExtractor, FeatureSchema, DEFAULT_MAX_DISTANCE_KM};
use crate::allocation::memory::{MemoryAuditLog, MemoryHousingStore, MemoryRunTracker};
use crate::allocation::repository::{
    AllocationRepository, ApplicationRepository, ClaimError, InventoryRepository,
    NotificationDispatcher, NotificationError, RepositoryError,
};
use crate::allocation::scoring::{
    ModelInfo, ModelStatus, PredictionError, PredictionResult, PriorityScorer, ScoredApplicant,
    ScoringMethod, ScoringPolicy,
};
use crate::allocation::service::AllocationService;

pub(super) const SESSION: &str = "2024/2025";

pub(super) fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
        + Duration::minutes(minutes)
}

pub(super) fn hostel(id: &str, gender_type: HostelGenderType) -> Hostel {
    Hostel {
        id: HostelId::new(id),
        name: format!("{id} hall"),
        code: id.to_ascii_uppercase(),
        gender_type,
    }
}

pub(super) fn room(id: &str, hostel_id: &str, number: &str, capacity: u16) -> Room {
    Room::with_beds(RoomId::new(id), HostelId::new(hostel_id), number, capacity)
}

pub(super) fn accessible(mut room: Room) -> Room {
    room.is_accessible = true;
    room
}

/// Pending application whose student id is `stu-{id}`.
pub(super) fn applicant(id: &str, gender: Gender, level: u16, minute: i64) -> Application {
    let mut student = StudentProfile::new(StudentId::new(format!("stu-{id}")), gender, level);
    student.full_name = format!("Student {id}");
    student.gpa = Some(3.5);
    student.distance_km = Some(120.0);

    Application {
        id: ApplicationId::new(id),
        student,
        academic_session: SESSION.to_string(),
        submitted_at: at(minute),
        preferred_hostel: None,
        status: ApplicationStatus::Pending,
        priority_score: None,
        score_confidence: None,
    }
}

pub(super) fn disabled(mut application: Application) -> Application {
    application.student.disability = true;
    application
}

/// Scorer returning a fixed score per application, or failing for selected ones.
#[derive(Default)]
pub(super) struct FixedScorer {
    scores: HashMap<StudentId, f64>,
    failing: HashSet<StudentId>,
}

impl FixedScorer {
    pub(super) fn new(scores: &[(&str, f64)]) -> Self {
        Self {
            scores: scores
                .iter()
                .map(|(id, score)| (StudentId::new(format!("stu-{id}")), *score))
                .collect(),
            failing: HashSet::new(),
        }
    }

    pub(super) fn failing_for(mut self, id: &str) -> Self {
        self.failing.insert(StudentId::new(format!("stu-{id}")));
        self
    }
}

impl PriorityScorer for FixedScorer {
    fn score(
        &self,
        profile: &StudentProfile,
        _allow_fallback: bool,
    ) -> Result<ScoredApplicant, PredictionError> {
        if self.failing.contains(&profile.student_id) {
            return Err(PredictionError::ModelUnavailable {
                reason: "scorer offline".to_string(),
            });
        }
        let score = self.scores.get(&profile.student_id).copied().unwrap_or(50.0);
        let features =
            FeatureExtractor::new(FeatureSchema::Legacy, DEFAULT_MAX_DISTANCE_KM).extract(profile);

        Ok(ScoredApplicant {
            features,
            prediction: PredictionResult {
                score,
                confidence: 0.9,
                feature_importance: Default::default(),
                model_version: "fixed".to_string(),
                scoring_method: ScoringMethod::MlModel,
                raw_score: score,
            },
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            schema: FeatureSchema::Legacy,
            model_version: "fixed".to_string(),
            model_path: String::new(),
            status: ModelStatus::NotConfigured,
            estimator: None,
            n_features: FeatureSchema::Legacy.len(),
            n_estimators: None,
        }
    }
}

pub(super) fn plain_config() -> EngineConfig {
    EngineConfig {
        allow_fallback: true,
        policy: ScoringPolicy::none(),
    }
}

pub(super) fn store_with(
    hostels: Vec<Hostel>,
    rooms: Vec<Room>,
    applications: Vec<Application>,
) -> Arc<MemoryHousingStore> {
    Arc::new(
        MemoryHousingStore::with_data(hostels, rooms, applications).expect("fixture data loads"),
    )
}

pub(super) fn build_engine<R>(
    store: Arc<R>,
    scorer: impl PriorityScorer + 'static,
    config: EngineConfig,
) -> (AllocationEngine<R, MemoryAuditLog>, Arc<MemoryAuditLog>)
where
    R: crate::allocation::repository::HousingStore + 'static,
{
    let audit = Arc::new(MemoryAuditLog::new());
    let engine = AllocationEngine::new(store, audit.clone(), Arc::new(scorer), config);
    (engine, audit)
}

pub(super) type TestService<R> = AllocationService<R, MemoryAuditLog, MemoryRunTracker>;

pub(super) fn build_service<R>(
    store: Arc<R>,
    scorer: impl PriorityScorer + 'static,
) -> (
    Arc<TestService<R>>,
    Arc<MemoryAuditLog>,
    Arc<RecordingNotifier>,
)
where
    R: crate::allocation::repository::HousingStore + 'static,
{
    let (engine, audit) = build_engine(store, scorer, plain_config());
    let notifier = Arc::new(RecordingNotifier::default());
    let service = AllocationService::new(
        Arc::new(engine),
        Arc::new(MemoryRunTracker::new()),
        notifier.clone(),
        FeatureExtractor::new(FeatureSchema::Legacy, DEFAULT_MAX_DISTANCE_KM),
    );
    (Arc::new(service), audit, notifier)
}

/// Scenario inventory: one male-only room with one bed and one mixed room with two.
pub(super) fn two_room_inventory() -> (Vec<Hostel>, Vec<Room>) {
    (
        vec![
            hostel("kings", HostelGenderType::Male),
            hostel("unity", HostelGenderType::Mixed),
        ],
        vec![
            room("kings-101", "kings", "101", 1),
            room("unity-201", "unity", "201", 2),
        ],
    )
}

pub(super) fn assert_capacity_invariant(rooms: &[Room]) {
    for room in rooms {
        let occupied = room.occupied_bed_count();
        assert!(
            occupied <= usize::from(room.capacity),
            "room {} over capacity",
            room.id
        );
        assert_eq!(
            usize::from(room.current_occupancy),
            occupied,
            "room {} occupancy out of sync",
            room.id
        );
    }
}

pub(super) fn active_allocations(store: &MemoryHousingStore) -> Vec<Allocation> {
    store
        .allocations()
        .expect("allocations readable")
        .into_iter()
        .filter(|allocation| allocation.is_active)
        .collect()
}

#[derive(Default)]
pub(super) struct RecordingNotifier {
    sent: Mutex<Vec<AllocationId>>,
}

impl RecordingNotifier {
    pub(super) fn sent(&self) -> Vec<AllocationId> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }
}

impl NotificationDispatcher for RecordingNotifier {
    fn allocations_created(
        &self,
        allocation_ids: &[AllocationId],
    ) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .extend_from_slice(allocation_ids);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl NotificationDispatcher for FailingNotifier {
    fn allocations_created(
        &self,
        _allocation_ids: &[AllocationId],
    ) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("smtp offline".to_string()))
    }
}

/// Audit sink that rejects one kind of event and keeps the rest.
pub(super) struct RejectingAudit {
    rejects: AuditAction,
    pub(super) inner: MemoryAuditLog,
}

impl RejectingAudit {
    pub(super) fn rejecting(rejects: AuditAction) -> Self {
        Self {
            rejects,
            inner: MemoryAuditLog::new(),
        }
    }
}

impl AuditSink for RejectingAudit {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        if event.action == self.rejects {
            return Err(AuditError::Unavailable("audit disk full".to_string()));
        }
        self.inner.append(event)
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuditError> {
        self.inner.query(query)
    }
}

/// Store wrapper that simulates a concurrent writer or an outage.
pub(super) struct InterferingStore {
    pub(super) inner: MemoryHousingStore,
    /// Bed taken by another process right before our first claim on it.
    steal: Mutex<Option<(RoomId, u16)>>,
    rooms_offline: bool,
    resync_offline: bool,
}

impl InterferingStore {
    pub(super) fn stealing(inner: MemoryHousingStore, room_id: &str, bed: u16) -> Self {
        Self {
            inner,
            steal: Mutex::new(Some((RoomId::new(room_id), bed))),
            rooms_offline: false,
            resync_offline: false,
        }
    }

    /// Single-room reads fail while the full inventory listing still works.
    pub(super) fn without_room_resync(mut self) -> Self {
        self.resync_offline = true;
        self
    }

    pub(super) fn rooms_offline(inner: MemoryHousingStore) -> Self {
        Self {
            inner,
            steal: Mutex::new(None),
            rooms_offline: true,
            resync_offline: false,
        }
    }
}

impl ApplicationRepository for InterferingStore {
    fn list_pending(&self, academic_session: &str) -> Result<Vec<Application>, RepositoryError> {
        self.inner.list_pending(academic_session)
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        self.inner.fetch_application(id)
    }

    fn record_score(
        &self,
        id: &ApplicationId,
        score: f64,
        confidence: f64,
    ) -> Result<(), RepositoryError> {
        self.inner.record_score(id, score, confidence)
    }

    fn set_application_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<(), RepositoryError> {
        self.inner.set_application_status(id, status)
    }
}

impl InventoryRepository for InterferingStore {
    fn hostels(&self) -> Result<Vec<Hostel>, RepositoryError> {
        self.inner.hostels()
    }

    fn rooms(&self) -> Result<Vec<Room>, RepositoryError> {
        if self.rooms_offline {
            return Err(RepositoryError::Unavailable("inventory database offline".to_string()));
        }
        self.inner.rooms()
    }

    fn fetch_room(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError> {
        if self.resync_offline {
            return Err(RepositoryError::Unavailable("room lookup timed out".to_string()));
        }
        self.inner.fetch_room(id)
    }

    fn claim_bed(&self, room_id: &RoomId, bed: u16) -> Result<Room, ClaimError> {
        let stolen = {
            let mut steal = self.steal.lock().expect("steal mutex poisoned");
            let hit = matches!(
                steal.as_ref(),
                Some((target, target_bed)) if target == room_id && *target_bed == bed
            );
            if hit {
                steal.take()
            } else {
                None
            }
        };
        if stolen.is_some() {
            self.inner.claim_bed(room_id, bed)?;
        }
        self.inner.claim_bed(room_id, bed)
    }

    fn release_bed(&self, room_id: &RoomId, bed: u16) -> Result<Room, RepositoryError> {
        self.inner.release_bed(room_id, bed)
    }
}

impl AllocationRepository for InterferingStore {
    fn insert_allocation(&self, allocation: Allocation) -> Result<Allocation, RepositoryError> {
        self.inner.insert_allocation(allocation)
    }

    fn update_allocation(&self, allocation: Allocation) -> Result<(), RepositoryError> {
        self.inner.update_allocation(allocation)
    }

    fn fetch_allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, RepositoryError> {
        self.inner.fetch_allocation(id)
    }

    fn active_allocation_for(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Option<Allocation>, RepositoryError> {
        self.inner.active_allocation_for(application_id)
    }

    fn append_waiting_list(&self, entries: &[WaitingListEntry]) -> Result<(), RepositoryError> {
        self.inner.append_waiting_list(entries)
    }

    fn waiting_list(
        &self,
        academic_session: &str,
    ) -> Result<Vec<WaitingListEntry>, RepositoryError> {
        self.inner.waiting_list(academic_session)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
