//! Scores, ranks and greedily places pending applicants against the inventory snapshot.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::audit::{AuditAction, AuditError, AuditRecorder, AuditSink, AuditSubject, ScoringPayload};
use super::domain::{
    Actor, AllocatedBy, Allocation, AllocationId, Application, ApplicationId, ApplicationStatus,
    HostelId, PlacementFailure, RoomId, RunCounts, RunId, StudentId, WaitingListEntry,
};
use super::inventory::{InventorySnapshot, SlotIndex};
use super::repository::{ClaimError, HousingStore, RepositoryError};
use super::scoring::{
    ConfigurationError, PredictionError, PriorityScorer, ScoringMethod, ScoringPolicy,
};

static ALLOCATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_allocation_id() -> AllocationId {
    let id = ALLOCATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    AllocationId(format!("alloc-{id:06}"))
}

/// Knobs for one engine instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    /// Score through the domain-knowledge formula when the model cannot.
    pub allow_fallback: bool,
    pub policy: ScoringPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            allow_fallback: true,
            policy: ScoringPolicy::default(),
        }
    }
}

/// Final score assigned to one applicant during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicantScore {
    pub application_id: ApplicationId,
    pub score: f64,
    pub confidence: Option<f64>,
    pub raw_score: Option<f64>,
    pub scoring_method: Option<ScoringMethod>,
    /// Set when scoring failed and the applicant was ranked with a zero score.
    pub error: Option<String>,
}

/// Successful placement of one applicant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub application_id: ApplicationId,
    pub student_id: StudentId,
    pub student_name: String,
    pub allocation_id: AllocationId,
    pub hostel_id: HostelId,
    pub hostel_name: String,
    pub room_id: RoomId,
    pub room_number: String,
    pub bed_space: u16,
    pub priority_score: f64,
    pub message: String,
}

/// Everything one batch produced, in ranked order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub scores: Vec<ApplicantScore>,
    pub placements: Vec<Placement>,
    pub waiting_list: Vec<WaitingListEntry>,
    /// Applications handed to the batch that were no longer pending.
    pub skipped: Vec<ApplicationId>,
}

impl BatchOutcome {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            total: (self.placements.len() + self.waiting_list.len()) as u32,
            successful: self.placements.len() as u32,
            waitlisted: self.waiting_list.len() as u32,
        }
    }
}

/// Manual placement requested by an administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub application_id: ApplicationId,
    pub room_id: RoomId,
    #[serde(default)]
    pub bed_space: Option<u16>,
    pub actor: Actor,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error("application {0} not found")]
    ApplicationNotFound(ApplicationId),
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("allocation {0} not found")]
    AllocationNotFound(AllocationId),
    #[error("allocation {0} is no longer active")]
    AllocationInactive(AllocationId),
}

struct Ranked {
    application: Application,
    score: ApplicantScore,
}

fn rank_order(a: &Ranked, b: &Ranked) -> CmpOrdering {
    b.score
        .score
        .total_cmp(&a.score.score)
        .then_with(|| a.application.submitted_at.cmp(&b.application.submitted_at))
        .then_with(|| a.application.id.cmp(&b.application.id))
}

/// Orchestrates scoring, placement and audit for batches and manual actions.
pub struct AllocationEngine<R, A> {
    repository: Arc<R>,
    audit: AuditRecorder<A>,
    scorer: Arc<dyn PriorityScorer>,
    config: EngineConfig,
}

impl<R, A> AllocationEngine<R, A>
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
{
    pub fn new(
        repository: Arc<R>,
        audit: Arc<A>,
        scorer: Arc<dyn PriorityScorer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            repository,
            audit: AuditRecorder::new(audit),
            scorer,
            config,
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repository
    }

    pub fn audit(&self) -> &AuditRecorder<A> {
        &self.audit
    }

    pub fn scorer(&self) -> &Arc<dyn PriorityScorer> {
        &self.scorer
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Scores, ranks and places the given applications.
    ///
    /// Per-applicant failures end up on the waiting list. Errors returned here are
    /// infrastructure or configuration failures; allocations committed before the error
    /// stay in place.
    pub fn allocate_batch(
        &self,
        run_id: Option<&RunId>,
        applications: Vec<Application>,
    ) -> Result<BatchOutcome, EngineError> {
        let mut outcome = BatchOutcome::default();

        let mut ranked = Vec::with_capacity(applications.len());
        for application in applications {
            if application.status != ApplicationStatus::Pending {
                debug!(application_id = %application.id, status = application.status.label(), "skipping non-pending application");
                outcome.skipped.push(application.id);
                continue;
            }
            let score = self.score_application(run_id, &application)?;
            ranked.push(Ranked { application, score });
        }
        ranked.sort_by(rank_order);

        info!(
            run_id = ?run_id.map(RunId::as_str),
            applicants = ranked.len(),
            skipped = outcome.skipped.len(),
            "ranked applicants for placement"
        );

        let mut snapshot =
            InventorySnapshot::build(self.repository.hostels()?, self.repository.rooms()?);

        let mut unplaced = Vec::new();
        for (rank, entry) in ranked.iter().enumerate() {
            match self.place(run_id, &mut snapshot, entry)? {
                Ok(placement) => outcome.placements.push(placement),
                Err(failure) => {
                    debug!(application_id = %entry.application.id, reason = %failure, "applicant not placed");
                    unplaced.push((rank, entry, failure));
                }
            }
        }

        outcome.waiting_list = self.waitlist(run_id, unplaced)?;
        outcome.scores = ranked.into_iter().map(|entry| entry.score).collect();

        let counts = outcome.counts();
        info!(
            run_id = ?run_id.map(RunId::as_str),
            successful = counts.successful,
            waitlisted = counts.waitlisted,
            "batch allocation finished"
        );
        Ok(outcome)
    }

    fn score_application(
        &self,
        run_id: Option<&RunId>,
        application: &Application,
    ) -> Result<ApplicantScore, EngineError> {
        let subject = AuditSubject::application(&application.id).with_run(run_id);

        match self
            .scorer
            .score(&application.student, self.config.allow_fallback)
        {
            Ok(scored) => {
                let prediction = &scored.prediction;
                let final_score = self.config.policy.apply(&application.student, prediction.score);
                self.repository
                    .record_score(&application.id, final_score, prediction.confidence)?;
                self.audit.record(
                    AuditAction::PriorityCalculated,
                    &Actor::System,
                    subject,
                    json!({
                        "priority_score": final_score,
                        "confidence": prediction.confidence,
                        "scoring_method": prediction.scoring_method,
                        "feature_importance": prediction.feature_importance,
                    }),
                    Some(ScoringPayload::new(&scored.features, prediction, final_score)),
                )?;

                Ok(ApplicantScore {
                    application_id: application.id.clone(),
                    score: final_score,
                    confidence: Some(prediction.confidence),
                    raw_score: Some(prediction.raw_score),
                    scoring_method: Some(prediction.scoring_method),
                    error: None,
                })
            }
            Err(PredictionError::Configuration(err)) => Err(err.into()),
            Err(err) => {
                warn!(application_id = %application.id, error = %err, "scoring failed, ranking with zero score");
                self.audit.record(
                    AuditAction::PriorityCalculated,
                    &Actor::System,
                    subject,
                    json!({
                        "priority_score": 0.0,
                        "error": err.to_string(),
                    }),
                    None,
                )?;

                Ok(ApplicantScore {
                    application_id: application.id.clone(),
                    score: 0.0,
                    confidence: None,
                    raw_score: None,
                    scoring_method: None,
                    error: Some(err.to_string()),
                })
            }
        }
    }

    /// Inner result is the per-applicant outcome; the outer one aborts the run.
    fn place(
        &self,
        run_id: Option<&RunId>,
        snapshot: &mut InventorySnapshot,
        entry: &Ranked,
    ) -> Result<Result<Placement, PlacementFailure>, EngineError> {
        let application = &entry.application;
        let candidates = match snapshot.candidates(
            application.student.gender,
            application.student.disability,
            application.preferred_hostel.as_ref(),
        ) {
            Ok(candidates) => candidates,
            Err(failure) => return Ok(Err(failure)),
        };

        for index in candidates {
            let max_attempts = snapshot.slot(index).room.bed_spaces.len();
            let mut attempts = 0;

            while let Some(bed) = snapshot.first_free_bed(index) {
                if attempts >= max_attempts {
                    break;
                }
                attempts += 1;

                let room_id = snapshot.slot(index).room.id.clone();
                match self.repository.claim_bed(&room_id, bed) {
                    Ok(room) => {
                        snapshot.refresh(index, room);
                        return self.commit(run_id, snapshot, index, bed, entry);
                    }
                    Err(ClaimError::Repository(err)) => {
                        warn!(room_id = %room_id, bed, error = %err, "bed claim failed");
                        return Ok(Err(PlacementFailure::CommitFailed(err.to_string())));
                    }
                    Err(conflict) => {
                        warn!(room_id = %room_id, bed, error = %conflict, "bed claim rejected, resyncing room");
                        match self.repository.fetch_room(&room_id) {
                            Ok(Some(room)) => snapshot.refresh(index, room),
                            Ok(None) => {
                                warn!(room_id = %room_id, "room vanished after rejected claim");
                                break;
                            }
                            Err(err) => {
                                warn!(room_id = %room_id, error = %err, "room resync failed after rejected claim");
                                break;
                            }
                        }
                    }
                }
            }
        }

        Ok(Err(PlacementFailure::NoAvailableBed))
    }

    fn commit(
        &self,
        run_id: Option<&RunId>,
        snapshot: &mut InventorySnapshot,
        index: SlotIndex,
        bed: u16,
        entry: &Ranked,
    ) -> Result<Result<Placement, PlacementFailure>, EngineError> {
        let application = &entry.application;
        let slot = snapshot.slot(index);
        let (hostel_id, hostel_name) = (slot.hostel.id.clone(), slot.hostel.name.clone());
        let (room_id, room_number) = (slot.room.id.clone(), slot.room.room_number.clone());
        let message = format!("Allocated to {hostel_name}, Room {room_number}");

        let allocation = Allocation {
            id: next_allocation_id(),
            application_id: application.id.clone(),
            student_id: application.student.student_id.clone(),
            room_id: room_id.clone(),
            hostel_id: hostel_id.clone(),
            bed_space: Some(bed),
            allocated_by: AllocatedBy::AiSystem,
            actor: Actor::System,
            reason: message.clone(),
            admin_override: false,
            priority_score: Some(entry.score.score),
            is_confirmed: false,
            confirmed_at: None,
            is_active: true,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: Utc::now(),
        };

        let stored = match self.repository.insert_allocation(allocation) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(application_id = %application.id, error = %err, "allocation insert failed, releasing bed");
                match self.repository.release_bed(&room_id, bed) {
                    Ok(room) => snapshot.refresh(index, room),
                    Err(release_err) => {
                        warn!(room_id = %room_id, bed, error = %release_err, "bed release after failed insert also failed");
                    }
                }
                return Ok(Err(PlacementFailure::CommitFailed(err.to_string())));
            }
        };

        self.repository
            .set_application_status(&application.id, ApplicationStatus::Allocated)?;

        self.audit.record(
            AuditAction::AllocationCreated,
            &Actor::System,
            AuditSubject::application(&application.id)
                .with_allocation(&stored.id)
                .with_run(run_id),
            json!({
                "hostel_id": hostel_id,
                "room_id": room_id,
                "room_number": room_number,
                "bed_space": bed,
                "priority_score": entry.score.score,
            }),
            None,
        )?;

        Ok(Ok(Placement {
            application_id: application.id.clone(),
            student_id: application.student.student_id.clone(),
            student_name: application.student.full_name.clone(),
            allocation_id: stored.id,
            hostel_id,
            hostel_name,
            room_id,
            room_number,
            bed_space: bed,
            priority_score: entry.score.score,
            message,
        }))
    }

    /// Priority entries first, then ranked order; positions start at 1.
    fn waitlist(
        &self,
        run_id: Option<&RunId>,
        mut unplaced: Vec<(usize, &Ranked, PlacementFailure)>,
    ) -> Result<Vec<WaitingListEntry>, EngineError> {
        unplaced.sort_by_key(|(rank, entry, _)| (!entry.application.student.disability, *rank));

        let created_at = Utc::now();
        let entries: Vec<WaitingListEntry> = unplaced
            .into_iter()
            .enumerate()
            .map(|(position, (_, entry, reason))| WaitingListEntry {
                application_id: entry.application.id.clone(),
                student_id: entry.application.student.student_id.clone(),
                academic_session: entry.application.academic_session.clone(),
                run_id: run_id.cloned(),
                position: position as u32 + 1,
                is_priority: entry.application.student.disability,
                priority_score: entry.score.score,
                submitted_at: entry.application.submitted_at,
                reason,
                created_at,
            })
            .collect();

        if entries.is_empty() {
            return Ok(entries);
        }

        self.repository.append_waiting_list(&entries)?;
        for entry in &entries {
            self.audit.record(
                AuditAction::Waitlisted,
                &Actor::System,
                AuditSubject::application(&entry.application_id).with_run(run_id),
                json!({
                    "position": entry.position,
                    "is_priority": entry.is_priority,
                    "priority_score": entry.priority_score,
                    "reason": entry.reason.to_string(),
                }),
                None,
            )?;
        }
        Ok(entries)
    }

    /// Places an application in a specific room, replacing any active allocation it has.
    pub fn override_allocation(&self, request: OverrideRequest) -> Result<Allocation, EngineError> {
        let application = self
            .repository
            .fetch_application(&request.application_id)?
            .ok_or_else(|| EngineError::ApplicationNotFound(request.application_id.clone()))?;
        let room = self
            .repository
            .fetch_room(&request.room_id)?
            .ok_or_else(|| EngineError::RoomNotFound(request.room_id.clone()))?;
        let existing = self.repository.active_allocation_for(&application.id)?;

        let held_bed = existing
            .as_ref()
            .filter(|allocation| allocation.room_id == room.id)
            .and_then(|allocation| allocation.bed_space);

        let bed = match request.bed_space {
            Some(bed) => {
                let space = room.bed(bed).filter(|space| space.is_active).ok_or_else(|| {
                    ClaimError::BedUnavailable {
                        room_id: room.id.clone(),
                        bed,
                    }
                })?;
                if space.is_occupied && held_bed != Some(bed) {
                    return Err(ClaimError::BedOccupied {
                        room_id: room.id.clone(),
                        bed,
                    }
                    .into());
                }
                bed
            }
            None => room
                .first_free_bed()
                .or(held_bed)
                .ok_or_else(|| ClaimError::RoomFull(room.id.clone()))?,
        };

        // The held bed stays claimed; anything else is claimed before the old placement goes.
        let keeps_held_bed = held_bed == Some(bed);
        let room = if keeps_held_bed {
            room
        } else {
            self.repository.claim_bed(&room.id, bed)?
        };
        let undo_claim = |err: EngineError| -> EngineError {
            if !keeps_held_bed {
                if let Err(release_err) = self.repository.release_bed(&room.id, bed) {
                    warn!(room_id = %room.id, bed, error = %release_err, "bed release after failed override also failed");
                }
            }
            err
        };

        let replaced = match existing {
            Some(mut previous) => {
                let reason = format!("Replaced by manual override: {}", request.reason);
                self.retire(&mut previous, &reason, keeps_held_bed)
                    .map_err(undo_claim)?;
                self.audit
                    .record(
                        AuditAction::AllocationCancelled,
                        &request.actor,
                        AuditSubject::application(&previous.application_id)
                            .with_allocation(&previous.id),
                        json!({
                            "room_id": previous.room_id,
                            "bed_space": previous.bed_space,
                            "reason": reason,
                        }),
                        None,
                    )
                    .map_err(|err| undo_claim(err.into()))?;
                Some(previous.id)
            }
            None => None,
        };

        let allocation = Allocation {
            id: next_allocation_id(),
            application_id: application.id.clone(),
            student_id: application.student.student_id.clone(),
            room_id: room.id.clone(),
            hostel_id: room.hostel_id.clone(),
            bed_space: Some(bed),
            allocated_by: AllocatedBy::AdminUser,
            actor: request.actor.clone(),
            reason: request.reason.clone(),
            admin_override: true,
            priority_score: application.priority_score,
            is_confirmed: false,
            confirmed_at: None,
            is_active: true,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: Utc::now(),
        };

        let stored = self
            .repository
            .insert_allocation(allocation)
            .map_err(|err| undo_claim(err.into()))?;
        self.repository
            .set_application_status(&application.id, ApplicationStatus::Allocated)?;

        self.audit.record(
            AuditAction::ManualOverride,
            &request.actor,
            AuditSubject::application(&application.id).with_allocation(&stored.id),
            json!({
                "room_id": room.id,
                "room_number": room.room_number,
                "hostel_id": room.hostel_id,
                "bed_space": bed,
                "reason": request.reason,
                "replaced_allocation_id": replaced,
            }),
            None,
        )?;

        info!(application_id = %application.id, allocation_id = %stored.id, actor = %request.actor, "manual override applied");
        Ok(stored)
    }

    /// Cancels an active allocation and frees its bed.
    pub fn cancel_allocation(
        &self,
        allocation_id: &AllocationId,
        actor: &Actor,
        reason: &str,
    ) -> Result<Allocation, EngineError> {
        let mut allocation = self.active_allocation(allocation_id)?;
        self.release(&mut allocation, reason)?;

        self.audit.record(
            AuditAction::AllocationCancelled,
            actor,
            AuditSubject::application(&allocation.application_id).with_allocation(&allocation.id),
            json!({
                "room_id": allocation.room_id,
                "bed_space": allocation.bed_space,
                "reason": reason,
            }),
            None,
        )?;

        info!(allocation_id = %allocation.id, actor = %actor, "allocation cancelled");
        Ok(allocation)
    }

    /// Marks an active allocation as accepted by the applicant.
    pub fn confirm_allocation(
        &self,
        allocation_id: &AllocationId,
        actor: &Actor,
    ) -> Result<Allocation, EngineError> {
        let mut allocation = self.active_allocation(allocation_id)?;
        if allocation.is_confirmed {
            return Ok(allocation);
        }

        allocation.confirm(Utc::now());
        self.repository.update_allocation(allocation.clone())?;

        self.audit.record(
            AuditAction::AllocationConfirmed,
            actor,
            AuditSubject::application(&allocation.application_id).with_allocation(&allocation.id),
            json!({ "confirmed_at": allocation.confirmed_at }),
            None,
        )?;
        Ok(allocation)
    }

    fn active_allocation(&self, allocation_id: &AllocationId) -> Result<Allocation, EngineError> {
        let allocation = self
            .repository
            .fetch_allocation(allocation_id)?
            .ok_or_else(|| EngineError::AllocationNotFound(allocation_id.clone()))?;
        if !allocation.is_active {
            return Err(EngineError::AllocationInactive(allocation_id.clone()));
        }
        Ok(allocation)
    }

    /// Deactivates the allocation, frees its bed and returns the application to pending.
    fn release(&self, allocation: &mut Allocation, reason: &str) -> Result<(), EngineError> {
        self.retire(allocation, reason, false)?;
        self.repository
            .set_application_status(&allocation.application_id, ApplicationStatus::Pending)?;
        Ok(())
    }

    /// Deactivates the allocation record, freeing its bed unless the caller keeps it.
    fn retire(
        &self,
        allocation: &mut Allocation,
        reason: &str,
        keep_bed: bool,
    ) -> Result<(), EngineError> {
        let at: DateTime<Utc> = Utc::now();
        allocation.cancel(reason, at);
        self.repository.update_allocation(allocation.clone())?;
        if let (Some(bed), false) = (allocation.bed_space, keep_bed) {
            self.repository.release_bed(&allocation.room_id, bed)?;
        }
        Ok(())
    }
}
