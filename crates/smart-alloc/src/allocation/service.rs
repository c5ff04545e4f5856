use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::audit::{AuditAction, AuditEvent, AuditQuery, AuditSink, AuditSubject};
use super::domain::{Actor, Allocation, AllocationId, AllocationRun, RunId, WaitingListEntry};
use super::engine::{AllocationEngine, BatchOutcome, EngineError, OverrideRequest, Placement};
use super::features::{FeatureExtractor, FeatureRecord};
use super::repository::{
    HousingStore, NotificationDispatcher, RepositoryError, RunTracker, RunTrackingError,
};
use super::scoring::{domain_knowledge_prediction, ModelInfo, ScoredApplicant};

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_run_id() -> RunId {
    let id = RUN_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    RunId(format!("run-{id:06}"))
}

/// Background execution of a spawned run.
pub type RunHandle = JoinHandle<Result<RunReport, AllocationServiceError>>;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run: AllocationRun,
    /// Placements per hostel name.
    pub allocations_by_hostel: BTreeMap<String, u32>,
    /// Mean final score of placed applicants; absent when nobody was placed.
    pub average_priority_score: Option<f64>,
    pub placements: Vec<Placement>,
    pub waiting_list: Vec<WaitingListEntry>,
}

impl RunReport {
    fn new(run: AllocationRun, outcome: BatchOutcome) -> Self {
        let mut allocations_by_hostel = BTreeMap::new();
        for placement in &outcome.placements {
            *allocations_by_hostel
                .entry(placement.hostel_name.clone())
                .or_insert(0) += 1;
        }

        let average_priority_score = if outcome.placements.is_empty() {
            None
        } else {
            let total: f64 = outcome.placements.iter().map(|p| p.priority_score).sum();
            Some(total / outcome.placements.len() as f64)
        };

        Self {
            run,
            allocations_by_hostel,
            average_priority_score,
            placements: outcome.placements,
            waiting_list: outcome.waiting_list,
        }
    }
}

/// Run lifecycle around the engine: tracking, run-level audit, notifications and reports.
pub struct AllocationService<R, A, T> {
    engine: Arc<AllocationEngine<R, A>>,
    runs: Arc<T>,
    notifier: Arc<dyn NotificationDispatcher>,
    extractor: FeatureExtractor,
    reports: Mutex<HashMap<RunId, RunReport>>,
}

impl<R, A, T> AllocationService<R, A, T>
where
    R: HousingStore + 'static,
    A: AuditSink + 'static,
    T: RunTracker + 'static,
{
    pub fn new(
        engine: Arc<AllocationEngine<R, A>>,
        runs: Arc<T>,
        notifier: Arc<dyn NotificationDispatcher>,
        extractor: FeatureExtractor,
    ) -> Self {
        Self {
            engine,
            runs,
            notifier,
            extractor,
            reports: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<AllocationEngine<R, A>> {
        &self.engine
    }

    /// Registers a pending run for the session.
    pub fn create_run(
        &self,
        academic_session: &str,
        started_by: Actor,
    ) -> Result<AllocationRun, AllocationServiceError> {
        let run = AllocationRun::new(next_run_id(), academic_session, started_by, Utc::now());
        let stored = self.runs.create_run(run)?;
        info!(run_id = %stored.id, session = %stored.academic_session, "allocation run created");
        Ok(stored)
    }

    /// Executes a pending run to completion on the calling thread.
    ///
    /// Infrastructure failures mark the run failed with the error text and are returned.
    pub fn execute_run(&self, run_id: &RunId) -> Result<RunReport, AllocationServiceError> {
        let run = self.runs.mark_running(run_id)?;
        info!(run_id = %run.id, session = %run.academic_session, "allocation run started");

        match self
            .allocate(&run)
            .and_then(|outcome| self.complete(&run, outcome))
        {
            Ok(report) => Ok(report),
            Err(err) => {
                let message = err.to_string();
                error!(run_id = %run.id, error = %message, "allocation run failed");
                if let Err(mark_err) = self.runs.mark_failed(run_id, &message) {
                    warn!(run_id = %run.id, error = %mark_err, "could not mark run failed");
                }
                if let Err(audit_err) = self.engine.audit().record(
                    AuditAction::BatchAllocationRun,
                    &run.started_by,
                    AuditSubject::run(run_id),
                    json!({
                        "status": "failed",
                        "academic_session": run.academic_session,
                        "error": message,
                    }),
                    None,
                ) {
                    warn!(run_id = %run.id, error = %audit_err, "failed to audit run failure");
                }
                Err(err)
            }
        }
    }

    /// Creates and immediately executes a run.
    pub fn run_session(
        &self,
        academic_session: &str,
        started_by: Actor,
    ) -> Result<RunReport, AllocationServiceError> {
        let run = self.create_run(academic_session, started_by)?;
        self.execute_run(&run.id)
    }

    /// Creates a run and executes it on the blocking pool; requires a tokio runtime.
    pub fn spawn_run(
        self: &Arc<Self>,
        academic_session: &str,
        started_by: Actor,
    ) -> Result<(AllocationRun, RunHandle), AllocationServiceError> {
        let run = self.create_run(academic_session, started_by)?;
        let service = Arc::clone(self);
        let run_id = run.id.clone();
        let handle = tokio::task::spawn_blocking(move || service.execute_run(&run_id));
        Ok((run, handle))
    }

    /// Only pending runs can be cancelled.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<AllocationRun, AllocationServiceError> {
        let run = self.runs.mark_cancelled(run_id)?;
        info!(run_id = %run.id, "allocation run cancelled");
        Ok(run)
    }

    pub fn run_status(&self, run_id: &RunId) -> Result<AllocationRun, AllocationServiceError> {
        self.runs
            .fetch_run(run_id)?
            .ok_or_else(|| RunTrackingError::NotFound(run_id.clone()).into())
    }

    pub fn report(&self, run_id: &RunId) -> Option<RunReport> {
        self.reports
            .lock()
            .ok()
            .and_then(|reports| reports.get(run_id).cloned())
    }

    /// Scores a raw feature record with the domain-knowledge formula.
    pub fn predict_adhoc(&self, record: &FeatureRecord) -> ScoredApplicant {
        let features = self.extractor.extract(record);
        let prediction = domain_knowledge_prediction(&features.derived);
        ScoredApplicant {
            features,
            prediction,
        }
    }

    /// Reads the audit trail back, newest first.
    pub fn audit_trail(
        &self,
        query: &AuditQuery,
    ) -> Result<Vec<AuditEvent>, AllocationServiceError> {
        Ok(self.engine.audit().sink().query(query)?)
    }

    pub fn model_info(&self) -> ModelInfo {
        self.engine.scorer().model_info()
    }

    pub fn override_allocation(
        &self,
        request: OverrideRequest,
    ) -> Result<Allocation, AllocationServiceError> {
        let allocation = self.engine.override_allocation(request)?;
        self.notify(&[allocation.id.clone()]);
        Ok(allocation)
    }

    pub fn confirm_allocation(
        &self,
        allocation_id: &AllocationId,
        actor: &Actor,
    ) -> Result<Allocation, AllocationServiceError> {
        Ok(self.engine.confirm_allocation(allocation_id, actor)?)
    }

    pub fn cancel_allocation(
        &self,
        allocation_id: &AllocationId,
        actor: &Actor,
        reason: &str,
    ) -> Result<Allocation, AllocationServiceError> {
        Ok(self.engine.cancel_allocation(allocation_id, actor, reason)?)
    }

    fn allocate(&self, run: &AllocationRun) -> Result<BatchOutcome, AllocationServiceError> {
        let pending = self
            .engine
            .repository()
            .list_pending(&run.academic_session)?;
        Ok(self.engine.allocate_batch(Some(&run.id), pending)?)
    }

    fn complete(
        &self,
        run: &AllocationRun,
        outcome: BatchOutcome,
    ) -> Result<RunReport, AllocationServiceError> {
        let counts = outcome.counts();
        let mut report = RunReport::new(run.clone(), outcome);
        self.engine.audit().record(
            AuditAction::BatchAllocationRun,
            &run.started_by,
            AuditSubject::run(&run.id),
            json!({
                "status": "completed",
                "academic_session": run.academic_session,
                "total_applications": counts.total,
                "successful_allocations": counts.successful,
                "waiting_list_count": counts.waitlisted,
                "allocations_by_hostel": report.allocations_by_hostel,
                "average_priority_score": report.average_priority_score,
            }),
            None,
        )?;
        report.run = self.runs.mark_completed(&run.id, counts)?;

        let created: Vec<AllocationId> = report
            .placements
            .iter()
            .map(|placement| placement.allocation_id.clone())
            .collect();
        self.notify(&created);

        info!(
            run_id = %run.id,
            total = counts.total,
            successful = counts.successful,
            waitlisted = counts.waitlisted,
            "allocation run completed"
        );

        if let Ok(mut reports) = self.reports.lock() {
            reports.insert(run.id.clone(), report.clone());
        }
        Ok(report)
    }

    fn notify(&self, allocation_ids: &[AllocationId]) {
        if allocation_ids.is_empty() {
            return;
        }
        if let Err(err) = self.notifier.allocations_created(allocation_ids) {
            warn!(error = %err, count = allocation_ids.len(), "allocation notification failed");
        }
    }
}

/// Error raised by the allocation service.
#[derive(Debug, thiserror::Error)]
pub enum AllocationServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Run(#[from] RunTrackingError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Audit(#[from] super::audit::AuditError),
}
