//! Dormitory allocation: applicant scoring, greedy bed placement and the audit trail.
//!
//! Storage, run tracking and notifications sit behind the traits in [`repository`]; the
//! [`memory`] module provides in-process implementations of each.

pub mod audit;
pub mod domain;
pub mod engine;
pub mod features;
pub mod import;
pub mod inventory;
pub mod memory;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod service;

#[cfg(test)]
mod tests;

pub use audit::{
    AuditAction, AuditError, AuditEvent, AuditQuery, AuditRecorder, AuditSink, ScoringPayload,
};
pub use domain::{
    Actor, AllocatedBy, Allocation, AllocationId, AllocationRun, Application, ApplicationId,
    ApplicationStatus, BedSpace, Gender, Hostel, HostelGenderType, HostelId, PlacementFailure,
    Room, RoomId, RunCounts, RunId, RunStatus, StudentId, StudentProfile, WaitingListEntry,
};
pub use engine::{
    AllocationEngine, ApplicantScore, BatchOutcome, EngineConfig, EngineError, OverrideRequest,
    Placement,
};
pub use features::{
    ApplicantInput, FeatureExtractor, FeatureRecord, FeatureSchema, FeatureVector,
};
pub use import::{parse_applicants, Dataset, ImportError};
pub use inventory::InventorySnapshot;
pub use memory::{LoggingNotifier, MemoryAuditLog, MemoryHousingStore, MemoryRunTracker};
pub use repository::{
    AllocationRepository, ApplicationRepository, ClaimError, HousingStore, InventoryRepository,
    NotificationDispatcher, NotificationError, RepositoryError, RunTracker, RunTrackingError,
};
pub use router::allocation_router;
pub use scoring::{
    ModelInfo, PredictionError, PredictionResult, PredictorConfig, PriorityPredictor,
    PriorityScorer, ScoredApplicant, ScoringMethod, ScoringPolicy,
};
pub use service::{AllocationService, AllocationServiceError, RunReport};
