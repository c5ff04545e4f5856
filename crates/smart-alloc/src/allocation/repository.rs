use chrono::Utc;

use super::domain::{
    Allocation, AllocationId, AllocationRun, Application, ApplicationId, ApplicationStatus,
    Hostel, Room, RoomId, RunCounts, RunId, RunStateError, WaitingListEntry,
};

/// Error enumeration for repository failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Rejection of an atomic bed claim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimError {
    #[error("bed space {bed} in room {room_id} is already occupied")]
    BedOccupied { room_id: RoomId, bed: u16 },
    #[error("room {0} is at capacity")]
    RoomFull(RoomId),
    #[error("bed space {bed} in room {room_id} is inactive or does not exist")]
    BedUnavailable { room_id: RoomId, bed: u16 },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Source of applications for a session.
pub trait ApplicationRepository: Send + Sync {
    /// Only un-allocated, non-cancelled applications of the session.
    fn list_pending(&self, academic_session: &str) -> Result<Vec<Application>, RepositoryError>;
    fn fetch_application(&self, id: &ApplicationId)
        -> Result<Option<Application>, RepositoryError>;
    fn record_score(
        &self,
        id: &ApplicationId,
        score: f64,
        confidence: f64,
    ) -> Result<(), RepositoryError>;
    fn set_application_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<(), RepositoryError>;
}

/// Room and bed-space storage.
pub trait InventoryRepository: Send + Sync {
    fn hostels(&self) -> Result<Vec<Hostel>, RepositoryError>;
    fn rooms(&self) -> Result<Vec<Room>, RepositoryError>;
    fn fetch_room(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError>;

    /// Flips the bed from free to occupied and increments room occupancy as one atomic step.
    /// Returns the updated room.
    fn claim_bed(&self, room_id: &RoomId, bed: u16) -> Result<Room, ClaimError>;

    /// Frees the bed and decrements room occupancy as one atomic step.
    fn release_bed(&self, room_id: &RoomId, bed: u16) -> Result<Room, RepositoryError>;
}

/// Allocation and waiting-list storage.
pub trait AllocationRepository: Send + Sync {
    /// Fails with [`RepositoryError::Conflict`] if the application already has an active
    /// allocation.
    fn insert_allocation(&self, allocation: Allocation) -> Result<Allocation, RepositoryError>;
    fn update_allocation(&self, allocation: Allocation) -> Result<(), RepositoryError>;
    fn fetch_allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, RepositoryError>;
    fn active_allocation_for(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Option<Allocation>, RepositoryError>;
    fn append_waiting_list(&self, entries: &[WaitingListEntry]) -> Result<(), RepositoryError>;
    fn waiting_list(&self, academic_session: &str)
        -> Result<Vec<WaitingListEntry>, RepositoryError>;
}

/// Everything the engine persists through.
pub trait HousingStore: ApplicationRepository + InventoryRepository + AllocationRepository {}

impl<T> HousingStore for T where T: ApplicationRepository + InventoryRepository + AllocationRepository {}

#[derive(Debug, thiserror::Error)]
pub enum RunTrackingError {
    #[error("allocation run {0} not found")]
    NotFound(RunId),
    #[error(transparent)]
    State(#[from] RunStateError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Persistence for [`AllocationRun`] bookkeeping.
pub trait RunTracker: Send + Sync {
    fn create_run(&self, run: AllocationRun) -> Result<AllocationRun, RepositoryError>;
    fn fetch_run(&self, id: &RunId) -> Result<Option<AllocationRun>, RepositoryError>;

    /// Applies a state change as one atomic read-check-write; a rejected change stores nothing.
    fn transition(
        &self,
        id: &RunId,
        apply: &mut dyn FnMut(&mut AllocationRun) -> Result<(), RunStateError>,
    ) -> Result<AllocationRun, RunTrackingError>;

    fn mark_running(&self, id: &RunId) -> Result<AllocationRun, RunTrackingError> {
        self.transition(id, &mut |run| run.mark_running(Utc::now()))
    }

    fn mark_completed(
        &self,
        id: &RunId,
        counts: RunCounts,
    ) -> Result<AllocationRun, RunTrackingError> {
        self.transition(id, &mut |run| run.mark_completed(counts, Utc::now()))
    }

    fn mark_failed(&self, id: &RunId, error: &str) -> Result<AllocationRun, RunTrackingError> {
        self.transition(id, &mut |run| run.mark_failed(error, Utc::now()))
    }

    fn mark_cancelled(&self, id: &RunId) -> Result<AllocationRun, RunTrackingError> {
        self.transition(id, &mut |run| run.mark_cancelled(Utc::now()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Fire-and-forget confirmation messages for new allocations.
pub trait NotificationDispatcher: Send + Sync {
    fn allocations_created(&self, allocation_ids: &[AllocationId])
        -> Result<(), NotificationError>;
}
