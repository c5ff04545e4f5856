//! In-process implementations of the storage, audit and run-tracking boundaries.
//!
//! Used by the CLI, the HTTP service and the test suite. All housing state sits behind one
//! mutex so a bed claim and the occupancy update are a single critical section.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

use super::audit::{AuditAction, AuditError, AuditEvent, AuditQuery, AuditSink};
use super::domain::{
    Allocation, AllocationId, AllocationRun, Application, ApplicationId, ApplicationStatus,
    Hostel, HostelId, Room, RoomId, RunId, RunStateError, WaitingListEntry,
};
use super::repository::{
    AllocationRepository, ApplicationRepository, ClaimError, InventoryRepository,
    NotificationDispatcher, NotificationError, RepositoryError, RunTracker, RunTrackingError,
};

#[derive(Debug, Default)]
struct HousingState {
    applications: BTreeMap<ApplicationId, Application>,
    hostels: BTreeMap<HostelId, Hostel>,
    rooms: BTreeMap<RoomId, Room>,
    allocations: BTreeMap<AllocationId, Allocation>,
    waiting_list: Vec<WaitingListEntry>,
}

fn poisoned(what: &str) -> RepositoryError {
    RepositoryError::Unavailable(format!("{what} mutex poisoned"))
}

#[derive(Debug, Default, Clone)]
pub struct MemoryHousingStore {
    state: Arc<Mutex<HousingState>>,
}

impl MemoryHousingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(
        hostels: Vec<Hostel>,
        rooms: Vec<Room>,
        applications: Vec<Application>,
    ) -> Result<Self, RepositoryError> {
        let store = Self::new();
        for hostel in hostels {
            store.insert_hostel(hostel)?;
        }
        for room in rooms {
            store.insert_room(room)?;
        }
        for application in applications {
            store.insert_application(application)?;
        }
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HousingState>, RepositoryError> {
        self.state.lock().map_err(|_| poisoned("housing store"))
    }

    pub fn insert_hostel(&self, hostel: Hostel) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.hostels.contains_key(&hostel.id) {
            return Err(RepositoryError::Conflict);
        }
        state.hostels.insert(hostel.id.clone(), hostel);
        Ok(())
    }

    /// Occupancy is recomputed from the bed spaces so the stored room is always consistent.
    pub fn insert_room(&self, mut room: Room) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.rooms.contains_key(&room.id) {
            return Err(RepositoryError::Conflict);
        }
        room.current_occupancy = room.occupied_bed_count() as u16;
        state.rooms.insert(room.id.clone(), room);
        Ok(())
    }

    pub fn insert_application(&self, application: Application) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        if state.applications.contains_key(&application.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .applications
            .insert(application.id.clone(), application);
        Ok(())
    }

    pub fn applications(&self) -> Result<Vec<Application>, RepositoryError> {
        Ok(self.lock()?.applications.values().cloned().collect())
    }

    pub fn allocations(&self) -> Result<Vec<Allocation>, RepositoryError> {
        Ok(self.lock()?.allocations.values().cloned().collect())
    }
}

impl ApplicationRepository for MemoryHousingStore {
    fn list_pending(&self, academic_session: &str) -> Result<Vec<Application>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .applications
            .values()
            .filter(|application| {
                application.academic_session == academic_session
                    && application.status == ApplicationStatus::Pending
                    && !state.allocations.values().any(|allocation| {
                        allocation.is_active && allocation.application_id == application.id
                    })
            })
            .cloned()
            .collect())
    }

    fn fetch_application(
        &self,
        id: &ApplicationId,
    ) -> Result<Option<Application>, RepositoryError> {
        Ok(self.lock()?.applications.get(id).cloned())
    }

    fn record_score(
        &self,
        id: &ApplicationId,
        score: f64,
        confidence: f64,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let application = state
            .applications
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        application.priority_score = Some(score);
        application.score_confidence = Some(confidence);
        Ok(())
    }

    fn set_application_status(
        &self,
        id: &ApplicationId,
        status: ApplicationStatus,
    ) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let application = state
            .applications
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?;
        application.status = status;
        Ok(())
    }
}

impl InventoryRepository for MemoryHousingStore {
    fn hostels(&self) -> Result<Vec<Hostel>, RepositoryError> {
        Ok(self.lock()?.hostels.values().cloned().collect())
    }

    fn rooms(&self) -> Result<Vec<Room>, RepositoryError> {
        Ok(self.lock()?.rooms.values().cloned().collect())
    }

    fn fetch_room(&self, id: &RoomId) -> Result<Option<Room>, RepositoryError> {
        Ok(self.lock()?.rooms.get(id).cloned())
    }

    fn claim_bed(&self, room_id: &RoomId, bed: u16) -> Result<Room, ClaimError> {
        let mut state = self.lock()?;
        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or(RepositoryError::NotFound)?;

        if room.is_full() {
            return Err(ClaimError::RoomFull(room_id.clone()));
        }

        let space = room
            .bed_mut(bed)
            .filter(|space| space.is_active)
            .ok_or_else(|| ClaimError::BedUnavailable {
                room_id: room_id.clone(),
                bed,
            })?;
        if space.is_occupied {
            return Err(ClaimError::BedOccupied {
                room_id: room_id.clone(),
                bed,
            });
        }

        space.is_occupied = true;
        room.current_occupancy += 1;
        Ok(room.clone())
    }

    fn release_bed(&self, room_id: &RoomId, bed: u16) -> Result<Room, RepositoryError> {
        let mut state = self.lock()?;
        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or(RepositoryError::NotFound)?;
        let space = room.bed_mut(bed).ok_or(RepositoryError::NotFound)?;

        if space.is_occupied {
            space.is_occupied = false;
            room.current_occupancy = room.current_occupancy.saturating_sub(1);
        }
        Ok(room.clone())
    }
}

impl AllocationRepository for MemoryHousingStore {
    fn insert_allocation(&self, allocation: Allocation) -> Result<Allocation, RepositoryError> {
        let mut state = self.lock()?;
        let duplicate_active = allocation.is_active
            && state.allocations.values().any(|existing| {
                existing.is_active && existing.application_id == allocation.application_id
            });
        if duplicate_active || state.allocations.contains_key(&allocation.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .allocations
            .insert(allocation.id.clone(), allocation.clone());
        Ok(allocation)
    }

    fn update_allocation(&self, allocation: Allocation) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        match state.allocations.get_mut(&allocation.id) {
            Some(existing) => {
                *existing = allocation;
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    fn fetch_allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, RepositoryError> {
        Ok(self.lock()?.allocations.get(id).cloned())
    }

    fn active_allocation_for(
        &self,
        application_id: &ApplicationId,
    ) -> Result<Option<Allocation>, RepositoryError> {
        Ok(self
            .lock()?
            .allocations
            .values()
            .find(|allocation| allocation.is_active && &allocation.application_id == application_id)
            .cloned())
    }

    fn append_waiting_list(&self, entries: &[WaitingListEntry]) -> Result<(), RepositoryError> {
        self.lock()?.waiting_list.extend_from_slice(entries);
        Ok(())
    }

    fn waiting_list(
        &self,
        academic_session: &str,
    ) -> Result<Vec<WaitingListEntry>, RepositoryError> {
        Ok(self
            .lock()?
            .waiting_list
            .iter()
            .filter(|entry| entry.academic_session == academic_session)
            .cloned()
            .collect())
    }
}

/// Append-only audit log held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditLog {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Result<Vec<AuditEvent>, AuditError> {
        self.events
            .lock()
            .map(|events| events.clone())
            .map_err(|_| poisoned_log())
    }

    pub fn events_of(&self, action: AuditAction) -> Result<Vec<AuditEvent>, AuditError> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|event| event.action == action)
            .collect())
    }
}

fn poisoned_log() -> AuditError {
    AuditError::Unavailable("audit log mutex poisoned".to_string())
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| poisoned_log())?;
        events.push(event);
        Ok(())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuditError> {
        let events = self.events.lock().map_err(|_| poisoned_log())?;
        Ok(events
            .iter()
            .rev()
            .filter(|event| query.matches(event))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryRunTracker {
    runs: Arc<Mutex<HashMap<RunId, AllocationRun>>>,
}

impl MemoryRunTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunTracker for MemoryRunTracker {
    fn create_run(&self, run: AllocationRun) -> Result<AllocationRun, RepositoryError> {
        let mut runs = self.runs.lock().map_err(|_| poisoned("run tracker"))?;
        if runs.contains_key(&run.id) {
            return Err(RepositoryError::Conflict);
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(run)
    }

    fn fetch_run(&self, id: &RunId) -> Result<Option<AllocationRun>, RepositoryError> {
        let runs = self.runs.lock().map_err(|_| poisoned("run tracker"))?;
        Ok(runs.get(id).cloned())
    }

    fn transition(
        &self,
        id: &RunId,
        apply: &mut dyn FnMut(&mut AllocationRun) -> Result<(), RunStateError>,
    ) -> Result<AllocationRun, RunTrackingError> {
        let mut runs = self.runs.lock().map_err(|_| poisoned("run tracker"))?;
        let stored = runs
            .get_mut(id)
            .ok_or_else(|| RunTrackingError::NotFound(id.clone()))?;
        let mut updated = stored.clone();
        apply(&mut updated)?;
        *stored = updated.clone();
        Ok(updated)
    }
}

/// Notification dispatcher that only logs; delivery is handled elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl NotificationDispatcher for LoggingNotifier {
    fn allocations_created(
        &self,
        allocation_ids: &[AllocationId],
    ) -> Result<(), NotificationError> {
        info!(count = allocation_ids.len(), "queued allocation confirmations");
        Ok(())
    }
}
