use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for housing applications.
    ApplicationId
);
string_id!(StudentId);
string_id!(HostelId);
string_id!(RoomId);
string_id!(AllocationId);
string_id!(
    /// Identifier of one batch allocation invocation.
    RunId
);

/// Applicant gender as captured on the student profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "Other")]
    Other,
}

impl Gender {
    /// Parses the short codes used by profile exports; anything unrecognised is `Other`.
    pub fn from_code(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "m" | "male" => Gender::Male,
            "f" | "female" => Gender::Female,
            _ => Gender::Other,
        }
    }

    pub const fn code(self) -> &'static str {
        match self {
            Gender::Male => "M",
            Gender::Female => "F",
            Gender::Other => "Other",
        }
    }
}

/// Snapshot of the student attributes the scoring pipeline reads.
///
/// Owned by the application subsystem; the engine never mutates these fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProfile {
    pub student_id: StudentId,
    #[serde(default)]
    pub full_name: String,
    pub gender: Gender,
    /// Academic level as printed on the transcript (100, 200, ... 500).
    pub level: u16,
    #[serde(default)]
    pub gpa: Option<f64>,
    #[serde(default)]
    pub distance_km: Option<f64>,
    #[serde(default)]
    pub disability: bool,
    #[serde(default)]
    pub financial_need: bool,
    #[serde(default)]
    pub medical_condition: bool,
    #[serde(default)]
    pub first_generation: bool,
    #[serde(default)]
    pub international: bool,
    #[serde(default)]
    pub previous_housing: bool,
    #[serde(default)]
    pub semesters_completed: Option<u32>,
    #[serde(default)]
    pub academic_probation: bool,
    #[serde(default)]
    pub family_size: Option<u32>,
    #[serde(default)]
    pub family_income_bracket: Option<u32>,
    #[serde(default)]
    pub employment_hours: Option<u32>,
}

impl StudentProfile {
    /// Minimal profile with every optional attribute unset.
    pub fn new(student_id: StudentId, gender: Gender, level: u16) -> Self {
        Self {
            student_id,
            full_name: String::new(),
            gender,
            level,
            gpa: None,
            distance_km: None,
            disability: false,
            financial_need: false,
            medical_condition: false,
            first_generation: false,
            international: false,
            previous_housing: false,
            semesters_completed: None,
            academic_probation: false,
            family_size: None,
            family_income_bracket: None,
            employment_hours: None,
        }
    }
}

/// Lifecycle of a housing application as seen by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    Allocated,
    Cancelled,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Allocated => "allocated",
            ApplicationStatus::Cancelled => "cancelled",
        }
    }
}

/// A student's application for one academic session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub student: StudentProfile,
    pub academic_session: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub preferred_hostel: Option<HostelId>,
    pub status: ApplicationStatus,
    #[serde(default)]
    pub priority_score: Option<f64>,
    #[serde(default)]
    pub score_confidence: Option<f64>,
}

/// Gender assignment of a hostel; doubles as the inventory bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostelGenderType {
    Male,
    Female,
    Mixed,
}

impl HostelGenderType {
    /// Buckets an applicant of the given gender may be placed in.
    pub const fn eligible_for(gender: Gender) -> &'static [HostelGenderType] {
        match gender {
            Gender::Male => &[HostelGenderType::Male, HostelGenderType::Mixed],
            Gender::Female => &[HostelGenderType::Female, HostelGenderType::Mixed],
            Gender::Other => &[HostelGenderType::Mixed],
        }
    }

    pub fn accepts(self, gender: Gender) -> bool {
        Self::eligible_for(gender).contains(&self)
    }

    pub const fn label(self) -> &'static str {
        match self {
            HostelGenderType::Male => "male",
            HostelGenderType::Female => "female",
            HostelGenderType::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hostel {
    pub id: HostelId,
    pub name: String,
    #[serde(default)]
    pub code: String,
    pub gender_type: HostelGenderType,
}

/// Individual bed within a room, identified by its number inside the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedSpace {
    pub number: u16,
    #[serde(default)]
    pub is_occupied: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl BedSpace {
    pub fn vacant(number: u16) -> Self {
        Self {
            number,
            is_occupied: false,
            is_active: true,
        }
    }

    pub fn is_free(&self) -> bool {
        self.is_active && !self.is_occupied
    }
}

fn default_true() -> bool {
    true
}

/// Room inventory record. `current_occupancy` must always equal the number of occupied beds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hostel_id: HostelId,
    pub room_number: String,
    pub capacity: u16,
    #[serde(default)]
    pub current_occupancy: u16,
    #[serde(default)]
    pub is_accessible: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_under_maintenance: bool,
    #[serde(default)]
    pub bed_spaces: Vec<BedSpace>,
}

impl Room {
    /// Room with `capacity` vacant beds numbered from 1.
    pub fn with_beds(id: RoomId, hostel_id: HostelId, room_number: &str, capacity: u16) -> Self {
        Self {
            id,
            hostel_id,
            room_number: room_number.to_string(),
            capacity,
            current_occupancy: 0,
            is_accessible: false,
            is_active: true,
            is_under_maintenance: false,
            bed_spaces: (1..=capacity).map(BedSpace::vacant).collect(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.current_occupancy >= self.capacity
    }

    pub fn is_available(&self) -> bool {
        self.is_active && !self.is_under_maintenance && !self.is_full()
    }

    pub fn available_spaces(&self) -> u16 {
        self.capacity.saturating_sub(self.current_occupancy)
    }

    pub fn occupied_bed_count(&self) -> usize {
        self.bed_spaces.iter().filter(|bed| bed.is_occupied).count()
    }

    /// Lowest-numbered free active bed, if any.
    pub fn first_free_bed(&self) -> Option<u16> {
        self.bed_spaces
            .iter()
            .filter(|bed| bed.is_free())
            .map(|bed| bed.number)
            .min()
    }

    pub fn bed(&self, number: u16) -> Option<&BedSpace> {
        self.bed_spaces.iter().find(|bed| bed.number == number)
    }

    pub(crate) fn bed_mut(&mut self, number: u16) -> Option<&mut BedSpace> {
        self.bed_spaces.iter_mut().find(|bed| bed.number == number)
    }
}

/// Who performed a state-changing action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    System,
    User(String),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatedBy {
    AiSystem,
    AdminUser,
}

/// Link from an application to a room (and bed space).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub application_id: ApplicationId,
    pub student_id: StudentId,
    pub room_id: RoomId,
    pub hostel_id: HostelId,
    pub bed_space: Option<u16>,
    pub allocated_by: AllocatedBy,
    pub actor: Actor,
    pub reason: String,
    pub admin_override: bool,
    pub priority_score: Option<f64>,
    pub is_confirmed: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Allocation {
    pub(crate) fn cancel(&mut self, reason: &str, at: DateTime<Utc>) {
        self.is_active = false;
        self.cancelled_at = Some(at);
        self.cancellation_reason = Some(reason.to_string());
    }

    pub(crate) fn confirm(&mut self, at: DateTime<Utc>) {
        self.is_confirmed = true;
        self.confirmed_at = Some(at);
    }
}

/// Why an applicant could not be placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PlacementFailure {
    #[error("no rooms matching gender requirement")]
    NoEligibleRoom,
    #[error("no available bed spaces")]
    NoAvailableBed,
    #[error("allocation could not be committed: {0}")]
    CommitFailed(String),
}

/// Waiting-list position for an applicant the run could not place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitingListEntry {
    pub application_id: ApplicationId,
    pub student_id: StudentId,
    pub academic_session: String,
    pub run_id: Option<RunId>,
    /// 1-indexed rank; priority entries occupy the first positions.
    pub position: u32,
    pub is_priority: bool,
    pub priority_score: f64,
    pub submitted_at: DateTime<Utc>,
    pub reason: PlacementFailure,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const fn label(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Cancelled)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

/// Illegal run state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("allocation run {run_id} cannot move from {from:?} to {to:?}")]
pub struct RunStateError {
    pub run_id: RunId,
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Counters reported when a run completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunCounts {
    pub total: u32,
    pub successful: u32,
    pub waitlisted: u32,
}

/// Bookkeeping record of one batch invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRun {
    pub id: RunId,
    pub academic_session: String,
    pub status: RunStatus,
    pub started_by: Actor,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_applications: u32,
    pub successful_allocations: u32,
    pub waiting_list_count: u32,
    pub error_message: Option<String>,
}

impl AllocationRun {
    pub fn new(id: RunId, academic_session: &str, started_by: Actor, at: DateTime<Utc>) -> Self {
        Self {
            id,
            academic_session: academic_session.to_string(),
            status: RunStatus::Pending,
            started_by,
            created_at: at,
            started_at: None,
            completed_at: None,
            total_applications: 0,
            successful_allocations: 0,
            waiting_list_count: 0,
            error_message: None,
        }
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), RunStateError> {
        if !self.status.can_transition_to(next) {
            return Err(RunStateError {
                run_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self, at: DateTime<Utc>) -> Result<(), RunStateError> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        counts: RunCounts,
        at: DateTime<Utc>,
    ) -> Result<(), RunStateError> {
        self.transition(RunStatus::Completed)?;
        self.total_applications = counts.total;
        self.successful_allocations = counts.successful;
        self.waiting_list_count = counts.waitlisted;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: &str, at: DateTime<Utc>) -> Result<(), RunStateError> {
        self.transition(RunStatus::Failed)?;
        self.error_message = Some(error.to_string());
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn mark_cancelled(&mut self, at: DateTime<Utc>) -> Result<(), RunStateError> {
        self.transition(RunStatus::Cancelled)?;
        self.completed_at = Some(at);
        Ok(())
    }
}
