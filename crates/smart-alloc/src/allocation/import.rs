//! Loading hostels, rooms and applications from JSON datasets and CSV applicant exports.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

use super::domain::{
    Application, ApplicationId, ApplicationStatus, BedSpace, Gender, Hostel, HostelId, Room,
    StudentId, StudentProfile,
};
use super::memory::MemoryHousingStore;
use super::repository::RepositoryError;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid dataset: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid applicant csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("applicant row {row}: {reason}")]
    InvalidRow { row: usize, reason: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Inventory plus applications for one or more sessions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub hostels: Vec<Hostel>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub applications: Vec<Application>,
}

impl Dataset {
    pub fn from_path(path: &Path) -> Result<Self, ImportError> {
        let file = File::open(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Rooms listed without bed spaces get `capacity` vacant beds numbered from 1.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ImportError> {
        let mut dataset: Dataset = serde_json::from_reader(reader)?;
        for room in &mut dataset.rooms {
            if room.bed_spaces.is_empty() {
                room.bed_spaces = (1..=room.capacity).map(BedSpace::vacant).collect();
            }
        }
        Ok(dataset)
    }

    /// Appends applicants from a CSV export; returns how many were added.
    pub fn add_applicants_csv(
        &mut self,
        path: &Path,
        academic_session: &str,
    ) -> Result<usize, ImportError> {
        let file = File::open(path).map_err(|source| ImportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let applications = parse_applicants(file, academic_session)?;
        let added = applications.len();
        self.applications.extend(applications);
        Ok(added)
    }

    pub fn into_store(self) -> Result<MemoryHousingStore, ImportError> {
        Ok(MemoryHousingStore::with_data(
            self.hostels,
            self.rooms,
            self.applications,
        )?)
    }
}

/// Parses an applicant export into pending applications for `academic_session`.
pub fn parse_applicants<R: Read>(
    reader: R,
    academic_session: &str,
) -> Result<Vec<Application>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut applications = Vec::new();

    for (index, record) in csv_reader.deserialize::<ApplicantRow>().enumerate() {
        let row = record?;
        // header is line 1
        applications.push(row.into_application(index + 2, academic_session)?);
    }

    Ok(applications)
}

#[derive(Debug, Deserialize)]
struct ApplicantRow {
    application_id: String,
    student_id: String,
    #[serde(default)]
    full_name: String,
    gender: String,
    level: u16,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    gpa: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    distance_km: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    disability: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    financial_need: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    medical_condition: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    international: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    preferred_hostel: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    submitted_at: Option<String>,
}

impl ApplicantRow {
    fn into_application(
        self,
        row: usize,
        academic_session: &str,
    ) -> Result<Application, ImportError> {
        let invalid = |reason: String| ImportError::InvalidRow { row, reason };

        let submitted_at = self
            .submitted_at
            .as_deref()
            .ok_or_else(|| invalid("missing submitted_at".to_string()))
            .and_then(|raw| {
                parse_timestamp(raw).ok_or_else(|| invalid(format!("bad timestamp {raw:?}")))
            })?;

        let mut student = StudentProfile::new(
            StudentId(self.student_id),
            Gender::from_code(&self.gender),
            self.level,
        );
        student.full_name = self.full_name;
        student.gpa = parse_number(self.gpa.as_deref(), "gpa").map_err(invalid)?;
        student.distance_km =
            parse_number(self.distance_km.as_deref(), "distance_km").map_err(invalid)?;
        student.disability = parse_flag(self.disability.as_deref());
        student.financial_need = parse_flag(self.financial_need.as_deref());
        student.medical_condition = parse_flag(self.medical_condition.as_deref());
        student.international = parse_flag(self.international.as_deref());

        Ok(Application {
            id: ApplicationId(self.application_id),
            student,
            academic_session: academic_session.to_string(),
            submitted_at,
            preferred_hostel: self.preferred_hostel.map(HostelId),
            status: ApplicationStatus::Pending,
            priority_score: None,
            score_confidence: None,
        })
    }
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_number(value: Option<&str>, column: &str) -> Result<Option<f64>, String> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<f64>()
                .map_err(|_| format!("{column} is not a number: {raw:?}"))
        })
        .transpose()
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(|raw| raw.trim().to_ascii_lowercase()).as_deref(),
        Some("true" | "yes" | "y" | "1")
    )
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
