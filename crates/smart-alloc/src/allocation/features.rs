//! Feature extraction for priority scoring.
//!
//! Two input shapes are accepted (a typed [`StudentProfile`] or a loose key-value
//! [`FeatureRecord`]); both are resolved into a profile at the boundary so the transforms
//! below only ever see one canonical shape.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::domain::{Gender, StudentId, StudentProfile};

pub const MIN_GPA: f64 = 0.0;
pub const MAX_GPA: f64 = 5.0;
pub const DEFAULT_MAX_DISTANCE_KM: f64 = 500.0;

const DEFAULT_LEVEL: u16 = 100;
const EXTENDED_DEFAULT_GPA: f64 = 3.0;
const EXTENDED_DEFAULT_DISTANCE_KM: f64 = 50.0;
const EXTENDED_DEFAULT_FAMILY_SIZE: u32 = 4;
const EXTENDED_DEFAULT_INCOME_BRACKET: u32 = 5;

const LEGACY_FEATURES: [&str; 5] = [
    "gpa_normalized",
    "level_encoded",
    "distance_transformed",
    "disability_flag",
    "financial_aid_flag",
];

const EXTENDED_FEATURES: [&str; 17] = [
    "level",
    "gpa",
    "distance_km",
    "disability",
    "medical_condition",
    "financial_need",
    "first_generation",
    "international",
    "previous_housing",
    "semesters_completed",
    "academic_probation",
    "family_size",
    "family_income_bracket",
    "employment_hours",
    "gender_M",
    "gender_F",
    "gender_Other",
];

/// Canonical feature ordering shared by the extractor and a fitted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSchema {
    /// Five normalised features.
    Legacy,
    /// Seventeen raw and one-hot features.
    Extended,
}

impl FeatureSchema {
    pub fn feature_names(self) -> &'static [&'static str] {
        match self {
            FeatureSchema::Legacy => &LEGACY_FEATURES,
            FeatureSchema::Extended => &EXTENDED_FEATURES,
        }
    }

    pub fn len(self) -> usize {
        self.feature_names().len()
    }

    pub const fn label(self) -> &'static str {
        match self {
            FeatureSchema::Legacy => "legacy",
            FeatureSchema::Extended => "extended",
        }
    }
}

impl fmt::Display for FeatureSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FeatureSchema {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "legacy" | "v1" => Ok(FeatureSchema::Legacy),
            "extended" | "v2" => Ok(FeatureSchema::Extended),
            other => Err(format!("unknown feature schema '{other}'")),
        }
    }
}

/// Plain key-value applicant record, e.g. from an ad-hoc prediction request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureRecord(pub BTreeMap<String, Value>);

impl FeatureRecord {
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    fn lookup(&self, keys: &[&str]) -> Option<&Value> {
        keys.iter()
            .filter_map(|key| self.0.get(*key))
            .find(|value| !value.is_null())
    }

    fn number(&self, keys: &[&str]) -> Option<f64> {
        match self.lookup(keys)? {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().parse().ok(),
            Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn count(&self, keys: &[&str]) -> Option<u32> {
        self.number(keys)
            .filter(|value| value.is_finite() && *value >= 0.0)
            .map(|value| value.round().min(u32::MAX as f64) as u32)
    }

    fn flag(&self, keys: &[&str]) -> bool {
        match self.lookup(keys) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(number)) => number.as_f64().map(|v| v != 0.0).unwrap_or(false),
            Some(Value::String(raw)) => matches!(
                raw.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "y" | "1"
            ),
            _ => false,
        }
    }

    fn text(&self, keys: &[&str]) -> Option<String> {
        match self.lookup(keys)? {
            Value::String(raw) => Some(raw.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }

    /// Resolves the record into the canonical profile shape, defaulting every missing field.
    pub fn to_profile(&self) -> StudentProfile {
        let student_id = self
            .text(&["student_id", "id"])
            .unwrap_or_else(|| "anonymous".to_string());
        let gender = self
            .text(&["gender"])
            .map(|raw| Gender::from_code(&raw))
            .unwrap_or(Gender::Other);
        let level = self
            .count(&["level", "current_level"])
            .map(|level| level.min(u16::MAX as u32) as u16)
            .unwrap_or(DEFAULT_LEVEL);

        StudentProfile {
            student_id: StudentId(student_id),
            full_name: self.text(&["full_name", "name"]).unwrap_or_default(),
            gender,
            level,
            gpa: self.number(&["gpa", "current_gpa"]),
            distance_km: self.number(&["distance", "distance_km", "distance_from_campus"]),
            disability: self.flag(&["disability", "disability_status"]),
            financial_need: self.flag(&["financial_need", "financial_aid", "financial_aid_status"]),
            medical_condition: self.flag(&["medical_condition", "chronic_medical_condition"]),
            first_generation: self.flag(&["first_generation", "first_generation_student"]),
            international: self.flag(&["international", "international_student"]),
            previous_housing: self.flag(&["previous_housing", "previous_housing_status"]),
            semesters_completed: self.count(&["semesters_completed"]),
            academic_probation: self.flag(&["academic_probation", "academic_probation_status"]),
            family_size: self.count(&["family_size"]),
            family_income_bracket: self.count(&["family_income_bracket"]),
            employment_hours: self.count(&["employment_hours", "employment_hours_per_week"]),
        }
    }
}

/// The two supported input shapes for extraction.
#[derive(Debug, Clone, Copy)]
pub enum ApplicantInput<'a> {
    Profile(&'a StudentProfile),
    Record(&'a FeatureRecord),
}

impl ApplicantInput<'_> {
    fn resolve(self) -> StudentProfile {
        match self {
            ApplicantInput::Profile(profile) => profile.clone(),
            ApplicantInput::Record(record) => record.to_profile(),
        }
    }
}

impl<'a> From<&'a StudentProfile> for ApplicantInput<'a> {
    fn from(value: &'a StudentProfile) -> Self {
        ApplicantInput::Profile(value)
    }
}

impl<'a> From<&'a FeatureRecord> for ApplicantInput<'a> {
    fn from(value: &'a FeatureRecord) -> Self {
        ApplicantInput::Record(value)
    }
}

/// Normalised signals computed for every applicant regardless of the active schema.
///
/// The domain-knowledge formula reads these, and `seniority_score` is reported as an
/// auxiliary feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatures {
    pub gpa_normalized: f64,
    pub level_encoded: f64,
    pub distance_transformed: f64,
    pub disability_flag: f64,
    pub financial_aid_flag: f64,
    pub seniority_score: f64,
}

/// Fixed-order model input plus the derived signals it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema: FeatureSchema,
    pub values: Vec<f64>,
    pub derived: DerivedFeatures,
}

impl FeatureVector {
    pub fn names(&self) -> &'static [&'static str] {
        self.schema.feature_names()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names()
            .iter()
            .position(|candidate| *candidate == name)
            .and_then(|index| self.values.get(index).copied())
    }

    /// Named values in canonical order, used for audit payloads.
    pub fn to_named(&self) -> BTreeMap<String, f64> {
        self.names()
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }
}

/// Stateless transformer from applicant input to a [`FeatureVector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureExtractor {
    schema: FeatureSchema,
    max_distance_km: f64,
}

impl FeatureExtractor {
    pub fn new(schema: FeatureSchema, max_distance_km: f64) -> Self {
        let max_distance_km = if max_distance_km.is_finite() && max_distance_km > 0.0 {
            max_distance_km
        } else {
            DEFAULT_MAX_DISTANCE_KM
        };

        Self {
            schema,
            max_distance_km,
        }
    }

    pub fn schema(&self) -> FeatureSchema {
        self.schema
    }

    pub fn max_distance_km(&self) -> f64 {
        self.max_distance_km
    }

    pub fn extract<'a>(&self, input: impl Into<ApplicantInput<'a>>) -> FeatureVector {
        let profile = input.into().resolve();
        self.extract_profile(&profile)
    }

    fn extract_profile(&self, profile: &StudentProfile) -> FeatureVector {
        let derived = self.derive(profile);
        let values = match self.schema {
            FeatureSchema::Legacy => vec![
                derived.gpa_normalized,
                derived.level_encoded,
                derived.distance_transformed,
                derived.disability_flag,
                derived.financial_aid_flag,
            ],
            FeatureSchema::Extended => self.extended_values(profile),
        };

        FeatureVector {
            schema: self.schema,
            values,
            derived,
        }
    }

    fn derive(&self, profile: &StudentProfile) -> DerivedFeatures {
        let gpa_normalized = normalize_gpa(profile.gpa);
        let level_encoded = encode_level(profile.level);

        DerivedFeatures {
            gpa_normalized,
            level_encoded,
            distance_transformed: self.transform_distance(profile.distance_km),
            disability_flag: encode_flag(profile.disability),
            financial_aid_flag: encode_flag(profile.financial_need),
            seniority_score: level_encoded * (1.0 + gpa_normalized),
        }
    }

    fn extended_values(&self, profile: &StudentProfile) -> Vec<f64> {
        let level = if profile.level == 0 {
            DEFAULT_LEVEL
        } else {
            profile.level
        };
        let gpa = profile
            .gpa
            .filter(|gpa| gpa.is_finite())
            .unwrap_or(EXTENDED_DEFAULT_GPA);
        let distance =
            self.cap_distance(profile.distance_km.unwrap_or(EXTENDED_DEFAULT_DISTANCE_KM));

        vec![
            f64::from(level),
            gpa,
            distance,
            encode_flag(profile.disability),
            encode_flag(profile.medical_condition),
            encode_flag(profile.financial_need),
            encode_flag(profile.first_generation),
            encode_flag(profile.international),
            encode_flag(profile.previous_housing),
            f64::from(profile.semesters_completed.unwrap_or(0)),
            encode_flag(profile.academic_probation),
            f64::from(profile.family_size.unwrap_or(EXTENDED_DEFAULT_FAMILY_SIZE)),
            f64::from(
                profile
                    .family_income_bracket
                    .unwrap_or(EXTENDED_DEFAULT_INCOME_BRACKET),
            ),
            f64::from(profile.employment_hours.unwrap_or(0)),
            encode_flag(profile.gender == Gender::Male),
            encode_flag(profile.gender == Gender::Female),
            encode_flag(profile.gender == Gender::Other),
        ]
    }

    fn cap_distance(&self, distance: f64) -> f64 {
        if !distance.is_finite() || distance < 0.0 {
            return 0.0;
        }
        distance.min(self.max_distance_km)
    }

    /// Caps at the configured maximum and scales to `[0, 1]`; missing or negative is 0.
    pub fn transform_distance(&self, distance: Option<f64>) -> f64 {
        match distance {
            Some(distance) => self.cap_distance(distance) / self.max_distance_km,
            None => 0.0,
        }
    }
}

/// Linear scale of GPA onto `[0, 1]`; missing or below-minimum values are 0.
pub fn normalize_gpa(gpa: Option<f64>) -> f64 {
    match gpa {
        Some(gpa) if gpa.is_finite() && gpa >= MIN_GPA => {
            ((gpa - MIN_GPA) / (MAX_GPA - MIN_GPA)).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

/// Ordinal tier for the five known levels; anything else is tier 1.
pub fn encode_level(level: u16) -> f64 {
    match level {
        100 => 1.0,
        200 => 2.0,
        300 => 3.0,
        400 => 4.0,
        500 => 5.0,
        _ => 1.0,
    }
}

pub fn encode_flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}
