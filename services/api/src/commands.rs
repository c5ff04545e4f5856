use crate::infra::{build_service, load_store};
use clap::Args;
use smart_alloc::allocation::scoring::domain_knowledge_prediction;
use smart_alloc::allocation::{
    Actor, FeatureExtractor, FeatureRecord, RunReport, ScoredApplicant,
};
use smart_alloc::config::AppConfig;
use smart_alloc::error::AppError;
use smart_alloc::telemetry;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// JSON dataset with hostels, rooms and applications
    #[arg(long)]
    pub(crate) dataset: PathBuf,
    /// Optional CSV export of additional applicants for the session
    #[arg(long)]
    pub(crate) applicants_csv: Option<PathBuf>,
    /// Academic session to allocate, e.g. 2024/2025
    #[arg(long)]
    pub(crate) session: String,
    /// Recorded as the user who started the run
    #[arg(long)]
    pub(crate) started_by: Option<String>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct PredictArgs {
    /// Grade point average on a 0-5 scale
    #[arg(long)]
    pub(crate) gpa: Option<f64>,
    /// Study level (100-500)
    #[arg(long, default_value_t = 100)]
    pub(crate) level: u16,
    /// Distance from campus in kilometres
    #[arg(long)]
    pub(crate) distance: Option<f64>,
    #[arg(long)]
    pub(crate) disability: bool,
    #[arg(long)]
    pub(crate) financial_need: bool,
    #[arg(long)]
    pub(crate) medical_condition: bool,
    #[arg(long)]
    pub(crate) first_generation: bool,
    #[arg(long)]
    pub(crate) international: bool,
}

pub(crate) fn run_allocation(args: RunArgs) -> Result<(), AppError> {
    let RunArgs {
        dataset,
        applicants_csv,
        session,
        started_by,
    } = args;

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let applicants = applicants_csv.as_deref().map(|path| (path, session.as_str()));
    let store = load_store(Some(&dataset), applicants)?;
    let service = build_service(&config.allocation, store)?;
    let actor = started_by.map(Actor::User).unwrap_or(Actor::System);

    let report = service.run_session(&session, actor)?;
    println!("{}", render_report(&report));
    Ok(())
}

pub(crate) fn run_prediction(args: PredictArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    let predictor = &config.allocation.predictor;
    let extractor = FeatureExtractor::new(predictor.schema, predictor.max_distance_km);

    let scored = predict(&extractor, &args.into_record());
    println!("{}", render_prediction(&scored));
    Ok(())
}

impl PredictArgs {
    fn into_record(self) -> FeatureRecord {
        let mut record = FeatureRecord::default();
        record
            .insert("level", self.level)
            .insert("disability", self.disability)
            .insert("financial_need", self.financial_need)
            .insert("medical_condition", self.medical_condition)
            .insert("first_generation", self.first_generation)
            .insert("international", self.international);
        if let Some(gpa) = self.gpa {
            record.insert("gpa", gpa);
        }
        if let Some(distance) = self.distance {
            record.insert("distance", distance);
        }
        record
    }
}

fn predict(extractor: &FeatureExtractor, record: &FeatureRecord) -> ScoredApplicant {
    let features = extractor.extract(record);
    let prediction = domain_knowledge_prediction(&features.derived);
    ScoredApplicant {
        features,
        prediction,
    }
}

fn render_report(report: &RunReport) -> String {
    let run = &report.run;
    let mut lines = vec![
        format!("Allocation run {} ({})", run.id, run.academic_session),
        format!("Status: {}", run.status.label()),
        format!(
            "Applications: {} | Placed: {} | Waiting: {}",
            run.total_applications, run.successful_allocations, run.waiting_list_count
        ),
    ];
    if let Some(average) = report.average_priority_score {
        lines.push(format!("Average priority score: {average:.2}"));
    }

    if !report.allocations_by_hostel.is_empty() {
        lines.push(String::new());
        lines.push("By hostel:".to_string());
        for (hostel, count) in &report.allocations_by_hostel {
            lines.push(format!("  {hostel}: {count}"));
        }
    }

    lines.push(String::new());
    lines.push("Placements:".to_string());
    if report.placements.is_empty() {
        lines.push("  (none)".to_string());
    }
    for placement in &report.placements {
        lines.push(format!(
            "  {:>6.2}  {} {} -> {} room {} bed {}",
            placement.priority_score,
            placement.application_id,
            placement.student_name,
            placement.hostel_name,
            placement.room_number,
            placement.bed_space
        ));
    }

    lines.push(String::new());
    lines.push("Waiting list:".to_string());
    if report.waiting_list.is_empty() {
        lines.push("  (empty)".to_string());
    }
    for entry in &report.waiting_list {
        let marker = if entry.is_priority { " [priority]" } else { "" };
        lines.push(format!(
            "  #{} {} score {:.2}{} ({})",
            entry.position, entry.application_id, entry.priority_score, marker, entry.reason
        ));
    }

    lines.join("\n")
}

fn render_prediction(scored: &ScoredApplicant) -> String {
    let prediction = &scored.prediction;
    let mut lines = vec![
        format!("Priority score: {:.2}", prediction.score),
        format!("Confidence: {:.2}", prediction.confidence),
        format!("Model version: {}", prediction.model_version),
        format!("Feature schema: {}", scored.features.schema),
        "Features:".to_string(),
    ];
    for (name, value) in scored.features.to_named() {
        lines.push(format!("  {name}: {value:.4}"));
    }
    lines.push("Weights:".to_string());
    for (name, weight) in &prediction.feature_importance {
        lines.push(format!("  {name}: {weight:.2}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::fixture;
    use smart_alloc::allocation::FeatureSchema;
    use smart_alloc::config::AllocationSettings;

    #[test]
    fn prediction_uses_the_domain_formula() {
        let args = PredictArgs {
            gpa: Some(5.0),
            level: 500,
            distance: Some(500.0),
            disability: true,
            financial_need: true,
            ..PredictArgs::default()
        };
        let extractor = FeatureExtractor::new(FeatureSchema::Legacy, 500.0);

        let scored = predict(&extractor, &args.into_record());

        assert_eq!(scored.prediction.score, 100.0);
        assert_eq!(scored.prediction.confidence, 0.85);
        let rendered = render_prediction(&scored);
        assert!(rendered.contains("Priority score: 100.00"));
        assert!(rendered.contains("domain_knowledge_v1"));
    }

    #[test]
    fn missing_inputs_fall_back_to_defaults() {
        let extractor = FeatureExtractor::new(FeatureSchema::Legacy, 500.0);
        let scored = predict(&extractor, &PredictArgs::default().into_record());

        assert_eq!(scored.features.get("gpa_normalized"), Some(0.0));
        assert_eq!(scored.features.get("level_encoded"), Some(1.0));
    }

    #[test]
    fn fixture_run_renders_placements_and_waiting_list() {
        let store = load_store(
            Some(&fixture("dataset.json")),
            Some((fixture("applicants.csv").as_path(), "2024/2025")),
        )
        .expect("fixtures load");
        let service = build_service(&AllocationSettings::default(), store).expect("service builds");

        let report = service
            .run_session("2024/2025", Actor::System)
            .expect("run completes");
        let rendered = render_report(&report);

        assert!(rendered.contains("Status: completed"));
        assert!(rendered.contains("Placed: 6"));
        assert!(rendered.contains("#1 app-103"));
        assert!(rendered.contains("Queens Hall: 3"));
    }
}
