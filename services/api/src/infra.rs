use metrics_exporter_prometheus::PrometheusHandle;
use smart_alloc::allocation::{
    AllocationEngine, AllocationService, Dataset, LoggingNotifier, MemoryAuditLog,
    MemoryHousingStore, MemoryRunTracker, PriorityPredictor,
};
use smart_alloc::config::AllocationSettings;
use smart_alloc::error::AppError;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

pub(crate) type ApiService = AllocationService<MemoryHousingStore, MemoryAuditLog, MemoryRunTracker>;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Builds the in-memory store from an optional dataset and applicant export.
pub(crate) fn load_store(
    dataset: Option<&Path>,
    applicants: Option<(&Path, &str)>,
) -> Result<MemoryHousingStore, AppError> {
    let mut data = match dataset {
        Some(path) => Dataset::from_path(path)?,
        None => Dataset::default(),
    };
    if let Some((path, academic_session)) = applicants {
        let added = data.add_applicants_csv(path, academic_session)?;
        info!(path = %path.display(), academic_session, added, "imported applicant export");
    }

    info!(
        hostels = data.hostels.len(),
        rooms = data.rooms.len(),
        applications = data.applications.len(),
        "dataset loaded"
    );
    Ok(data.into_store()?)
}

/// Wires predictor, engine and run service over the given store.
pub(crate) fn build_service(
    settings: &AllocationSettings,
    store: MemoryHousingStore,
) -> Result<Arc<ApiService>, AppError> {
    let predictor = PriorityPredictor::load(&settings.predictor)?;
    let extractor = *predictor.extractor();

    let engine = AllocationEngine::new(
        Arc::new(store),
        Arc::new(MemoryAuditLog::new()),
        Arc::new(predictor),
        settings.engine_config(),
    );

    Ok(Arc::new(AllocationService::new(
        Arc::new(engine),
        Arc::new(MemoryRunTracker::new()),
        Arc::new(LoggingNotifier),
        extractor,
    )))
}

#[cfg(test)]
pub(crate) fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../crates/smart-alloc/fixtures")
        .join(name)
}
