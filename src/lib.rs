pub mod analysis;
pub mod cascade;
pub mod config;
pub mod db;
pub mod duplicate;
pub mod errors;
pub mod geo;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod places;
pub mod projects;
pub mod repository;
pub mod summary;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rusqlite::Connection as SqlConnection;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::analysis::{AnalysisOutput, AnalysisService, GeminiAnalysisClient};
pub use crate::cascade::GeocodeCascade;
pub use crate::config::{AppConfig, PublicAppConfig};
pub use crate::db::{bootstrap, open_in_memory, DatabaseContext};
pub use crate::duplicate::{find_duplicate, DuplicateCheck, MatchReason};
pub use crate::errors::{AppError, AppResult};
pub use crate::model::{
    BatchSummary, ExistingPlace, ExtractedCandidate, GeocodeResult, ItemMessages, ItemPayload,
    ItemStatus, NewPlace, PipelineOptions, PlaceCategories, ProcessableItem, ProjectInfo,
    SourceType,
};
pub use crate::orchestrator::{
    Committer, ExtractionOrchestrator, ProcessingContext, RepositoryCommitter,
};
pub use crate::pipeline::ExtractionService;
pub use crate::places::{GeocodingProvider, GooglePlacesClient, ThrottledGeocoder};
pub use crate::projects::{create_project, list_projects, load_project};
pub use crate::repository::{
    enqueue_item, item_state, linked_place_ids, ItemRepository, ItemState, ItemUpdate,
    PendingItems, PlaceRepository, SqliteItemRepository, SqlitePlaceRepository, UnusableItem,
};
pub use crate::summary::{BatchReport, ItemOutcome};

pub struct AppState {
    db: Arc<Mutex<SqlConnection>>,
    db_path: PathBuf,
    config: AppConfig,
    service: ExtractionService,
}

impl AppState {
    /// Reads configuration from the environment and opens the database in
    /// `data_dir`.
    pub fn initialize<P: AsRef<Path>>(data_dir: P) -> AppResult<Self> {
        init_tracing();
        Self::with_config(data_dir, AppConfig::from_env())
    }

    pub fn with_config<P: AsRef<Path>>(data_dir: P, config: AppConfig) -> AppResult<Self> {
        let DatabaseContext { connection, path } =
            bootstrap(data_dir, &config.database_file_name)?;
        let db = Arc::new(Mutex::new(connection));
        let service = ExtractionService::from_config(Arc::clone(&db), &config)?;
        info!(
            path = %path.display(),
            model = config.analysis_model.as_str(),
            "pipeline state ready"
        );

        Ok(Self {
            db,
            db_path: path,
            config,
            service,
        })
    }

    pub fn service(&self) -> &ExtractionService {
        &self.service
    }

    pub fn connection(&self) -> Arc<Mutex<SqlConnection>> {
        Arc::clone(&self.db)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn public_config(&self) -> PublicAppConfig {
        self.config.public_profile()
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,travel_place_pipeline=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}

/// Processes every pending item of one kind for a project stored under
/// `data_dir`.
pub async fn run_project_batch(
    data_dir: &Path,
    project_id: i64,
    source_type: SourceType,
) -> anyhow::Result<BatchReport> {
    let state = AppState::initialize(data_dir)
        .with_context(|| format!("failed to initialize pipeline in {}", data_dir.display()))?;
    let report = state
        .service()
        .process_pending(project_id, source_type)
        .await
        .with_context(|| format!("batch for project {project_id} failed"))?;
    Ok(report)
}
