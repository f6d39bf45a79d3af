use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{error, info};

use crate::analysis::{service_from_config, AnalysisService};
use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::model::{PipelineOptions, SourceType};
use crate::orchestrator::{ExtractionOrchestrator, ProcessingContext, RepositoryCommitter};
use crate::places::{provider_from_config, GeocodingProvider};
use crate::projects::load_project;
use crate::repository::{
    ItemRepository, ItemUpdate, PendingItems, PlaceRepository, SqliteItemRepository,
    SqlitePlaceRepository,
};
use crate::summary::{BatchReport, ItemOutcome};

/// Entry point for triggering batches against the SQLite store.
pub struct ExtractionService {
    db: Arc<Mutex<Connection>>,
    places: Arc<dyn PlaceRepository>,
    items: Arc<dyn ItemRepository>,
    geocoder: Arc<dyn GeocodingProvider>,
    orchestrator: ExtractionOrchestrator,
}

impl ExtractionService {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        analysis: Arc<dyn AnalysisService>,
        geocoder: Arc<dyn GeocodingProvider>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            places: Arc::new(SqlitePlaceRepository::new(Arc::clone(&db))),
            items: Arc::new(SqliteItemRepository::new(Arc::clone(&db))),
            db,
            geocoder,
            orchestrator: ExtractionOrchestrator::new(analysis, options),
        }
    }

    pub fn from_config(db: Arc<Mutex<Connection>>, config: &AppConfig) -> AppResult<Self> {
        let options = PipelineOptions::from_config(config);
        let analysis = service_from_config(config, options.categories.clone())?;
        let geocoder = provider_from_config(config)?;
        Ok(Self::new(db, analysis, geocoder, options))
    }

    /// Runs one batch over every pending item of `source_type` in the project.
    ///
    /// The project, its pending items and its known places are read once up
    /// front. Rows with nothing to analyze are failed without calling any
    /// service. Items that fail stay `failed` until [`Self::retry_items`]
    /// puts them back in the queue.
    pub async fn process_pending(
        &self,
        project_id: i64,
        source_type: SourceType,
    ) -> AppResult<BatchReport> {
        let project = {
            let conn = self.db.lock();
            load_project(&conn, project_id)?
        };
        let PendingItems { ready, unusable } =
            self.items.list_pending(project_id, source_type).await?;
        if ready.is_empty() && unusable.is_empty() {
            info!(
                project_id,
                source_type = source_type.as_tag(),
                "no pending items"
            );
            return Ok(BatchReport::empty());
        }

        let mut report = if ready.is_empty() {
            BatchReport::empty()
        } else {
            let existing = self.places.list_for_project(project_id).await?;
            let mut context = ProcessingContext::new(project, existing, Arc::clone(&self.geocoder));
            let committer =
                RepositoryCommitter::new(Arc::clone(&self.places), Arc::clone(&self.items));
            self.orchestrator
                .execute_with_report(ready, &mut context, &committer)
                .await
        };

        let message = &self.orchestrator.options().messages.missing_payload;
        for item in unusable {
            let update = ItemUpdate::failed(message.as_str(), None);
            if let Err(err) = self.items.update(item.id, &update).await {
                error!(?err, item_id = item.id, "failed to record failed status");
            }
            report.push_outcome(ItemOutcome::failed(item.id, message.as_str()));
        }
        Ok(report)
    }

    pub async fn retry_items(&self, item_ids: &[i64]) -> AppResult<usize> {
        let reset = self.items.reset_to_pending(item_ids).await?;
        info!(requested = item_ids.len(), reset, "items queued for retry");
        Ok(reset)
    }
}
