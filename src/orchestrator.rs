//! Two-phase batch driver.
//!
//! Phase one spawns one analysis task per item and waits for all of them;
//! nothing in that phase touches the project's place list. Phase two walks
//! the results in input order on a single task and is the only place where
//! duplicates are detected, places are created, items are linked and
//! statuses are written, so a place created for one item is already visible
//! when the next item is checked for duplicates.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::analysis::{AnalysisOutput, AnalysisService};
use crate::cascade::GeocodeCascade;
use crate::duplicate::find_duplicate;
use crate::errors::AppResult;
use crate::model::{
    BatchSummary, ExistingPlace, NewPlace, PipelineOptions, ProcessableItem, ProjectInfo,
};
use crate::places::GeocodingProvider;
use crate::repository::{ItemRepository, ItemUpdate, PlaceRepository};
use crate::summary::{summarize, BatchReport, ItemOutcome};

/// State for exactly one batch. The place list only grows, and the geocode
/// cache lives and dies with the context.
pub struct ProcessingContext {
    pub project: ProjectInfo,
    existing_places: Vec<ExistingPlace>,
    cascade: GeocodeCascade,
}

impl ProcessingContext {
    pub fn new(
        project: ProjectInfo,
        existing_places: Vec<ExistingPlace>,
        provider: Arc<dyn GeocodingProvider>,
    ) -> Self {
        Self {
            project,
            existing_places,
            cascade: GeocodeCascade::new(provider),
        }
    }

    pub fn existing_places(&self) -> &[ExistingPlace] {
        &self.existing_places
    }

    pub fn cascade(&self) -> &GeocodeCascade {
        &self.cascade
    }
}

/// Write side of the sequential phase.
#[async_trait]
pub trait Committer: Send + Sync {
    async fn create_place(&self, project_id: i64, place: &NewPlace) -> AppResult<ExistingPlace>;

    async fn link(&self, item: &ProcessableItem, place_id: i64) -> AppResult<()>;

    async fn update_item(&self, item_id: i64, update: &ItemUpdate) -> AppResult<()>;
}

pub struct RepositoryCommitter {
    places: Arc<dyn PlaceRepository>,
    items: Arc<dyn ItemRepository>,
}

impl RepositoryCommitter {
    pub fn new(places: Arc<dyn PlaceRepository>, items: Arc<dyn ItemRepository>) -> Self {
        Self { places, items }
    }
}

#[async_trait]
impl Committer for RepositoryCommitter {
    async fn create_place(&self, project_id: i64, place: &NewPlace) -> AppResult<ExistingPlace> {
        self.places.create(project_id, place).await
    }

    async fn link(&self, item: &ProcessableItem, place_id: i64) -> AppResult<()> {
        self.items
            .link_to_place(item.source_type, item.id, place_id)
            .await
    }

    async fn update_item(&self, item_id: i64, update: &ItemUpdate) -> AppResult<()> {
        self.items.update(item_id, update).await
    }
}

struct AnalysisRecord {
    item: ProcessableItem,
    result: Option<AnalysisOutput>,
    error: Option<String>,
}

pub struct ExtractionOrchestrator {
    analysis: Arc<dyn AnalysisService>,
    options: PipelineOptions,
}

impl ExtractionOrchestrator {
    pub fn new(analysis: Arc<dyn AnalysisService>, options: PipelineOptions) -> Self {
        Self { analysis, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn execute(
        &self,
        pending_items: Vec<ProcessableItem>,
        context: &mut ProcessingContext,
        committer: &dyn Committer,
    ) -> BatchSummary {
        self.execute_with_report(pending_items, context, committer)
            .await
            .summary
    }

    pub async fn execute_with_report(
        &self,
        pending_items: Vec<ProcessableItem>,
        context: &mut ProcessingContext,
        committer: &dyn Committer,
    ) -> BatchReport {
        let started_at = Utc::now();
        let total = pending_items.len();
        info!(
            project_id = context.project.id,
            items = total,
            known_places = context.existing_places.len(),
            "starting extraction batch"
        );

        let records = self.analyze_all(pending_items, &context.project).await;

        let mut outcomes = Vec::with_capacity(total);
        for record in records {
            let outcome = self.fold_item(record, context, committer).await;
            outcomes.push(outcome);
        }

        let summary = summarize(total, &outcomes);
        info!(
            project_id = context.project.id,
            total = summary.total,
            processed = summary.processed,
            failed = summary.failed,
            "extraction batch finished"
        );
        BatchReport {
            summary,
            outcomes,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn analyze_all(
        &self,
        pending_items: Vec<ProcessableItem>,
        project: &ProjectInfo,
    ) -> Vec<AnalysisRecord> {
        let limiter = self
            .options
            .max_parallel_analyses
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        let tasks: Vec<_> = pending_items
            .into_iter()
            .map(|item| {
                let analysis = Arc::clone(&self.analysis);
                let limiter = limiter.clone();
                let payload = item.payload.clone();
                let destination = project.destination.clone();
                let country = project.country.clone();
                let handle = tokio::spawn(async move {
                    let _permit = match limiter {
                        Some(semaphore) => semaphore.acquire_owned().await.ok(),
                        None => None,
                    };
                    analysis
                        .analyze(&payload, &destination, country.as_deref())
                        .await
                });
                (item, handle)
            })
            .collect();

        let mut records = Vec::with_capacity(tasks.len());
        for (item, handle) in tasks {
            let record = match handle.await {
                Ok(Ok(output)) => AnalysisRecord {
                    item,
                    result: Some(output),
                    error: None,
                },
                Ok(Err(err)) => {
                    warn!(?err, item_id = item.id, "analysis failed");
                    AnalysisRecord {
                        item,
                        result: None,
                        error: Some(err.to_string()),
                    }
                }
                Err(err) => {
                    error!(?err, item_id = item.id, "analysis task aborted");
                    AnalysisRecord {
                        item,
                        result: None,
                        error: Some(err.to_string()),
                    }
                }
            };
            records.push(record);
        }
        records
    }

    async fn fold_item(
        &self,
        record: AnalysisRecord,
        context: &mut ProcessingContext,
        committer: &dyn Committer,
    ) -> ItemOutcome {
        let messages = &self.options.messages;
        let AnalysisRecord {
            item,
            result,
            error,
        } = record;

        let output = match (result, error) {
            (Some(output), None) => output,
            (_, error) => {
                debug!(item_id = item.id, ?error, "marking item failed after analysis error");
                return finish_failed(committer, &item, &messages.analysis_failed, None).await;
            }
        };

        if output.places.is_empty() {
            return finish_failed(
                committer,
                &item,
                &messages.no_places_recognized,
                Some(output.raw_text),
            )
            .await;
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut last_error: Option<String> = None;
        let mut created = 0;
        let mut linked: HashSet<i64> = HashSet::new();

        for candidate in &output.places {
            if candidate.confidence < self.options.confidence_threshold {
                debug!(
                    item_id = item.id,
                    name = candidate.name.as_str(),
                    confidence = candidate.confidence,
                    "skipping low-confidence candidate"
                );
                last_error = Some(messages.low_confidence.clone());
                continue;
            }

            let key = candidate.name.trim().to_lowercase();
            if seen.contains(&key) {
                continue;
            }

            let resolved = context
                .cascade
                .resolve_with_fallback(
                    &candidate.name,
                    candidate.name_en.as_deref(),
                    &context.project.destination,
                    context.project.country.as_deref(),
                )
                .await;
            let Some(geocode) = resolved else {
                last_error = Some(messages.location_not_found_for(&candidate.name));
                continue;
            };

            let check = find_duplicate(
                &context.existing_places,
                &candidate.name,
                geocode.external_place_id.as_deref(),
                (geocode.latitude, geocode.longitude),
            );

            let place_id = match check.matched {
                Some(existing) => {
                    debug!(
                        item_id = item.id,
                        place_id = existing.id,
                        reason = ?check.reason,
                        "candidate matches a known place"
                    );
                    existing.id
                }
                None => {
                    let draft = NewPlace::from_candidate(candidate, geocode, item.source_type);
                    match committer.create_place(context.project.id, &draft).await {
                        Ok(place) => {
                            let id = place.id;
                            context.existing_places.push(place);
                            created += 1;
                            id
                        }
                        Err(err) => {
                            warn!(?err, item_id = item.id, "place creation rejected");
                            let message = messages.commit_failed_with(&err.to_string());
                            let raw_text = Some(output.raw_text.clone());
                            return finish_failed(committer, &item, &message, raw_text)
                                .await
                                .with_progress(created, linked.len());
                        }
                    }
                }
            };

            if linked.contains(&place_id) {
                seen.insert(key);
                continue;
            }

            if let Err(err) = committer.link(&item, place_id).await {
                warn!(?err, item_id = item.id, place_id, "linking item to place failed");
                let message = messages.commit_failed_with(&err.to_string());
                let raw_text = Some(output.raw_text.clone());
                return finish_failed(committer, &item, &message, raw_text)
                    .await
                    .with_progress(created, linked.len());
            }

            seen.insert(key);
            linked.insert(place_id);
        }

        if linked.is_empty() {
            let message = last_error.unwrap_or_else(|| messages.no_valid_places.clone());
            return finish_failed(committer, &item, &message, Some(output.raw_text)).await;
        }

        let update = ItemUpdate::processed(Some(output.raw_text));
        if let Err(err) = committer.update_item(item.id, &update).await {
            error!(?err, item_id = item.id, "failed to record processed status");
        }
        ItemOutcome::processed(item.id, created, linked.len())
    }
}

async fn finish_failed(
    committer: &dyn Committer,
    item: &ProcessableItem,
    message: &str,
    raw_text: Option<String>,
) -> ItemOutcome {
    let update = ItemUpdate::failed(message, raw_text);
    if let Err(err) = committer.update_item(item.id, &update).await {
        error!(?err, item_id = item.id, "failed to record failed status");
    }
    ItemOutcome::failed(item.id, message)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use parking_lot::Mutex;

    use super::*;
    use crate::errors::{AppError, AppResult};
    use crate::model::{
        ExtractedCandidate, GeocodeResult, ItemMessages, ItemPayload, ItemStatus, SourceType,
    };

    enum Scripted {
        Places(Vec<ExtractedCandidate>),
        Fail,
        Panic,
    }

    #[derive(Default)]
    struct ScriptedAnalysis {
        replies: HashMap<String, Scripted>,
    }

    impl ScriptedAnalysis {
        fn reply(mut self, content: &str, reply: Scripted) -> Self {
            self.replies.insert(content.into(), reply);
            self
        }
    }

    #[async_trait]
    impl AnalysisService for ScriptedAnalysis {
        async fn analyze(
            &self,
            payload: &ItemPayload,
            _destination: &str,
            _country: Option<&str>,
        ) -> AppResult<AnalysisOutput> {
            let ItemPayload::Text { content } = payload else {
                return Err(AppError::Analysis("unexpected payload".into()));
            };
            match self.replies.get(content) {
                Some(Scripted::Places(places)) => Ok(AnalysisOutput {
                    places: places.clone(),
                    raw_text: format!("raw:{content}"),
                }),
                Some(Scripted::Fail) => Err(AppError::Analysis("model overloaded".into())),
                Some(Scripted::Panic) => panic!("analysis blew up"),
                None => Ok(AnalysisOutput::default()),
            }
        }
    }

    #[derive(Default)]
    struct StubGeocoder {
        known: HashMap<String, GeocodeResult>,
        calls: Mutex<usize>,
    }

    impl StubGeocoder {
        fn knows(mut self, query: &str, lat: f64, lng: f64, external: &str) -> Self {
            self.known.insert(
                query.into(),
                GeocodeResult {
                    latitude: lat,
                    longitude: lng,
                    formatted_address: query.into(),
                    external_place_id: Some(external.into()),
                    maps_url: None,
                    rating: None,
                    rating_count: None,
                    price_level: None,
                },
            );
            self
        }
    }

    #[async_trait]
    impl GeocodingProvider for StubGeocoder {
        async fn search_text(&self, query: &str) -> AppResult<Option<GeocodeResult>> {
            *self.calls.lock() += 1;
            Ok(self.known.get(query).cloned())
        }

        async fn geocode_address(&self, _address: &str) -> AppResult<Option<GeocodeResult>> {
            *self.calls.lock() += 1;
            Ok(None)
        }
    }

    #[derive(Default)]
    struct CommitLog {
        places: Vec<(i64, NewPlace)>,
        links: BTreeSet<(i64, i64)>,
        updates: HashMap<i64, ItemUpdate>,
    }

    #[derive(Default)]
    struct RecordingCommitter {
        log: Mutex<CommitLog>,
        reject_names: Vec<String>,
    }

    #[async_trait]
    impl Committer for RecordingCommitter {
        async fn create_place(
            &self,
            _project_id: i64,
            place: &NewPlace,
        ) -> AppResult<ExistingPlace> {
            if self.reject_names.contains(&place.name) {
                return Err(AppError::Config("constraint violated".into()));
            }
            let mut log = self.log.lock();
            let id = 100 + log.places.len() as i64;
            log.places.push((id, place.clone()));
            Ok(ExistingPlace {
                id,
                name: place.name.clone(),
                latitude: place.geocode.latitude,
                longitude: place.geocode.longitude,
                external_place_id: place.geocode.external_place_id.clone(),
            })
        }

        async fn link(&self, item: &ProcessableItem, place_id: i64) -> AppResult<()> {
            self.log.lock().links.insert((item.id, place_id));
            Ok(())
        }

        async fn update_item(&self, item_id: i64, update: &ItemUpdate) -> AppResult<()> {
            self.log.lock().updates.insert(item_id, update.clone());
            Ok(())
        }
    }

    fn candidate(name: &str, confidence: f64) -> ExtractedCandidate {
        ExtractedCandidate {
            name: name.into(),
            name_en: None,
            category: "attraction".into(),
            note: None,
            confidence,
        }
    }

    fn text_item(id: i64, content: &str) -> ProcessableItem {
        ProcessableItem {
            id,
            project_id: 1,
            source_type: SourceType::Text,
            payload: ItemPayload::Text {
                content: content.into(),
            },
        }
    }

    fn project() -> ProjectInfo {
        ProjectInfo {
            id: 1,
            name: "Spring trip".into(),
            destination: "Tokyo".into(),
            country: Some("Japan".into()),
        }
    }

    fn sensoji_geocoder() -> StubGeocoder {
        StubGeocoder::default().knows("Sensoji Tokyo Japan", 35.7148, 139.7967, "gp-sensoji")
    }

    fn sensoji_context() -> ProcessingContext {
        ProcessingContext::new(project(), Vec::new(), Arc::new(sensoji_geocoder()))
    }

    fn orchestrator(analysis: ScriptedAnalysis) -> ExtractionOrchestrator {
        ExtractionOrchestrator::new(Arc::new(analysis), PipelineOptions::default())
    }

    #[tokio::test]
    async fn items_mentioning_the_same_place_share_one_record() {
        let analysis = ScriptedAnalysis::default()
            .reply("first", Scripted::Places(vec![candidate("Sensoji", 0.9)]))
            .reply("second", Scripted::Places(vec![candidate("Sensoji", 0.9)]));
        let geocoder = Arc::new(sensoji_geocoder());
        let mut context = ProcessingContext::new(project(), Vec::new(), geocoder.clone());
        let committer = RecordingCommitter::default();

        let summary = orchestrator(analysis)
            .execute(
                vec![text_item(1, "first"), text_item(2, "second")],
                &mut context,
                &committer,
            )
            .await;

        assert_eq!(
            summary,
            BatchSummary {
                total: 2,
                processed: 2,
                failed: 0
            }
        );
        let log = committer.log.lock();
        assert_eq!(log.places.len(), 1);
        let place_id = log.places[0].0;
        assert_eq!(log.links, BTreeSet::from([(1, place_id), (2, place_id)]));
        assert_eq!(log.updates[&1].status, ItemStatus::Processed);
        assert_eq!(log.updates[&2].raw_text.as_deref(), Some("raw:second"));
        assert_eq!(context.existing_places().len(), 1);
        // Strategies 1, 2 and 4 for the first item; the second is served from cache.
        assert_eq!(*geocoder.calls.lock(), 3);
    }

    #[tokio::test]
    async fn low_confidence_candidates_fail_the_item() {
        let analysis = ScriptedAnalysis::default()
            .reply("blurry", Scripted::Places(vec![candidate("Sensoji", 0.3)]));
        let mut context = sensoji_context();
        let committer = RecordingCommitter::default();

        let report = orchestrator(analysis)
            .execute_with_report(vec![text_item(1, "blurry")], &mut context, &committer)
            .await;

        assert_eq!(report.summary.failed, 1);
        assert_eq!(
            report.outcomes[0].message.as_deref(),
            Some(ItemMessages::default().low_confidence.as_str())
        );
        let log = committer.log.lock();
        assert!(log.places.is_empty());
        assert_eq!(log.updates[&1].status, ItemStatus::Failed);
    }

    #[tokio::test]
    async fn threshold_is_configurable() {
        let analysis = ScriptedAnalysis::default()
            .reply("blurry", Scripted::Places(vec![candidate("Sensoji", 0.3)]));
        let options = PipelineOptions {
            confidence_threshold: 0.2,
            ..PipelineOptions::default()
        };
        let mut context = sensoji_context();
        let committer = RecordingCommitter::default();

        let summary = ExtractionOrchestrator::new(Arc::new(analysis), options)
            .execute(vec![text_item(1, "blurry")], &mut context, &committer)
            .await;
        assert_eq!(summary.processed, 1);
    }

    #[tokio::test]
    async fn unresolvable_candidate_fails_with_location_message() {
        let analysis = ScriptedAnalysis::default()
            .reply("lost", Scripted::Places(vec![candidate("Atlantis", 0.95)]));
        let geocoder = Arc::new(StubGeocoder::default());
        let mut context = ProcessingContext::new(project(), Vec::new(), geocoder.clone());
        let committer = RecordingCommitter::default();

        let report = orchestrator(analysis)
            .execute_with_report(vec![text_item(1, "lost")], &mut context, &committer)
            .await;

        let expected = ItemMessages::default().location_not_found_for("Atlantis");
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.outcomes[0].message.as_deref(), Some(expected.as_str()));
        assert_eq!(*geocoder.calls.lock(), 3);
        assert!(committer.log.lock().places.is_empty());
    }

    #[tokio::test]
    async fn one_bad_item_does_not_poison_the_batch() {
        let analysis = ScriptedAnalysis::default()
            .reply("error", Scripted::Fail)
            .reply("panic", Scripted::Panic)
            .reply("good", Scripted::Places(vec![candidate("Sensoji", 0.9)]));
        let mut context = sensoji_context();
        let committer = RecordingCommitter::default();
        let messages = ItemMessages::default();

        let report = orchestrator(analysis)
            .execute_with_report(
                vec![
                    text_item(1, "error"),
                    text_item(2, "nothing here"),
                    text_item(3, "panic"),
                    text_item(4, "good"),
                ],
                &mut context,
                &committer,
            )
            .await;

        assert_eq!(
            report.summary,
            BatchSummary {
                total: 4,
                processed: 1,
                failed: 3
            }
        );
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.item_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(report.outcomes[0].message.as_deref(), Some(messages.analysis_failed.as_str()));
        assert_eq!(
            report.outcomes[1].message.as_deref(),
            Some(messages.no_places_recognized.as_str())
        );
        assert_eq!(report.outcomes[2].message.as_deref(), Some(messages.analysis_failed.as_str()));
        assert_eq!(report.outcomes[3].status, ItemStatus::Processed);
    }

    #[tokio::test]
    async fn repeated_names_within_an_item_are_processed_once() {
        let analysis = ScriptedAnalysis::default().reply(
            "double",
            Scripted::Places(vec![candidate("Sensoji", 0.9), candidate(" SENSOJI", 0.8)]),
        );
        let mut context = sensoji_context();
        let committer = RecordingCommitter::default();

        let report = orchestrator(analysis)
            .execute_with_report(vec![text_item(1, "double")], &mut context, &committer)
            .await;

        assert_eq!(report.outcomes[0], ItemOutcome::processed(1, 1, 1));
        let log = committer.log.lock();
        assert_eq!(log.places.len(), 1);
        assert_eq!(log.links.len(), 1);
    }

    #[tokio::test]
    async fn links_to_known_place_by_external_id() {
        let analysis = ScriptedAnalysis::default()
            .reply("visit", Scripted::Places(vec![candidate("Sensoji", 0.9)]));
        let known = vec![
            ExistingPlace {
                id: 76,
                name: "Kaminarimon".into(),
                latitude: 35.71475,
                longitude: 139.79665,
                external_place_id: Some("gp-gate".into()),
            },
            ExistingPlace {
                id: 77,
                name: "Senso-ji Temple".into(),
                latitude: 10.0,
                longitude: 10.0,
                external_place_id: Some("gp-sensoji".into()),
            },
        ];
        let mut context = ProcessingContext::new(project(), known, Arc::new(sensoji_geocoder()));
        let committer = RecordingCommitter::default();

        let report = orchestrator(analysis)
            .execute_with_report(vec![text_item(5, "visit")], &mut context, &committer)
            .await;

        assert_eq!(report.outcomes[0], ItemOutcome::processed(5, 0, 1));
        let log = committer.log.lock();
        assert!(log.places.is_empty());
        assert_eq!(log.links, BTreeSet::from([(5, 77)]));
        assert_eq!(context.existing_places().len(), 2);
    }

    #[tokio::test]
    async fn rejected_commit_fails_only_that_item() {
        let analysis = ScriptedAnalysis::default()
            .reply("broken", Scripted::Places(vec![candidate("Broken", 0.9)]))
            .reply("fine", Scripted::Places(vec![candidate("Sensoji", 0.9)]));
        let geocoder = sensoji_geocoder().knows("Broken Tokyo Japan", 35.0, 139.0, "gp-broken");
        let mut context = ProcessingContext::new(project(), Vec::new(), Arc::new(geocoder));
        let committer = RecordingCommitter {
            reject_names: vec!["Broken".into()],
            ..RecordingCommitter::default()
        };

        let report = orchestrator(analysis)
            .execute_with_report(
                vec![text_item(1, "broken"), text_item(2, "fine")],
                &mut context,
                &committer,
            )
            .await;

        assert_eq!(report.outcomes[0].status, ItemStatus::Failed);
        assert!(report.outcomes[0]
            .message
            .as_deref()
            .unwrap()
            .contains("constraint violated"));
        assert_eq!(report.outcomes[1].status, ItemStatus::Processed);
        assert_eq!(report.places_created(), 1);
    }

    #[tokio::test]
    async fn failed_item_still_reports_places_it_committed() {
        let analysis = ScriptedAnalysis::default().reply(
            "mixed",
            Scripted::Places(vec![candidate("Sensoji", 0.9), candidate("Broken", 0.9)]),
        );
        let geocoder = sensoji_geocoder().knows("Broken Tokyo Japan", 35.0, 139.0, "gp-broken");
        let mut context = ProcessingContext::new(project(), Vec::new(), Arc::new(geocoder));
        let committer = RecordingCommitter {
            reject_names: vec!["Broken".into()],
            ..RecordingCommitter::default()
        };

        let report = orchestrator(analysis)
            .execute_with_report(vec![text_item(1, "mixed")], &mut context, &committer)
            .await;

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, ItemStatus::Failed);
        assert_eq!(outcome.places_created, 1);
        assert_eq!(outcome.places_linked, 1);
        assert_eq!(report.places_created(), 1);
        assert_eq!(context.existing_places().len(), 1);
    }

    #[tokio::test]
    async fn two_names_for_one_place_link_once() {
        let analysis = ScriptedAnalysis::default().reply(
            "aliases",
            Scripted::Places(vec![candidate("Sensoji", 0.9), candidate("Senso-ji Temple", 0.9)]),
        );
        let geocoder = sensoji_geocoder().knows(
            "Senso-ji Temple Tokyo Japan",
            35.7149,
            139.7966,
            "gp-sensoji",
        );
        let mut context = ProcessingContext::new(project(), Vec::new(), Arc::new(geocoder));
        let committer = RecordingCommitter::default();

        let report = orchestrator(analysis)
            .execute_with_report(vec![text_item(1, "aliases")], &mut context, &committer)
            .await;

        assert_eq!(report.outcomes[0], ItemOutcome::processed(1, 1, 1));
        assert_eq!(committer.log.lock().links.len(), 1);
    }

    #[tokio::test]
    async fn bounded_parallelism_keeps_input_order() {
        let mut analysis = ScriptedAnalysis::default();
        for n in 0..6 {
            analysis = analysis.reply(
                &format!("note {n}"),
                Scripted::Places(vec![candidate("Sensoji", 0.9)]),
            );
        }
        let options = PipelineOptions {
            max_parallel_analyses: Some(2),
            ..PipelineOptions::default()
        };
        let mut context = sensoji_context();
        let committer = RecordingCommitter::default();
        let items = (0..6).map(|n| text_item(n, &format!("note {n}"))).collect();

        let report = ExtractionOrchestrator::new(Arc::new(analysis), options)
            .execute_with_report(items, &mut context, &committer)
            .await;

        assert_eq!(report.summary.processed, 6);
        let ids: Vec<_> = report.outcomes.iter().map(|o| o.item_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(report.outcomes[0].places_created, 1);
        assert!(report.outcomes[1..].iter().all(|o| o.places_created == 0));
    }
}
