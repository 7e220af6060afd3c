//! Drive the fetch -> map -> validate -> upsert pipeline, batch by batch,
//! emitting progress and tracking sync watermarks (C7).
//!
//! Grounded on `original_source/src/retrovue/plex/ingest.py`
//! (`IngestOrchestrator.ingest_library`/`_process_item`) for the pipeline
//! shape, show/season creation for episodes, and the "only advance the
//! watermark when errors == 0" rule, and on the teacher's `progress.rs` for
//! the channel-backed progress event pattern (here an `mpsc::Receiver`
//! fed by a spawned task rather than a broadcast, since each sync run has
//! exactly one listener).
//!
//! Each batch of `batch_size` items is written inside one `Store`
//! transaction (`Db::begin_batch`): every write for the batch lands on an
//! open `sqlx::Transaction`, and the batch either commits as a whole or
//! rolls back as a whole. A rollback counts the entire batch against
//! `errors` rather than the one item that failed, matching
//! `original_source/src/retrovue/plex/ingest.py`'s
//! `self.db.commit()`/`self.db.rollback()` per batch with
//! `stats["errors"] += len(items_batch)` on failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::client::PlexClient;
use crate::db::Db;
use crate::error::CoreError;
use crate::error_handling::{ErrorContext, ErrorHandler};
use crate::mapper;
use crate::models::ContentKind;
use crate::path_mapper::PathMapper;
use crate::validator::{ValidationRequest, ValidationStatus, Validator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub server_id: i64,
    pub library_id: i64,
    pub library_key: String,
    pub kind: ContentKind,
    pub mode: SyncMode,
    pub limit: Option<u64>,
    pub dry_run: bool,
    pub batch_size: usize,
    pub progress_interval: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            server_id: 0,
            library_id: 0,
            library_key: String::new(),
            kind: ContentKind::Movie,
            mode: SyncMode::Full,
            limit: None,
            dry_run: true,
            batch_size: 50,
            progress_interval: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SyncStats {
    pub scanned: u64,
    pub mapped: u64,
    pub inserted_items: u64,
    pub updated_items: u64,
    pub inserted_files: u64,
    pub updated_files: u64,
    pub linked: u64,
    pub skipped: u64,
    pub errors: u64,
}

/// The fixed vocabulary of progress stages a sync run emits, in roughly
/// the order a caller should expect to see them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Start,
    LibraryReady,
    Fetching,
    Scanning,
    Progress,
    BatchComplete,
    ValidationError,
    Error,
    FinalBatch,
    Complete,
    FatalError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SyncStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub library_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressEvent {
    fn new(stage: ProgressStage, msg: impl Into<String>) -> Self {
        Self {
            stage,
            msg: msg.into(),
            stats: None,
            item_title: None,
            library_id: None,
            error: None,
        }
    }

    fn with_stats(mut self, stats: SyncStats) -> Self {
        self.stats = Some(stats);
        self
    }

    fn with_item_title(mut self, title: impl Into<String>) -> Self {
        self.item_title = Some(title.into());
        self
    }

    fn with_library(mut self, library_id: i64) -> Self {
        self.library_id = Some(library_id);
        self
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

pub struct Orchestrator {
    db: Arc<Db>,
    client: Arc<PlexClient>,
    path_mapper: Arc<PathMapper>,
    validator: Arc<Validator>,
}

impl Orchestrator {
    pub fn new(db: Arc<Db>, client: Arc<PlexClient>, path_mapper: Arc<PathMapper>, validator: Arc<Validator>) -> Self {
        Self {
            db,
            client,
            path_mapper,
            validator,
        }
    }

    /// Run a sync to completion, returning final stats. For progress as it
    /// happens use [`Orchestrator::run_streaming`].
    pub async fn run(&self, options: SyncOptions, cancel: CancellationToken) -> Result<SyncStats, CoreError> {
        let mut rx = self.run_streaming(options, cancel);
        let mut last_stats = SyncStats::default();
        while let Some(event) = rx.recv().await {
            if let Some(stats) = event.stats {
                last_stats = stats;
            }
        }
        Ok(last_stats)
    }

    /// Spawn the sync as a background task and return a channel of
    /// progress events as it runs.
    pub fn run_streaming(&self, options: SyncOptions, cancel: CancellationToken) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(64);
        let db = self.db.clone();
        let client = self.client.clone();
        let path_mapper = self.path_mapper.clone();
        let validator = self.validator.clone();

        tokio::spawn(async move {
            let worker = SyncWorker {
                db,
                client,
                path_mapper,
                validator,
                tx,
                cancel,
            };
            worker.run(options).await;
        });

        rx
    }
}

struct SyncWorker {
    db: Arc<Db>,
    client: Arc<PlexClient>,
    path_mapper: Arc<PathMapper>,
    validator: Arc<Validator>,
    tx: mpsc::Sender<ProgressEvent>,
    cancel: CancellationToken,
}

impl SyncWorker {
    async fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event).await;
    }

    async fn run(self, mut options: SyncOptions) {
        self.send(ProgressEvent::new(
            ProgressStage::Start,
            format!("starting {:?} sync for library {}", options.mode, options.library_id),
        ))
        .await;

        let since_epoch = match options.mode {
            SyncMode::Incremental => match self.db.list_libraries(Some(options.server_id)).await {
                Ok(libraries) => match libraries.into_iter().find(|l| l.id == options.library_id) {
                    Some(library) if library.last_incremental_sync_epoch.is_some() => library.last_incremental_sync_epoch,
                    Some(_) => {
                        // No watermark yet: an incremental request with nothing to diff
                        // against degrades to a full sync.
                        options.mode = SyncMode::Full;
                        None
                    }
                    None => {
                        self.send(
                            ProgressEvent::new(ProgressStage::FatalError, "library not found")
                                .with_library(options.library_id)
                                .with_error(format!("library {} does not exist for server {}", options.library_id, options.server_id)),
                        )
                        .await;
                        return;
                    }
                },
                Err(e) => {
                    self.send(
                        ProgressEvent::new(ProgressStage::FatalError, "failed to read library watermark")
                            .with_library(options.library_id)
                            .with_error(e.to_string()),
                    )
                    .await;
                    return;
                }
            },
            SyncMode::Full => None,
        };

        self.send(
            ProgressEvent::new(ProgressStage::LibraryReady, format!("processing library {} ({:?})", options.library_id, options.kind))
                .with_library(options.library_id),
        )
        .await;

        self.send(ProgressEvent::new(ProgressStage::Fetching, "fetching items from remote library")).await;

        let kind_str = options.kind.as_str().to_string();
        let mut stream = Box::pin(self.client.iter_items(
            options.library_key.clone(),
            kind_str,
            options.limit,
            since_epoch,
        ));

        let stats = Arc::new(SyncStatsAtomic::default());
        let error_handler = tokio::sync::Mutex::new(ErrorHandler::new());
        let mut dry_run_count = 0usize;

        let mut batch_tx: Option<sqlx::Transaction<'_, sqlx::Sqlite>> = None;
        let mut batch_outcomes: Vec<ItemOutcome> = Vec::new();
        let mut batch_failed = false;
        let mut batch_item_count = 0usize;

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.send(ProgressEvent::new(ProgressStage::Error, "sync cancelled")).await;
                    break;
                }
                item = stream.next() => item,
            };

            let Some(item) = next else { break };

            let item = match item {
                Ok(item) => item,
                Err(e) => {
                    if is_fatal_client_error(&e) {
                        if let Some(tx) = batch_tx.take() {
                            self.rollback_batch(tx, &stats, batch_item_count).await;
                        }
                        self.send(
                            ProgressEvent::new(ProgressStage::FatalError, "remote server rejected the request")
                                .with_library(options.library_id)
                                .with_error(e.to_string()),
                        )
                        .await;
                        return;
                    }
                    stats.errors.fetch_add(1, Ordering::Relaxed);
                    error_handler
                        .lock()
                        .await
                        .handle(e.to_string(), ErrorContext::new("fetch"));
                    self.send(ProgressEvent::new(ProgressStage::Error, "failed to fetch an item").with_error(e.to_string()))
                        .await;
                    continue;
                }
            };

            let scanned = stats.scanned.fetch_add(1, Ordering::Relaxed) + 1;
            let mapped = mapper::map_item(&item);
            stats.mapped.fetch_add(1, Ordering::Relaxed);

            if scanned as usize <= options.progress_interval {
                self.send(
                    ProgressEvent::new(ProgressStage::Scanning, format!("scanning: {}", mapped.content_item.title))
                        .with_item_title(mapped.content_item.title.clone()),
                )
                .await;
            }

            if options.dry_run {
                dry_run_count += 1;
                if dry_run_count % options.progress_interval == 0 {
                    self.send(
                        ProgressEvent::new(ProgressStage::Progress, format!("would process: {}", mapped.content_item.title))
                            .with_item_title(mapped.content_item.title.clone())
                            .with_stats(stats.snapshot()),
                    )
                    .await;
                }
                continue;
            }

            if batch_tx.is_none() {
                match self.db.begin_batch().await {
                    Ok(tx) => batch_tx = Some(tx),
                    Err(e) => {
                        self.send(
                            ProgressEvent::new(ProgressStage::FatalError, "failed to open a batch transaction")
                                .with_library(options.library_id)
                                .with_error(e.to_string()),
                        )
                        .await;
                        return;
                    }
                }
            }
            let tx = batch_tx.as_mut().expect("batch transaction opened above");

            match self.process_item(&options, &mapped, tx, &error_handler).await {
                Ok(outcome) => batch_outcomes.push(outcome),
                Err(e) => {
                    batch_failed = true;
                    error_handler
                        .lock()
                        .await
                        .handle(
                            e.to_string(),
                            ErrorContext::new("process_item").with_item_title(mapped.content_item.title.clone()),
                        );
                    self.send(
                        ProgressEvent::new(ProgressStage::Error, "failed to process item, batch will roll back")
                            .with_item_title(mapped.content_item.title.clone())
                            .with_error(e.to_string()),
                    )
                    .await;
                }
            }

            batch_item_count += 1;
            if batch_item_count >= options.batch_size {
                let tx = batch_tx.take().expect("batch transaction opened above");
                self.finish_batch(tx, batch_failed, std::mem::take(&mut batch_outcomes), batch_item_count, &stats)
                    .await;
                self.send(ProgressEvent::new(ProgressStage::BatchComplete, "batch processed").with_stats(stats.snapshot()))
                    .await;
                batch_item_count = 0;
                batch_failed = false;
            }
        }

        if let Some(tx) = batch_tx.take() {
            self.finish_batch(tx, batch_failed, std::mem::take(&mut batch_outcomes), batch_item_count, &stats)
                .await;
            let final_batch_stats = stats.snapshot();
            self.send(ProgressEvent::new(ProgressStage::FinalBatch, "final partial batch processed").with_stats(final_batch_stats))
                .await;
        }

        let final_stats = stats.snapshot();

        if !options.dry_run && final_stats.errors == 0 {
            let now_epoch = time::OffsetDateTime::now_utc().unix_timestamp();
            let result = match options.mode {
                SyncMode::Full => self.db.set_library_last_full(options.library_id, now_epoch).await,
                SyncMode::Incremental => self.db.set_library_last_incremental(options.library_id, now_epoch).await,
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to advance sync watermark");
            }
        }

        let mode_str = if options.dry_run { "DRY RUN" } else { "COMMIT" };
        self.send(
            ProgressEvent::new(ProgressStage::Complete, format!("sync complete [{mode_str}]")).with_stats(final_stats),
        )
        .await;
    }

    /// Process one item's writes against the batch's open transaction,
    /// returning the stat deltas to apply once the whole batch commits.
    /// Any `?` here aborts just this item's writes; the caller decides
    /// whether that fails the whole batch.
    async fn process_item(
        &self,
        options: &SyncOptions,
        mapped: &mapper::MappedItem,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        error_handler: &tokio::sync::Mutex<ErrorHandler>,
    ) -> Result<ItemOutcome, CoreError> {
        let mut outcome = ItemOutcome::default();
        let mut show_id = None;
        let mut season_id = None;

        if mapped.content_item.kind == ContentKind::Episode {
            if let Some(show_title) = &mapped.content_item.show_title {
                let external_key = format!("show_{show_title}");
                let id = self
                    .db
                    .get_or_create_show_tx(tx, options.server_id, options.library_id, &external_key, show_title, None)
                    .await?;
                show_id = Some(id);

                if let Some(season_number) = mapped.content_item.season_number {
                    season_id = Some(self.db.get_or_create_season_tx(tx, id, season_number, None, None).await?);
                }
            }
        }

        let (content_item_id, inserted) = self
            .db
            .upsert_content_item_tx(tx, options.server_id, options.library_id, &mapped.content_item, show_id, season_id)
            .await?;
        if inserted {
            outcome.inserted_items += 1;
        } else {
            outcome.updated_items += 1;
        }

        for primary_guid in mapped.guids.clone().into_guids() {
            self.db
                .upsert_guid_tx(tx, show_id, Some(content_item_id), primary_guid.provider, &primary_guid.external_id)
                .await?;
        }

        for media_file in &mapped.media_files {
            let validation = self
                .validator
                .validate(&ValidationRequest {
                    server_id: options.server_id,
                    library_id: options.library_id,
                    remote_path: media_file.file_path.clone(),
                })
                .await;

            if validation.status != ValidationStatus::Valid {
                tracing::warn!(path = %media_file.file_path, status = ?validation.status, "media file failed validation");
                outcome.skipped += 1;
                let message = format!("\u{26a0} {}", validation.message);
                error_handler
                    .lock()
                    .await
                    .handle(message.clone(), ErrorContext::new("validate").with_file_path(media_file.file_path.clone()));
                self.send(
                    ProgressEvent::new(ProgressStage::ValidationError, message)
                        .with_item_title(mapped.content_item.title.clone())
                        .with_error(format!("{:?}", validation.status)),
                )
                .await;
                continue;
            }

            let mut resolved_file = media_file.clone();
            if let Some(local_path) = validation.local_path {
                resolved_file.file_path = local_path;
            }
            if let Some(file_size) = validation.file_size {
                resolved_file.size_bytes = Some(file_size as i64);
            }
            if let Some(video_codec) = validation.video_codec {
                resolved_file.video_codec = Some(video_codec);
            }
            if let Some(audio_codec) = validation.audio_codec {
                resolved_file.audio_codec = Some(audio_codec);
            }
            if let Some(width) = validation.width {
                resolved_file.width = Some(width);
            }
            if let Some(height) = validation.height {
                resolved_file.height = Some(height);
            }

            let now_epoch = time::OffsetDateTime::now_utc().unix_timestamp();
            let (media_file_id, file_inserted) = self
                .db
                .upsert_media_file_tx(tx, options.server_id, options.library_id, content_item_id, &resolved_file, now_epoch)
                .await?;
            if file_inserted {
                outcome.inserted_files += 1;
            } else {
                outcome.updated_files += 1;
            }

            self.db.link_content_item_file_tx(tx, content_item_id, media_file_id, "primary").await?;
            outcome.linked += 1;
        }

        self.db.upsert_editorial_tx(tx, content_item_id, &mapped.editorial).await?;
        for tag in &mapped.tags {
            self.db.upsert_tag_tx(tx, content_item_id, tag).await?;
        }

        Ok(outcome)
    }

    /// Commit a batch's transaction and fold its item outcomes into the
    /// running stats, or roll it back and count the whole batch as errors.
    async fn finish_batch(
        &self,
        tx: sqlx::Transaction<'_, sqlx::Sqlite>,
        failed: bool,
        outcomes: Vec<ItemOutcome>,
        items_in_batch: usize,
        stats: &SyncStatsAtomic,
    ) {
        if failed {
            self.rollback_batch(tx, stats, items_in_batch).await;
            return;
        }

        if let Err(e) = tx.commit().await {
            tracing::warn!(error = %e, "batch commit failed, counting the batch as errors");
            stats.errors.fetch_add(items_in_batch as u64, Ordering::Relaxed);
            return;
        }

        for outcome in outcomes {
            stats.inserted_items.fetch_add(outcome.inserted_items, Ordering::Relaxed);
            stats.updated_items.fetch_add(outcome.updated_items, Ordering::Relaxed);
            stats.inserted_files.fetch_add(outcome.inserted_files, Ordering::Relaxed);
            stats.updated_files.fetch_add(outcome.updated_files, Ordering::Relaxed);
            stats.linked.fetch_add(outcome.linked, Ordering::Relaxed);
            stats.skipped.fetch_add(outcome.skipped, Ordering::Relaxed);
        }
    }

    async fn rollback_batch(&self, tx: sqlx::Transaction<'_, sqlx::Sqlite>, stats: &SyncStatsAtomic, items_in_batch: usize) {
        if let Err(e) = tx.rollback().await {
            tracing::warn!(error = %e, "failed to roll back batch");
        }
        stats.errors.fetch_add(items_in_batch as u64, Ordering::Relaxed);
    }
}

/// Per-item stat deltas, folded into the run's [`SyncStatsAtomic`] only once
/// the batch containing the item commits.
#[derive(Debug, Default)]
struct ItemOutcome {
    inserted_items: u64,
    updated_items: u64,
    inserted_files: u64,
    updated_files: u64,
    linked: u64,
    skipped: u64,
}

/// Errors serious enough to abort the whole sync rather than being
/// counted against the current item/batch: the remote server rejecting
/// credentials outright means every subsequent fetch will fail the same
/// way, so there is nothing to gain from grinding through the rest of
/// the library.
fn is_fatal_client_error(error: &crate::client::ClientError) -> bool {
    matches!(error, crate::client::ClientError::Status(401) | crate::client::ClientError::Status(403))
}

#[derive(Default)]
struct SyncStatsAtomic {
    scanned: AtomicU64,
    mapped: AtomicU64,
    inserted_items: AtomicU64,
    updated_items: AtomicU64,
    inserted_files: AtomicU64,
    updated_files: AtomicU64,
    linked: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
}

impl SyncStatsAtomic {
    fn snapshot(&self) -> SyncStats {
        SyncStats {
            scanned: self.scanned.load(Ordering::Relaxed),
            mapped: self.mapped.load(Ordering::Relaxed),
            inserted_items: self.inserted_items.load(Ordering::Relaxed),
            updated_items: self.updated_items.load(Ordering::Relaxed),
            inserted_files: self.inserted_files.load(Ordering::Relaxed),
            updated_files: self.updated_files.load(Ordering::Relaxed),
            linked: self.linked.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_stats_default_is_zeroed() {
        let stats = SyncStats::default();
        assert_eq!(stats.scanned, 0);
        assert_eq!(stats.errors, 0);
    }

    #[test]
    fn progress_event_carries_optional_stats() {
        let event = ProgressEvent::new(ProgressStage::Start, "hello");
        assert!(event.stats.is_none());
        let event = event.with_stats(SyncStats::default());
        assert!(event.stats.is_some());
    }

    #[test]
    fn fatal_client_errors_are_auth_failures_only() {
        assert!(is_fatal_client_error(&crate::client::ClientError::Status(401)));
        assert!(is_fatal_client_error(&crate::client::ClientError::Status(403)));
        assert!(!is_fatal_client_error(&crate::client::ClientError::Status(500)));
        assert!(!is_fatal_client_error(&crate::client::ClientError::NotFound));
    }
}
