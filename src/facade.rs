//! Stable, UI/CLI-facing surface that composes every other component (C8).
//!
//! Grounded on `original_source/src/retrovue/plex/service.py`, which plays
//! the same role against the same lower layers (servers, libraries, path
//! mappings, a single `ingest` entry point), and on the teacher's
//! `library/mod.rs`, which owns construction of its own stack (scanner,
//! metadata provider, database) in dependency order rather than letting
//! callers assemble components themselves. The façade builds the Store
//! first, then the PathMapper, then the Validator (which needs the
//! PathMapper), and only builds an ExternalClient and an Orchestrator
//! per-sync, once the target server's credentials are known — no component
//! here instantiates another transitively.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientConfig, PlexClient};
use crate::config::Config;
use crate::db::{Db, DbServerRow};
use crate::error::CoreError;
use crate::models::{ContentKind, Library, LibraryKind, PathMapping};
use crate::orchestrator::{Orchestrator, ProgressEvent, ProgressStage, SyncMode, SyncOptions, SyncStats};
use crate::path_mapper::PathMapper;
use crate::validator::Validator;

/// Owns the catalog database, the path-mapping cache, and the media
/// validator for the lifetime of the process. An [`PlexClient`] and an
/// [`Orchestrator`] are built fresh for each [`Facade::sync_content`] call,
/// since those depend on which server is being synced.
pub struct Facade {
    db: Arc<Db>,
    path_mapper: Arc<PathMapper>,
    validator: Arc<Validator>,
    request_timeout: Duration,
    batch_size: usize,
    progress_interval: usize,
}

impl Facade {
    pub async fn new(config: &Config) -> Result<Self, CoreError> {
        let db = Arc::new(Db::connect(&config.database_url).await?);
        let path_mapper = Arc::new(PathMapper::new(true));
        let validator = Arc::new(Validator::new(
            path_mapper.clone(),
            config.ffprobe_path.clone(),
            config.probe_timeout,
        ));
        Ok(Self {
            db,
            path_mapper,
            validator,
            request_timeout: config.request_timeout,
            batch_size: config.batch_size,
            progress_interval: config.progress_interval,
        })
    }

    // -- Servers -----------------------------------------------------------

    pub async fn add_server(&self, name: &str, base_url: &str, token: &str) -> Result<i64, CoreError> {
        self.db.add_server(name, base_url, token).await
    }

    pub async fn list_servers(&self) -> Result<Vec<DbServerRow>, CoreError> {
        self.db.list_servers().await
    }

    pub async fn delete_server(&self, server_id: i64) -> Result<bool, CoreError> {
        self.path_mapper.invalidate(None);
        self.db.delete_server(server_id).await
    }

    // -- Libraries -----------------------------------------------------------

    pub async fn list_libraries(&self, server_id: Option<i64>) -> Result<Vec<Library>, CoreError> {
        self.db.list_libraries(server_id).await
    }

    pub async fn toggle_library(&self, server_id: i64, library_id: i64, enabled: bool) -> Result<(), CoreError> {
        let updated = self.db.set_library_sync_enabled(server_id, library_id, enabled).await?;
        if updated == 0 {
            return Err(CoreError::not_found(format!("library {library_id} not found for server {server_id}")));
        }
        Ok(())
    }

    /// Ask the remote server what libraries it has and upsert them locally.
    /// Returns the full, now-current library list for this server.
    pub async fn discover_libraries(&self, server_id: i64) -> Result<Vec<Library>, CoreError> {
        let server = self
            .db
            .get_server(server_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("server {server_id} not found")))?;
        let client = self.build_client(&server)?;

        let remote_libraries = client.get_libraries().await.map_err(|e| CoreError::Other(e.into()))?;
        for remote in &remote_libraries {
            let kind = match remote.kind.parse::<LibraryKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    tracing::debug!(kind = %remote.kind, "skipping remote library of unsupported kind");
                    continue;
                }
            };
            self.db.upsert_library(server_id, &remote.key, &remote.title, kind).await?;
        }

        self.db.list_libraries(Some(server_id)).await
    }

    // -- Path mappings -----------------------------------------------------------

    pub async fn list_path_mappings(&self, server_id: i64, library_id: i64) -> Result<Vec<PathMapping>, CoreError> {
        self.db.get_path_mappings(server_id, library_id).await
    }

    pub async fn add_path_mapping(
        &self,
        server_id: i64,
        library_id: i64,
        plex_path: &str,
        local_path: &str,
    ) -> Result<i64, CoreError> {
        let id = self.db.insert_path_mapping(server_id, library_id, plex_path, local_path).await?;
        self.refresh_path_mappings(server_id, library_id).await?;
        Ok(id)
    }

    pub async fn delete_path_mapping(&self, server_id: i64, library_id: i64, id: i64) -> Result<bool, CoreError> {
        let deleted = self.db.delete_path_mapping(id).await?;
        self.refresh_path_mappings(server_id, library_id).await?;
        Ok(deleted)
    }

    async fn refresh_path_mappings(&self, server_id: i64, library_id: i64) -> Result<(), CoreError> {
        let mappings = self.db.get_path_mappings(server_id, library_id).await?;
        self.path_mapper.set_mappings(server_id, library_id, &mappings);
        Ok(())
    }

    // -- Sync -----------------------------------------------------------

    /// Sync one or more libraries, each against one or more content kinds,
    /// sequentially within a single server connection. Returns a channel of
    /// progress events covering every (library, kind) pass in turn; a
    /// `fatal_error` on one pass aborts only that pass, not the whole call.
    pub async fn sync_content(
        &self,
        server_id: i64,
        library_keys: &[String],
        kinds: &[ContentKind],
        limit: Option<u64>,
        dry_run: bool,
    ) -> Result<mpsc::Receiver<ProgressEvent>, CoreError> {
        let server = self
            .db
            .get_server(server_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("server {server_id} not found")))?;
        let client = Arc::new(self.build_client(&server)?);

        let all_libraries = self.db.list_libraries(Some(server_id)).await?;
        let mut targets = Vec::new();
        for key in library_keys {
            let Some(library) = all_libraries.iter().find(|l| &l.external_key == key) else {
                return Err(CoreError::not_found(format!("library key {key} not found for server {server_id}")));
            };
            self.refresh_path_mappings(server_id, library.id).await?;
            for kind in kinds {
                targets.push((library.clone(), *kind));
            }
        }

        let orchestrator = Orchestrator::new(self.db.clone(), client, self.path_mapper.clone(), self.validator.clone());
        let batch_size = self.batch_size;
        let progress_interval = self.progress_interval;
        let (outer_tx, outer_rx) = mpsc::channel(64);

        tokio::spawn(async move {
            for (library, kind) in targets {
                let options = SyncOptions {
                    server_id,
                    library_id: library.id,
                    library_key: library.external_key.clone(),
                    kind,
                    mode: SyncMode::Incremental,
                    limit,
                    dry_run,
                    batch_size,
                    progress_interval,
                };
                let mut rx = orchestrator.run_streaming(options, CancellationToken::new());
                while let Some(event) = rx.recv().await {
                    let stop = event.stage == ProgressStage::FatalError;
                    if outer_tx.send(event).await.is_err() {
                        return;
                    }
                    if stop {
                        break;
                    }
                }
            }
        });

        Ok(outer_rx)
    }

    /// Blocking variant of [`Facade::sync_content`]: drains the stream and
    /// returns only the final summary stats for the last (library, kind) pass.
    pub async fn sync_content_blocking(
        &self,
        server_id: i64,
        library_keys: &[String],
        kinds: &[ContentKind],
        limit: Option<u64>,
        dry_run: bool,
    ) -> Result<SyncStats, CoreError> {
        let mut rx = self.sync_content(server_id, library_keys, kinds, limit, dry_run).await?;
        let mut last_stats = SyncStats::default();
        while let Some(event) = rx.recv().await {
            if let Some(stats) = event.stats {
                last_stats = stats;
            }
        }
        Ok(last_stats)
    }

    fn build_client(&self, server: &DbServerRow) -> Result<PlexClient, CoreError> {
        PlexClient::new(ClientConfig {
            base_url: server.base_url.clone(),
            token: server.token.clone(),
            request_timeout: self.request_timeout,
        })
        .map_err(|e| CoreError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_content_rejects_unknown_library_key() {
        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            ..Config::default()
        };
        let facade = Facade::new(&config).await.unwrap();
        facade.add_server("Home", "http://10.0.0.2:32400", "token").await.unwrap();

        let result = facade
            .sync_content(1, &["does-not-exist".to_string()], &[ContentKind::Movie], None, true)
            .await;
        assert!(result.is_err());
    }
}
