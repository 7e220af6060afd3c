//! Every read and write against the catalog (C1).
//!
//! Grounded on the teacher's `db.rs`: a thin `Db` struct wrapping
//! `SqlitePool`, schema applied at `connect()` time, and operations
//! expressed directly as `sqlx::query!`/`query_as!` calls rather than a
//! query builder. Unlike the teacher, every write here is an upsert keyed
//! by the table's uniqueness constraint rather than a blind insert, since
//! re-running a sync must never duplicate rows.
//!
//! Writes made during a sync batch go through `begin_batch()` and the
//! `_tx`-suffixed sibling methods, so the whole batch commits or rolls back
//! as one unit instead of leaving a half-written batch behind.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::CoreError;
use crate::models::{ContentItem, Editorial, GuidProvider, Library, LibraryKind, MediaFile, PathMapping, Tag};

#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

pub struct DbServerRow {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub token: String,
    pub is_default: bool,
}

pub struct DbShowRow {
    pub id: i64,
    pub title: String,
    pub year: Option<i64>,
}

impl Db {
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(url).await?;
        sqlx::query(include_str!("../init.sql")).execute(&pool).await?;
        let db = Self { pool };
        db.stamp_schema_version().await?;
        Ok(db)
    }

    /// Record schema version 1 the first time this database is opened.
    /// A no-op on every subsequent `connect()` against the same file.
    async fn stamp_schema_version(&self) -> Result<(), sqlx::Error> {
        let existing = sqlx::query!(r#"SELECT version as "version!" FROM schema_version LIMIT 1"#)
            .fetch_optional(&self.pool)
            .await?;
        if existing.is_none() {
            let now = time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap();
            sqlx::query!("INSERT INTO schema_version (version, applied_at) VALUES (1, ?)", now)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    // -- System config -----------------------------------------------------

    pub async fn get_config(&self, key: &str) -> Result<Option<String>, CoreError> {
        let row = sqlx::query!(r#"SELECT value as "value!" FROM system_config WHERE key = ?"#, key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.value))
    }

    pub async fn set_config(&self, key: &str, value: &str) -> Result<(), CoreError> {
        sqlx::query!(
            "INSERT INTO system_config (key, value) VALUES (?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            key,
            value
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Servers ---------------------------------------------------------

    pub async fn add_server(&self, name: &str, base_url: &str, token: &str) -> Result<i64, CoreError> {
        if name.trim().is_empty() {
            return Err(CoreError::validation("server name must not be empty"));
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(CoreError::validation("base_url must start with http:// or https://"));
        }
        let now = time::OffsetDateTime::now_utc().format(&time::format_description::well_known::Rfc3339).unwrap();

        let existing = sqlx::query!(r#"SELECT id as "id!" FROM servers WHERE name = ?"#, name)
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = existing {
            sqlx::query!(
                "UPDATE servers SET base_url = ?, token = ?, updated_at = ? WHERE id = ?",
                base_url,
                token,
                now,
                row.id
            )
            .execute(&self.pool)
            .await?;
            return Ok(row.id);
        }

        let inserted = sqlx::query!(
            "INSERT INTO servers (name, base_url, token, is_default, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?) RETURNING id",
            name,
            base_url,
            token,
            now,
            now
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted.id)
    }

    pub async fn set_default_server(&self, server_id: i64) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query!("UPDATE servers SET is_default = 0").execute(&mut *tx).await?;
        let updated = sqlx::query!("UPDATE servers SET is_default = 1 WHERE id = ?", server_id)
            .execute(&mut *tx)
            .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(CoreError::not_found(format!("server {server_id} not found")));
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn get_server(&self, server_id: i64) -> Result<Option<DbServerRow>, CoreError> {
        let row = sqlx::query!(
            r#"SELECT id as "id!", name, base_url, token, is_default as "is_default: bool" FROM servers WHERE id = ?"#,
            server_id
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| DbServerRow {
            id: r.id,
            name: r.name,
            base_url: r.base_url,
            token: r.token,
            is_default: r.is_default,
        }))
    }

    pub async fn list_servers(&self) -> Result<Vec<DbServerRow>, CoreError> {
        let rows = sqlx::query!(
            r#"SELECT id as "id!", name, base_url, token, is_default as "is_default: bool" FROM servers ORDER BY id"#
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| DbServerRow {
                id: r.id,
                name: r.name,
                base_url: r.base_url,
                token: r.token,
                is_default: r.is_default,
            })
            .collect())
    }

    /// Delete a server and everything scoped under it (`ON DELETE CASCADE`
    /// from `servers` downward). Returns `false` if no such server existed.
    pub async fn delete_server(&self, server_id: i64) -> Result<bool, CoreError> {
        let deleted = sqlx::query!("DELETE FROM servers WHERE id = ?", server_id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected() > 0)
    }

    // -- Libraries ---------------------------------------------------------

    pub async fn upsert_library(
        &self,
        server_id: i64,
        external_key: &str,
        title: &str,
        kind: LibraryKind,
    ) -> Result<i64, CoreError> {
        let kind_str = kind.as_str();
        let existing = sqlx::query!(
            r#"SELECT id as "id!" FROM libraries WHERE server_id = ? AND external_key = ?"#,
            server_id,
            external_key
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query!(
                "UPDATE libraries SET title = ?, kind = ? WHERE id = ?",
                title,
                kind_str,
                row.id
            )
            .execute(&self.pool)
            .await?;
            return Ok(row.id);
        }

        let inserted = sqlx::query!(
            "INSERT INTO libraries (server_id, external_key, title, kind, sync_enabled)
             VALUES (?, ?, ?, ?, 1) RETURNING id",
            server_id,
            external_key,
            title,
            kind_str
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted.id)
    }

    pub async fn set_library_sync_enabled(&self, server_id: i64, library_id: i64, enabled: bool) -> Result<u64, CoreError> {
        let enabled_int = enabled as i64;
        let result = sqlx::query!(
            "UPDATE libraries SET sync_enabled = ? WHERE id = ? AND server_id = ?",
            enabled_int,
            library_id,
            server_id
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn set_library_last_full(&self, library_id: i64, epoch: i64) -> Result<(), CoreError> {
        sqlx::query!("UPDATE libraries SET last_full_sync_epoch = ? WHERE id = ?", epoch, library_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_library_last_incremental(&self, library_id: i64, epoch: i64) -> Result<(), CoreError> {
        sqlx::query!(
            "UPDATE libraries SET last_incremental_sync_epoch = ? WHERE id = ?",
            epoch,
            library_id
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_libraries(&self, server_id: Option<i64>) -> Result<Vec<Library>, CoreError> {
        let rows = match server_id {
            Some(sid) => {
                sqlx::query!(
                    r#"SELECT id as "id!", server_id as "server_id!", external_key, title, kind,
                       sync_enabled as "sync_enabled: bool", last_full_sync_epoch, last_incremental_sync_epoch
                       FROM libraries WHERE server_id = ? ORDER BY id"#,
                    sid
                )
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query!(
                    r#"SELECT id as "id!", server_id as "server_id!", external_key, title, kind,
                       sync_enabled as "sync_enabled: bool", last_full_sync_epoch, last_incremental_sync_epoch
                       FROM libraries ORDER BY id"#
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter()
            .map(|r| {
                Ok(Library {
                    id: r.id,
                    server_id: r.server_id,
                    external_key: r.external_key,
                    title: r.title,
                    kind: r.kind.parse().map_err(|_| CoreError::validation(format!("bad library kind: {}", r.kind)))?,
                    sync_enabled: r.sync_enabled,
                    last_full_sync_epoch: r.last_full_sync_epoch,
                    last_incremental_sync_epoch: r.last_incremental_sync_epoch,
                })
            })
            .collect()
    }

    // -- Shows / seasons ---------------------------------------------------

    pub async fn get_or_create_show(
        &self,
        server_id: i64,
        library_id: i64,
        external_rating_key: &str,
        title: &str,
        year: Option<i64>,
    ) -> Result<i64, CoreError> {
        let existing = sqlx::query!(
            r#"SELECT id as "id!" FROM shows WHERE server_id = ? AND library_id = ? AND external_rating_key = ?"#,
            server_id,
            library_id,
            external_rating_key
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query!("UPDATE shows SET title = ?, year = ? WHERE id = ?", title, year, row.id)
                .execute(&self.pool)
                .await?;
            return Ok(row.id);
        }

        let inserted = sqlx::query!(
            "INSERT INTO shows (server_id, library_id, external_rating_key, title, year)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
            server_id,
            library_id,
            external_rating_key,
            title,
            year
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted.id)
    }

    pub async fn get_or_create_season(
        &self,
        show_id: i64,
        season_number: i64,
        external_rating_key: Option<&str>,
        title: Option<&str>,
    ) -> Result<i64, CoreError> {
        let existing = sqlx::query!(
            r#"SELECT id as "id!" FROM seasons WHERE show_id = ? AND season_number = ?"#,
            show_id,
            season_number
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query!(
                "UPDATE seasons SET external_rating_key = COALESCE(?, external_rating_key), title = COALESCE(?, title) WHERE id = ?",
                external_rating_key,
                title,
                row.id
            )
            .execute(&self.pool)
            .await?;
            return Ok(row.id);
        }

        let inserted = sqlx::query!(
            "INSERT INTO seasons (show_id, season_number, external_rating_key, title)
             VALUES (?, ?, ?, ?) RETURNING id",
            show_id,
            season_number,
            external_rating_key,
            title
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted.id)
    }

    // -- Content items ------------------------------------------------------

    /// Upsert a mapped content item. Returns `(id, was_inserted)` so callers
    /// can distinguish new rows from refreshed ones for sync stats.
    pub async fn upsert_content_item(
        &self,
        server_id: i64,
        library_id: i64,
        item: &ContentItem,
        show_id: Option<i64>,
        season_id: Option<i64>,
    ) -> Result<(i64, bool), CoreError> {
        let kind_str = item.kind.as_str();
        let existing = sqlx::query!(
            r#"SELECT id as "id!", metadata_updated_at as "metadata_updated_at!" FROM content_items
               WHERE server_id = ? AND library_id = ? AND external_rating_key = ?"#,
            server_id,
            library_id,
            item.external_rating_key
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            if item.metadata_updated_at > row.metadata_updated_at {
                sqlx::query!(
                    "UPDATE content_items SET kind = ?, title = ?, synopsis = ?, duration_ms = ?,
                        rating_system = ?, rating_code = ?, is_kids_friendly = ?, show_id = ?, season_id = ?,
                        season_number = ?, episode_number = ?, metadata_updated_at = ?
                     WHERE id = ?",
                    kind_str,
                    item.title,
                    item.synopsis,
                    item.duration_ms,
                    item.rating_system,
                    item.rating_code,
                    item.is_kids_friendly,
                    show_id,
                    season_id,
                    item.season_number,
                    item.episode_number,
                    item.metadata_updated_at,
                    row.id
                )
                .execute(&self.pool)
                .await?;
            }
            return Ok((row.id, false));
        }

        let inserted = sqlx::query!(
            "INSERT INTO content_items
                (server_id, library_id, external_rating_key, kind, title, synopsis, duration_ms,
                 rating_system, rating_code, is_kids_friendly, show_id, season_id, season_number,
                 episode_number, metadata_updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            server_id,
            library_id,
            item.external_rating_key,
            kind_str,
            item.title,
            item.synopsis,
            item.duration_ms,
            item.rating_system,
            item.rating_code,
            item.is_kids_friendly,
            show_id,
            season_id,
            item.season_number,
            item.episode_number,
            item.metadata_updated_at
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((inserted.id, true))
    }

    /// Upsert a resolved media file. Returns `(id, was_inserted)`, the same
    /// shape as [`Db::upsert_content_item`], so callers can tell a fresh
    /// file from one that was merely re-seen.
    pub async fn upsert_media_file(
        &self,
        server_id: i64,
        library_id: i64,
        content_item_id: i64,
        file: &MediaFile,
        now_epoch: i64,
    ) -> Result<(i64, bool), CoreError> {
        let existing = sqlx::query!(
            r#"SELECT id as "id!" FROM media_files WHERE server_id = ? AND file_path = ?"#,
            server_id,
            file.file_path
        )
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            sqlx::query!(
                "UPDATE media_files SET content_item_id = ?, external_rating_key = ?, size_bytes = ?,
                    container = ?, video_codec = ?, audio_codec = ?, width = ?, height = ?, bitrate = ?,
                    frame_rate = ?, channels = ?, updated_at_remote = ?, last_seen_at = ?
                 WHERE id = ?",
                content_item_id,
                file.external_rating_key,
                file.size_bytes,
                file.container,
                file.video_codec,
                file.audio_codec,
                file.width,
                file.height,
                file.bitrate,
                file.frame_rate,
                file.channels,
                file.updated_at_remote,
                now_epoch,
                row.id
            )
            .execute(&self.pool)
            .await?;
            return Ok((row.id, false));
        }

        let inserted = sqlx::query!(
            "INSERT INTO media_files
                (server_id, library_id, content_item_id, external_rating_key, file_path, size_bytes,
                 container, video_codec, audio_codec, width, height, bitrate, frame_rate, channels,
                 updated_at_remote, first_seen_at, last_seen_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            server_id,
            library_id,
            content_item_id,
            file.external_rating_key,
            file.file_path,
            file.size_bytes,
            file.container,
            file.video_codec,
            file.audio_codec,
            file.width,
            file.height,
            file.bitrate,
            file.frame_rate,
            file.channels,
            file.updated_at_remote,
            now_epoch,
            now_epoch
        )
        .fetch_one(&self.pool)
        .await?;
        Ok((inserted.id, true))
    }

    pub async fn link_content_item_file(&self, content_item_id: i64, media_file_id: i64, role: &str) -> Result<(), CoreError> {
        sqlx::query!(
            "INSERT OR IGNORE INTO content_item_files (content_item_id, media_file_id, role) VALUES (?, ?, ?)",
            content_item_id,
            media_file_id,
            role
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_editorial(&self, content_item_id: i64, editorial: &Editorial) -> Result<(), CoreError> {
        sqlx::query!(
            "INSERT INTO content_editorial (content_item_id, original_title, original_synopsis, source_payload_json)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(content_item_id) DO UPDATE SET
                original_title = excluded.original_title,
                original_synopsis = excluded.original_synopsis,
                source_payload_json = excluded.source_payload_json",
            content_item_id,
            editorial.original_title,
            editorial.original_synopsis,
            editorial.source_payload_json
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_tag(&self, content_item_id: i64, tag: &Tag) -> Result<(), CoreError> {
        sqlx::query!(
            "INSERT INTO content_tags (content_item_id, namespace, key, value) VALUES (?, ?, ?, ?)
             ON CONFLICT(content_item_id, namespace, key) DO UPDATE SET value = excluded.value",
            content_item_id,
            tag.namespace,
            tag.key,
            tag.value
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_guid(
        &self,
        show_id: Option<i64>,
        content_item_id: Option<i64>,
        provider: GuidProvider,
        external_id: &str,
    ) -> Result<(), CoreError> {
        let provider_str = provider.as_str();
        sqlx::query!(
            "INSERT INTO guids (show_id, content_item_id, provider, external_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(provider, external_id) DO UPDATE SET
                show_id = COALESCE(excluded.show_id, guids.show_id),
                content_item_id = COALESCE(excluded.content_item_id, guids.content_item_id)",
            show_id,
            content_item_id,
            provider_str,
            external_id
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // -- Batch transactions --------------------------------------------------
    //
    // A sync batch writes through one transaction: every item in the batch
    // commits together, or the whole batch rolls back and is counted as
    // errors by the caller. These mirror the pool-backed methods above
    // exactly, but take the open transaction as the executor instead of the
    // pool so a failed item can undo everything else written in its batch.

    /// Open a transaction scoped to one sync batch.
    pub async fn begin_batch(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>, CoreError> {
        Ok(self.pool.begin().await?)
    }

    pub async fn get_or_create_show_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        server_id: i64,
        library_id: i64,
        external_rating_key: &str,
        title: &str,
        year: Option<i64>,
    ) -> Result<i64, CoreError> {
        let existing = sqlx::query!(
            r#"SELECT id as "id!" FROM shows WHERE server_id = ? AND library_id = ? AND external_rating_key = ?"#,
            server_id,
            library_id,
            external_rating_key
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            sqlx::query!("UPDATE shows SET title = ?, year = ? WHERE id = ?", title, year, row.id)
                .execute(&mut *tx)
                .await?;
            return Ok(row.id);
        }

        let inserted = sqlx::query!(
            "INSERT INTO shows (server_id, library_id, external_rating_key, title, year)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
            server_id,
            library_id,
            external_rating_key,
            title,
            year
        )
        .fetch_one(&mut *tx)
        .await?;
        Ok(inserted.id)
    }

    pub async fn get_or_create_season_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        show_id: i64,
        season_number: i64,
        external_rating_key: Option<&str>,
        title: Option<&str>,
    ) -> Result<i64, CoreError> {
        let existing = sqlx::query!(
            r#"SELECT id as "id!" FROM seasons WHERE show_id = ? AND season_number = ?"#,
            show_id,
            season_number
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            sqlx::query!(
                "UPDATE seasons SET external_rating_key = COALESCE(?, external_rating_key), title = COALESCE(?, title) WHERE id = ?",
                external_rating_key,
                title,
                row.id
            )
            .execute(&mut *tx)
            .await?;
            return Ok(row.id);
        }

        let inserted = sqlx::query!(
            "INSERT INTO seasons (show_id, season_number, external_rating_key, title)
             VALUES (?, ?, ?, ?) RETURNING id",
            show_id,
            season_number,
            external_rating_key,
            title
        )
        .fetch_one(&mut *tx)
        .await?;
        Ok(inserted.id)
    }

    pub async fn upsert_content_item_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        server_id: i64,
        library_id: i64,
        item: &ContentItem,
        show_id: Option<i64>,
        season_id: Option<i64>,
    ) -> Result<(i64, bool), CoreError> {
        let kind_str = item.kind.as_str();
        let existing = sqlx::query!(
            r#"SELECT id as "id!", metadata_updated_at as "metadata_updated_at!" FROM content_items
               WHERE server_id = ? AND library_id = ? AND external_rating_key = ?"#,
            server_id,
            library_id,
            item.external_rating_key
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            if item.metadata_updated_at > row.metadata_updated_at {
                sqlx::query!(
                    "UPDATE content_items SET kind = ?, title = ?, synopsis = ?, duration_ms = ?,
                        rating_system = ?, rating_code = ?, is_kids_friendly = ?, show_id = ?, season_id = ?,
                        season_number = ?, episode_number = ?, metadata_updated_at = ?
                     WHERE id = ?",
                    kind_str,
                    item.title,
                    item.synopsis,
                    item.duration_ms,
                    item.rating_system,
                    item.rating_code,
                    item.is_kids_friendly,
                    show_id,
                    season_id,
                    item.season_number,
                    item.episode_number,
                    item.metadata_updated_at,
                    row.id
                )
                .execute(&mut *tx)
                .await?;
            }
            return Ok((row.id, false));
        }

        let inserted = sqlx::query!(
            "INSERT INTO content_items
                (server_id, library_id, external_rating_key, kind, title, synopsis, duration_ms,
                 rating_system, rating_code, is_kids_friendly, show_id, season_id, season_number,
                 episode_number, metadata_updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            server_id,
            library_id,
            item.external_rating_key,
            kind_str,
            item.title,
            item.synopsis,
            item.duration_ms,
            item.rating_system,
            item.rating_code,
            item.is_kids_friendly,
            show_id,
            season_id,
            item.season_number,
            item.episode_number,
            item.metadata_updated_at
        )
        .fetch_one(&mut *tx)
        .await?;
        Ok((inserted.id, true))
    }

    pub async fn upsert_media_file_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        server_id: i64,
        library_id: i64,
        content_item_id: i64,
        file: &MediaFile,
        now_epoch: i64,
    ) -> Result<(i64, bool), CoreError> {
        let existing = sqlx::query!(
            r#"SELECT id as "id!" FROM media_files WHERE server_id = ? AND file_path = ?"#,
            server_id,
            file.file_path
        )
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            sqlx::query!(
                "UPDATE media_files SET content_item_id = ?, external_rating_key = ?, size_bytes = ?,
                    container = ?, video_codec = ?, audio_codec = ?, width = ?, height = ?, bitrate = ?,
                    frame_rate = ?, channels = ?, updated_at_remote = ?, last_seen_at = ?
                 WHERE id = ?",
                content_item_id,
                file.external_rating_key,
                file.size_bytes,
                file.container,
                file.video_codec,
                file.audio_codec,
                file.width,
                file.height,
                file.bitrate,
                file.frame_rate,
                file.channels,
                file.updated_at_remote,
                now_epoch,
                row.id
            )
            .execute(&mut *tx)
            .await?;
            return Ok((row.id, false));
        }

        let inserted = sqlx::query!(
            "INSERT INTO media_files
                (server_id, library_id, content_item_id, external_rating_key, file_path, size_bytes,
                 container, video_codec, audio_codec, width, height, bitrate, frame_rate, channels,
                 updated_at_remote, first_seen_at, last_seen_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
            server_id,
            library_id,
            content_item_id,
            file.external_rating_key,
            file.file_path,
            file.size_bytes,
            file.container,
            file.video_codec,
            file.audio_codec,
            file.width,
            file.height,
            file.bitrate,
            file.frame_rate,
            file.channels,
            file.updated_at_remote,
            now_epoch,
            now_epoch
        )
        .fetch_one(&mut *tx)
        .await?;
        Ok((inserted.id, true))
    }

    pub async fn link_content_item_file_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        content_item_id: i64,
        media_file_id: i64,
        role: &str,
    ) -> Result<(), CoreError> {
        sqlx::query!(
            "INSERT OR IGNORE INTO content_item_files (content_item_id, media_file_id, role) VALUES (?, ?, ?)",
            content_item_id,
            media_file_id,
            role
        )
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    pub async fn upsert_editorial_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        content_item_id: i64,
        editorial: &Editorial,
    ) -> Result<(), CoreError> {
        sqlx::query!(
            "INSERT INTO content_editorial (content_item_id, original_title, original_synopsis, source_payload_json)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(content_item_id) DO UPDATE SET
                original_title = excluded.original_title,
                original_synopsis = excluded.original_synopsis,
                source_payload_json = excluded.source_payload_json",
            content_item_id,
            editorial.original_title,
            editorial.original_synopsis,
            editorial.source_payload_json
        )
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    pub async fn upsert_tag_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        content_item_id: i64,
        tag: &Tag,
    ) -> Result<(), CoreError> {
        sqlx::query!(
            "INSERT INTO content_tags (content_item_id, namespace, key, value) VALUES (?, ?, ?, ?)
             ON CONFLICT(content_item_id, namespace, key) DO UPDATE SET value = excluded.value",
            content_item_id,
            tag.namespace,
            tag.key,
            tag.value
        )
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    pub async fn upsert_guid_tx(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        show_id: Option<i64>,
        content_item_id: Option<i64>,
        provider: GuidProvider,
        external_id: &str,
    ) -> Result<(), CoreError> {
        let provider_str = provider.as_str();
        sqlx::query!(
            "INSERT INTO guids (show_id, content_item_id, provider, external_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(provider, external_id) DO UPDATE SET
                show_id = COALESCE(excluded.show_id, guids.show_id),
                content_item_id = COALESCE(excluded.content_item_id, guids.content_item_id)",
            show_id,
            content_item_id,
            provider_str,
            external_id
        )
        .execute(&mut *tx)
        .await?;
        Ok(())
    }

    // -- Path mappings -------------------------------------------------------

    pub async fn get_path_mappings(&self, server_id: i64, library_id: i64) -> Result<Vec<PathMapping>, CoreError> {
        let rows = sqlx::query!(
            r#"SELECT id as "id!", server_id as "server_id!", library_id as "library_id!", plex_path, local_path
               FROM path_mappings WHERE server_id = ? AND library_id = ?"#,
            server_id,
            library_id
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| PathMapping {
                id: r.id,
                server_id: r.server_id,
                library_id: r.library_id,
                plex_path: r.plex_path,
                local_path: r.local_path,
            })
            .collect())
    }

    pub async fn insert_path_mapping(
        &self,
        server_id: i64,
        library_id: i64,
        plex_path: &str,
        local_path: &str,
    ) -> Result<i64, CoreError> {
        let inserted = sqlx::query!(
            "INSERT INTO path_mappings (server_id, library_id, plex_path, local_path) VALUES (?, ?, ?, ?) RETURNING id",
            server_id,
            library_id,
            plex_path,
            local_path
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted.id)
    }

    pub async fn delete_path_mapping(&self, id: i64) -> Result<bool, CoreError> {
        let result = sqlx::query!("DELETE FROM path_mappings WHERE id = ?", id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;

    async fn test_db() -> Db {
        Db::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn add_server_is_idempotent_on_name() {
        let db = test_db().await;
        let id1 = db.add_server("plex-main", "http://localhost:32400", "tok").await.unwrap();
        let id2 = db.add_server("plex-main", "http://localhost:32401", "tok2").await.unwrap();
        assert_eq!(id1, id2);
        let server = db.get_server(id1).await.unwrap().unwrap();
        assert_eq!(server.base_url, "http://localhost:32401");
    }

    #[tokio::test]
    async fn add_server_rejects_bad_url() {
        let db = test_db().await;
        let result = db.add_server("bad", "ftp://x", "tok").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn set_default_server_clears_others() {
        let db = test_db().await;
        let a = db.add_server("a", "http://a", "t").await.unwrap();
        let b = db.add_server("b", "http://b", "t").await.unwrap();
        db.set_default_server(a).await.unwrap();
        db.set_default_server(b).await.unwrap();
        let server_a = db.get_server(a).await.unwrap().unwrap();
        let server_b = db.get_server(b).await.unwrap().unwrap();
        assert!(!server_a.is_default);
        assert!(server_b.is_default);
    }

    #[tokio::test]
    async fn upsert_library_preserves_sync_enabled() {
        let db = test_db().await;
        let server_id = db.add_server("s", "http://s", "t").await.unwrap();
        let lib_id = db.upsert_library(server_id, "1", "Movies", LibraryKind::Movie).await.unwrap();
        db.set_library_sync_enabled(server_id, lib_id, false).await.unwrap();
        let lib_id_again = db.upsert_library(server_id, "1", "Movies Renamed", LibraryKind::Movie).await.unwrap();
        assert_eq!(lib_id, lib_id_again);
        let libraries = db.list_libraries(Some(server_id)).await.unwrap();
        assert_eq!(libraries[0].title, "Movies Renamed");
        assert!(!libraries[0].sync_enabled);
    }

    #[tokio::test]
    async fn upsert_content_item_inserts_then_updates() {
        let db = test_db().await;
        let server_id = db.add_server("s", "http://s", "t").await.unwrap();
        let lib_id = db.upsert_library(server_id, "1", "Movies", LibraryKind::Movie).await.unwrap();
        let item = ContentItem {
            external_rating_key: "100".to_string(),
            kind: ContentKind::Movie,
            title: "Heat".to_string(),
            synopsis: None,
            duration_ms: Some(10_000),
            rating_system: None,
            rating_code: None,
            is_kids_friendly: false,
            show_title: None,
            season_number: None,
            episode_number: None,
            metadata_updated_at: 100,
        };
        let (id1, inserted1) = db.upsert_content_item(server_id, lib_id, &item, None, None).await.unwrap();
        assert!(inserted1);

        let mut updated_item = item.clone();
        updated_item.title = "Heat (Remastered)".to_string();
        updated_item.metadata_updated_at = 200;
        let (id2, inserted2) = db.upsert_content_item(server_id, lib_id, &updated_item, None, None).await.unwrap();
        assert_eq!(id1, id2);
        assert!(!inserted2);
    }

    #[tokio::test]
    async fn schema_version_is_stamped_on_first_connect() {
        let db = test_db().await;
        let row = sqlx::query!(r#"SELECT version as "version!" FROM schema_version"#)
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.version, 1);
    }

    #[tokio::test]
    async fn config_roundtrip() {
        let db = test_db().await;
        assert_eq!(db.get_config("ffprobe_path").await.unwrap(), None);
        db.set_config("ffprobe_path", "/usr/bin/ffprobe").await.unwrap();
        assert_eq!(db.get_config("ffprobe_path").await.unwrap(), Some("/usr/bin/ffprobe".to_string()));
        db.set_config("ffprobe_path", "/opt/ffprobe").await.unwrap();
        assert_eq!(db.get_config("ffprobe_path").await.unwrap(), Some("/opt/ffprobe".to_string()));
    }

    #[tokio::test]
    async fn batch_rollback_discards_uncommitted_writes() {
        let db = test_db().await;
        let server_id = db.add_server("s", "http://s", "t").await.unwrap();
        let lib_id = db.upsert_library(server_id, "1", "Movies", LibraryKind::Movie).await.unwrap();
        let item = ContentItem {
            external_rating_key: "100".to_string(),
            kind: ContentKind::Movie,
            title: "Heat".to_string(),
            synopsis: None,
            duration_ms: Some(10_000),
            rating_system: None,
            rating_code: None,
            is_kids_friendly: false,
            show_title: None,
            season_number: None,
            episode_number: None,
            metadata_updated_at: 100,
        };

        let mut tx = db.begin_batch().await.unwrap();
        let (id, inserted) = db.upsert_content_item_tx(&mut tx, server_id, lib_id, &item, None, None).await.unwrap();
        assert!(inserted);
        tx.rollback().await.unwrap();

        let row = sqlx::query!(r#"SELECT id as "id!" FROM content_items WHERE id = ?"#, id)
            .fetch_optional(&db.pool)
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn batch_commit_persists_writes() {
        let db = test_db().await;
        let server_id = db.add_server("s", "http://s", "t").await.unwrap();
        let lib_id = db.upsert_library(server_id, "1", "Movies", LibraryKind::Movie).await.unwrap();
        let item = ContentItem {
            external_rating_key: "200".to_string(),
            kind: ContentKind::Movie,
            title: "Collateral".to_string(),
            synopsis: None,
            duration_ms: Some(11_000),
            rating_system: None,
            rating_code: None,
            is_kids_friendly: false,
            show_title: None,
            season_number: None,
            episode_number: None,
            metadata_updated_at: 100,
        };

        let mut tx = db.begin_batch().await.unwrap();
        let (id, inserted) = db.upsert_content_item_tx(&mut tx, server_id, lib_id, &item, None, None).await.unwrap();
        assert!(inserted);
        tx.commit().await.unwrap();

        let row = sqlx::query!(r#"SELECT id as "id!" FROM content_items WHERE id = ?"#, id)
            .fetch_optional(&db.pool)
            .await
            .unwrap();
        assert!(row.is_some());
    }

    #[tokio::test]
    async fn path_mapping_crud_roundtrip() {
        let db = test_db().await;
        let server_id = db.add_server("s", "http://s", "t").await.unwrap();
        let lib_id = db.upsert_library(server_id, "1", "Movies", LibraryKind::Movie).await.unwrap();
        let id = db.insert_path_mapping(server_id, lib_id, "/media", "/mnt/media").await.unwrap();
        let mappings = db.get_path_mappings(server_id, lib_id).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert!(db.delete_path_mapping(id).await.unwrap());
        let mappings = db.get_path_mappings(server_id, lib_id).await.unwrap();
        assert!(mappings.is_empty());
    }
}
