//! Domain types shared across the mapper, validator, store and orchestrator.
//!
//! These are the in-memory shapes the rest of the crate works with; `db`
//! defines the separate `Db*` row types that `sqlx` binds directly to SQL.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    Movie,
    Show,
}

impl LibraryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryKind::Movie => "movie",
            LibraryKind::Show => "show",
        }
    }
}

impl std::str::FromStr for LibraryKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(LibraryKind::Movie),
            "show" => Ok(LibraryKind::Show),
            other => Err(anyhow::anyhow!("unknown library kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Movie,
    Episode,
    Interstitial,
    Show,
    Season,
    Unknown,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Movie => "movie",
            ContentKind::Episode => "episode",
            ContentKind::Interstitial => "interstitial",
            ContentKind::Show => "show",
            ContentKind::Season => "season",
            ContentKind::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "movie" => Ok(ContentKind::Movie),
            "episode" => Ok(ContentKind::Episode),
            "interstitial" => Ok(ContentKind::Interstitial),
            "show" => Ok(ContentKind::Show),
            "season" => Ok(ContentKind::Season),
            other => Err(anyhow::anyhow!("unknown content kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub base_url: String,
    pub token: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: i64,
    pub server_id: i64,
    pub external_key: String,
    pub title: String,
    pub kind: LibraryKind,
    pub sync_enabled: bool,
    pub last_full_sync_epoch: Option<i64>,
    pub last_incremental_sync_epoch: Option<i64>,
}

/// A content item as produced by the mapper, ready for `Store::upsert_content_item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub external_rating_key: String,
    pub kind: ContentKind,
    pub title: String,
    pub synopsis: Option<String>,
    pub duration_ms: Option<i64>,
    pub rating_system: Option<String>,
    pub rating_code: Option<String>,
    pub is_kids_friendly: bool,
    pub show_title: Option<String>,
    pub season_number: Option<i64>,
    pub episode_number: Option<i64>,
    pub metadata_updated_at: i64,
}

/// A media file as produced by the mapper. `file_path` is still the remote
/// (server-visible) path until the orchestrator runs it through `PathMapper`
/// and the `Validator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub external_rating_key: String,
    pub file_path: String,
    pub size_bytes: Option<i64>,
    pub container: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub bitrate: Option<i64>,
    pub frame_rate: Option<f64>,
    pub channels: Option<i64>,
    pub updated_at_remote: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Editorial {
    pub source_payload_json: String,
    pub original_title: Option<String>,
    pub original_synopsis: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub namespace: String,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuidProvider {
    Tvdb,
    Tmdb,
    Imdb,
    Plex,
}

impl GuidProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuidProvider::Tvdb => "tvdb",
            GuidProvider::Tmdb => "tmdb",
            GuidProvider::Imdb => "imdb",
            GuidProvider::Plex => "plex",
        }
    }

    /// Lower value sorts first in provider preference (TVDB > TMDB > IMDB > native).
    fn preference_rank(&self) -> u8 {
        match self {
            GuidProvider::Tvdb => 0,
            GuidProvider::Tmdb => 1,
            GuidProvider::Imdb => 2,
            GuidProvider::Plex => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guid {
    pub provider: GuidProvider,
    pub external_id: String,
}

/// Merged GUID set for a single item, earliest-wins per provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidSet {
    pub tvdb: Option<String>,
    pub tmdb: Option<String>,
    pub imdb: Option<String>,
    pub plex: Option<String>,
}

impl GuidSet {
    pub fn merge(&mut self, provider: GuidProvider, external_id: String) {
        let slot = match provider {
            GuidProvider::Tvdb => &mut self.tvdb,
            GuidProvider::Tmdb => &mut self.tmdb,
            GuidProvider::Imdb => &mut self.imdb,
            GuidProvider::Plex => &mut self.plex,
        };
        if slot.is_none() {
            *slot = Some(external_id);
        }
    }

    /// Primary GUID by provider preference: TVDB > TMDB > IMDB > native (Plex).
    pub fn primary(&self) -> Option<Guid> {
        [
            (GuidProvider::Tvdb, &self.tvdb),
            (GuidProvider::Tmdb, &self.tmdb),
            (GuidProvider::Imdb, &self.imdb),
            (GuidProvider::Plex, &self.plex),
        ]
        .into_iter()
        .find_map(|(provider, id)| {
            id.clone().map(|external_id| Guid {
                provider,
                external_id,
            })
        })
    }

    pub fn into_guids(self) -> Vec<Guid> {
        let mut out = Vec::new();
        for (provider, id) in [
            (GuidProvider::Tvdb, self.tvdb),
            (GuidProvider::Tmdb, self.tmdb),
            (GuidProvider::Imdb, self.imdb),
            (GuidProvider::Plex, self.plex),
        ] {
            if let Some(external_id) = id {
                out.push(Guid {
                    provider,
                    external_id,
                });
            }
        }
        out.sort_by_key(|g| g.provider.preference_rank());
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Primary,
    Secondary,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Primary => "primary",
            FileRole::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub id: i64,
    pub server_id: i64,
    pub library_id: i64,
    pub plex_path: String,
    pub local_path: String,
}
