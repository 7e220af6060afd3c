//! Pure JSON -> domain mapping (C4). No I/O.
//!
//! Grounded 1:1 on `original_source/src/retrovue/plex/mapper.py` for field
//! extraction and on [`guid`] (itself grounded on `guid.py`) for identifiers
//! and ratings.

pub mod guid;

use serde_json::Value;

use crate::models::{ContentItem, ContentKind, Editorial, GuidSet, MediaFile, Tag};

pub struct MappedItem {
    pub content_item: ContentItem,
    pub media_files: Vec<MediaFile>,
    pub editorial: Editorial,
    pub tags: Vec<Tag>,
    pub guids: GuidSet,
}

fn parse_epoch(item: &Value, field: &str) -> Option<i64> {
    item.get(field).and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

/// Remote `updatedAt`, falling back to `addedAt`. `None` when neither parses.
fn resolve_timestamp(item: &Value) -> Option<i64> {
    parse_epoch(item, "updatedAt").or_else(|| parse_epoch(item, "addedAt"))
}

fn infer_kind(item: &Value) -> ContentKind {
    if let Some(explicit) = item.get("type").and_then(Value::as_str) {
        match explicit.to_lowercase().as_str() {
            "movie" => return ContentKind::Movie,
            "episode" => return ContentKind::Episode,
            "show" => return ContentKind::Show,
            "season" => return ContentKind::Season,
            "interstitial" => return ContentKind::Interstitial,
            _ => {}
        }
    }

    let has_parent_index = item.get("parentRatingKey").is_some() && item.get("index").is_some();
    if has_parent_index {
        return ContentKind::Episode;
    }

    ContentKind::Movie
}

fn map_content_item(item: &Value, kind: ContentKind) -> ContentItem {
    let content_rating = item.get("contentRating").and_then(Value::as_str).unwrap_or("");
    let is_kids_friendly = guid::infer_kids_friendly(content_rating);
    let (rating_system, rating_code) = if content_rating.is_empty() {
        (None, None)
    } else {
        let (system, code) = guid::normalize_rating(content_rating);
        (Some(system), Some(code))
    };

    let (season_number, episode_number, show_title) = if kind == ContentKind::Episode {
        (
            item.get("parentIndex").and_then(Value::as_i64),
            item.get("index").and_then(Value::as_i64),
            item.get("grandparentTitle").and_then(Value::as_str).map(str::to_string),
        )
    } else {
        (None, None, None)
    };

    ContentItem {
        external_rating_key: item.get("ratingKey").and_then(Value::as_str).unwrap_or("").to_string(),
        kind,
        title: item.get("title").and_then(Value::as_str).unwrap_or("Unknown").to_string(),
        synopsis: item.get("summary").and_then(Value::as_str).map(str::to_string),
        duration_ms: item.get("duration").and_then(Value::as_i64),
        rating_system,
        rating_code,
        is_kids_friendly,
        show_title,
        season_number,
        episode_number,
        metadata_updated_at: resolve_timestamp(item).unwrap_or(0),
    }
}

fn map_media_files(item: &Value) -> Vec<MediaFile> {
    let rating_key = item.get("ratingKey").and_then(Value::as_str).unwrap_or("").to_string();
    let updated_at_remote = resolve_timestamp(item);

    let Some(media_list) = item.get("Media").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut files = Vec::new();
    for media in media_list {
        let Some(parts) = media.get("Part").and_then(Value::as_array) else {
            continue;
        };
        for part in parts {
            let Some(file_path) = part.get("file").and_then(Value::as_str) else {
                continue;
            };
            if file_path.is_empty() {
                continue;
            }

            files.push(MediaFile {
                external_rating_key: rating_key.clone(),
                file_path: file_path.to_string(),
                size_bytes: part.get("size").and_then(Value::as_i64),
                container: part.get("container").and_then(Value::as_str).map(str::to_string),
                video_codec: media.get("videoCodec").and_then(Value::as_str).map(str::to_string),
                audio_codec: media.get("audioCodec").and_then(Value::as_str).map(str::to_string),
                width: media.get("width").and_then(Value::as_i64),
                height: media.get("height").and_then(Value::as_i64),
                bitrate: media.get("bitrate").and_then(Value::as_i64),
                frame_rate: media.get("videoFrameRate").and_then(Value::as_f64),
                channels: media.get("audioChannels").and_then(Value::as_i64),
                updated_at_remote,
            });
        }
    }
    files
}

fn map_editorial(item: &Value) -> Editorial {
    Editorial {
        source_payload_json: item.to_string(),
        original_title: item.get("title").and_then(Value::as_str).map(str::to_string),
        original_synopsis: item.get("summary").and_then(Value::as_str).map(str::to_string),
    }
}

fn map_tags(item: &Value) -> Vec<Tag> {
    let mut tags = Vec::new();
    let content_rating = item.get("contentRating").and_then(Value::as_str).unwrap_or("");

    if !content_rating.is_empty() {
        let (rating_system, rating_code) = guid::normalize_rating(content_rating);
        tags.push(Tag {
            namespace: "rating".to_string(),
            key: "system".to_string(),
            value: rating_system,
        });
        tags.push(Tag {
            namespace: "rating".to_string(),
            key: "code".to_string(),
            value: rating_code,
        });
    }

    if guid::infer_kids_friendly(content_rating) {
        tags.push(Tag {
            namespace: "audience".to_string(),
            key: "kids".to_string(),
            value: "1".to_string(),
        });
    }

    for (field, namespace) in [("Genre", "genre"), ("Studio", "studio")] {
        if let Some(entries) = item.get(field).and_then(Value::as_array) {
            for entry in entries {
                if let Some(tag_value) = entry.get("tag").and_then(Value::as_str) {
                    tags.push(Tag {
                        namespace: namespace.to_string(),
                        key: "primary".to_string(),
                        value: tag_value.to_string(),
                    });
                }
            }
        }
    }

    tags
}

/// Map one remote item payload to its full domain representation.
pub fn map_item(item: &Value) -> MappedItem {
    let kind = infer_kind(item);
    MappedItem {
        content_item: map_content_item(item, kind),
        media_files: map_media_files(item),
        editorial: map_editorial(item),
        tags: map_tags(item),
        guids: guid::parse_item_guids(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_movie_by_default() {
        let item = json!({"title": "Heat", "ratingKey": "1"});
        let mapped = map_item(&item);
        assert_eq!(mapped.content_item.kind, ContentKind::Movie);
    }

    #[test]
    fn infers_episode_from_parent_fields() {
        let item = json!({
            "title": "Pilot",
            "ratingKey": "2",
            "parentRatingKey": "10",
            "index": 1,
            "parentIndex": 1,
            "grandparentTitle": "Breaking Bad"
        });
        let mapped = map_item(&item);
        assert_eq!(mapped.content_item.kind, ContentKind::Episode);
        assert_eq!(mapped.content_item.season_number, Some(1));
        assert_eq!(mapped.content_item.episode_number, Some(1));
        assert_eq!(mapped.content_item.show_title.as_deref(), Some("Breaking Bad"));
    }

    #[test]
    fn honors_explicit_type_field() {
        let item = json!({"title": "S1", "type": "show", "ratingKey": "3"});
        let mapped = map_item(&item);
        assert_eq!(mapped.content_item.kind, ContentKind::Show);
    }

    #[test]
    fn drops_parts_with_missing_file_path() {
        let item = json!({
            "ratingKey": "4",
            "Media": [
                {
                    "videoCodec": "h264",
                    "Part": [{"size": 100}, {"file": "/media/movie.mkv", "size": 200}]
                }
            ]
        });
        let mapped = map_item(&item);
        assert_eq!(mapped.media_files.len(), 1);
        assert_eq!(mapped.media_files[0].file_path, "/media/movie.mkv");
    }

    #[test]
    fn missing_timestamps_fall_back_to_zero() {
        let item = json!({"ratingKey": "5"});
        let mapped = map_item(&item);
        assert_eq!(mapped.content_item.metadata_updated_at, 0);
    }

    #[test]
    fn updated_at_falls_back_to_added_at() {
        let item = json!({"ratingKey": "6", "addedAt": 1000});
        let mapped = map_item(&item);
        assert_eq!(mapped.content_item.metadata_updated_at, 1000);
    }

    #[test]
    fn editorial_captures_compact_payload_and_originals() {
        let item = json!({"title": "Heat", "summary": "A thief.", "ratingKey": "7"});
        let mapped = map_item(&item);
        assert_eq!(mapped.editorial.original_title.as_deref(), Some("Heat"));
        assert_eq!(mapped.editorial.original_synopsis.as_deref(), Some("A thief."));
    }
}
