//! GUID string parsing and content-rating normalization.
//!
//! Grounded 1:1 on `original_source/src/retrovue/plex/guid.py`: same four
//! provider patterns, same merge-earliest-wins semantics, same rating
//! tables.

use serde_json::Value;

use crate::models::{GuidProvider, GuidSet};

/// Parse a single GUID string like `imdb://tt1234567` or `plex://show/abc123`.
fn parse_one(guid: &str) -> Option<(GuidProvider, String)> {
    if let Some(rest) = guid.strip_prefix("imdb://") {
        let digits: String = rest.strip_prefix("tt").unwrap_or(rest).chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return Some((GuidProvider::Imdb, digits));
        }
    }
    if let Some(rest) = guid.strip_prefix("tmdb://") {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return Some((GuidProvider::Tmdb, digits));
        }
    }
    if let Some(rest) = guid.strip_prefix("tvdb://") {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            return Some((GuidProvider::Tvdb, digits));
        }
    }
    if let Some(rest) = guid.strip_prefix("plex://") {
        let id = rest.split('/').next_back().unwrap_or(rest);
        if !id.is_empty() {
            return Some((GuidProvider::Plex, id.to_string()));
        }
    }
    None
}

fn merge_all<'a>(set: &mut GuidSet, guids: impl Iterator<Item = &'a str>) {
    for guid in guids {
        if let Some((provider, id)) = parse_one(guid) {
            set.merge(provider, id);
        }
    }
}

/// Extract and merge every GUID found on a remote item JSON payload. Checks
/// `guid`, `Guid`, `guids`, `Guids` in that order, falling back to the
/// item's own `ratingKey` as a native Plex identifier.
pub fn parse_item_guids(item: &Value) -> GuidSet {
    let mut set = GuidSet::default();

    for field in ["guid", "Guid", "guids", "Guids"] {
        let Some(value) = item.get(field) else { continue };
        match value {
            Value::String(s) => {
                merge_all(&mut set, std::iter::once(s.as_str()));
                return set;
            }
            Value::Array(items) => {
                let strings: Vec<&str> = items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.as_str()),
                        Value::Object(_) => v.get("id").and_then(Value::as_str),
                        _ => None,
                    })
                    .collect();
                merge_all(&mut set, strings.into_iter());
                return set;
            }
            _ => continue,
        }
    }

    if let Some(rating_key) = item.get("ratingKey").and_then(Value::as_str) {
        set.merge(GuidProvider::Plex, rating_key.to_string());
    }
    set
}

/// Normalize a content rating string into `(rating_system, rating_code)`.
pub fn normalize_rating(content_rating: &str) -> (String, String) {
    if content_rating.trim().is_empty() {
        return ("unknown".to_string(), "unknown".to_string());
    }
    let upper = content_rating.trim().to_uppercase();

    if let Some(code) = upper.strip_prefix("TV-") {
        return ("TV".to_string(), format!("TV-{code}"));
    }

    const MPAA: [&str; 6] = ["G", "PG", "PG-13", "R", "NC-17", "NR"];
    if MPAA.contains(&upper.as_str()) {
        return ("MPAA".to_string(), upper);
    }

    if upper == "UNRATED" || upper == "NOT RATED" {
        return ("MPAA".to_string(), "NR".to_string());
    }

    ("unknown".to_string(), upper)
}

/// Kids-friendly iff the rating is one of the well-known juvenile ratings.
pub fn infer_kids_friendly(content_rating: &str) -> bool {
    const KIDS: [&str; 4] = ["G", "TV-Y", "TV-Y7", "TV-G"];
    KIDS.contains(&content_rating.trim().to_uppercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_each_provider_form() {
        assert_eq!(
            parse_one("imdb://tt1234567"),
            Some((GuidProvider::Imdb, "1234567".to_string()))
        );
        assert_eq!(
            parse_one("tmdb://98765"),
            Some((GuidProvider::Tmdb, "98765".to_string()))
        );
        assert_eq!(
            parse_one("tvdb://12345"),
            Some((GuidProvider::Tvdb, "12345".to_string()))
        );
        assert_eq!(
            parse_one("plex://show/abc123"),
            Some((GuidProvider::Plex, "abc123".to_string()))
        );
    }

    #[test]
    fn merges_guid_list_earliest_wins() {
        let item = json!({
            "Guid": [
                {"id": "imdb://tt0001"},
                {"id": "tmdb://1"},
                {"id": "imdb://tt9999"}
            ]
        });
        let set = parse_item_guids(&item);
        assert_eq!(set.imdb.as_deref(), Some("0001"));
        assert_eq!(set.tmdb.as_deref(), Some("1"));
    }

    #[test]
    fn falls_back_to_rating_key() {
        let item = json!({"ratingKey": "5309"});
        let set = parse_item_guids(&item);
        assert_eq!(set.plex.as_deref(), Some("5309"));
    }

    #[test]
    fn primary_prefers_tvdb_over_others() {
        let mut set = GuidSet::default();
        set.merge(GuidProvider::Plex, "p1".to_string());
        set.merge(GuidProvider::Imdb, "i1".to_string());
        set.merge(GuidProvider::Tvdb, "t1".to_string());
        assert_eq!(set.primary().unwrap().provider, GuidProvider::Tvdb);
    }

    #[test]
    fn rating_normalization_cases() {
        assert_eq!(normalize_rating("TV-PG"), ("TV".into(), "TV-PG".into()));
        assert_eq!(normalize_rating("PG-13"), ("MPAA".into(), "PG-13".into()));
        assert_eq!(normalize_rating("Not Rated"), ("MPAA".into(), "NR".into()));
        assert_eq!(normalize_rating(""), ("unknown".into(), "unknown".into()));
    }

    #[test]
    fn kids_friendly_ratings() {
        assert!(infer_kids_friendly("TV-Y7"));
        assert!(infer_kids_friendly("g"));
        assert!(!infer_kids_friendly("PG-13"));
    }
}
