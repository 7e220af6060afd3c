//! Longest-prefix remote-to-local path resolution with an in-process cache (C2).
//!
//! Grounded on `original_source/src/retrovue/plex/pathmap.py`: same
//! normalization (`\` -> `/`), same longest-prefix-wins ordering, same
//! cache-per-`(server_id, library_id)` shape. Case sensitivity is
//! configurable here rather than hardcoded, since the host filesystem
//! decides it rather than the remote always being case-sensitive.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::PathMapping;

fn normalize(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

#[derive(Debug, Clone)]
struct Entry {
    plex_prefix: String,
    plex_prefix_norm: String,
    local_prefix: String,
}

/// Resolves remote paths to local paths via longest matching prefix.
///
/// Mappings are loaded by the caller (typically the façade, from the
/// `Store`) and fed in through [`PathMapper::set_mappings`]; this type owns
/// no database handle itself, only the cache and the resolution algorithm.
pub struct PathMapper {
    case_sensitive: bool,
    cache: RwLock<HashMap<(i64, i64), Vec<Entry>>>,
}

impl PathMapper {
    pub fn new(case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Populate (or replace) the cached mappings for a `(server_id, library_id)`
    /// pair, sorted longest-prefix-first.
    pub fn set_mappings(&self, server_id: i64, library_id: i64, mappings: &[PathMapping]) {
        let mut entries: Vec<Entry> = mappings
            .iter()
            .map(|m| Entry {
                plex_prefix: m.plex_path.clone(),
                plex_prefix_norm: normalize(&m.plex_path),
                local_prefix: m.local_path.clone(),
            })
            .collect();
        entries.sort_by_key(|e| std::cmp::Reverse(e.plex_prefix_norm.len()));
        self.cache
            .write()
            .expect("path mapper cache lock poisoned")
            .insert((server_id, library_id), entries);
    }

    /// Drop cached mappings for one pair, or all pairs when `None`.
    pub fn invalidate(&self, key: Option<(i64, i64)>) {
        let mut cache = self.cache.write().expect("path mapper cache lock poisoned");
        match key {
            Some(k) => {
                cache.remove(&k);
            }
            None => cache.clear(),
        }
    }

    fn starts_with(&self, haystack: &str, prefix: &str) -> bool {
        if self.case_sensitive {
            haystack.starts_with(prefix)
        } else {
            haystack.len() >= prefix.len()
                && haystack[..prefix.len()].eq_ignore_ascii_case(prefix)
        }
    }

    /// Resolve `remote_path` to a local path, or `None` when no mapping's
    /// prefix matches and when the library has no mappings loaded.
    pub fn resolve(&self, server_id: i64, library_id: i64, remote_path: &str) -> Option<String> {
        if remote_path.is_empty() {
            return None;
        }

        let cache = self.cache.read().expect("path mapper cache lock poisoned");
        let entries = cache.get(&(server_id, library_id))?;
        let remote_norm = normalize(remote_path);

        for entry in entries {
            if self.starts_with(&remote_norm, &entry.plex_prefix_norm) {
                let remainder = remote_norm
                    .get(entry.plex_prefix_norm.len()..)
                    .unwrap_or_default();
                let remainder = remainder.trim_start_matches('/');

                let mut local = entry.local_prefix.clone();
                if !local.ends_with('/') && !local.ends_with('\\') && !remainder.is_empty() {
                    local.push(std::path::MAIN_SEPARATOR);
                }
                local.push_str(remainder);
                return Some(local);
            }
        }

        tracing::warn!(remote_path, "no path mapping matched");
        None
    }

    pub fn list_mappings(&self, server_id: i64, library_id: i64) -> Vec<(String, String)> {
        self.cache
            .read()
            .expect("path mapper cache lock poisoned")
            .get(&(server_id, library_id))
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.plex_prefix.clone(), e.local_prefix.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(server_id: i64, library_id: i64, plex: &str, local: &str) -> PathMapping {
        PathMapping {
            id: 0,
            server_id,
            library_id,
            plex_path: plex.to_string(),
            local_path: local.to_string(),
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let mapper = PathMapper::new(true);
        mapper.set_mappings(
            1,
            1,
            &[
                mapping(1, 1, "/media", "/mnt/media"),
                mapping(1, 1, "/media/shows", "/mnt/tv"),
            ],
        );
        let resolved = mapper
            .resolve(1, 1, "/media/shows/Breaking Bad/S01E01.mkv")
            .unwrap();
        assert_eq!(resolved, "/mnt/tv/Breaking Bad/S01E01.mkv");
    }

    #[test]
    fn no_match_returns_none() {
        let mapper = PathMapper::new(true);
        mapper.set_mappings(1, 1, &[mapping(1, 1, "/media", "/mnt/media")]);
        assert!(mapper.resolve(1, 1, "/other/file.mkv").is_none());
    }

    #[test]
    fn unloaded_library_returns_none() {
        let mapper = PathMapper::new(true);
        assert!(mapper.resolve(9, 9, "/media/file.mkv").is_none());
    }

    #[test]
    fn backslashes_are_normalized_before_matching() {
        let mapper = PathMapper::new(true);
        mapper.set_mappings(1, 1, &[mapping(1, 1, "/media", "/mnt/media")]);
        let resolved = mapper.resolve(1, 1, "\\media\\shows\\file.mkv").unwrap();
        assert_eq!(resolved, "/mnt/media/shows/file.mkv");
    }

    #[test]
    fn case_insensitive_matching() {
        let mapper = PathMapper::new(false);
        mapper.set_mappings(1, 1, &[mapping(1, 1, "/Media", "/mnt/media")]);
        let resolved = mapper.resolve(1, 1, "/media/file.mkv").unwrap();
        assert_eq!(resolved, "/mnt/media/file.mkv");
    }

    #[test]
    fn invalidate_clears_cache() {
        let mapper = PathMapper::new(true);
        mapper.set_mappings(1, 1, &[mapping(1, 1, "/media", "/mnt/media")]);
        mapper.invalidate(Some((1, 1)));
        assert!(mapper.resolve(1, 1, "/media/file.mkv").is_none());
    }
}
