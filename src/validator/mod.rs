//! Decide whether a mapped `MediaFile` is acceptable before upsert (C5).
//!
//! Grounded on `original_source/src/retrovue/plex/validation.py`: same
//! status taxonomy, same step ordering (path resolution -> filesystem
//! access -> probe -> codec allowlist -> duration sanity), same codec
//! tables.

pub mod ffprobe;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::path_mapper::PathMapper;

const SUPPORTED_VIDEO_CODECS: [&str; 11] = [
    "h264", "h265", "hevc", "avc1", "x264", "x265", "mpeg2video", "mpeg4", "vp8", "vp9", "av1",
];

const SUPPORTED_AUDIO_CODECS: [&str; 11] = [
    "aac", "mp3", "ac3", "eac3", "dts", "flac", "pcm", "opus", "vorbis", "mp2", "wma",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    FileNotFound,
    FileNotAccessible,
    InvalidCodec,
    InvalidMetadata,
    PathMappingFailed,
    UnknownError,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    pub message: String,
    pub local_path: Option<String>,
    pub file_size: Option<u64>,
    pub duration_ms: Option<i64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl ValidationResult {
    fn failure(status: ValidationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            local_path: None,
            file_size: None,
            duration_ms: None,
            video_codec: None,
            audio_codec: None,
            width: None,
            height: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub by_status: Vec<(ValidationStatus, usize)>,
}

pub struct ValidationRequest {
    pub server_id: i64,
    pub library_id: i64,
    pub remote_path: String,
}

pub struct Validator {
    path_mapper: Arc<PathMapper>,
    ffprobe_path: String,
    probe_timeout: Duration,
}

impl Validator {
    pub fn new(path_mapper: Arc<PathMapper>, ffprobe_path: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            path_mapper,
            ffprobe_path: ffprobe_path.into(),
            probe_timeout,
        }
    }

    pub async fn validate(&self, request: &ValidationRequest) -> ValidationResult {
        let Some(local_path) = self.path_mapper.resolve(
            request.server_id,
            request.library_id,
            &request.remote_path,
        ) else {
            return ValidationResult::failure(
                ValidationStatus::PathMappingFailed,
                format!("could not resolve path mapping for: {}", request.remote_path),
            );
        };

        let path = Path::new(&local_path);
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(_) => {
                let mut result =
                    ValidationResult::failure(ValidationStatus::FileNotFound, format!("file does not exist: {local_path}"));
                result.local_path = Some(local_path);
                return result;
            }
        };

        if !metadata.is_file() {
            let mut result = ValidationResult::failure(
                ValidationStatus::FileNotAccessible,
                format!("path is not a regular file: {local_path}"),
            );
            result.local_path = Some(local_path);
            return result;
        }

        if metadata.len() == 0 {
            let mut result =
                ValidationResult::failure(ValidationStatus::FileNotAccessible, format!("file is empty: {local_path}"));
            result.local_path = Some(local_path);
            result.file_size = Some(0);
            return result;
        }

        let mut result = self.validate_media_properties(path).await;
        result.local_path = Some(local_path);
        result.file_size = Some(metadata.len());
        result
    }

    async fn validate_media_properties(&self, path: &Path) -> ValidationResult {
        let probe = match ffprobe::probe(&self.ffprobe_path, path, self.probe_timeout).await {
            Ok(probe) => probe,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ffprobe failed");
                return ValidationResult::failure(ValidationStatus::InvalidMetadata, e.to_string());
            }
        };

        if let Some(video_codec) = probe.video_codec.as_deref() {
            let lower = video_codec.to_lowercase();
            if !SUPPORTED_VIDEO_CODECS.contains(&lower.as_str()) {
                let mut result = ValidationResult::failure(
                    ValidationStatus::InvalidCodec,
                    format!("unsupported video codec: {lower}"),
                );
                result.video_codec = Some(lower);
                result.duration_ms = Some(probe.duration_ms);
                result.width = probe.width;
                result.height = probe.height;
                return result;
            }
        }

        if let Some(audio_codec) = probe.audio_codec.as_deref() {
            let lower = audio_codec.to_lowercase();
            if !SUPPORTED_AUDIO_CODECS.contains(&lower.as_str()) {
                let mut result = ValidationResult::failure(
                    ValidationStatus::InvalidCodec,
                    format!("unsupported audio codec: {lower}"),
                );
                result.audio_codec = Some(lower);
                result.duration_ms = Some(probe.duration_ms);
                return result;
            }
        }

        if probe.duration_ms <= 0 {
            let mut result =
                ValidationResult::failure(ValidationStatus::InvalidMetadata, "invalid or zero duration");
            result.duration_ms = Some(probe.duration_ms);
            return result;
        }

        ValidationResult {
            status: ValidationStatus::Valid,
            message: "file is valid and playable".to_string(),
            local_path: None,
            file_size: None,
            duration_ms: Some(probe.duration_ms),
            video_codec: probe.video_codec,
            audio_codec: probe.audio_codec,
            width: probe.width,
            height: probe.height,
        }
    }

    pub async fn validate_batch(&self, requests: &[ValidationRequest]) -> Vec<ValidationResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.validate(request).await);
        }
        results
    }

    pub fn summarize(results: &[ValidationResult]) -> ValidationSummary {
        let mut summary = ValidationSummary {
            total: results.len(),
            ..Default::default()
        };
        let mut by_status: Vec<(ValidationStatus, usize)> = Vec::new();
        for result in results {
            if result.is_valid() {
                summary.valid += 1;
            } else {
                summary.invalid += 1;
            }
            match by_status.iter_mut().find(|(s, _)| *s == result.status) {
                Some((_, count)) => *count += 1,
                None => by_status.push((result.status, 1)),
            }
        }
        summary.by_status = by_status;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PathMapping;

    fn mapper_with(server_id: i64, library_id: i64, plex: &str, local: &str) -> Arc<PathMapper> {
        let mapper = Arc::new(PathMapper::new(true));
        mapper.set_mappings(
            server_id,
            library_id,
            &[PathMapping {
                id: 0,
                server_id,
                library_id,
                plex_path: plex.to_string(),
                local_path: local.to_string(),
            }],
        );
        mapper
    }

    #[tokio::test]
    async fn unmapped_path_yields_path_mapping_failed() {
        let mapper = Arc::new(PathMapper::new(true));
        let validator = Validator::new(mapper, "ffprobe", Duration::from_secs(30));
        let result = validator
            .validate(&ValidationRequest {
                server_id: 1,
                library_id: 1,
                remote_path: "/media/movie.mkv".to_string(),
            })
            .await;
        assert_eq!(result.status, ValidationStatus::PathMappingFailed);
    }

    #[tokio::test]
    async fn missing_file_yields_file_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let local_root = dir.path().to_str().unwrap().to_string();
        let mapper = mapper_with(1, 1, "/media", &local_root);
        let validator = Validator::new(mapper, "ffprobe", Duration::from_secs(30));
        let result = validator
            .validate(&ValidationRequest {
                server_id: 1,
                library_id: 1,
                remote_path: "/media/missing.mkv".to_string(),
            })
            .await;
        assert_eq!(result.status, ValidationStatus::FileNotFound);
    }

    #[tokio::test]
    async fn empty_file_yields_file_not_accessible() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("empty.mkv");
        tokio::fs::write(&file_path, []).await.unwrap();
        let local_root = dir.path().to_str().unwrap().to_string();
        let mapper = mapper_with(1, 1, "/media", &local_root);
        let validator = Validator::new(mapper, "ffprobe", Duration::from_secs(30));
        let result = validator
            .validate(&ValidationRequest {
                server_id: 1,
                library_id: 1,
                remote_path: "/media/empty.mkv".to_string(),
            })
            .await;
        assert_eq!(result.status, ValidationStatus::FileNotAccessible);
    }

    #[test]
    fn summarize_counts_valid_and_invalid() {
        let results = vec![
            ValidationResult {
                status: ValidationStatus::Valid,
                message: "ok".into(),
                local_path: None,
                file_size: None,
                duration_ms: None,
                video_codec: None,
                audio_codec: None,
                width: None,
                height: None,
            },
            ValidationResult::failure(ValidationStatus::FileNotFound, "missing"),
        ];
        let summary = Validator::summarize(&results);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.valid, 1);
        assert_eq!(summary.invalid, 1);
    }
}
