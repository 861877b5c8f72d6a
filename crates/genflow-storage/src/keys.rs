//! Shared key generation for staging backends.
//!
//! Keys are derived from the upload time plus a random suffix, so two uploads never
//! collide and the key reveals nothing about the asset contents.

use chrono::{DateTime, Utc};
use rand::distr::Alphanumeric;
use rand::Rng;

const RANDOM_SUFFIX_LEN: usize = 8;

/// File extension for a declared MIME type. Unknown types fall back to `bin`.
pub fn extension_for_mime(mime: &str) -> &'static str {
    let mime = mime.split(';').next().unwrap_or_default().trim();
    match mime.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/webm" => "webm",
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        _ => "bin",
    }
}

/// Generate a staging key for an asset uploaded at `now`.
///
/// Resource-scoped keys land under `projects/{resource_id}/inputs/`; everything else
/// under a per-day `staging/` prefix. Resource ids are reduced to `[A-Za-z0-9_-]`.
pub fn staging_key(resource_id: Option<&str>, extension: &str, now: DateTime<Utc>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_SUFFIX_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase();
    let filename = format!("{}_{}.{}", now.timestamp_millis(), suffix, extension);

    match resource_id.map(sanitize_segment).filter(|s| !s.is_empty()) {
        Some(resource) => format!("projects/{}/inputs/{}", resource, filename),
        None => format!("staging/{}/{}", now.format("%Y%m%d"), filename),
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn extensions_follow_declared_mime() {
        assert_eq!(extension_for_mime("image/png"), "png");
        assert_eq!(extension_for_mime("image/jpeg"), "jpg");
        assert_eq!(extension_for_mime("IMAGE/WEBP"), "webp");
        assert_eq!(extension_for_mime("video/mp4; codecs=avc1"), "mp4");
        assert_eq!(extension_for_mime("application/x-unknown"), "bin");
    }

    #[test]
    fn unscoped_keys_use_day_prefix() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        let key = staging_key(None, "png", now);
        assert!(key.starts_with("staging/20250309/"));
        assert!(key.ends_with(".png"));
        assert!(key.contains(&now.timestamp_millis().to_string()));
    }

    #[test]
    fn resource_scoped_keys_are_sanitized() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        let key = staging_key(Some("../proj-42"), "jpg", now);
        assert!(key.starts_with("projects/proj-42/inputs/"));
        assert!(!key.contains(".."));
    }

    #[test]
    fn keys_do_not_collide() {
        let now = Utc::now();
        let a = staging_key(None, "png", now);
        let b = staging_key(None, "png", now);
        assert_ne!(a, b);
    }
}
