//! Product image migration.
//!
//! Relative gallery paths are either copied from a local media directory
//! into the target's static asset directory, or turned into URLs against
//! the legacy media host. Missing files are skipped, never fatal.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use url::Url;

use crate::config::MediaConfig;
use crate::error::AppError;

/// Images resolved for one product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedMedia {
    /// Served URLs in gallery order.
    pub images: Vec<String>,
    /// The first resolved image.
    pub thumbnail: Option<String>,
    /// `(path, reason)` for every image that could not be resolved.
    pub skipped: Vec<(String, String)>,
}

pub struct MediaAssetMigrator {
    config: MediaConfig,
    dry_run: bool,
    /// Normalized path to its URL, or the reason it was skipped.
    resolved: Mutex<HashMap<String, Result<String, String>>>,
}

impl MediaAssetMigrator {
    pub fn new(config: MediaConfig, dry_run: bool) -> Self {
        Self {
            config,
            dry_run,
            resolved: Mutex::new(HashMap::new()),
        }
    }

    /// Resolves the gallery of one product.
    ///
    /// Paths are deduplicated after normalization. A path already handled
    /// for another product is not copied again.
    pub async fn migrate(&self, paths: &[String]) -> ResolvedMedia {
        let mut media = ResolvedMedia::default();
        let mut seen = Vec::new();

        for raw in paths {
            let Some(path) = normalize(raw) else {
                media
                    .skipped
                    .push((raw.clone(), "not a relative media path".to_string()));
                continue;
            };
            if seen.contains(&path) {
                continue;
            }
            seen.push(path.clone());

            match self.resolve_cached(&path).await {
                Ok(url) => media.images.push(url),
                Err(reason) => {
                    tracing::warn!(path = %path, reason = %reason, "skipping media");
                    media.skipped.push((path, reason));
                }
            }
        }

        media.thumbnail = media.images.first().cloned();
        media
    }

    async fn resolve_cached(&self, path: &str) -> Result<String, String> {
        if let Some(hit) = self.cached(path) {
            return hit;
        }
        let result = self.resolve(path).await.map_err(|e| e.to_string());
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), result.clone());
        result
    }

    fn cached(&self, path: &str) -> Option<Result<String, String>> {
        self.resolved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
    }

    async fn resolve(&self, path: &str) -> Result<String, AppError> {
        let Some(source_dir) = &self.config.source_dir else {
            return match &self.config.source_base_url {
                Some(base) => public_url(base, path),
                None => Err(AppError::Validation(
                    "neither media.source_dir nor media.source_base_url is configured".into(),
                )),
            };
        };

        let source = source_dir.join(path);
        if !tokio::fs::try_exists(&source).await? {
            return Err(AppError::NotFound(source.display().to_string()));
        }

        match (&self.config.static_dir, &self.config.static_base_url) {
            (Some(static_dir), Some(base)) => {
                self.copy(&source, &static_dir.join(path)).await?;
                public_url(base, path)
            }
            _ => match &self.config.source_base_url {
                Some(base) => public_url(base, path),
                None => Err(AppError::Validation(
                    "media.static_dir and media.static_base_url are required to copy local media"
                        .into(),
                )),
            },
        }
    }

    async fn copy(&self, source: &Path, destination: &Path) -> Result<(), AppError> {
        if self.dry_run {
            tracing::info!(
                source = %source.display(),
                destination = %destination.display(),
                "[dry-run] copy media"
            );
            return Ok(());
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(source, destination).await?;
        tracing::debug!(destination = %destination.display(), "copied media");
        Ok(())
    }
}

/// Strips leading slashes and rejects paths escaping the media root.
pub fn normalize(path: &str) -> Option<String> {
    let trimmed = path.trim().trim_start_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(|s| s == ".." || s.is_empty()) {
        return None;
    }
    Some(trimmed.to_string())
}

/// Appends `path` to `base`, percent-encoding each segment.
fn public_url(base: &str, path: &str) -> Result<String, AppError> {
    let mut url = Url::parse(base)?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| {
                AppError::Validation(format!("media base url cannot carry a path: {}", base))
            })?;
        segments.pop_if_empty().extend(path.split('/'));
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/m/t/tee.jpg").as_deref(), Some("m/t/tee.jpg"));
        assert_eq!(normalize("//m/t/tee.jpg").as_deref(), Some("m/t/tee.jpg"));
        assert_eq!(normalize("../etc/passwd"), None);
        assert_eq!(normalize("  "), None);
    }

    #[test]
    fn test_public_url_encodes_segments() {
        let url = public_url(
            "https://legacy.example.com/media/catalog/product/",
            "m/t/blue tee.jpg",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://legacy.example.com/media/catalog/product/m/t/blue%20tee.jpg"
        );
    }

    #[tokio::test]
    async fn test_external_urls_are_deduplicated() {
        let migrator = MediaAssetMigrator::new(
            MediaConfig {
                source_base_url: Some("https://legacy.example.com/media".into()),
                ..Default::default()
            },
            false,
        );
        let media = migrator
            .migrate(&paths(&["/a/b/one.jpg", "a/b/one.jpg", "/a/b/two.jpg"]))
            .await;

        assert_eq!(
            media.images,
            vec![
                "https://legacy.example.com/media/a/b/one.jpg".to_string(),
                "https://legacy.example.com/media/a/b/two.jpg".to_string(),
            ]
        );
        assert_eq!(
            media.thumbnail.as_deref(),
            Some("https://legacy.example.com/media/a/b/one.jpg")
        );
    }

    #[tokio::test]
    async fn test_local_files_are_copied_and_missing_skipped() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("t/e")).unwrap();
        std::fs::write(source.path().join("t/e/tee.jpg"), b"jpeg").unwrap();

        let migrator = MediaAssetMigrator::new(
            MediaConfig {
                source_dir: Some(source.path().to_path_buf()),
                static_dir: Some(target.path().to_path_buf()),
                static_base_url: Some("https://shop.example.com/static".into()),
                ..Default::default()
            },
            false,
        );
        let media = migrator.migrate(&paths(&["/t/e/missing.jpg", "/t/e/tee.jpg"])).await;

        assert_eq!(media.images, vec!["https://shop.example.com/static/t/e/tee.jpg".to_string()]);
        assert_eq!(media.thumbnail, media.images.first().cloned());
        assert_eq!(media.skipped.len(), 1);
        assert_eq!(media.skipped[0].0, "t/e/missing.jpg");
        let copied: PathBuf = target.path().join("t/e/tee.jpg");
        assert_eq!(std::fs::read(copied).unwrap(), b"jpeg");
    }

    #[tokio::test]
    async fn test_dry_run_does_not_copy() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("tee.jpg"), b"jpeg").unwrap();

        let migrator = MediaAssetMigrator::new(
            MediaConfig {
                source_dir: Some(source.path().to_path_buf()),
                static_dir: Some(target.path().to_path_buf()),
                static_base_url: Some("https://shop.example.com/static".into()),
                ..Default::default()
            },
            true,
        );
        let media = migrator.migrate(&paths(&["tee.jpg"])).await;

        assert_eq!(media.images.len(), 1);
        assert!(!target.path().join("tee.jpg").exists());
    }

    #[tokio::test]
    async fn test_no_origin_skips_everything() {
        let migrator = MediaAssetMigrator::new(MediaConfig::default(), false);
        let media = migrator.migrate(&paths(&["a.jpg"])).await;
        assert!(media.images.is_empty());
        assert_eq!(media.thumbnail, None);
        assert_eq!(media.skipped.len(), 1);
    }
}
