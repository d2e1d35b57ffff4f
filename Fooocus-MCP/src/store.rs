use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{GenerationError, Result};
use crate::types::{ImageEntry, ImageMetadata, SortOrder};

/// Extensions recognized as generated images.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// Filesystem layout for generated images and their sidecars.
///
/// Images land in the root, or in `<root>/<job_id>/` when per-job
/// subdirectories are enabled. Every image has a `<base>.json` sidecar.
#[derive(Debug, Clone)]
pub struct OutputStore {
    root: PathBuf,
    subdir_per_job: bool,
}

impl OutputStore {
    pub fn new(root: impl Into<PathBuf>, subdir_per_job: bool) -> Self {
        Self {
            root: root.into(),
            subdir_per_job,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the output directory tree. Idempotent.
    pub fn ensure_output_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| storage(&self.root, e))
    }

    /// Directory a job's files are written to.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        if self.subdir_per_job {
            self.root.join(sanitize(job_id))
        } else {
            self.root.clone()
        }
    }

    /// [`job_dir`](Self::job_dir), created if missing.
    pub async fn prepare_job_dir(&self, job_id: &str) -> Result<PathBuf> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage(&dir, e))?;
        Ok(dir)
    }

    pub async fn save_image(&self, dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = dir.join(file_name);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| storage(&path, e))?;
        debug!(path = %path.display(), bytes = bytes.len(), "Saved image");
        Ok(path)
    }

    /// Write `<dir>/<base_name>.json`, replacing any existing file.
    pub async fn save_metadata(
        &self,
        dir: &Path,
        base_name: &str,
        metadata: &ImageMetadata,
    ) -> Result<PathBuf> {
        let path = dir.join(format!("{}.json", base_name));
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| GenerationError::Storage(format!("Failed to encode metadata: {}", e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| storage(&path, e))?;
        Ok(path)
    }

    /// Images under the root and one level of job subdirectories, sorted
    /// by modification time and truncated to `limit`.
    ///
    /// The directory walk and sidecar reads run on the blocking pool.
    pub async fn list_recent(&self, limit: usize, order: SortOrder) -> Result<Vec<ImageEntry>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.scan_recent(limit, order))
            .await
            .map_err(|e| GenerationError::Storage(format!("Output scan failed: {}", e)))
    }

    pub async fn count_images(&self) -> Result<usize> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.image_files().count())
            .await
            .map_err(|e| GenerationError::Storage(format!("Output scan failed: {}", e)))
    }

    fn scan_recent(&self, limit: usize, order: SortOrder) -> Vec<ImageEntry> {
        let mut entries: Vec<ImageEntry> = self
            .image_files()
            .filter_map(|path| {
                let meta = std::fs::metadata(&path).ok()?;
                let modified: DateTime<Utc> = meta.modified().ok()?.into();
                Some(ImageEntry {
                    file_name: path.file_name()?.to_string_lossy().into_owned(),
                    size_bytes: meta.len(),
                    modified,
                    metadata: Self::read_metadata(&path),
                    path,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
        if order == SortOrder::Newest {
            entries.reverse();
        }
        entries.truncate(limit);
        entries
    }

    fn image_files(&self) -> impl Iterator<Item = PathBuf> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_image(e.path()))
            .map(|e| e.into_path())
    }

    /// Sidecar for an image, or `None` when missing or malformed.
    pub fn read_metadata(image_path: &Path) -> Option<ImageMetadata> {
        let raw = std::fs::read_to_string(sidecar_path(image_path)).ok()?;
        match serde_json::from_str(&raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!(path = %image_path.display(), "Ignoring malformed sidecar: {}", e);
                None
            }
        }
    }
}

/// `<dir>/<stem>.json` for an image path.
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

/// `fooocus_<YYYYmmdd_HHMMSS>_<job8>_<n>` (no extension).
pub fn image_base_name(stamp: DateTime<Local>, job_id: &str, index: usize) -> String {
    let short: String = sanitize(job_id).chars().take(8).collect();
    format!("fooocus_{}_{}_{}", stamp.format("%Y%m%d_%H%M%S"), short, index)
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn storage(path: &Path, e: std::io::Error) -> GenerationError {
    GenerationError::Storage(format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs::File;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn sample_metadata(prompt: &str, seed: i64) -> ImageMetadata {
        ImageMetadata {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            seed: Some(seed),
            styles: vec!["Fooocus V2".into()],
            aspect_ratio: "1152*896".into(),
            performance: "Speed".into(),
            created_at: "2024-05-01T12:00:00+00:00".into(),
            job_id: "job".into(),
            source_image: None,
            image_url: None,
            image_file: None,
        }
    }

    fn touch(path: &Path, age_secs: u64) {
        std::fs::write(path, b"img").unwrap();
        let when = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(when)
            .unwrap();
    }

    #[test]
    fn test_ensure_output_dir_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = OutputStore::new(tmp.path().join("a/b/c"), false);
        store.ensure_output_dir().unwrap();
        store.ensure_output_dir().unwrap();
        assert!(tmp.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn test_metadata_roundtrip_and_overwrite() {
        let tmp = TempDir::new().unwrap();
        let store = OutputStore::new(tmp.path(), false);

        let path = store
            .save_metadata(tmp.path(), "img_1", &sample_metadata("first", 1))
            .await
            .unwrap();
        store
            .save_metadata(tmp.path(), "img_1", &sample_metadata("second", 2))
            .await
            .unwrap();
        assert_eq!(path, tmp.path().join("img_1.json"));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\n  \"prompt\""), "expected pretty JSON");

        let meta = OutputStore::read_metadata(&tmp.path().join("img_1.png")).unwrap();
        assert_eq!(meta.prompt, "second");
        assert_eq!(meta.seed, Some(2));
    }

    #[test]
    fn test_read_metadata_missing_or_malformed() {
        let tmp = TempDir::new().unwrap();
        let image = tmp.path().join("a.png");
        assert!(OutputStore::read_metadata(&image).is_none());

        std::fs::write(tmp.path().join("a.json"), "{not json").unwrap();
        assert!(OutputStore::read_metadata(&image).is_none());
    }

    #[tokio::test]
    async fn test_list_recent_sorting_and_filtering() {
        let tmp = TempDir::new().unwrap();
        let store = OutputStore::new(tmp.path(), true);

        touch(&tmp.path().join("old.png"), 300);
        touch(&tmp.path().join("mid.jpg"), 200);
        std::fs::create_dir(tmp.path().join("job-1")).unwrap();
        touch(&tmp.path().join("job-1").join("new.webp"), 100);
        touch(&tmp.path().join("notes.txt"), 50);
        std::fs::write(tmp.path().join("mid.json"), "{}").unwrap();

        let newest = store.list_recent(10, SortOrder::Newest).await.unwrap();
        let names: Vec<_> = newest.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["new.webp", "mid.jpg", "old.png"]);

        let oldest = store.list_recent(2, SortOrder::Oldest).await.unwrap();
        let names: Vec<_> = oldest.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, vec!["old.png", "mid.jpg"]);

        assert_eq!(store.count_images().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_recent_missing_root() {
        let store = OutputStore::new("/definitely/not/here", false);
        assert!(store.list_recent(10, SortOrder::Newest).await.unwrap().is_empty());
        assert_eq!(store.count_images().await.unwrap(), 0);
    }

    #[test]
    fn test_job_dir() {
        let flat = OutputStore::new("/out", false);
        assert_eq!(flat.job_dir("abc"), PathBuf::from("/out"));
        let nested = OutputStore::new("/out", true);
        assert_eq!(nested.job_dir("a/b"), PathBuf::from("/out/a_b"));
    }

    #[test]
    fn test_image_base_name() {
        let stamp = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 15).unwrap();
        assert_eq!(
            image_base_name(stamp, "3f2a9c1e-77aa-4e0b", 2),
            "fooocus_20240501_093015_3f2a9c1e_2"
        );
    }
}
