use crate::config::Settings;
use crate::detect::DetectedFormat;
use crate::error::Result;
use crate::handler::LogFileHandler;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct FormatDetection {
    pub format: Option<DetectedFormat>,
    pub detected: bool,
    pub total_lines: usize,
}

#[derive(Debug)]
struct Entry {
    detection: FormatDetection,
    inserted_at: Instant,
}

/// Per-file detection results that expire after a fixed time. Owned by the
/// caller; expired entries are evicted when looked up.
#[derive(Debug)]
pub struct FormatCache {
    entries: LruCache<PathBuf, Entry>,
    ttl: Duration,
}

impl Default for FormatCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self { entries: LruCache::new(capacity), ttl }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, path: &Path) -> Option<FormatDetection> {
        let expired = self.entries.peek(path)?.inserted_at.elapsed() >= self.ttl;
        if expired {
            self.entries.pop(path);
            return None;
        }
        self.entries.get(path).map(|e| e.detection.clone())
    }

    pub fn put(&mut self, path: &Path, detection: FormatDetection) {
        self.entries.put(path.to_path_buf(), Entry { detection, inserted_at: Instant::now() });
    }

    pub fn invalidate(&mut self, path: &Path) {
        self.entries.pop(path);
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    /// Cached detection for `path`, running detection and indexing on a miss.
    pub fn get_or_detect(&mut self, path: &Path, settings: &Settings) -> Result<FormatDetection> {
        if let Some(hit) = self.get(path) {
            tracing::debug!(path = %path.display(), "format cache hit");
            return Ok(hit);
        }
        let mut handler = LogFileHandler::with_settings(path, settings.clone())?;
        handler.initialize()?;
        let detection = FormatDetection {
            format: handler.format().cloned(),
            detected: handler.detection().map(|d| d.detected).unwrap_or(false),
            total_lines: handler.total_lines(),
        };
        self.put(path, detection.clone());
        Ok(detection)
    }
}
