//! Import folder scanning

use crate::LibraryError;
use crate::engine::Engine;
use crate::files::{collect_files, folder_size};
use crate::job::ImportJob;
use atlas_config::ImporterConfig;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

/// Result of a folder scan
#[derive(Debug, Default)]
pub struct ScanResult {
    pub jobs: Vec<ImportJob>,
    /// Folders that matched the pattern but held no executable
    pub skipped: Vec<PathBuf>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Folder layout below the source root, e.g. `{creator}/{title}/{version}`
    pub path_pattern: String,

    /// Executable file extensions (lowercase)
    pub executable_extensions: HashSet<String>,

    /// Leave `ImportJob::size` empty instead of measuring
    pub skip_filesize: bool,

    /// Skip hidden files/directories
    pub skip_hidden: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self::from_importer(&ImporterConfig::default())
    }
}

impl ScanConfig {
    pub fn from_importer(importer: &ImporterConfig) -> Self {
        let executable_extensions = ["exe", "sh", "html", "py", "jar", "swf", "bat"]
            .iter()
            .map(|ext| ext.to_string())
            .collect();

        Self {
            path_pattern: importer.path_pattern.clone(),
            executable_extensions,
            skip_filesize: importer.skip_filesize,
            skip_hidden: true,
        }
    }

    fn is_executable(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.executable_extensions.contains(&ext.to_lowercase()))
    }
}

/// Engine detection consumed by the scanner
pub trait EngineClassifier {
    /// Engine of the game in `folder`; `files` are relative to it
    fn classify(&self, folder: &Path, files: &[PathBuf]) -> Engine;

    /// Executable to launch among `candidates`. Prefers the shallowest
    /// file, then `.exe`, then name order.
    fn preferred_executable(&self, _engine: Engine, candidates: &[PathBuf]) -> Option<PathBuf> {
        candidates
            .iter()
            .min_by_key(|path| {
                let is_exe = path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"));
                (path.components().count(), !is_exe, path.to_path_buf())
            })
            .cloned()
    }
}

/// Classifier that knows no engines
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClassifier;

impl EngineClassifier for NoClassifier {
    fn classify(&self, _folder: &Path, _files: &[PathBuf]) -> Engine {
        Engine::Unknown
    }
}

#[derive(Debug, Default)]
struct Fields {
    title: Option<String>,
    creator: Option<String>,
    version: Option<String>,
    engine: Option<String>,
}

/// Builds import jobs from folders laid out by the path pattern
pub struct ImportScanner<C = NoClassifier> {
    config: ScanConfig,
    classifier: C,
}

impl Default for ImportScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportScanner {
    /// Create a new scanner with default config
    pub fn new() -> Self {
        Self::with_config(ScanConfig::default())
    }

    /// Create with custom config
    pub fn with_config(config: ScanConfig) -> Self {
        Self {
            config,
            classifier: NoClassifier,
        }
    }
}

impl<C: EngineClassifier> ImportScanner<C> {
    pub fn with_classifier(config: ScanConfig, classifier: C) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan `root` for game folders. Per-folder problems are recorded in
    /// [`ScanResult::errors`] and do not stop the scan.
    pub fn scan(&self, root: &Path) -> Result<ScanResult, LibraryError> {
        let started = Instant::now();
        let mut result = ScanResult::default();

        if !root.is_dir() {
            return Ok(result);
        }

        let pattern: Vec<&str> = self
            .config
            .path_pattern
            .split('/')
            .filter(|c| !c.is_empty())
            .collect();
        let depth = pattern.len();

        let walker = WalkDir::new(root)
            .min_depth(depth)
            .max_depth(depth)
            .sort_by_file_name();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }

            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            // Entries above min_depth never reach a walkdir filter, so check
            // every component of the path
            if self.config.skip_hidden && relative.components().any(is_hidden_component) {
                continue;
            }
            let Some(fields) = match_pattern(&pattern, relative) else {
                continue;
            };

            match self.build_job(root, relative, fields) {
                Ok(Some(job)) => result.jobs.push(job),
                Ok(None) => {
                    tracing::debug!("No executable in {}, skipping", relative.display());
                    result.skipped.push(relative.to_path_buf());
                }
                Err(e) => {
                    tracing::warn!("Failed to scan {}: {}", relative.display(), e);
                    result.errors.push(format!("{}: {}", relative.display(), e));
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Scanned {}: {} jobs, {} skipped, {} errors",
            root.display(),
            result.jobs.len(),
            result.skipped.len(),
            result.errors.len()
        );
        Ok(result)
    }

    fn build_job(
        &self,
        root: &Path,
        relative: &Path,
        fields: Fields,
    ) -> Result<Option<ImportJob>, LibraryError> {
        let folder = root.join(relative);
        let skip_hidden = self.config.skip_hidden;
        let files: Vec<PathBuf> = collect_files(&folder)?
            .into_iter()
            .filter_map(|path| path.strip_prefix(&folder).ok().map(Path::to_path_buf))
            .filter(|path| !(skip_hidden && path.components().any(is_hidden_component)))
            .collect();

        let executables: Vec<PathBuf> = files
            .iter()
            .filter(|path| self.config.is_executable(path))
            .cloned()
            .collect();
        if executables.is_empty() {
            return Ok(None);
        }

        let engine = match fields.engine {
            Some(name) => name,
            None => self.classifier.classify(&folder, &files).name().to_string(),
        };
        let executable = self
            .classifier
            .preferred_executable(Engine::from_name(&engine), &executables)
            .unwrap_or_else(|| executables[0].clone());

        let size = if self.config.skip_filesize {
            None
        } else {
            Some(folder_size(&folder)?)
        };

        let title = fields.title.unwrap_or_else(|| leaf_name(relative));
        Ok(Some(ImportJob {
            path: relative.to_path_buf(),
            title,
            creator: fields.creator.unwrap_or_else(|| "Unknown".to_string()),
            engine,
            version: fields.version.unwrap_or_default(),
            size,
            executables,
            executable,
        }))
    }
}

/// Map path components onto pattern placeholders. Literal pattern
/// components must match exactly.
fn match_pattern(pattern: &[&str], relative: &Path) -> Option<Fields> {
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.len() != pattern.len() {
        return None;
    }

    let mut fields = Fields::default();
    for (component, value) in pattern.iter().zip(parts) {
        match *component {
            "{title}" => fields.title = Some(value),
            "{creator}" => fields.creator = Some(value),
            "{version}" => fields.version = Some(value),
            "{engine}" => fields.engine = Some(value),
            literal if literal.starts_with('{') && literal.ends_with('}') => {}
            literal => {
                if literal != value {
                    return None;
                }
            }
        }
    }
    Some(fields)
}

fn is_hidden_component(component: Component<'_>) -> bool {
    component.as_os_str().to_string_lossy().starts_with('.')
}

fn leaf_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
    }

    struct FixedClassifier(Engine);

    impl EngineClassifier for FixedClassifier {
        fn classify(&self, _folder: &Path, _files: &[PathBuf]) -> Engine {
            self.0
        }
    }

    #[test]
    fn test_scan_config_default() {
        let config = ScanConfig::default();
        assert!(config.executable_extensions.contains("exe"));
        assert!(config.executable_extensions.contains("swf"));
        assert_eq!(config.path_pattern, "{creator}/{title}/{version}");
        assert!(config.skip_hidden);
    }

    #[test]
    fn test_match_pattern() {
        let pattern = ["games", "{creator}", "{title}", "{version}"];
        let fields = match_pattern(&pattern, Path::new("games/Studio/Game/1.0")).unwrap();
        assert_eq!(fields.creator.as_deref(), Some("Studio"));
        assert_eq!(fields.title.as_deref(), Some("Game"));
        assert_eq!(fields.version.as_deref(), Some("1.0"));

        assert!(match_pattern(&pattern, Path::new("other/Studio/Game/1.0")).is_none());
        assert!(match_pattern(&pattern, Path::new("games/Studio/Game")).is_none());
    }

    #[test]
    fn test_scan_builds_jobs() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Studio/Game/1.0/Game.exe"));
        touch(&dir.path().join("Studio/Game/1.0/lib/helper.exe"));
        touch(&dir.path().join("Studio/Game/1.0/game.sh"));
        touch(&dir.path().join("Studio/Game/2.0/readme.txt"));
        touch(&dir.path().join(".hidden/Game/1.0/Game.exe"));

        let scanner =
            ImportScanner::with_classifier(ScanConfig::default(), FixedClassifier(Engine::RenPy));
        let result = scanner.scan(dir.path()).unwrap();

        assert_eq!(result.jobs.len(), 1);
        assert_eq!(result.skipped, vec![PathBuf::from("Studio/Game/2.0")]);

        let job = &result.jobs[0];
        assert_eq!(job.title, "Game");
        assert_eq!(job.creator, "Studio");
        assert_eq!(job.version, "1.0");
        assert_eq!(job.engine, "RenPy");
        assert_eq!(job.path, PathBuf::from("Studio/Game/1.0"));
        assert_eq!(job.executables.len(), 3);
        assert_eq!(job.executable, PathBuf::from("Game.exe"));
        assert_eq!(job.size, Some(12));
    }

    #[test]
    fn test_scan_skips_hidden_at_any_depth() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Studio/Game/1.0/Game.exe"));
        touch(&dir.path().join("Studio/.trash/1.0/Game.exe"));
        touch(&dir.path().join(".cache/Game/1.0/Game.exe"));
        touch(&dir.path().join("Studio/Game/.partial/Game.exe"));

        let result = ImportScanner::new().scan(dir.path()).unwrap();
        let paths: Vec<&Path> = result.jobs.iter().map(|job| job.path.as_path()).collect();
        assert_eq!(paths, vec![Path::new("Studio/Game/1.0")]);

        let config = ScanConfig {
            skip_hidden: false,
            ..ScanConfig::default()
        };
        let result = ImportScanner::with_config(config).scan(dir.path()).unwrap();
        assert_eq!(result.jobs.len(), 4);
    }

    #[test]
    fn test_scan_skip_filesize() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Studio/Game/1.0/Game.exe"));

        let config = ScanConfig {
            skip_filesize: true,
            ..ScanConfig::default()
        };
        let result = ImportScanner::with_config(config).scan(dir.path()).unwrap();
        assert_eq!(result.jobs[0].size, None);
        assert_eq!(result.jobs[0].engine, "Unknown");
    }

    #[test]
    fn test_scan_missing_root() {
        let result = ImportScanner::new()
            .scan(Path::new("/nonexistent/atlas/source"))
            .unwrap();
        assert!(result.jobs.is_empty());
    }
}
