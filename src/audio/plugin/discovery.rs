//! CLAP plugin discovery
//!
//! Finds .clap bundles and instantiates the first one that loads.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::clap_host::ClapUnit;
use crate::audio::unit::{ScanResult, UnitProvider};
use crate::config::SessionConfig;
use crate::error::UnitError;

/// Standard CLAP plugin directories for this platform, `~` expanded
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    #[cfg(target_os = "macos")]
    {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/Users"));
        paths.push(home.join("Library/Audio/Plug-Ins/CLAP"));
        paths.push(PathBuf::from("/Library/Audio/Plug-Ins/CLAP"));
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local) = dirs::data_local_dir() {
            paths.push(local.join("Programs").join("Common").join("CLAP"));
        }
        if let Ok(common) = std::env::var("COMMONPROGRAMFILES") {
            paths.push(PathBuf::from(common).join("CLAP"));
        }
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/home"));
        paths.push(home.join(".clap"));
        paths.push(PathBuf::from("/usr/lib/clap"));
        paths.push(PathBuf::from("/usr/local/lib/clap"));
    }

    paths
}

fn is_clap_bundle(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("clap"))
        .unwrap_or(false)
}

/// All .clap bundles under `root`, sorted by file name
///
/// macOS bundles are directories; their contents are not searched.
fn bundles_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut walker = WalkDir::new(root).follow_links(true).into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Skipping unreadable entry under {:?}: {}", root, e);
                continue;
            }
        };
        if entry.depth() > 0 && is_clap_bundle(entry.path()) {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            found.push(entry.into_path());
        }
    }

    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    found
}

/// Locates a CLAP effect on disk
#[derive(Debug, Clone)]
pub struct ClapProvider {
    preferred: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
}

impl ClapProvider {
    pub fn new(preferred: Option<PathBuf>, search_paths: Vec<PathBuf>) -> Self {
        Self {
            preferred,
            search_paths,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.plugin_path.clone(), config.plugin_search_paths.clone())
    }

    /// Locations consulted by a scan
    pub fn locations(&self) -> usize {
        self.search_paths.len() + usize::from(self.preferred.is_some())
    }

    /// Candidate bundles in the order they are tried
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();

        if let Some(preferred) = &self.preferred {
            if preferred.exists() {
                candidates.push(preferred.clone());
            } else {
                log::warn!("Configured plugin not found: {:?}", preferred);
            }
        }

        for root in &self.search_paths {
            if !root.is_dir() {
                continue;
            }
            for bundle in bundles_under(root) {
                if !candidates.contains(&bundle) {
                    candidates.push(bundle);
                }
            }
        }

        candidates
    }
}

impl UnitProvider for ClapProvider {
    fn scan(&self, _sample_rate: f64, _block_size: usize) -> ScanResult {
        let candidates = self.candidates();
        if candidates.is_empty() {
            return ScanResult::NotFound {
                searched: self.locations(),
            };
        }

        log::info!("Found {} CLAP bundle(s)", candidates.len());

        let mut last_error: Option<UnitError> = None;
        for path in candidates {
            match ClapUnit::load(&path) {
                Ok(unit) => return ScanResult::Ready(Box::new(unit)),
                Err(e) => {
                    log::warn!("{}", e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => ScanResult::InstantiationFailed(e),
            None => ScanResult::NotFound {
                searched: self.locations(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("moodboard-discovery-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_candidates_sorted_and_filtered() {
        let dir = scratch_dir("sorted");
        std::fs::write(dir.join("Zeta.clap"), b"").unwrap();
        std::fs::write(dir.join("readme.txt"), b"").unwrap();
        std::fs::create_dir_all(dir.join("vendor")).unwrap();
        std::fs::write(dir.join("vendor").join("Alpha.clap"), b"").unwrap();
        // macOS-style bundle: the directory is the candidate, not its contents
        let bundle = dir.join("Mid.clap").join("Contents").join("MacOS");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(bundle.join("Inner.clap"), b"").unwrap();

        let provider = ClapProvider::new(None, vec![dir.clone()]);
        let names: Vec<String> = provider
            .candidates()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["Alpha.clap", "Mid.clap", "Zeta.clap"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_preferred_tried_first() {
        let dir = scratch_dir("preferred");
        std::fs::write(dir.join("Alpha.clap"), b"").unwrap();
        let preferred = dir.join("Omega.clap");
        std::fs::write(&preferred, b"").unwrap();

        let provider = ClapProvider::new(Some(preferred.clone()), vec![dir.clone()]);
        let candidates = provider.candidates();
        assert_eq!(candidates[0], preferred);
        // Not listed twice
        assert_eq!(candidates.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_scan_not_found() {
        let dir = scratch_dir("empty");
        let provider = ClapProvider::new(Some(dir.join("Gone.clap")), vec![dir.clone(), dir.join("missing")]);
        assert!(matches!(
            provider.scan(44100.0, 256),
            ScanResult::NotFound { searched: 3 }
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_scan_reports_instantiation_failure() {
        let dir = scratch_dir("broken");
        std::fs::write(dir.join("Broken.clap"), b"garbage").unwrap();

        let provider = ClapProvider::new(None, vec![dir.clone()]);
        match provider.scan(44100.0, 256) {
            ScanResult::InstantiationFailed(e) => {
                assert_eq!(e.kind(), crate::error::UnitErrorKind::InstantiationFailed)
            }
            other => panic!("Expected InstantiationFailed, got {:?}", other),
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
