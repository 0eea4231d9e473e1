use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RunConfig;
use crate::error::DiscoveryError;
use crate::path_mapper::map_target_path;
use crate::work::WorkItem;

/// Basename prefix of resource-fork sidecar files; never eligible.
const SIDECAR_PREFIX: &[u8] = b"._";

/// Configuration for file discovery behavior
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Lowercased extensions (no dot) that qualify a file as input
    pub formats: Vec<String>,
    /// Directory subtree not to descend into (the target root when nested in the source)
    pub exclude_dir: Option<PathBuf>,
}

impl DiscoveryConfig {
    pub fn from_run_config(config: &RunConfig) -> Self {
        Self {
            formats: config.input_formats.clone(),
            exclude_dir: Some(config.target_root.clone()),
        }
    }

    fn matches(&self, path: &Path) -> bool {
        // Basenames need not be UTF-8; only the extension has to be.
        let Some(name) = path.file_name() else {
            return false;
        };
        if name.as_encoded_bytes().starts_with(SIDECAR_PREFIX) {
            return false;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.formats.iter().any(|f| f.eq_ignore_ascii_case(ext)))
    }
}

/// Work set produced by one discovery pass
#[derive(Debug, Clone, Default)]
pub struct WorkPlan {
    pub items: Vec<WorkItem>,
    /// Sources dropped because an earlier source already maps to the same target
    pub collisions: Vec<PathBuf>,
}

impl WorkPlan {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Recursively enumerate eligible regular files under `root_dir`.
///
/// Entries are sorted by file name within each directory so the order is
/// stable across passes. Unreadable subdirectories are logged and skipped; an
/// unreadable or missing root fails before anything is returned.
pub fn discover_files(root_dir: &Path, config: &DiscoveryConfig) -> Result<Vec<PathBuf>, DiscoveryError> {
    check_root(root_dir)?;

    let exclude = config.exclude_dir.as_deref().filter(|dir| *dir != root_dir);
    let walker = WalkDir::new(root_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(entry.depth() > 0 && entry.file_type().is_dir() && exclude.is_some_and(|dir| entry.path() == dir))
        });

    let mut files = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry during discovery: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if config.matches(entry.path()) {
            debug!("Found matching file: {}", entry.path().display());
            files.push(entry.into_path());
        }
    }

    info!("Discovered {} eligible files under {}", files.len(), root_dir.display());
    Ok(files)
}

/// Map discovered sources to work items, dropping later sources whose target
/// collides with an earlier one.
pub fn plan_work_items(
    source_root: &Path,
    target_root: &Path,
    sources: Vec<PathBuf>,
) -> Result<WorkPlan, DiscoveryError> {
    let mut plan = WorkPlan::default();
    let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::with_capacity(sources.len());

    for source in sources {
        let target = map_target_path(source_root, target_root, &source)?;
        if let Some(first) = claimed.get(&target) {
            warn!(
                target = %target.display(),
                kept = %first.display(),
                dropped = %source.display(),
                "Target path collision; excluding later source"
            );
            plan.collisions.push(source);
            continue;
        }
        claimed.insert(target.clone(), source.clone());
        plan.items.push(WorkItem::new(source, target));
    }

    Ok(plan)
}

/// Discover and plan in one step, off the async runtime.
pub async fn collect_work_items(config: &RunConfig) -> Result<WorkPlan, DiscoveryError> {
    let source_root = config.source_root.clone();
    let target_root = config.target_root.clone();
    let discovery_config = DiscoveryConfig::from_run_config(config);

    let joined = tokio::task::spawn_blocking(move || {
        let files = discover_files(&source_root, &discovery_config)?;
        if files.is_empty() {
            return Err(DiscoveryError::NoEligibleFiles { path: source_root });
        }
        plan_work_items(&source_root, &target_root, files)
    })
    .await;

    match joined {
        Ok(result) => result,
        Err(e) => Err(DiscoveryError::RootUnreadable {
            path: config.source_root.clone(),
            source: std::io::Error::other(e),
        }),
    }
}

fn check_root(root_dir: &Path) -> Result<(), DiscoveryError> {
    if !root_dir.exists() {
        return Err(DiscoveryError::RootMissing {
            path: root_dir.to_path_buf(),
        });
    }
    std::fs::read_dir(root_dir).map_err(|source| DiscoveryError::RootUnreadable {
        path: root_dir.to_path_buf(),
        source,
    })?;
    Ok(())
}
