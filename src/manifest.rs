//! Locating the Cargo manifests of a materialized project

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cargo_toml::Manifest;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

use crate::error::VendorError;

pub const MANIFEST_NAME: &str = "Cargo.toml";

/// A list of directories never searched for manifests
const IGNORE_LIST: &[&str] = &[".git", "target"];

/// The manifests `cargo` is pointed at for a single run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectManifests {
    /// The directory cargo is run from.
    pub root: PathBuf,

    /// Explicitly requested manifests, relative to `root`. When empty, cargo
    /// uses the manifest found in `root`.
    pub manifests: Vec<PathBuf>,
}

impl ProjectManifests {
    pub fn is_explicit(&self) -> bool {
        !self.manifests.is_empty()
    }

    /// The manifest passed as `--manifest-path`.
    pub fn primary(&self) -> Option<&Path> {
        self.manifests.first().map(PathBuf::as_path)
    }
}

/// Determine the project root and manifests within `source_root`.
///
/// Without `manifest_paths` the tree is searched for the first `Cargo.toml`.
/// Otherwise every given path is resolved relative to `source_root` and must exist.
pub fn locate(source_root: &Path, manifest_paths: &[PathBuf]) -> Result<ProjectManifests, VendorError> {
    if manifest_paths.is_empty() {
        let manifest = find_manifest(source_root).ok_or_else(|| {
            VendorError::manifest_not_found(format!(
                "no {} found in {}",
                MANIFEST_NAME,
                source_root.display()
            ))
        })?;

        describe(&manifest)?;

        let root = manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| source_root.to_path_buf());
        info!("Found project root at {}", root.display());

        return Ok(ProjectManifests {
            root,
            manifests: Vec::new(),
        });
    }

    for path in manifest_paths {
        let manifest = source_root.join(path);
        if !manifest.is_file() {
            return Err(VendorError::manifest_not_found(format!(
                "{} does not exist",
                manifest.display()
            )));
        }
        describe(&manifest)?;
    }

    Ok(ProjectManifests {
        root: source_root.to_path_buf(),
        manifests: manifest_paths.to_vec(),
    })
}

/// Sorts files ahead of directories so a directory's own manifest is seen
/// before any nested one.
fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| IGNORE_LIST.contains(&name))
            .unwrap_or(false)
}

/// Depth first search for the first `Cargo.toml` below `root`.
pub fn find_manifest(root: &Path) -> Option<PathBuf> {
    WalkDir::new(root)
        .sort_by(files_first)
        .into_iter()
        .filter_entry(|entry| !is_ignored(entry))
        .filter_map(|entry| entry.ok())
        .find(|entry| !entry.file_type().is_dir() && entry.file_name() == MANIFEST_NAME)
        .map(DirEntry::into_path)
}

pub fn read_manifest(manifest: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read manifest: {}", manifest.display()))?;
    cargo_toml::Manifest::from_str(content.as_str())
        .with_context(|| format!("Failed to deserialize manifest: {}", manifest.display()))
}

/// Parse a manifest and log what kind of project it describes.
fn describe(path: &Path) -> Result<()> {
    let manifest = read_manifest(path)?;

    match (&manifest.workspace, &manifest.package) {
        (Some(workspace), _) => debug!(
            "{} is a workspace with {} members",
            path.display(),
            workspace.members.len()
        ),
        (None, Some(package)) => debug!("{} is package `{}`", path.display(), package.name),
        (None, None) => debug!("{} has neither a package nor a workspace", path.display()),
    }

    Ok(())
}
