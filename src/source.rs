//! Materializes project sources inside the temporary workspace

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tar::Archive;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::codec::Codec;
use crate::error::VendorError;

/// The directory archives are extracted into, relative to the workspace.
const EXTRACT_DIR: &str = "source";

/// Where a project's sources come from.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceInput<'a> {
    /// A directory tree which is copied as-is.
    Directory(&'a Path),
    /// A glob pattern naming a (possibly compressed) tar archive.
    Archive(&'a str),
}

impl<'a> SourceInput<'a> {
    /// Select the source from the given options. `None` is returned when
    /// neither was provided.
    pub fn select(
        directory: Option<&'a Path>,
        archive: Option<&'a str>,
    ) -> Result<Option<Self>, VendorError> {
        match (directory, archive) {
            (Some(directory), Some(archive)) => Err(VendorError::ConflictingSources {
                directory: directory.to_path_buf(),
                archive: archive.to_owned(),
            }),
            (Some(directory), None) => Ok(Some(SourceInput::Directory(directory))),
            (None, Some(archive)) => Ok(Some(SourceInput::Archive(archive))),
            (None, None) => Ok(None),
        }
    }

    /// Produce a copy of the sources inside `workspace` and return its root.
    pub fn materialize(&self, workspace: &Path) -> Result<PathBuf, VendorError> {
        match self {
            SourceInput::Directory(directory) => {
                let name = directory
                    .canonicalize()
                    .with_context(|| {
                        format!("Source directory is not accessible: {}", directory.display())
                    })?
                    .file_name()
                    .map(|name| name.to_owned())
                    .unwrap_or_else(|| EXTRACT_DIR.into());

                let dest = workspace.join(name);
                info!("Copying sources from {}", directory.display());
                copy_tree(directory, &dest)?;
                Ok(dest)
            }
            SourceInput::Archive(pattern) => {
                let archive = resolve_archive(pattern)?;
                info!("Unpacking sources from {}", archive.display());
                unpack_archive(&archive, workspace)
            }
        }
    }
}

/// Expand a glob pattern and return the first match.
fn resolve_archive(pattern: &str) -> Result<PathBuf, VendorError> {
    let not_found = || VendorError::ArchiveNotFound {
        pattern: pattern.to_owned(),
    };

    let mut matches = glob::glob(pattern).map_err(|_| not_found())?;

    matches
        .find_map(|entry| entry.ok())
        .ok_or_else(not_found)
}

/// Extract `archive` into the workspace and return the project root, the
/// single top-level directory of the archive.
fn unpack_archive(archive: &Path, workspace: &Path) -> Result<PathBuf, VendorError> {
    let dest = workspace.join(EXTRACT_DIR);
    fs::create_dir_all(&dest)?;

    if Codec::from_file_name(archive).map_or(false, |codec| codec.is_streaming_only()) {
        let tar_path = workspace.join(format!("{}.tar", EXTRACT_DIR));
        decompress_zstd(archive, &tar_path)?;
        unpack_tar(File::open(&tar_path)?, &dest)
            .with_context(|| format!("Failed to unpack {}", archive.display()))?;
        fs::remove_file(&tar_path)?;
    } else {
        let codec = Codec::detect(archive)?;
        debug!("Detected {} compression for {}", codec, archive.display());
        let reader = codec.decoder(File::open(archive)?)?;
        unpack_tar(reader, &dest)
            .with_context(|| format!("Failed to unpack {}", archive.display()))?;
    }

    top_level_dir(archive, &dest)
}

/// Decompress a zstd stream into a plain file on disk.
fn decompress_zstd(src: &Path, dest: &Path) -> Result<()> {
    let input =
        File::open(src).with_context(|| format!("Failed to open archive: {}", src.display()))?;
    let output = File::create(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    zstd::stream::copy_decode(input, output)
        .with_context(|| format!("Failed to decompress {}", src.display()))
}

fn unpack_tar<R: io::Read>(reader: R, dest: &Path) -> io::Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.unpack(dest)
}

fn top_level_dir(archive: &Path, extracted: &Path) -> Result<PathBuf, VendorError> {
    let entries = fs::read_dir(extracted)?.collect::<io::Result<Vec<_>>>()?;

    if let [entry] = entries.as_slice() {
        if entry.file_type()?.is_dir() {
            return Ok(entry.path());
        }
    }

    Err(VendorError::SourceLayout {
        archive: archive.to_path_buf(),
        entries: entries.len(),
    })
}

/// Create a symlink file on unix systems
#[cfg(target_family = "unix")]
fn symlink(target: &Path, link: &Path) -> Result<(), std::io::Error> {
    std::os::unix::fs::symlink(target, link)
}

/// Create a symlink file on windows systems
#[cfg(target_family = "windows")]
fn symlink(target: &Path, link: &Path) -> Result<(), std::io::Error> {
    let resolved = link.parent().map(|dir| dir.join(target));
    if resolved.map(|p| p.is_dir()).unwrap_or(false) {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}

/// Recursively copy `source` into `dest`. Symlinks are recreated rather than followed.
pub fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source)?;
        let target = dest.join(relative);
        let file_type = entry.file_type();

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target).with_context(|| {
                format!(
                    "Failed to create symlink: {} -> {}",
                    target.display(),
                    link.display()
                )
            })?;
        } else if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {}", entry.path().display()))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::BTreeMap;
    use std::io::Write;

    use crate::test::*;

    /// Build a tar stream containing a single project directory.
    fn project_tar(top_level: &[&str]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        for dir in top_level {
            for (path, contents) in [
                ("Cargo.toml", mock_package_manifest("demo")),
                ("src/lib.rs", "pub fn demo() {}\n".to_owned()),
            ] {
                let mut header = tar::Header::new_gnu();
                header.set_size(contents.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(
                        &mut header,
                        format!("{}/{}", dir, path),
                        contents.as_bytes(),
                    )
                    .unwrap();
            }
        }

        builder.into_inner().unwrap()
    }

    fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
        WalkDir::new(root)
            .into_iter()
            .map(|entry| entry.unwrap())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| {
                (
                    entry.path().strip_prefix(root).unwrap().to_path_buf(),
                    fs::read(entry.path()).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn select_rejects_both_sources() {
        let result = SourceInput::select(Some(Path::new("/src")), Some("/src.tar.zst"));
        assert!(matches!(
            result,
            Err(VendorError::ConflictingSources { .. })
        ));
    }

    #[test]
    fn select_single_source() {
        assert_eq!(
            SourceInput::select(Some(Path::new("/src")), None).unwrap(),
            Some(SourceInput::Directory(Path::new("/src")))
        );
        assert_eq!(
            SourceInput::select(None, Some("/src.tar")).unwrap(),
            Some(SourceInput::Archive("/src.tar"))
        );
        assert_eq!(SourceInput::select(None, None).unwrap(), None);
    }

    #[test]
    fn zstd_and_gzip_archives_materialize_identically() {
        let inputs = tempfile::tempdir().unwrap();
        let tar_bytes = project_tar(&["demo-1.0.0"]);

        let zst_path = inputs.as_ref().join("demo-1.0.0.tar.zst");
        fs::write(&zst_path, zstd::stream::encode_all(tar_bytes.as_slice(), 3).unwrap()).unwrap();

        let gz_path = inputs.as_ref().join("demo-1.0.0.tar.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&gz_path).unwrap(),
            flate2::Compression::default(),
        );
        encoder.write_all(&tar_bytes).unwrap();
        encoder.finish().unwrap();

        let zst_workspace = tempfile::tempdir().unwrap();
        let zst_root = SourceInput::Archive(zst_path.to_str().unwrap())
            .materialize(zst_workspace.as_ref())
            .unwrap();

        let gz_workspace = tempfile::tempdir().unwrap();
        let gz_root = SourceInput::Archive(gz_path.to_str().unwrap())
            .materialize(gz_workspace.as_ref())
            .unwrap();

        assert_eq!(zst_root.file_name().unwrap(), "demo-1.0.0");
        assert_eq!(gz_root.file_name().unwrap(), "demo-1.0.0");

        let zst_tree = snapshot(&zst_root);
        assert_eq!(zst_tree.len(), 2);
        assert_eq!(zst_tree, snapshot(&gz_root));

        // The intermediate tar is not left behind
        assert!(!zst_workspace.as_ref().join("source.tar").exists());
    }

    #[test]
    fn archive_glob_takes_first_match() {
        let inputs = tempfile::tempdir().unwrap();
        let tar_bytes = project_tar(&["demo-1.0.0"]);
        fs::write(inputs.as_ref().join("demo-1.0.0.tar"), &tar_bytes).unwrap();

        let pattern = format!("{}/demo-*.tar", inputs.as_ref().display());
        let workspace = tempfile::tempdir().unwrap();
        let root = SourceInput::Archive(&pattern)
            .materialize(workspace.as_ref())
            .unwrap();

        assert!(root.join("Cargo.toml").exists());
    }

    #[test]
    fn archive_glob_without_match() {
        let inputs = tempfile::tempdir().unwrap();
        let pattern = format!("{}/*.tar.zst", inputs.as_ref().display());
        let workspace = tempfile::tempdir().unwrap();

        let result = SourceInput::Archive(&pattern).materialize(workspace.as_ref());
        assert!(matches!(result, Err(VendorError::ArchiveNotFound { .. })));
    }

    #[test]
    fn archive_with_multiple_top_level_dirs() {
        let inputs = tempfile::tempdir().unwrap();
        let archive = inputs.as_ref().join("multi.tar");
        fs::write(&archive, project_tar(&["one", "two"])).unwrap();
        let workspace = tempfile::tempdir().unwrap();

        let result = SourceInput::Archive(archive.to_str().unwrap()).materialize(workspace.as_ref());
        assert!(matches!(
            result,
            Err(VendorError::SourceLayout { entries: 2, .. })
        ));
    }

    #[test]
    fn empty_archive() {
        let inputs = tempfile::tempdir().unwrap();
        let archive = inputs.as_ref().join("empty.tar");
        fs::write(&archive, tar::Builder::new(Vec::new()).into_inner().unwrap()).unwrap();
        let workspace = tempfile::tempdir().unwrap();

        let result = SourceInput::Archive(archive.to_str().unwrap()).materialize(workspace.as_ref());
        assert!(matches!(
            result,
            Err(VendorError::SourceLayout { entries: 0, .. })
        ));
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn copy_tree_preserves_symlinks() {
        let source = tempfile::tempdir().unwrap();
        let project = source.as_ref().join("project");
        fs::create_dir_all(project.join("src")).unwrap();
        fs::write(project.join("Cargo.toml"), mock_package_manifest("project")).unwrap();
        fs::write(project.join("src/lib.rs"), "").unwrap();
        symlink(Path::new("src/lib.rs"), &project.join("lib.rs")).unwrap();

        let workspace = tempfile::tempdir().unwrap();
        let root = SourceInput::Directory(&project)
            .materialize(workspace.as_ref())
            .unwrap();

        assert_eq!(root, workspace.as_ref().join("project"));
        assert!(root.join("Cargo.toml").is_file());

        let link = root.join("lib.rs");
        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("src/lib.rs"));
    }
}
