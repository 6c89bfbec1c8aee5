//! Runs `cargo update` and `cargo vendor` against a materialized project

mod cargo_config;

use std::env;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::error::VendorError;
use crate::manifest::ProjectManifests;

pub use self::cargo_config::*;

pub const LOCKFILE_NAME: &str = "Cargo.lock";

/// The directory, relative to the project root, dependencies are vendored into.
pub const VENDOR_DIR: &str = "vendor";

const CRATES_IO: &str = "crates-io";

/// A lockfile captured during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorLock {
    /// The absolute path of the lockfile.
    pub path: PathBuf,

    /// The name the lockfile is stored under in the bundle, relative to the project root.
    pub name: String,
}

/// A wrapper around the cargo binary used for a run.
pub struct Cargo {
    cargo_bin: PathBuf,
}

impl Cargo {
    /// A bare program name is looked up on `PATH`. A relative path is taken
    /// from the current directory, since commands run inside the project root.
    pub fn new(cargo_bin: PathBuf) -> Result<Self, VendorError> {
        let cargo_bin = if cargo_bin.is_relative() && cargo_bin.components().count() > 1 {
            env::current_dir()?.join(cargo_bin)
        } else {
            cargo_bin
        };

        Ok(Self { cargo_bin })
    }

    /// Refresh the lockfile of every manifest in `project` and return where they were written.
    pub fn update(&self, project: &ProjectManifests) -> Result<Vec<VendorLock>, VendorError> {
        let mut locks = Vec::new();

        if project.is_explicit() {
            for manifest in &project.manifests {
                self.run(&project.root, &update_args(Some(manifest)))?;

                let manifest_dir = manifest.parent().unwrap_or_else(|| Path::new(""));
                locks.push(capture_lockfile(&project.root, &manifest_dir.join(LOCKFILE_NAME))?);
            }
        } else {
            self.run(&project.root, &update_args(None))?;
            locks.push(capture_lockfile(&project.root, Path::new(LOCKFILE_NAME))?);
        }

        Ok(locks)
    }

    /// Vendor all dependencies of `project` into its `vendor` directory and
    /// return the source replacement config cargo printed.
    pub fn vendor(&self, project: &ProjectManifests) -> Result<String, VendorError> {
        let output = self.run(&project.root, &vendor_args(project))?;
        let config = String::from_utf8_lossy(&output.stdout).into_owned();

        match config.parse::<VendorConfig>() {
            Ok(parsed) => {
                for dir in parsed.vendored_directories() {
                    info!("Dependencies vendored into {}", dir.display());
                }
                for url in parsed.git_sources() {
                    debug!("Vendored git source {}", url);
                }
                if parsed.replacement_for(CRATES_IO).is_none() {
                    debug!("No replacement for {} was printed", CRATES_IO);
                }
            }
            Err(err) => warn!("`cargo vendor` printed an unexpected config: {:#}", err),
        }

        Ok(config)
    }

    fn run(&self, cwd: &Path, args: &[OsString]) -> Result<Output, VendorError> {
        let command = describe_command(&self.cargo_bin, args);
        debug!("Running `{}` in {}", command, cwd.display());

        let output = Command::new(&self.cargo_bin)
            .current_dir(cwd)
            .args(args)
            .output()
            .with_context(|| format!("Error running `{}`", command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!("`{}` failed:\n{}", command, stderr);
            return Err(VendorError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(output)
    }
}

/// Arguments for `cargo update`, optionally scoped to one manifest.
pub fn update_args(manifest: Option<&PathBuf>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["update".into()];
    if let Some(manifest) = manifest {
        args.push("--manifest-path".into());
        args.push(manifest.into());
    }
    args
}

/// Arguments for `cargo vendor`. With explicit manifests the first is the
/// `--manifest-path` and every manifest is passed as a `--sync` target.
pub fn vendor_args(project: &ProjectManifests) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["vendor".into(), "--locked".into()];

    if let Some(primary) = project.primary() {
        args.push("--manifest-path".into());
        args.push(primary.into());
    }
    for manifest in &project.manifests {
        args.push("--sync".into());
        args.push(manifest.into());
    }

    args.push(VENDOR_DIR.into());
    args
}

fn describe_command(bin: &Path, args: &[OsString]) -> String {
    std::iter::once(bin.as_os_str())
        .chain(args.iter().map(OsString::as_os_str))
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check a freshly updated lockfile loads and record it.
fn capture_lockfile(root: &Path, relative: &Path) -> Result<VendorLock, VendorError> {
    let path = root.join(relative);
    let lockfile = cargo_lock::Lockfile::load(&path)
        .with_context(|| format!("Failed to load lockfile: {}", path.display()))?;

    let name = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");

    info!("Captured {} ({} packages)", name, lockfile.packages.len());

    Ok(VendorLock { path, name })
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs;

    use crate::test::*;

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn update_args_default_manifest() {
        assert_eq!(as_strings(update_args(None)), vec!["update"]);
    }

    #[test]
    fn update_args_explicit_manifest() {
        let manifest = PathBuf::from("crates/a/Cargo.toml");
        assert_eq!(
            as_strings(update_args(Some(&manifest))),
            vec!["update", "--manifest-path", "crates/a/Cargo.toml"]
        );
    }

    #[test]
    fn vendor_args_default_manifest() {
        let project = ProjectManifests {
            root: PathBuf::from("/project"),
            manifests: Vec::new(),
        };

        assert_eq!(
            as_strings(vendor_args(&project)),
            vec!["vendor", "--locked", "vendor"]
        );
    }

    #[test]
    fn vendor_args_multiple_manifests() {
        let project = ProjectManifests {
            root: PathBuf::from("/project"),
            manifests: vec![
                PathBuf::from("a/Cargo.toml"),
                PathBuf::from("b/Cargo.toml"),
                PathBuf::from("c/Cargo.toml"),
            ],
        };

        let args = as_strings(vendor_args(&project));
        assert_eq!(
            args,
            vec![
                "vendor",
                "--locked",
                "--manifest-path",
                "a/Cargo.toml",
                "--sync",
                "a/Cargo.toml",
                "--sync",
                "b/Cargo.toml",
                "--sync",
                "c/Cargo.toml",
                "vendor",
            ]
        );
        assert_eq!(args.iter().filter(|a| *a == "--sync").count(), 3);
        assert_eq!(args.iter().filter(|a| *a == "--manifest-path").count(), 1);
    }

    #[test]
    fn capture_nested_lockfile() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.as_ref();
        fs::create_dir_all(root.join("crates/a")).unwrap();
        fs::write(root.join("crates/a/Cargo.lock"), mock_cargo_lockfile()).unwrap();

        let lock = capture_lockfile(root, Path::new("crates/a/Cargo.lock")).unwrap();
        assert_eq!(lock.path, root.join("crates/a/Cargo.lock"));
        assert_eq!(lock.name, "crates/a/Cargo.lock");
    }

    #[test]
    fn capture_invalid_lockfile() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.as_ref().join(LOCKFILE_NAME), "]} invalid {[").unwrap();

        assert!(capture_lockfile(temp_dir.as_ref(), Path::new(LOCKFILE_NAME)).is_err());
    }

    #[test]
    fn capture_missing_lockfile() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(capture_lockfile(temp_dir.as_ref(), Path::new(LOCKFILE_NAME)).is_err());
    }

    #[test]
    fn missing_cargo_binary() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cargo = Cargo::new(temp_dir.as_ref().join("no-such-cargo")).unwrap();
        let project = ProjectManifests {
            root: temp_dir.as_ref().to_path_buf(),
            manifests: Vec::new(),
        };

        assert!(matches!(cargo.vendor(&project), Err(VendorError::Other(_))));
    }

    #[test]
    fn cargo_binary_resolution() {
        let cwd = env::current_dir().unwrap();

        let relative = Cargo::new(PathBuf::from("./bin/cargo")).unwrap();
        assert_eq!(relative.cargo_bin, cwd.join("./bin/cargo"));
        assert!(relative.cargo_bin.is_absolute());

        let bare = Cargo::new(PathBuf::from("cargo")).unwrap();
        assert_eq!(bare.cargo_bin, PathBuf::from("cargo"));

        let absolute = cwd.join("cargo");
        assert_eq!(Cargo::new(absolute.clone()).unwrap().cargo_bin, absolute);
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn failing_command() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cargo = Cargo::new(PathBuf::from("false")).unwrap();
        let project = ProjectManifests {
            root: temp_dir.as_ref().to_path_buf(),
            manifests: Vec::new(),
        };

        match cargo.update(&project) {
            Err(VendorError::CommandFailed { command, .. }) => {
                assert_eq!(command, "false update")
            }
            other => panic!("Unexpected result: {:?}", other),
        }
    }
}
