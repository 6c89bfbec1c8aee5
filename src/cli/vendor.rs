//! The cli entrypoint for producing a vendor bundle

use std::convert::Infallible;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::archive::{archive_file_name, config_file_name, sha256_file, write_bundle};
use crate::codec::Codec;
use crate::error::VendorError;
use crate::logging::LogLevel;
use crate::manifest;
use crate::source::SourceInput;
use crate::vendoring::{Cargo, VendorLock, VENDOR_DIR};

/// A boolean option given as text. `false` and `0` disable it, any other
/// value enables it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Toggle(pub bool);

impl FromStr for Toggle {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let disabled = matches!(s.trim().to_lowercase().as_str(), "false" | "0");
        Ok(Toggle(!disabled))
    }
}

/// Package every dependency of a Cargo project into an offline vendor bundle
#[derive(Parser, Debug)]
#[clap(about, version)]
pub struct VendorOptions {
    /// A directory containing the project sources
    #[clap(long)]
    pub source_directory: Option<PathBuf>,

    /// A path or glob pattern matching a tar archive of the project sources
    #[clap(long)]
    pub source_archive: Option<String>,

    /// The directory the bundle and cargo config are written to
    #[clap(long, default_value = ".")]
    pub output_directory: PathBuf,

    /// A manifest to vendor, relative to the project sources. The first is the
    /// primary manifest, any others are synced into the same vendor directory.
    #[clap(long = "manifest-path")]
    pub manifest_paths: Vec<PathBuf>,

    /// Whether or not to run `cargo update` before vendoring
    #[clap(long, env = "VENDOR_BUNDLE_UPDATE", default_value = "false")]
    pub update: Toggle,

    /// A tag added to the names of produced files
    #[clap(long)]
    pub tag: Option<String>,

    /// The compression used for the bundle (zst, gz, bz2, xz or tar)
    #[clap(long, default_value = "zst")]
    pub compression: Codec,

    /// The path to a Cargo binary
    #[clap(long, env = "CARGO", default_value = "cargo")]
    pub cargo: PathBuf,

    /// Enable debug logging
    #[clap(long, env = "VENDOR_BUNDLE_DEBUG")]
    pub debug: bool,
}

impl VendorOptions {
    pub fn log_level(&self) -> LogLevel {
        if self.debug {
            LogLevel::Debug
        } else {
            LogLevel::Info
        }
    }
}

/// The files produced by a successful run
#[derive(Debug)]
pub struct VendorBundle {
    /// The vendor archive
    pub archive: PathBuf,

    /// The source replacement config printed by `cargo vendor`
    pub cargo_config: PathBuf,

    /// Lockfiles stored in the archive
    pub locks: Vec<VendorLock>,

    /// The sha256 of `archive`
    pub sha256: String,
}

/// Materialize the project, vendor its dependencies and write the bundle.
pub fn vendor(opt: VendorOptions) -> Result<VendorBundle, VendorError> {
    let input = SourceInput::select(opt.source_directory.as_deref(), opt.source_archive.as_deref())?;

    let workspace = tempfile::Builder::new()
        .prefix("vendor-bundle")
        .tempdir()
        .context("Failed to create a temporary workspace")?;

    let source_root = match input {
        Some(input) => input.materialize(workspace.path())?,
        None => {
            return Err(VendorError::manifest_not_found(
                "neither a source directory nor a source archive was given",
            ))
        }
    };

    let project = manifest::locate(&source_root, &opt.manifest_paths)?;
    let cargo = Cargo::new(opt.cargo.clone())?;

    let locks = if opt.update.0 {
        cargo.update(&project)?
    } else {
        Vec::new()
    };

    let config = cargo.vendor(&project)?;

    // Projects without dependencies leave no vendor directory behind
    let vendor_dir = project.root.join(VENDOR_DIR);
    fs::create_dir_all(&vendor_dir)?;

    let tag = opt.tag.as_deref();
    let archive = opt
        .output_directory
        .join(archive_file_name(tag, opt.compression));
    info!("Packaging {} with {} compression", VENDOR_DIR, opt.compression);
    write_bundle(&vendor_dir, &locks, opt.compression, workspace.path(), &archive)?;

    let cargo_config = opt.output_directory.join(config_file_name(tag));
    fs::write(&cargo_config, &config)
        .with_context(|| format!("Failed to write {}", cargo_config.display()))?;

    let sha256 = sha256_file(&archive)?;
    info!("{} sha256: {}", archive.display(), sha256);

    workspace
        .close()
        .context("Failed to remove the temporary workspace")?;

    Ok(VendorBundle {
        archive,
        cargo_config,
        locks,
        sha256,
    })
}
