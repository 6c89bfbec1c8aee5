//! Writes the vendor bundle archive

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use hex::ToHex;
use sha2::{Digest, Sha256};
use tar::{Builder, Header, HeaderMode};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::codec::Codec;
use crate::vendoring::VendorLock;

/// The owner and group recorded for every archived entry.
pub const OWNER: &str = "root";

/// Compression level used for zstd bundles.
const ZSTD_LEVEL: i32 = 19;

/// Permissions of the published bundle. Temporary files are owner-only.
#[cfg(target_family = "unix")]
const BUNDLE_MODE: u32 = 0o644;

/// `vendor[-<tag>].tar[.<ext>]`
pub fn archive_file_name(tag: Option<&str>, codec: Codec) -> String {
    let mut name = match tag.filter(|t| !t.is_empty()) {
        Some(tag) => format!("vendor-{}.tar", tag),
        None => "vendor.tar".to_owned(),
    };
    if let Some(ext) = codec.extension() {
        name.push('.');
        name.push_str(ext);
    }
    name
}

/// `cargo_config[_<tag>]`
pub fn config_file_name(tag: Option<&str>) -> String {
    match tag.filter(|t| !t.is_empty()) {
        Some(tag) => format!("cargo_config_{}", tag),
        None => "cargo_config".to_owned(),
    }
}

/// Archive `vendor_dir` followed by `locks` into `dest`.
///
/// The archive is assembled in a temporary file next to `dest` and only moved
/// into place once complete. `scratch_dir` holds the intermediate tar for
/// codecs that are streamed separately.
pub fn write_bundle(
    vendor_dir: &Path,
    locks: &[VendorLock],
    codec: Codec,
    scratch_dir: &Path,
    dest: &Path,
) -> Result<()> {
    let dest_dir = dest
        .parent()
        .context("The bundle path should have a parent directory")?;
    fs::create_dir_all(dest_dir)?;

    let staged = tempfile::Builder::new()
        .prefix(".vendor-bundle")
        .tempfile_in(dest_dir)
        .with_context(|| format!("Failed to create a temporary file in {}", dest_dir.display()))?;

    {
        let out = BufWriter::new(staged.as_file());
        match codec {
            Codec::Zstd => {
                let tar_path = scratch_dir.join("vendor.tar");
                let tar = BufWriter::new(File::create(&tar_path)?);
                write_tar(tar, vendor_dir, locks)?.flush()?;
                compress_zstd(&tar_path, out)?.flush()?;
                fs::remove_file(&tar_path)?;
            }
            Codec::Gzip => {
                let encoder = flate2::write::GzEncoder::new(out, flate2::Compression::best());
                write_tar(encoder, vendor_dir, locks)?.finish()?.flush()?;
            }
            Codec::Bzip2 => {
                let encoder = bzip2::write::BzEncoder::new(out, bzip2::Compression::best());
                write_tar(encoder, vendor_dir, locks)?.finish()?.flush()?;
            }
            Codec::Xz => {
                let encoder = xz2::write::XzEncoder::new(out, 9);
                write_tar(encoder, vendor_dir, locks)?.finish()?.flush()?;
            }
            Codec::None => {
                write_tar(out, vendor_dir, locks)?.flush()?;
            }
        }
    }

    staged.as_file().sync_all()?;
    publish_permissions(staged.path())?;
    staged
        .persist(dest)
        .map_err(|err| err.error)
        .with_context(|| format!("Failed to write bundle: {}", dest.display()))?;

    info!("Wrote {}", dest.display());
    Ok(())
}

#[cfg(target_family = "unix")]
fn publish_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(BUNDLE_MODE))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(target_family = "windows")]
fn publish_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Stream-compress a plain tar into `out` using every available core.
fn compress_zstd<W: Write>(tar_path: &Path, out: W) -> Result<W> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1);
    debug!("Compressing with zstd level {} on {} workers", ZSTD_LEVEL, workers);

    let mut encoder = zstd::stream::write::Encoder::new(out, ZSTD_LEVEL)?;
    encoder.include_checksum(true)?;
    encoder.multithread(workers)?;

    let mut tar = BufReader::new(File::open(tar_path)?);
    io::copy(&mut tar, &mut encoder).context("Failed to compress vendor bundle")?;

    Ok(encoder.finish()?)
}

/// Write the bundle members into a tar stream and return the underlying writer.
fn write_tar<W: Write>(writer: W, vendor_dir: &Path, locks: &[VendorLock]) -> Result<W> {
    let mut builder = Builder::new(writer);
    builder.mode(HeaderMode::Deterministic);

    let base = vendor_dir
        .parent()
        .context("The vendor directory should have a parent directory")?;

    let walker = WalkDir::new(vendor_dir)
        .follow_links(false)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));

    for entry in walker {
        let entry = entry?;
        let name = entry.path().strip_prefix(base)?;
        let meta = entry.path().symlink_metadata()?;
        let mut header = neutral_header(&meta)?;

        if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path())?;
            builder.append_link(&mut header, name, target)?;
        } else if meta.is_dir() {
            builder.append_data(&mut header, name, io::empty())?;
        } else {
            let file = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            builder.append_data(&mut header, name, file)?;
        }
    }

    for lock in locks {
        let meta = fs::metadata(&lock.path)
            .with_context(|| format!("Failed to read lockfile: {}", lock.path.display()))?;
        let mut header = neutral_header(&meta)?;
        builder.append_data(&mut header, &lock.name, File::open(&lock.path)?)?;
    }

    builder.into_inner().context("Failed to finalize tar archive")
}

/// A header for `meta` that does not record who created the archive.
fn neutral_header(meta: &fs::Metadata) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(meta, HeaderMode::Deterministic);
    if !meta.is_file() {
        header.set_size(0);
    }
    header.set_uid(0);
    header.set_gid(0);
    header.set_username(OWNER)?;
    header.set_groupname(OWNER)?;
    Ok(header)
}

/// The hex encoded sha256 of a file
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().encode_hex::<String>())
}
