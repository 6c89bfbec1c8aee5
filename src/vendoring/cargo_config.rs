//! Tools for parsing the [source replacement](https://doc.rust-lang.org/cargo/reference/source-replacement.html)
//! config printed by `cargo vendor`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use serde::Deserialize;

/// The [`[source]`](https://doc.rust-lang.org/cargo/reference/config.html#source)
/// table entries `cargo vendor` emits.
#[derive(Debug, Default, Deserialize)]
pub struct Source {
    /// replace this source with the given named source
    #[serde(rename = "replace-with")]
    pub replace_with: Option<String>,

    /// A local directory holding vendored sources
    pub directory: Option<PathBuf>,

    /// URL to a git source
    pub git: Option<String>,
}

/// A subset of a Cargo configuration file. The schema here is only what
/// `cargo vendor` prints on standard output.
#[derive(Debug, Default, Deserialize)]
pub struct VendorConfig {
    /// source definition and replacement
    #[serde(default = "BTreeMap::new")]
    pub source: BTreeMap<String, Source>,
}

impl FromStr for VendorConfig {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

impl VendorConfig {
    /// The directories sources are replaced with.
    pub fn vendored_directories(&self) -> Vec<&Path> {
        self.source
            .values()
            .filter_map(|source| source.directory.as_deref())
            .collect()
    }

    /// The URLs of every git source that was vendored.
    pub fn git_sources(&self) -> Vec<&str> {
        self.source
            .values()
            .filter_map(|source| source.git.as_deref())
            .collect()
    }

    /// Look up the source a named source is replaced with.
    pub fn replacement_for(&self, name: &str) -> Option<&Source> {
        let replacement = self.source.get(name)?.replace_with.as_ref()?;
        self.source.get(replacement)
    }
}
