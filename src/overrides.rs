//! BSA override markers.
//!
//! With JIP LN NVSE installed, an empty `<name>.override` next to
//! `<name>.bsa` makes that archive win over earlier loaded archives, like
//! newer Bethesda titles do by default.

use std::{
    fs::{self, OpenOptions},
    io,
    path::{Path, PathBuf},
};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const ARCHIVE_EXTENSION: &str = "bsa";
pub const MARKER_EXTENSION: &str = "override";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideScan {
    pub created: Vec<PathBuf>,
    pub failures: usize,
}

impl OverrideScan {
    pub fn created_any(&self) -> bool {
        !self.created.is_empty()
    }

    fn record(&mut self, archive: &Path) {
        match ensure_marker(archive) {
            Ok(Some(marker)) => {
                info!(
                    "An override file for {} was missing, one was generated",
                    archive.display()
                );
                self.created.push(marker);
            }
            Ok(None) => {}
            Err(err) => {
                warn!("Failed to create override for {}: {err}", archive.display());
                self.failures += 1;
            }
        }
    }
}

pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
        .unwrap_or(false)
}

pub fn marker_path(archive: &Path) -> PathBuf {
    archive.with_extension(MARKER_EXTENSION)
}

/// Creates the marker if it is missing. Never truncates an existing one.
pub fn ensure_marker(archive: &Path) -> io::Result<Option<PathBuf>> {
    let marker = marker_path(archive);
    match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(_) => Ok(Some(marker)),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(err),
    }
}

fn is_vcs_dir(name: &str) -> bool {
    matches!(name, ".git" | ".svn" | ".hg")
}

/// Archives directly inside `mod_dir`; used right after a mod is enabled.
pub fn create_for_mod(mod_dir: &Path) -> OverrideScan {
    let mut scan = OverrideScan::default();
    let entries = match fs::read_dir(mod_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(
                "Failed to create override files in {}: {err}",
                mod_dir.display()
            );
            scan.failures += 1;
            return scan;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping entry in {}: {err}", mod_dir.display());
                scan.failures += 1;
                continue;
            }
        };
        let path = entry.path();
        let is_file = entry.file_type().map(|kind| kind.is_file()).unwrap_or(false);
        if is_file && is_archive(&path) {
            scan.record(&path);
        }
    }

    scan
}

/// Every archive below the staging root, skipping VCS metadata.
pub fn create_for_staging(staging: &Path) -> OverrideScan {
    let mut scan = OverrideScan::default();
    let walker = WalkDir::new(staging)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || !is_vcs_dir(&entry.file_name().to_string_lossy())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry under {}: {err}", staging.display());
                scan.failures += 1;
                continue;
            }
        };
        if entry.file_type().is_file() && is_archive(entry.path()) {
            scan.record(entry.path());
        }
    }

    scan
}
