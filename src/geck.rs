use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "GECKCustom.ini";

// No trailing newline.
const DEFAULT_CONFIG: &str = "[General]\n\
bUseMultibounds=0\n\
bAllowMultipleMasterLoads=1\n\
bAllowMultipleEditors=1\n\
[Localization]\n\
iExtendedTopicLength=255\n\
bAllowExtendedText=1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeckOutcome {
    Created,
    Existing,
}

/// `<documents>/My Games/FalloutNV`
pub fn config_dir(documents: &Path) -> PathBuf {
    documents.join("My Games").join("FalloutNV")
}

/// Writes the enhanced defaults unless the user already has a config.
pub fn ensure_default_config(documents: &Path) -> Result<GeckOutcome> {
    let dir = config_dir(documents);
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(CONFIG_FILE);

    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Ok(GeckOutcome::Existing)
        }
        Err(err) => {
            return Err(err).with_context(|| format!("access {}", path.display()));
        }
    };
    write_or_discard(&path, &mut file)?;
    info!("Wrote default GECK configuration to {}", path.display());
    Ok(GeckOutcome::Created)
}

/// Removes a partially written config so the next activation retries.
fn write_or_discard(path: &Path, file: &mut impl Write) -> Result<()> {
    let written = file.write_all(DEFAULT_CONFIG.as_bytes()).and_then(|()| file.flush());
    if let Err(err) = written {
        if let Err(remove_err) = fs::remove_file(path) {
            warn!("Failed to remove partial {}: {remove_err}", path.display());
        }
        return Err(err).with_context(|| format!("write {}", path.display()));
    }
    Ok(())
}
