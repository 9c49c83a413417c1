//! Binary identity probes: hash a file and classify it against known digests.

use crate::{
    finding::Finding,
    fnv::{GamePaths, PATCH_4GB_MOD_ID, PATCH_4GB_MOD_ID_EPIC},
};
use md5::{Digest, Md5};
use std::{io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};
use tracing::{debug, error};

/// Fixed allow/deny list of lowercase hex MD5 digests.
#[derive(Debug, Clone, Copy)]
pub struct KnownHashSet(&'static [&'static str]);

impl KnownHashSet {
    pub const fn new(hashes: &'static [&'static str]) -> Self {
        Self(hashes)
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.0.iter().any(|known| *known == digest)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub const PATCHED_EXECUTABLES: KnownHashSet = KnownHashSet::new(&[
    "3e00e9397d71fae83af39129471024a7", // GOG
    "27c096c5ad9657af4f39f764231521da", // Epic Games
    "50c70408a000acade2ed257c87cecbc2", // Steam
    "efee1ff64ea7f2b179d888e4a6c154c0", // Steam, Russian
]);

/// Loader builds from the old silverlock.org distribution.
pub const LEGACY_NVSE_LOADERS: KnownHashSet =
    KnownHashSet::new(&["23bd7b28b6022c23ff1fb2443467ad99"]);

pub async fn file_md5(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// `None` when the file could not be read; nothing can be asserted then.
pub async fn classify(path: &Path, known: KnownHashSet) -> Option<bool> {
    match file_md5(path).await {
        Ok(digest) => {
            debug!("{} hashes to {digest}", path.display());
            Some(known.contains(&digest))
        }
        Err(err) => {
            error!("Error reading {}: {err}", path.display());
            None
        }
    }
}

pub async fn is_executable_patched(paths: &GamePaths, known: KnownHashSet) -> bool {
    classify(&paths.executable, known).await == Some(true)
}

/// Reports an unpatched executable. The download-and-run fix is attached by
/// the caller since it needs the host pipeline.
pub async fn unpatched_executable(
    paths: &GamePaths,
    known: KnownHashSet,
    force: bool,
) -> Option<Finding> {
    let patched = match classify(&paths.executable, known).await {
        Some(patched) => patched,
        None if force => false,
        None => return None,
    };
    if patched && !force {
        return None;
    }

    let recheck_paths = paths.clone();
    Some(
        Finding::warning("Unpatched game executable", unpatched_text())
            .with_recheck(move || {
                let paths = recheck_paths.clone();
                async move { is_executable_patched(&paths, known).await }
            }),
    )
}

fn unpatched_text() -> String {
    format!(
        "The game executable hasn't been patched with the 4GB Patcher. It won't \
         load xNVSE and will be limited to 2GB of RAM.<br/><br/>\
         The patch can be downloaded, installed and run automatically.<br/><br/>\
         Alternatively, you can download and install the patch according to your \
         platform from the link below:<br/><br/>\
         [url=https://www.nexusmods.com/newvegas/mods/{PATCH_4GB_MOD_ID}]Steam/GOG Patcher[/url]<br/><br/>\
         [url=https://www.nexusmods.com/newvegas/mods/{PATCH_4GB_MOD_ID_EPIC}]Epic Games Patcher[/url]<br/><br/>\
         After patching the game you should only launch the game from the game \
         executable and not from New Vegas Script Extender to avoid loading the \
         script extender twice."
    )
}

pub async fn is_legacy_nvse(paths: &GamePaths, legacy: KnownHashSet) -> bool {
    // A missing loader is the common case and not worth an error line.
    if !paths.nvse_loader.is_file() {
        return false;
    }
    classify(&paths.nvse_loader, legacy).await == Some(true)
}

pub async fn legacy_nvse(paths: &GamePaths, legacy: KnownHashSet, force: bool) -> Option<Finding> {
    if !force && !is_legacy_nvse(paths, legacy).await {
        return None;
    }

    let recheck_paths = paths.clone();
    Some(
        Finding::warning(
            "Old NVSE version detected",
            "You are using an old legacy version of NVSE hosted on the silverlock \
             website which might cause issues with current plugin mods.<br/><br/>\
             A newer version of NVSE can be found \
             [url=https://www.nexusmods.com/newvegas/mods/67883]here[/url]",
        )
        .with_recheck(move || {
            let paths = recheck_paths.clone();
            async move { !is_legacy_nvse(&paths, legacy).await }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use std::fs;

    // md5("abc")
    const ABC: KnownHashSet = KnownHashSet::new(&[
        "00000000000000000000000000000000",
        "900150983cd24fb0d6963f7d28e17f72",
    ]);

    fn game_with_executable(contents: &[u8]) -> (tempfile::TempDir, GamePaths) {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join(crate::fnv::EXECUTABLE), contents).expect("write exe");
        let paths = GamePaths::from_root(temp.path());
        (temp, paths)
    }

    #[tokio::test]
    async fn md5_matches_reference_digest() {
        let (_temp, paths) = game_with_executable(b"abc");
        let digest = file_md5(&paths.executable).await.expect("hash");
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn membership_is_exact() {
        assert!(ABC.contains("900150983cd24fb0d6963f7d28e17f72"));
        assert!(!ABC.contains("900150983cd24fb0"));
        assert!(!ABC.contains("900150983CD24FB0D6963F7D28E17F72"));
        assert_eq!(PATCHED_EXECUTABLES.len(), 4);
    }

    #[tokio::test]
    async fn known_executable_has_no_finding() {
        let (_temp, paths) = game_with_executable(b"abc");
        assert!(unpatched_executable(&paths, ABC, false).await.is_none());
    }

    #[tokio::test]
    async fn unknown_executable_warns_with_recheck() {
        let (_temp, paths) = game_with_executable(b"vanilla build");
        let finding = unpatched_executable(&paths, ABC, false)
            .await
            .expect("finding");
        assert_eq!(finding.severity, Severity::Warning);
        assert_eq!(finding.description.short, "Unpatched game executable");
        assert_eq!(finding.recheck().await, Some(false));

        fs::write(&paths.executable, b"abc").expect("patch");
        assert_eq!(finding.recheck().await, Some(true));
    }

    #[tokio::test]
    async fn missing_executable_is_not_a_finding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = GamePaths::from_root(temp.path());
        assert!(unpatched_executable(&paths, ABC, false).await.is_none());
        assert!(unpatched_executable(&paths, ABC, true).await.is_some());
    }

    #[tokio::test]
    async fn legacy_loader_is_flagged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = GamePaths::from_root(temp.path());
        assert!(legacy_nvse(&paths, ABC, false).await.is_none());

        fs::write(&paths.nvse_loader, b"abc").expect("write loader");
        let finding = legacy_nvse(&paths, ABC, false).await.expect("finding");
        assert_eq!(finding.recheck().await, Some(false));

        fs::write(&paths.nvse_loader, b"new loader").expect("update loader");
        assert_eq!(finding.recheck().await, Some(true));
    }
}
