//! Presence probe: the designated file existing is the problem.

use crate::finding::Finding;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Any stat failure, including a dangling link, counts as absent.
pub async fn is_present(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(_) => true,
        Err(err) => {
            debug!("{} not present: {err}", path.display());
            false
        }
    }
}

pub async fn remove_file(path: &Path) -> anyhow::Result<()> {
    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("delete {}", path.display()))?;
    info!("Deleted {}", path.display());
    Ok(())
}

pub async fn translation_plugin(plugin: &Path, force: bool) -> Option<Finding> {
    if !force && !is_present(plugin).await {
        return None;
    }

    let name = plugin
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| plugin.display().to_string());
    let fix_path: PathBuf = plugin.to_path_buf();
    let recheck_path = fix_path.clone();
    Some(
        Finding::warning(
            "Translation plugin present",
            format!(
                "{name} was found in the data folder.<br/><br/>\
                 This translation plugin directly edits thousands of records to change \
                 the language, which will cause many incompatibilities with most mods.\
                 <br/><br/>It is recommended to delete it."
            ),
        )
        .with_fix(move || {
            let path = fix_path.clone();
            async move { remove_file(&path).await }
        })
        .with_recheck(move || {
            let path = recheck_path.clone();
            async move { !is_present(&path).await }
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use std::fs;

    #[tokio::test]
    async fn absent_plugin_has_no_finding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = temp.path().join("FalloutNV_lang.esp");
        assert!(translation_plugin(&plugin, false).await.is_none());
    }

    #[tokio::test]
    async fn fix_removes_plugin_and_clears_finding() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = temp.path().join("FalloutNV_lang.esp");
        fs::write(&plugin, b"TES4").expect("write plugin");

        let finding = translation_plugin(&plugin, false).await.expect("finding");
        assert_eq!(finding.severity, Severity::Warning);
        assert!(finding.description.long.starts_with("FalloutNV_lang.esp"));
        assert!(finding.has_fix());

        finding.apply_fix().await.expect("fix");
        assert!(!plugin.exists());
        assert_eq!(finding.recheck().await, Some(true));
        assert!(translation_plugin(&plugin, false).await.is_none());
    }

    #[tokio::test]
    async fn fix_on_vanished_file_reports_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = temp.path().join("FalloutNV_lang.esp");
        fs::write(&plugin, b"TES4").expect("write plugin");
        let finding = translation_plugin(&plugin, false).await.expect("finding");
        fs::remove_file(&plugin).expect("remove");
        assert!(finding.apply_fix().await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dangling_symlink_counts_as_absent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let plugin = temp.path().join("FalloutNV_lang.esp");
        std::os::unix::fs::symlink(temp.path().join("missing"), &plugin).expect("symlink");
        assert!(!is_present(&plugin).await);
        assert!(translation_plugin(&plugin, false).await.is_none());
    }
}
