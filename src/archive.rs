use anyhow::{bail, Context, Result};
use std::{
    fs, io,
    path::Path,
    process::{Command, Stdio},
};

/// Extracts a downloaded mod archive into `dest`.
pub fn extract_archive(path: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("create {}", dest.display()))?;
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "zip" => extract_zip(path, dest),
        "7z" => extract_7z(path, dest),
        _ => match extract_with_7z(path, dest)? {
            Some(()) => Ok(()),
            None => bail!("unsupported archive format: {}", path.display()),
        },
    }
}

fn extract_zip(path: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(path).context("open zip")?;
    let mut archive = zip::ZipArchive::new(file).context("read zip")?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).context("zip entry")?;
        let Some(out_path) = file.enclosed_name() else {
            continue;
        };

        let out_path = dest.join(out_path);
        if file.is_dir() {
            fs::create_dir_all(&out_path).context("create zip dir")?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).context("create zip dir")?;
        }

        let mut out_file = fs::File::create(&out_path).context("write zip entry")?;
        io::copy(&mut file, &mut out_file).context("extract zip entry")?;
    }

    Ok(())
}

fn extract_7z(path: &Path, dest: &Path) -> Result<()> {
    match extract_with_7z(path, dest) {
        Ok(Some(())) => Ok(()),
        Ok(None) => sevenz_rust::decompress_file(path, dest)
            .with_context(|| format!("extract 7z archive {path:?}")),
        Err(err) => Err(err),
    }
}

/// `Ok(None)` when no `7z` binary is installed.
fn extract_with_7z(path: &Path, dest: &Path) -> Result<Option<()>> {
    let output = Command::new("7z")
        .arg("x")
        .arg("-y")
        .arg(format!("-o{}", dest.display()))
        .arg(path)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output();

    let output = match output {
        Ok(output) => output,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).context("launch 7z");
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("7z extraction failed: {}", stderr.trim()));
    }

    Ok(Some(()))
}
