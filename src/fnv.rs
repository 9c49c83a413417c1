use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const GAME_NAME: &str = "Fallout: New Vegas";
pub const SHORTNAME: &str = "falloutnv";
const STEAM_APP_ID: &str = "22380";

pub const EXECUTABLE: &str = "FalloutNV.exe";
pub const NVSE_LOADER: &str = "nvse_loader.exe";
pub const TRANSLATION_PLUGIN: &str = "FalloutNV_lang.esp";

pub const JIP_LN_NVSE_MOD_ID: u64 = 58277;
pub const JIP_LN_NVSE_DLL: &str = "jip_nvse.dll";
pub const PATCH_4GB_MOD_ID: u64 = 62552;
pub const PATCH_4GB_MOD_ID_EPIC: u64 = 81281;
pub const PATCH_4GB_EXECUTABLES: [&str; 3] = ["FNVpatch.exe", "FalloutNVpatch.exe", "Patcher.exe"];

#[derive(Debug, Clone)]
pub struct GamePaths {
    pub game_root: PathBuf,
    pub data_dir: PathBuf,
    pub executable: PathBuf,
    pub nvse_loader: PathBuf,
    pub translation_plugin: PathBuf,
}

impl GamePaths {
    pub fn from_root(game_root: &Path) -> Self {
        let data_dir = data_dir_for(game_root);
        Self {
            game_root: game_root.to_path_buf(),
            executable: game_root.join(EXECUTABLE),
            nvse_loader: game_root.join(NVSE_LOADER),
            translation_plugin: data_dir.join(TRANSLATION_PLUGIN),
            data_dir,
        }
    }
}

pub fn detect_paths(game_root_override: Option<&Path>) -> Result<GamePaths> {
    let game_root = match game_root_override {
        Some(path) => path.to_path_buf(),
        None => find_game_root().context("locate Fallout: New Vegas game directory")?,
    };

    if !looks_like_game_root(&game_root) {
        bail!(
            "invalid game root: expected {EXECUTABLE} or Data/ in {}",
            game_root.display()
        );
    }

    Ok(GamePaths::from_root(&game_root))
}

// The game ships "Data" but mod tools often recreate it lowercase.
fn data_dir_for(game_root: &Path) -> PathBuf {
    for name in ["Data", "data"] {
        let candidate = game_root.join(name);
        if candidate.is_dir() {
            return candidate;
        }
    }
    game_root.join("data")
}

fn find_game_root() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(home) = dirs_home() {
        candidates.push(home.join(".local/share/Steam"));
        candidates.push(home.join(".steam/steam"));
    }
    for base in [
        "C:\\Program Files (x86)\\Steam",
        "C:\\Program Files\\Steam",
    ] {
        candidates.push(PathBuf::from(base));
    }

    let mut libraries = Vec::new();
    for base in candidates {
        let vdf = base.join("steamapps/libraryfolders.vdf");
        if vdf.exists() {
            if let Ok(paths) = parse_steam_library_paths(&vdf) {
                libraries.extend(paths);
            }
        }
        libraries.push(base);
    }

    for lib in libraries {
        let candidate = lib.join("steamapps/common").join("Fallout New Vegas");
        if looks_like_game_root(&candidate) {
            return Some(candidate);
        }
    }

    None
}

/// Proton prefix used by Steam on Linux; the GECK reads its ini from here.
pub fn proton_documents_dir() -> Option<PathBuf> {
    let home = dirs_home()?;
    let documents = home
        .join(".local/share/Steam/steamapps/compatdata")
        .join(STEAM_APP_ID)
        .join("pfx/drive_c/users/steamuser/Documents");
    documents.is_dir().then_some(documents)
}

fn parse_steam_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    Ok(steam_library_paths(&raw))
}

fn steam_library_paths(raw: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }

    paths
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.join(EXECUTABLE).is_file() || path.join("Data").is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_paths_unescape_backslashes() {
        let raw = r#"
"libraryfolders"
{
    "0"
    {
        "path"      "C:\\Program Files (x86)\\Steam"
        "label"     ""
    }
    "1"
    {
        "path"      "/mnt/games/SteamLibrary"
    }
}
"#;
        let paths = steam_library_paths(raw);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("C:\\Program Files (x86)\\Steam"),
                PathBuf::from("/mnt/games/SteamLibrary"),
            ]
        );
    }

    #[test]
    fn game_paths_prefer_existing_data_dir() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("Data")).expect("data dir");

        let paths = GamePaths::from_root(temp.path());
        assert_eq!(paths.data_dir, temp.path().join("Data"));
        assert_eq!(
            paths.translation_plugin,
            temp.path().join("Data").join(TRANSLATION_PLUGIN)
        );
        assert!(looks_like_game_root(temp.path()));
    }

    #[test]
    fn detect_rejects_unrelated_directory() {
        let temp = tempfile::tempdir().expect("tempdir");
        assert!(detect_paths(Some(temp.path())).is_err());
    }
}
