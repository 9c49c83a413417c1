//! Minimal Nexus Mods API v1 client used by the local pipeline.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    fs::File,
    io,
    path::Path,
    time::Duration,
};

const API_BASE: &str = "https://api.nexusmods.com/v1";
const USER_AGENT: &str = concat!("fnvsanity/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatedUser {
    pub name: String,
    #[serde(default)]
    pub is_premium: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModFile {
    pub file_id: u64,
    #[serde(default)]
    pub category_id: u32,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub file_name: String,
}

#[derive(Debug, Deserialize)]
struct ModFiles {
    files: Vec<ModFile>,
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    #[serde(rename = "URI")]
    uri: String,
}

#[derive(Debug, Clone)]
pub struct NexusClient {
    api_key: String,
    agent: ureq::Agent,
}

impl NexusClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(30))
            .build();
        Self {
            api_key: api_key.into(),
            agent,
        }
    }

    fn get(&self, path: &str) -> Result<ureq::Response> {
        let url = format!("{API_BASE}{path}");
        self.agent
            .get(&url)
            .set("User-Agent", USER_AGENT)
            .set("apikey", &self.api_key)
            .call()
            .with_context(|| format!("request {url}"))
    }

    pub fn validate(&self) -> Result<ValidatedUser> {
        self.get("/users/validate.json")?
            .into_json()
            .context("decode user")
    }

    pub fn mod_files(&self, domain: &str, mod_id: u64) -> Result<Vec<ModFile>> {
        let files: ModFiles = self
            .get(&format!("/games/{domain}/mods/{mod_id}/files.json"))?
            .into_json()
            .context("decode mod files")?;
        Ok(files.files)
    }

    /// Direct links are only handed out to premium accounts.
    pub fn download_link(&self, domain: &str, mod_id: u64, file_id: u64) -> Result<String> {
        let links: Vec<DownloadLink> = self
            .get(&format!(
                "/games/{domain}/mods/{mod_id}/files/{file_id}/download_link.json"
            ))?
            .into_json()
            .context("decode download links")?;
        match links.into_iter().next() {
            Some(link) => Ok(link.uri),
            None => bail!("no download link for file {file_id}"),
        }
    }

    pub fn download(&self, url: &str, path: &Path) -> Result<()> {
        let response = self
            .agent
            .get(url)
            .set("User-Agent", USER_AGENT)
            .call()
            .context("download file")?;
        let mut reader = response.into_reader();
        let mut file = File::create(path).context("create download file")?;
        io::copy(&mut reader, &mut file).context("write download file")?;
        Ok(())
    }
}

/// Parses `nxm://<game>/mods/<mod>/files/<file>` locators.
pub fn parse_nxm(url: &str) -> Option<(String, u64, u64)> {
    let rest = url.strip_prefix("nxm://")?;
    let rest = rest.split('?').next()?;
    let parts: Vec<&str> = rest.split('/').collect();
    match parts.as_slice() {
        [game, "mods", mod_id, "files", file_id] => Some((
            game.to_string(),
            mod_id.parse().ok()?,
            file_id.parse().ok()?,
        )),
        _ => None,
    }
}
