//! OS configuration store access.

use crate::error::SanityError;
use std::{
    collections::HashMap,
    fmt,
    process::{Command, Output},
    sync::{Arc, Mutex},
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegKey {
    pub path: &'static str,
}

impl RegKey {
    /// Keys under `HKEY_LOCAL_MACHINE`.
    pub const fn local_machine(path: &'static str) -> Self {
        Self { path }
    }
}

impl fmt::Display for RegKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HKLM\\{}", self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegValue {
    Dword(u32),
    Binary(Vec<u8>),
    String(String),
}

pub trait RegistryStore: Send + Sync {
    /// `Ok(None)` when the key or value does not exist.
    fn read(&self, key: RegKey, name: &str) -> Result<Option<RegValue>, SanityError>;

    fn write(&self, key: RegKey, name: &str, value: RegValue) -> Result<(), SanityError>;
}

/// Store for platforms without a registry; every access fails.
#[derive(Debug, Default)]
pub struct UnavailableRegistry;

impl RegistryStore for UnavailableRegistry {
    fn read(&self, _key: RegKey, _name: &str) -> Result<Option<RegValue>, SanityError> {
        Err(SanityError::RegistryUnavailable)
    }

    fn write(&self, _key: RegKey, _name: &str, _value: RegValue) -> Result<(), SanityError> {
        Err(SanityError::RegistryUnavailable)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    values: Mutex<HashMap<(String, String), RegValue>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: RegKey, name: &str, value: RegValue) -> Self {
        if let Ok(mut values) = self.values.lock() {
            values.insert((key.to_string(), name.to_string()), value);
        }
        self
    }

    pub fn get(&self, key: RegKey, name: &str) -> Option<RegValue> {
        self.values
            .lock()
            .ok()?
            .get(&(key.to_string(), name.to_string()))
            .cloned()
    }
}

impl RegistryStore for MemoryRegistry {
    fn read(&self, key: RegKey, name: &str) -> Result<Option<RegValue>, SanityError> {
        let values = self.values.lock().map_err(|_| SanityError::Registry {
            key: key.to_string(),
            name: name.to_string(),
            reason: "store poisoned".to_string(),
        })?;
        Ok(values.get(&(key.to_string(), name.to_string())).cloned())
    }

    fn write(&self, key: RegKey, name: &str, value: RegValue) -> Result<(), SanityError> {
        let mut values = self.values.lock().map_err(|_| SanityError::Registry {
            key: key.to_string(),
            name: name.to_string(),
            reason: "store poisoned".to_string(),
        })?;
        values.insert((key.to_string(), name.to_string()), value);
        Ok(())
    }
}

/// Registry access through the stock `reg.exe` tool.
#[derive(Debug, Default)]
pub struct RegExeStore;

impl RegistryStore for RegExeStore {
    fn read(&self, key: RegKey, name: &str) -> Result<Option<RegValue>, SanityError> {
        let output = reg_query(key, Some(name))?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return parse_query_output(&stdout, name)
                .map_err(|reason| registry_error(key, name, reason))?
                .map(Some)
                .ok_or_else(|| registry_error(key, name, "value missing from output".to_string()));
        }

        // reg.exe exits 1 for a missing value and for access failures alike, so
        // the value only counts as absent when the key lists without it.
        debug!(
            "{key}\\{name} not readable: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
        let listing = reg_query(key, None)?;
        if !listing.status.success() {
            return Err(registry_error(
                key,
                name,
                String::from_utf8_lossy(&listing.stderr).trim().to_string(),
            ));
        }
        let stdout = String::from_utf8_lossy(&listing.stdout);
        parse_query_output(&stdout, name).map_err(|reason| registry_error(key, name, reason))
    }

    fn write(&self, key: RegKey, name: &str, value: RegValue) -> Result<(), SanityError> {
        let (kind, data) = match &value {
            RegValue::Dword(value) => ("REG_DWORD", value.to_string()),
            RegValue::Binary(bytes) => ("REG_BINARY", hex_encode(bytes)),
            RegValue::String(text) => ("REG_SZ", text.clone()),
        };
        let output = Command::new("reg")
            .arg("add")
            .arg(key.to_string())
            .args(["/v", name, "/t", kind, "/d"])
            .arg(data)
            .arg("/f")
            .output()
            .map_err(|err| registry_error(key, name, err.to_string()))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(registry_error(
                key,
                name,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

fn reg_query(key: RegKey, name: Option<&str>) -> Result<Output, SanityError> {
    let mut command = Command::new("reg");
    command.arg("query").arg(key.to_string());
    if let Some(name) = name {
        command.arg("/v").arg(name);
    }
    command
        .output()
        .map_err(|err| registry_error(key, name.unwrap_or_default(), err.to_string()))
}

fn registry_error(key: RegKey, name: &str, reason: String) -> SanityError {
    SanityError::Registry {
        key: key.to_string(),
        name: name.to_string(),
        reason,
    }
}

/// Finds the `name` value line in `reg query` output; `Ok(None)` when no line matches.
fn parse_query_output(stdout: &str, name: &str) -> Result<Option<RegValue>, String> {
    for line in stdout.lines() {
        let mut parts = line.split_whitespace();
        let Some(first) = parts.next() else {
            continue;
        };
        if !first.eq_ignore_ascii_case(name) {
            continue;
        }
        let Some(kind) = parts.next() else {
            continue;
        };
        let data = parts.collect::<Vec<&str>>().join(" ");
        return match kind {
            "REG_DWORD" => {
                let digits = data.trim_start_matches("0x").trim_start_matches("0X");
                u32::from_str_radix(digits, 16)
                    .map(|value| Some(RegValue::Dword(value)))
                    .map_err(|err| format!("invalid {kind} {data:?}: {err}"))
            }
            "REG_BINARY" => hex_decode(&data).map(|bytes| Some(RegValue::Binary(bytes))),
            "REG_SZ" | "REG_EXPAND_SZ" => Ok(Some(RegValue::String(data))),
            other => Err(format!("unsupported value type {other}")),
        };
    }
    Ok(None)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02X}")).collect()
}

fn hex_decode(raw: &str) -> Result<Vec<u8>, String> {
    let raw = raw.trim();
    if raw.len() % 2 != 0 {
        return Err(format!("odd-length binary value {raw:?}"));
    }
    (0..raw.len())
        .step_by(2)
        .map(|index| {
            raw.get(index..index + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid binary value {raw:?}"))
        })
        .collect()
}

/// Picks the store for the current platform.
pub fn platform_store() -> Arc<dyn RegistryStore> {
    if cfg!(windows) {
        Arc::new(RegExeStore)
    } else {
        Arc::new(UnavailableRegistry)
    }
}
