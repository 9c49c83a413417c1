//! Mandatory ASLR and GPU driver probes backed by the OS registry.
//!
//! Mandatory ASLR relocates the game executable, which crashes NVSE plugins
//! and the 4GB patch. It is forced either by a non-zero `MoveImages` or by
//! bits 0-1 of byte 1 of the kernel `MitigationOptions` blob.

use crate::{
    error::SanityError,
    finding::Finding,
    registry::{RegKey, RegValue, RegistryStore},
};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

pub const MEMORY_MANAGEMENT: RegKey = RegKey::local_machine(
    "SYSTEM\\CurrentControlSet\\Control\\Session Manager\\Memory Management",
);
pub const KERNEL: RegKey =
    RegKey::local_machine("SYSTEM\\CurrentControlSet\\Control\\Session Manager\\Kernel");
pub const DISPLAY_ADAPTER: RegKey = RegKey::local_machine(
    "SYSTEM\\CurrentControlSet\\Control\\Class\\{4d36e968-e325-11ce-bfc1-08002be10318}\\0000",
);

pub const MOVE_IMAGES: &str = "MoveImages";
pub const MITIGATION_OPTIONS: &str = "MitigationOptions";
pub const DRIVER_VERSION: &str = "DriverVersion";

const MANDATORY_ASLR_BYTE: usize = 1;
const MANDATORY_ASLR_MASK: u8 = 0x03;
const DEFAULT_OPTIONS_LEN: usize = 8;

/// Decoded view of the two registry values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MitigationState {
    pub move_images: Option<u32>,
    pub options: Option<Vec<u8>>,
}

impl MitigationState {
    /// Read failures are logged and treated like absent values.
    pub fn read(store: &dyn RegistryStore) -> Self {
        let move_images = match store.read(MEMORY_MANAGEMENT, MOVE_IMAGES) {
            Ok(Some(RegValue::Dword(value))) => Some(value),
            Ok(Some(other)) => {
                debug!("{MOVE_IMAGES} has unexpected type: {other:?}");
                None
            }
            Ok(None) => None,
            Err(err) => {
                debug!("{MOVE_IMAGES} not readable: {err}");
                None
            }
        };
        let options = match store.read(KERNEL, MITIGATION_OPTIONS) {
            Ok(Some(RegValue::Binary(bytes))) => Some(bytes),
            Ok(_) => None,
            Err(err) => {
                debug!("{MITIGATION_OPTIONS} not readable: {err}");
                None
            }
        };
        Self {
            move_images,
            options,
        }
    }

    pub fn move_images_forced(&self) -> bool {
        matches!(self.move_images, Some(value) if value != 0)
    }

    pub fn mandatory_aslr_forced(&self) -> bool {
        self.options
            .as_deref()
            .map(mandatory_aslr_forced)
            .unwrap_or(false)
    }

    pub fn forced(&self) -> bool {
        self.move_images_forced() || self.mandatory_aslr_forced()
    }
}

pub fn mandatory_aslr_forced(options: &[u8]) -> bool {
    options
        .get(MANDATORY_ASLR_BYTE)
        .map(|byte| byte & MANDATORY_ASLR_MASK != 0)
        .unwrap_or(false)
}

/// Clears only the mandatory ASLR bits; every other flag is preserved.
pub fn clear_mandatory_aslr(options: &mut [u8]) {
    if let Some(byte) = options.get_mut(MANDATORY_ASLR_BYTE) {
        *byte &= !MANDATORY_ASLR_MASK;
    }
}

pub fn is_aslr_forced(store: &dyn RegistryStore) -> bool {
    let state = MitigationState::read(store);
    if state.move_images_forced() {
        warn!(
            "{MOVE_IMAGES} is set to {:?}, ASLR is enabled system-wide",
            state.move_images
        );
    }
    if state.mandatory_aslr_forced() {
        warn!("Mandatory ASLR (force randomization) is enabled in {MITIGATION_OPTIONS}");
    }
    state.forced()
}

/// Aborts before writing anything when the mitigation blob cannot be read.
pub fn disable_aslr(store: &dyn RegistryStore) -> Result<(), SanityError> {
    let mut options = match store.read(KERNEL, MITIGATION_OPTIONS)? {
        Some(RegValue::Binary(bytes)) => bytes,
        None => vec![0u8; DEFAULT_OPTIONS_LEN],
        Some(other) => {
            return Err(SanityError::Registry {
                key: KERNEL.to_string(),
                name: MITIGATION_OPTIONS.to_string(),
                reason: format!("unexpected value type: {other:?}"),
            })
        }
    };

    match store.write(MEMORY_MANAGEMENT, MOVE_IMAGES, RegValue::Dword(0)) {
        Ok(()) => info!("{MOVE_IMAGES} set to 0"),
        Err(err) => debug!("Failed to set {MOVE_IMAGES}: {err}"),
    }

    clear_mandatory_aslr(&mut options);
    store.write(KERNEL, MITIGATION_OPTIONS, RegValue::Binary(options))?;
    info!("Mandatory ASLR disabled in {MITIGATION_OPTIONS}, other mitigations preserved");
    info!("A system restart is required for the change to take effect");
    Ok(())
}

async fn aslr_forced_blocking(store: Arc<dyn RegistryStore>) -> bool {
    tokio::task::spawn_blocking(move || is_aslr_forced(store.as_ref()))
        .await
        .unwrap_or(false)
}

pub async fn aslr_enabled(store: Arc<dyn RegistryStore>, force: bool) -> Option<Finding> {
    if !force && !aslr_forced_blocking(store.clone()).await {
        return None;
    }

    let fix_store = store.clone();
    let recheck_store = store;
    Some(
        Finding::warning(
            "Base Address Randomization is enabled",
            "Base Address Randomization is a security feature in Windows that allows a \
             program's starting address to be randomized, which will crash the game when \
             using NVSE plugins or the 4GB Patch.<br/><br/>While the feature should be \
             disabled by default, it is currently enabled on your system.<br/><br/>\
             The necessary registry keys can be changed automatically to disable it.\
             <br/><br/>Alternatively you can disable it manually:<br/><br/>\
             [list]\
             [*] Open [b]Windows Security[/b] from your Start Menu.\
             [*] Click on [b]App & browser control[/b] in the left sidebar.\
             [*] Click on [b]Exploit protection settings[/b] under [b]Exploit protection[/b].\
             [*] Ensure [b]Force randomization for images (Mandatory ASLR)[/b] is set to \
             [b]Use default (Off)[/b].\
             [/list]",
        )
        .with_fix(move || {
            let store = fix_store.clone();
            async move {
                tokio::task::spawn_blocking(move || disable_aslr(store.as_ref())).await??;
                Ok(())
            }
        })
        .with_recheck(move || {
            let store = recheck_store.clone();
            async move { !aslr_forced_blocking(store).await }
        }),
    )
}

fn problematic_driver_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^24\.[1-5]\.\d+").expect("valid driver pattern"))
}

/// Adrenalin 24.1.1 through 24.5.1 fail to compile the game's shaders.
pub fn is_problematic_driver(version: &str) -> bool {
    problematic_driver_pattern().is_match(version)
}

pub fn has_problematic_driver(store: &dyn RegistryStore) -> bool {
    match store.read(DISPLAY_ADAPTER, DRIVER_VERSION) {
        Ok(Some(RegValue::String(version))) if is_problematic_driver(&version) => {
            warn!("Detected problematic AMD GPU driver version: {version}");
            true
        }
        Ok(_) => false,
        Err(err) => {
            debug!("{DRIVER_VERSION} not readable: {err}");
            false
        }
    }
}

pub async fn outdated_amd_driver(store: Arc<dyn RegistryStore>, force: bool) -> Option<Finding> {
    let outdated = tokio::task::spawn_blocking(move || has_problematic_driver(store.as_ref()))
        .await
        .unwrap_or(false);
    if !outdated && !force {
        return None;
    }

    Some(Finding::warning(
        "Outdated AMD GPU Driver detected",
        "The GPU driver version from [b]24.1.1[/b] up to [b]24.5.1[/b] may fail to compile \
         the shader and [b]crash the game[/b]. The issue is stated on the official AMD website \
         [url=https://www.amd.com/en/resources/support-articles/release-notes/RN-RAD-WIN-24-4-1.html]here[/url].\
         <br/><br/>Make sure your driver version is updated.",
    ))
}
