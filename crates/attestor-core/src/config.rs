//! Service configuration loaded from TOML and the environment.
//!
//! The configuration directory holds one file per concern; this module only
//! knows where that directory lives and what the device reports about itself.
//! Per-file parsing lives with each store.

use crate::attestation::VerifiedBootState;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Package policy rules.
pub const TARGET_FILE: &str = "target.txt";
/// Keybox bundle.
pub const KEYBOX_FILE: &str = "keybox.xml";
/// Durable hardware-health record.
pub const TEE_STATUS_FILE: &str = "tee_status";
/// Security patch level override.
pub const PATCH_LEVEL_FILE: &str = "security_patch.txt";

const DEFAULT_CONFIG_DIR: &str = "/data/adb/attestor";
const DEFAULT_PACKAGES_LIST: &str = "/data/system/packages.list";
const DEFAULT_SERVICE_CONFIG: &str = "/data/adb/attestor/service.toml";

fn default_true() -> bool {
    true
}

fn default_record_version() -> i64 {
    200
}

fn default_validity_days() -> u32 {
    3650
}

/// What the device genuinely reports. Used to fill forged attestation
/// records wherever no override applies.
///
/// | Key | Default | Description |
/// |-----|---------|-------------|
/// | os_version | unset | `osVersion` tag, e.g. `150000` for 15.0.0 |
/// | os_patch_level | unset | `YYYY-MM-DD` or `YYYY-MM` |
/// | vendor_patch_level | unset | `YYYY-MM-DD` |
/// | boot_patch_level | unset | `YYYY-MM-DD` |
/// | verified_boot_key | 32 zero bytes | hex |
/// | verified_boot_hash | unset | hex |
/// | device_locked | true | |
/// | verified_boot_state | verified | verified \| self_signed \| unverified \| failed |
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfile {
    #[serde(default)]
    pub os_version: Option<u32>,
    #[serde(default)]
    pub os_patch_level: Option<String>,
    #[serde(default)]
    pub vendor_patch_level: Option<String>,
    #[serde(default)]
    pub boot_patch_level: Option<String>,
    #[serde(default)]
    pub verified_boot_key: Option<String>,
    #[serde(default)]
    pub verified_boot_hash: Option<String>,
    #[serde(default = "default_true")]
    pub device_locked: bool,
    #[serde(default)]
    pub verified_boot_state: VerifiedBootState,
    #[serde(default = "default_record_version")]
    pub attestation_version: i64,
    #[serde(default = "default_record_version")]
    pub keymint_version: i64,
    /// Lifetime of generated leaves when the request does not bound it.
    #[serde(default = "default_validity_days")]
    pub attestation_validity_days: u32,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            os_version: None,
            os_patch_level: None,
            vendor_patch_level: None,
            boot_patch_level: None,
            verified_boot_key: None,
            verified_boot_hash: None,
            device_locked: true,
            verified_boot_state: VerifiedBootState::default(),
            attestation_version: default_record_version(),
            keymint_version: default_record_version(),
            attestation_validity_days: default_validity_days(),
        }
    }
}

impl DeviceProfile {
    /// Decoded verified boot key. Missing or malformed values yield 32 zero bytes.
    pub fn verified_boot_key_bytes(&self) -> Vec<u8> {
        decode_hex_field("verified_boot_key", self.verified_boot_key.as_deref())
            .unwrap_or_else(|| vec![0u8; 32])
    }

    /// Decoded verified boot hash, if configured and well-formed.
    pub fn verified_boot_hash_bytes(&self) -> Option<Vec<u8>> {
        decode_hex_field("verified_boot_hash", self.verified_boot_hash.as_deref())
    }
}

fn decode_hex_field(name: &str, value: Option<&str>) -> Option<Vec<u8>> {
    let value = value.map(str::trim).filter(|v| !v.is_empty())?;
    match hex::decode(value) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::warn!(target: "attestor::config", field = name, error = %e, "ignoring malformed hex value");
            None
        }
    }
}

/// Service configuration.
///
/// Precedence: env `ATTESTOR_CONFIG` path > `/data/adb/attestor/service.toml` > defaults,
/// then `ATTESTOR__*` environment overrides (e.g. `ATTESTOR__DEVICE__OS_VERSION=150000`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding `target.txt`, `keybox.xml`, `tee_status`, `security_patch.txt`.
    pub config_dir: PathBuf,
    /// Android `packages.list` used to resolve calling uids.
    pub packages_list: PathBuf,
    /// Run the hardware probe lazily on the first policy query instead of when the
    /// health monitor is built (see `TeeHealthMonitor::from_config`).
    #[serde(default)]
    pub probe_on_first_query: bool,
    /// Evaluate packages missing from `target.txt` as `AUTO`. When off they are never touched.
    #[serde(default = "default_true")]
    pub treat_unlisted_as_auto: bool,
    #[serde(default)]
    pub device: DeviceProfile,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            packages_list: PathBuf::from(DEFAULT_PACKAGES_LIST),
            probe_on_first_query: false,
            treat_unlisted_as_auto: true,
            device: DeviceProfile::default(),
        }
    }
}

impl ServiceConfig {
    /// Load from the default location (or `ATTESTOR_CONFIG`) and the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let path = std::env::var("ATTESTOR_CONFIG").unwrap_or_else(|_| DEFAULT_SERVICE_CONFIG.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from `path` if it exists, then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("config_dir", DEFAULT_CONFIG_DIR)?
            .set_default("packages_list", DEFAULT_PACKAGES_LIST)?
            .set_default("probe_on_first_query", false)?
            .set_default("treat_unlisted_as_auto", true)?;

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("ATTESTOR").separator("__"))
            .build()?;

        built.try_deserialize()
    }

    pub fn target_path(&self) -> PathBuf {
        self.config_dir.join(TARGET_FILE)
    }

    pub fn keybox_path(&self) -> PathBuf {
        self.config_dir.join(KEYBOX_FILE)
    }

    pub fn tee_status_path(&self) -> PathBuf {
        self.config_dir.join(TEE_STATUS_FILE)
    }

    pub fn patch_level_path(&self) -> PathBuf {
        self.config_dir.join(PATCH_LEVEL_FILE)
    }
}
