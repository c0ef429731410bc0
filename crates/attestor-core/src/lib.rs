//! attestor-core: attestation policy engine and keybox-backed certificate forging.
//!
//! Decides, per calling app, whether a hardware attestation chain is passed
//! through, has its leaf rewritten, or is replaced by a chain generated from
//! a keybox, and performs the forging.

mod config;
mod decision;
mod error;
mod patch_level;
mod policy;
mod reload;
mod resolver;
mod service;
mod store;
mod tee_health;
pub mod attestation;
pub mod keybox;

pub use config::{
    DeviceProfile, ServiceConfig, KEYBOX_FILE, PATCH_LEVEL_FILE, TARGET_FILE, TEE_STATUS_FILE,
};
pub use decision::{DecisionEngine, Trigger, Verdict};
pub use error::{DerError, ForgeError, ForgeResult, KeyboxError, KeystoreError, ResolveError};
pub use keybox::{KeyAlgorithm, Keybox, KeyboxEntry, KeyboxSigningKey};
pub use patch_level::{PatchDate, PatchLevelOverride};
pub use policy::{Mode, PackagePolicy, BOOTSTRAP_GENERATE_PACKAGES};
pub use reload::{ConfigChange, ConfigEvent, ReloadController, ResourceKind};
pub use resolver::{PackageResolver, PackagesListResolver, StaticResolver, PER_USER_RANGE};
pub use service::AttestationService;
pub use store::{ConfigSnapshot, ConfigStore};
pub use tee_health::{
    HardwareKeystore, HealthStatus, KeystoreProbe, ProbeKeySpec, TeeHealthMonitor, TeeProbe,
    TeeStatusFile, PROBE_KEY_ALIAS,
};
