//! Hardware-health probe and its durable cache.
//!
//! The probe generates and deletes one real attested key, which exercises the
//! TEE every time it runs. It therefore runs at most once per process: the
//! result lives in a [`OnceCell`] and is mirrored to `tee_status` so a
//! restarted process can answer before (or without) probing again.
//!
//! Record format, one line, no trailing newline: `teeBroken=<true|false>`.

use crate::config::ServiceConfig;
use crate::error::KeystoreError;
use once_cell::sync::OnceCell;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Throwaway alias used by the probe.
pub const PROBE_KEY_ALIAS: &str = "tee_attest_test_key";

const BROKEN_RECORD: &str = "teeBroken=true";

/// Whether the real hardware attestation path works.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    /// Never probed and no durable record.
    Unknown,
    Healthy,
    Broken,
}

impl HealthStatus {
    pub fn from_working(working: bool) -> Self {
        if working {
            HealthStatus::Healthy
        } else {
            HealthStatus::Broken
        }
    }

    pub fn is_resolved(self) -> bool {
        self != HealthStatus::Unknown
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Broken => write!(f, "broken"),
        }
    }
}

/// The durable single-line status record.
#[derive(Debug, Clone)]
pub struct TeeStatusFile {
    path: PathBuf,
}

impl TeeStatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the record for a probe outcome. `working = true` records `teeBroken=false`.
    pub fn persist(&self, working: bool) -> io::Result<()> {
        std::fs::write(&self.path, format!("teeBroken={}", !working))
    }

    /// Read the record back. Missing file is `Unknown`; anything other than
    /// `teeBroken=true` is `Healthy`.
    pub fn restore(&self) -> HealthStatus {
        match std::fs::read_to_string(&self.path) {
            Ok(line) if line.trim() == BROKEN_RECORD => HealthStatus::Broken,
            Ok(_) => HealthStatus::Healthy,
            Err(e) if e.kind() == io::ErrorKind::NotFound => HealthStatus::Unknown,
            Err(e) => {
                tracing::warn!(
                    target: "attestor::tee_health",
                    path = %self.path.display(),
                    error = %e,
                    "failed to read TEE status record"
                );
                HealthStatus::Unknown
            }
        }
    }
}

/// A boolean hardware-health probe. `true` means hardware attestation works.
pub trait TeeProbe: Send + Sync {
    fn probe(&self) -> bool;
}

impl<F> TeeProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn probe(&self) -> bool {
        self()
    }
}

/// Parameters of the probe key. EC P-256, SHA-256, sign purpose, never StrongBox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeKeySpec {
    pub alias: String,
    pub challenge: [u8; 16],
    pub curve: &'static str,
    pub digest: &'static str,
    pub strongbox: bool,
}

impl ProbeKeySpec {
    fn fresh() -> Self {
        let mut challenge = [0u8; 16];
        OsRng.fill_bytes(&mut challenge);
        Self {
            alias: PROBE_KEY_ALIAS.to_string(),
            challenge,
            curve: "secp256r1",
            digest: "SHA-256",
            strongbox: false,
        }
    }
}

/// The real (non-forged) hardware key-generation primitive.
pub trait HardwareKeystore: Send + Sync {
    /// Generate an attested key; returns the certificate chain (DER, leaf first).
    fn generate_attested_key(&self, spec: &ProbeKeySpec) -> Result<Vec<Vec<u8>>, KeystoreError>;

    fn delete_key(&self, alias: &str) -> Result<(), KeystoreError>;
}

/// Probe that runs one generate-and-delete cycle against the real keystore.
pub struct KeystoreProbe<K> {
    keystore: K,
}

impl<K: HardwareKeystore> KeystoreProbe<K> {
    pub fn new(keystore: K) -> Self {
        Self { keystore }
    }
}

impl<K: HardwareKeystore> TeeProbe for KeystoreProbe<K> {
    fn probe(&self) -> bool {
        let spec = ProbeKeySpec::fresh();
        let result = self
            .keystore
            .generate_attested_key(&spec)
            .and_then(|_| self.keystore.delete_key(&spec.alias));
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(target: "attestor::tee_health", error = %e, "TEE check failure");
                false
            }
        }
    }
}

/// Process-wide hardware-health state.
pub struct TeeHealthMonitor {
    record: TeeStatusFile,
    probe: Option<Arc<dyn TeeProbe>>,
    lazy_probe: bool,
    probed: OnceCell<HealthStatus>,
    restored: RwLock<HealthStatus>,
}

impl TeeHealthMonitor {
    /// Monitor without a probe; health comes from the durable record only.
    pub fn from_record(record: TeeStatusFile) -> Self {
        Self {
            record,
            probe: None,
            lazy_probe: false,
            probed: OnceCell::new(),
            restored: RwLock::new(HealthStatus::Unknown),
        }
    }

    pub fn with_probe(record: TeeStatusFile, probe: Arc<dyn TeeProbe>) -> Self {
        Self {
            probe: Some(probe),
            ..Self::from_record(record)
        }
    }

    /// Monitor over the configured `tee_status` record.
    ///
    /// With a probe and `probe_on_first_query` off, the probe runs here, before
    /// the first query, and its outcome is persisted. With the flag on it waits
    /// for the first [`current`](Self::current) call.
    pub fn from_config(config: &ServiceConfig, probe: Option<Arc<dyn TeeProbe>>) -> Self {
        let record = TeeStatusFile::new(config.tee_status_path());
        let Some(probe) = probe else {
            tracing::info!(
                target: "attestor::tee_health",
                path = %record.path().display(),
                "no hardware keystore binding, health comes from the status record"
            );
            return Self::from_record(record);
        };
        let monitor = Self::with_probe(record, probe).probe_on_first_query(config.probe_on_first_query);
        if !config.probe_on_first_query {
            monitor.probe_once();
        }
        monitor
    }

    /// Run the probe on the first [`current`](Self::current) call instead of waiting
    /// for an explicit [`probe_once`](Self::probe_once).
    pub fn probe_on_first_query(mut self, enabled: bool) -> Self {
        self.lazy_probe = enabled;
        self
    }

    pub fn has_probed(&self) -> bool {
        self.probed.get().is_some()
    }

    /// Probe the hardware unless this process already did, and persist the outcome.
    /// Concurrent callers block until the single probe finishes and share its result.
    /// Without a probe this falls back to [`current`](Self::current).
    pub fn probe_once(&self) -> HealthStatus {
        let Some(probe) = self.probe.as_ref() else {
            return self.current();
        };
        *self.probed.get_or_init(|| {
            let working = probe.probe();
            let status = HealthStatus::from_working(working);
            if let Err(e) = self.record.persist(working) {
                tracing::error!(
                    target: "attestor::tee_health",
                    path = %self.record.path().display(),
                    error = %e,
                    "failed to write TEE status"
                );
            }
            tracing::info!(target: "attestor::tee_health", %status, "TEE probe finished");
            status
        })
    }

    /// Current health: the probe result if this process probed, else the durable record.
    pub fn current(&self) -> HealthStatus {
        if let Some(status) = self.probed.get() {
            return *status;
        }
        if self.lazy_probe && self.probe.is_some() {
            return self.probe_once();
        }

        let cached = *self.restored.read().unwrap_or_else(PoisonError::into_inner);
        if cached.is_resolved() {
            return cached;
        }

        let restored = self.record.restore();
        if restored.is_resolved() {
            *self.restored.write().unwrap_or_else(PoisonError::into_inner) = restored;
            tracing::debug!(target: "attestor::tee_health", status = %restored, "restored TEE status");
        }
        restored
    }
}
