//! Interception facade around a key-generation call.
//!
//! ```text
//! before_generate(uid, req) ── Some(chain) ──▶ return forged chain
//!        │ None
//!        ▼
//!   real keystore ──▶ after_generate(uid, real_chain) ──▶ chain (hacked or real)
//! ```

use crate::attestation::{CertForger, GeneratedKey, KeyGenRequest};
use crate::config::{DeviceProfile, ServiceConfig};
use crate::decision::{DecisionEngine, Trigger};
use crate::error::{ForgeError, ForgeResult};
use crate::resolver::PackagesListResolver;
use crate::store::ConfigStore;
use crate::tee_health::TeeHealthMonitor;
use std::sync::Arc;

pub struct AttestationService {
    engine: DecisionEngine,
    device: DeviceProfile,
}

impl AttestationService {
    pub fn new(engine: DecisionEngine, device: DeviceProfile) -> Self {
        Self { engine, device }
    }

    /// Wire a service resolving uids through the configured `packages.list`.
    pub fn from_config(
        config: &ServiceConfig,
        store: Arc<ConfigStore>,
        health: Arc<TeeHealthMonitor>,
    ) -> Self {
        let resolver = Arc::new(PackagesListResolver::new(&config.packages_list));
        let engine = DecisionEngine::new(store, health, resolver)
            .treat_unlisted_as_auto(config.treat_unlisted_as_auto);
        Self::new(engine, config.device.clone())
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    /// Called before the real keystore.
    ///
    /// `Ok(None)` means "use the hardware". An error is returned only when
    /// generation was explicitly required; an `AUTO` generation that fails
    /// falls back to the hardware path.
    pub fn before_generate(&self, uid: u32, request: &KeyGenRequest) -> ForgeResult<Option<GeneratedKey>> {
        let snapshot = self.engine.store().snapshot();
        let (verdict, packages) = self.engine.evaluate_with(uid, &snapshot);
        if !verdict.need_generate() {
            return Ok(None);
        }

        let result = match snapshot.keybox.as_deref() {
            Some(keybox) => CertForger::new(keybox, snapshot.patch_level.as_deref(), &self.device)
                .generate(request, &packages),
            None => Err(ForgeError::NoKeybox),
        };

        match result {
            Ok(generated) => {
                tracing::info!(
                    target: "attestor::service",
                    uid,
                    algorithm = %request.algorithm,
                    "served generated attestation chain"
                );
                Ok(Some(generated))
            }
            Err(e) if verdict.generate == Trigger::Explicit => {
                tracing::error!(target: "attestor::service", uid, error = %e, "required generation failed");
                Err(e)
            }
            Err(e) => {
                tracing::warn!(
                    target: "attestor::service",
                    uid,
                    error = %e,
                    "generation failed, falling back to hardware attestation"
                );
                Ok(None)
            }
        }
    }

    /// Called with the chain the real keystore produced. Never fails: any
    /// problem returns `real_chain` untouched.
    pub fn after_generate(&self, uid: u32, real_chain: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        let snapshot = self.engine.store().snapshot();
        let (verdict, _) = self.engine.evaluate_with(uid, &snapshot);
        if !verdict.need_hack() {
            return real_chain;
        }
        let Some(keybox) = snapshot.keybox.as_deref() else {
            tracing::warn!(target: "attestor::service", uid, "leaf hack requested but no keybox loaded");
            return real_chain;
        };

        match CertForger::new(keybox, snapshot.patch_level.as_deref(), &self.device).leaf_hack(&real_chain) {
            Ok(chain) => {
                tracing::info!(target: "attestor::service", uid, "served hacked leaf");
                chain
            }
            Err(e) => {
                tracing::warn!(target: "attestor::service", uid, error = %e, "leaf hack failed, returning real chain");
                real_chain
            }
        }
    }
}
