//! Attestation Decision Engine.
//!
//! For a calling uid, answers two questions from the package policy and the
//! hardware health:
//!
//! | Mode | Health | hack | generate |
//! |------|--------|------|----------|
//! | `LEAF_HACK` | any | explicit | - |
//! | `GENERATE` | any | - | explicit |
//! | `AUTO` | broken | auto | - |
//! | `AUTO` | healthy | - | auto |
//! | `AUTO` | unknown | - | - |
//!
//! A uid owning several packages gets the OR over all of them. A failed
//! package lookup answers "no intervention" for both questions.

use crate::policy::{Mode, PackagePolicy};
use crate::resolver::PackageResolver;
use crate::store::{ConfigSnapshot, ConfigStore};
use crate::tee_health::{HealthStatus, TeeHealthMonitor};
use std::sync::Arc;

/// How a question was answered "yes".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trigger {
    #[default]
    None,
    /// Via `AUTO` and the hardware health.
    Auto,
    /// Via an explicit `LEAF_HACK` / `GENERATE` rule.
    Explicit,
}

impl Trigger {
    pub fn fired(self) -> bool {
        self != Trigger::None
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verdict {
    pub hack: Trigger,
    pub generate: Trigger,
}

impl Verdict {
    pub fn need_hack(&self) -> bool {
        self.hack.fired()
    }

    pub fn need_generate(&self) -> bool {
        self.generate.fired()
    }

    /// Verdict for one set of packages under a fixed policy and health.
    pub fn decide(
        policy: &PackagePolicy,
        health: HealthStatus,
        packages: &[String],
        unlisted_as_auto: bool,
    ) -> Self {
        let fallback = unlisted_as_auto.then_some(Mode::Auto);
        packages
            .iter()
            .filter_map(|p| policy.mode(p).or(fallback))
            .fold(Verdict::default(), |v, mode| {
                let (hack, generate) = match (mode, health) {
                    (Mode::LeafHack, _) => (Trigger::Explicit, Trigger::None),
                    (Mode::Generate, _) => (Trigger::None, Trigger::Explicit),
                    (Mode::Auto, HealthStatus::Broken) => (Trigger::Auto, Trigger::None),
                    (Mode::Auto, HealthStatus::Healthy) => (Trigger::None, Trigger::Auto),
                    (Mode::Auto, HealthStatus::Unknown) => (Trigger::None, Trigger::None),
                };
                Verdict {
                    hack: v.hack.max(hack),
                    generate: v.generate.max(generate),
                }
            })
    }
}

pub struct DecisionEngine {
    store: Arc<ConfigStore>,
    health: Arc<TeeHealthMonitor>,
    resolver: Arc<dyn PackageResolver>,
    unlisted_as_auto: bool,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<ConfigStore>,
        health: Arc<TeeHealthMonitor>,
        resolver: Arc<dyn PackageResolver>,
    ) -> Self {
        Self {
            store,
            health,
            resolver,
            unlisted_as_auto: true,
        }
    }

    pub fn treat_unlisted_as_auto(mut self, enabled: bool) -> Self {
        self.unlisted_as_auto = enabled;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn health(&self) -> &Arc<TeeHealthMonitor> {
        &self.health
    }

    /// Packages owned by `uid`, or `None` when the lookup failed (logged).
    pub fn packages(&self, uid: u32) -> Option<Vec<String>> {
        match self.resolver.packages_for_uid(uid) {
            Ok(packages) => Some(packages),
            Err(e) => {
                tracing::warn!(target: "attestor::decision", uid, error = %e, "failed to get packages");
                None
            }
        }
    }

    /// Verdict for `uid` against `snapshot`, with the packages it was based on.
    pub fn evaluate_with(&self, uid: u32, snapshot: &ConfigSnapshot) -> (Verdict, Vec<String>) {
        let Some(packages) = self.packages(uid) else {
            return (Verdict::default(), Vec::new());
        };
        let health = self.health.current();
        let verdict = Verdict::decide(&snapshot.policy, health, &packages, self.unlisted_as_auto);
        tracing::debug!(
            target: "attestor::decision",
            uid,
            %health,
            hack = ?verdict.hack,
            generate = ?verdict.generate,
            "attestation verdict"
        );
        (verdict, packages)
    }

    pub fn evaluate(&self, uid: u32) -> Verdict {
        self.evaluate_with(uid, &self.store.snapshot()).0
    }

    pub fn need_hack(&self, uid: u32) -> bool {
        self.evaluate(uid).need_hack()
    }

    pub fn need_generate(&self, uid: u32) -> bool {
        self.evaluate(uid).need_generate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pkgs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn explicit_modes_ignore_health() {
        let policy = PackagePolicy::parse(Some("com.hack?\ncom.gen!"));
        for health in [HealthStatus::Unknown, HealthStatus::Healthy, HealthStatus::Broken] {
            let v = Verdict::decide(&policy, health, &pkgs(&["com.hack"]), true);
            assert_eq!(v, Verdict { hack: Trigger::Explicit, generate: Trigger::None });
            let v = Verdict::decide(&policy, health, &pkgs(&["com.gen"]), true);
            assert_eq!(v, Verdict { hack: Trigger::None, generate: Trigger::Explicit });
        }
    }

    #[test]
    fn auto_follows_health() {
        let policy = PackagePolicy::parse(Some("com.auto"));
        let p = pkgs(&["com.auto"]);
        let broken = Verdict::decide(&policy, HealthStatus::Broken, &p, true);
        assert!(broken.need_hack() && !broken.need_generate());
        let healthy = Verdict::decide(&policy, HealthStatus::Healthy, &p, true);
        assert!(!healthy.need_hack() && healthy.need_generate());
        let unknown = Verdict::decide(&policy, HealthStatus::Unknown, &p, true);
        assert!(!unknown.need_hack() && !unknown.need_generate());
    }

    #[test]
    fn unlisted_packages_can_be_left_alone() {
        let policy = PackagePolicy::parse(None);
        let p = pkgs(&["com.unlisted"]);
        assert!(Verdict::decide(&policy, HealthStatus::Broken, &p, true).need_hack());
        assert_eq!(
            Verdict::decide(&policy, HealthStatus::Broken, &p, false),
            Verdict::default()
        );
    }

    #[test]
    fn shared_uid_ors_over_packages() {
        let policy = PackagePolicy::parse(Some("com.a?\ncom.b!"));
        let v = Verdict::decide(&policy, HealthStatus::Healthy, &pkgs(&["com.a", "com.b"]), false);
        assert!(v.need_hack());
        assert!(v.need_generate());
    }

    #[test]
    fn explicit_outranks_auto() {
        let policy = PackagePolicy::parse(Some("com.auto\ncom.gen!"));
        let v = Verdict::decide(&policy, HealthStatus::Healthy, &pkgs(&["com.auto", "com.gen"]), false);
        assert_eq!(v.generate, Trigger::Explicit);
    }

    fn mode_strategy() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just(""), Just("?"), Just("!")]
    }

    fn health_strategy() -> impl Strategy<Value = HealthStatus> {
        prop_oneof![
            Just(HealthStatus::Unknown),
            Just(HealthStatus::Healthy),
            Just(HealthStatus::Broken)
        ]
    }

    proptest! {
        #[test]
        fn single_mode_never_answers_both(
            suffix in mode_strategy(),
            health in health_strategy(),
            count in 1usize..4,
        ) {
            let names: Vec<String> = (0..count).map(|i| format!("com.pkg{i}")).collect();
            let rules: Vec<String> = names.iter().map(|n| format!("{n}{suffix}")).collect();
            let policy = PackagePolicy::parse(Some(&rules.join("\n")));
            let v = Verdict::decide(&policy, health, &names, true);
            prop_assert!(!(v.need_hack() && v.need_generate()));
        }
    }
}
