//! Package policy table: which attestation handling mode applies to which package.
//!
//! Rules file format (`target.txt`), one package per line:
//!
//! ```text
//! # comment
//! com.example.wallet        # AUTO: decided by hardware health
//! com.example.bank?         # LEAF_HACK
//! com.example.game!         # GENERATE
//! ```
//!
//! The table is rebuilt wholesale on every reload. A fixed set of
//! attestation-sensitive packages is seeded with `GENERATE` before the file is
//! applied, so the file may reassign them but can never drop them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Packages that always get a generated chain unless the rules file says otherwise.
pub const BOOTSTRAP_GENERATE_PACKAGES: [&str; 3] = [
    "com.google.android.gsf",
    "com.google.android.gms",
    "com.android.vending",
];

/// Attestation handling mode for one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Hack or generate depending on hardware health.
    Auto,
    /// Always rewrite the real leaf certificate.
    LeafHack,
    /// Always synthesize the full chain from the keybox.
    Generate,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Auto => write!(f, "AUTO"),
            Mode::LeafHack => write!(f, "LEAF_HACK"),
            Mode::Generate => write!(f, "GENERATE"),
        }
    }
}

/// Immutable package → mode table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePolicy {
    modes: HashMap<String, Mode>,
}

impl Default for PackagePolicy {
    /// Only the bootstrap packages, all `GENERATE`.
    fn default() -> Self {
        Self::parse(None)
    }
}

impl PackagePolicy {
    /// Build the table from the rules file contents. `None` means the file is absent.
    pub fn parse(contents: Option<&str>) -> Self {
        let mut modes: HashMap<String, Mode> = BOOTSTRAP_GENERATE_PACKAGES
            .iter()
            .map(|p| (p.to_string(), Mode::Generate))
            .collect();

        for line in contents.into_iter().flat_map(str::lines) {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (package, mode) = if let Some(p) = line.strip_suffix('!') {
                (p.trim(), Mode::Generate)
            } else if let Some(p) = line.strip_suffix('?') {
                (p.trim(), Mode::LeafHack)
            } else {
                (line, Mode::Auto)
            };
            if package.is_empty() {
                tracing::debug!(target: "attestor::policy", line, "skipping rule without package name");
                continue;
            }
            modes.insert(package.to_string(), mode);
        }

        Self { modes }
    }

    pub fn mode(&self, package: &str) -> Option<Mode> {
        self.modes.get(package).copied()
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Number of packages per mode, for reload diagnostics.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.modes.values().fold((0, 0, 0), |(a, h, g), m| match m {
            Mode::Auto => (a + 1, h, g),
            Mode::LeafHack => (a, h + 1, g),
            Mode::Generate => (a, h, g + 1),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Mode)> {
        self.modes.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
