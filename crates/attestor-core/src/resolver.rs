//! Package-identity resolution: which packages a calling uid owns.

use crate::error::ResolveError;
use std::collections::HashMap;
use std::path::PathBuf;

/// Uids per Android user; a uid is `user_id * PER_USER_RANGE + app_id`.
pub const PER_USER_RANGE: u32 = 100_000;

pub trait PackageResolver: Send + Sync {
    /// Package names owned by `uid`. Shared-uid apps yield several.
    fn packages_for_uid(&self, uid: u32) -> Result<Vec<String>, ResolveError>;
}

/// Reads Android's `packages.list` (`<package> <app id> <debuggable> <data dir> ...`)
/// on every lookup, so newly installed apps are seen without a reload. The file
/// lists app ids, so callers from secondary users and work profiles resolve to
/// the same packages as the owner.
#[derive(Debug, Clone)]
pub struct PackagesListResolver {
    path: PathBuf,
}

impl PackagesListResolver {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PackageResolver for PackagesListResolver {
    fn packages_for_uid(&self, uid: u32) -> Result<Vec<String>, ResolveError> {
        let contents = std::fs::read_to_string(&self.path)?;
        let app_id = uid % PER_USER_RANGE;
        let packages: Vec<String> = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let package = fields.next()?;
                let owner: u32 = fields.next()?.parse().ok()?;
                (owner == app_id).then(|| package.to_string())
            })
            .collect();
        if packages.is_empty() {
            return Err(ResolveError::UnknownUid(uid));
        }
        Ok(packages)
    }
}

/// Fixed uid → packages map.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    packages: HashMap<u32, Vec<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, uid: u32, packages: &[&str]) -> Self {
        self.packages
            .insert(uid, packages.iter().map(|p| p.to_string()).collect());
        self
    }
}

impl PackageResolver for StaticResolver {
    fn packages_for_uid(&self, uid: u32) -> Result<Vec<String>, ResolveError> {
        self.packages
            .get(&uid)
            .cloned()
            .ok_or(ResolveError::UnknownUid(uid))
    }
}
