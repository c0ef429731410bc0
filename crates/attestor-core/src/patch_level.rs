//! Security patch level override (`security_patch.txt`).
//!
//! Either a single bare date applied to every field:
//!
//! ```text
//! 2024-05-01
//! ```
//!
//! or `key=value` lines with keys `system`, `vendor`, `boot`, `all`:
//!
//! ```text
//! all=2024-05-01
//! boot=2024-06-01
//! ```
//!
//! A specific key that is not set falls back to `all`.

use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

const KNOWN_KEYS: [&str; 4] = ["system", "vendor", "boot", "all"];

/// Resolved override. `system`/`vendor`/`boot` already include the `all` fallback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchLevelOverride {
    pub system: Option<String>,
    pub vendor: Option<String>,
    pub boot: Option<String>,
    pub all: Option<String>,
}

impl PatchLevelOverride {
    /// Parse the override file. `None` (file absent) or no usable content means no override.
    pub fn parse(contents: Option<&str>) -> Option<Self> {
        let lines: Vec<&str> = contents?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect();

        match lines.as_slice() {
            [] => return None,
            [single] if !single.contains('=') => {
                let all = Some(single.to_string());
                return Some(Self {
                    system: all.clone(),
                    vendor: all.clone(),
                    boot: all.clone(),
                    all,
                });
            }
            _ => {}
        }

        let mut map: HashMap<String, String> = HashMap::new();
        for line in lines {
            let Some((key, value)) = line.split_once('=') else {
                tracing::debug!(target: "attestor::patch_level", line, "ignoring line without '='");
                continue;
            };
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::debug!(target: "attestor::patch_level", key = %key, "ignoring unknown key");
                continue;
            }
            map.insert(key, value.trim().to_string());
        }

        if map.is_empty() {
            return None;
        }

        let all = map.get("all").cloned();
        let resolve = |key: &str| map.get(key).cloned().or_else(|| all.clone());
        Some(Self {
            system: resolve("system"),
            vendor: resolve("vendor"),
            boot: resolve("boot"),
            all,
        })
    }
}

/// A patch level date as embedded in attestation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchDate {
    year: i32,
    month: u32,
    day: Option<u32>,
}

impl PatchDate {
    /// Accepts `YYYY-MM-DD`, `YYYY-MM`, `YYYYMMDD` and `YYYYMM`.
    pub fn parse(value: &str) -> Option<Self> {
        let digits: String = value.trim().chars().filter(|c| *c != '-').collect();
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        match digits.len() {
            6 => {
                let year = digits[..4].parse().ok()?;
                let month = digits[4..6].parse().ok()?;
                NaiveDate::from_ymd_opt(year, month, 1)?;
                Some(Self { year, month, day: None })
            }
            8 => {
                let date = NaiveDate::parse_from_str(&digits, "%Y%m%d").ok()?;
                Some(Self {
                    year: date.year(),
                    month: date.month(),
                    day: Some(date.day()),
                })
            }
            _ => None,
        }
    }

    /// `YYYYMM`, the `osPatchLevel` encoding.
    pub fn month_level(&self) -> i64 {
        i64::from(self.year) * 100 + i64::from(self.month)
    }

    /// `YYYYMMDD`, the vendor/boot encoding. Month-only dates use day 01.
    pub fn day_level(&self) -> i64 {
        self.month_level() * 100 + i64::from(self.day.unwrap_or(1))
    }
}
