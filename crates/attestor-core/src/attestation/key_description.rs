//! The Android key attestation record (`KeyDescription`).
//!
//! ```text
//! KeyDescription ::= SEQUENCE {
//!     attestationVersion         INTEGER,
//!     attestationSecurityLevel   SecurityLevel,
//!     keyMintVersion             INTEGER,
//!     keyMintSecurityLevel       SecurityLevel,
//!     attestationChallenge       OCTET_STRING,
//!     uniqueId                   OCTET_STRING,
//!     softwareEnforced           AuthorizationList,
//!     hardwareEnforced           AuthorizationList,
//! }
//! ```
//!
//! `AuthorizationList` is a SEQUENCE of optional `[tag] EXPLICIT` entries in
//! ascending tag order; entries this module does not interpret are carried
//! through verbatim.

use super::der::{Class, Tlv, TAG_SEQUENCE};
use crate::error::DerError;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Authorization tag numbers (tag value with the type bits masked off).
pub mod tags {
    pub const PURPOSE: u32 = 1;
    pub const ALGORITHM: u32 = 2;
    pub const KEY_SIZE: u32 = 3;
    pub const DIGEST: u32 = 5;
    pub const PADDING: u32 = 6;
    pub const EC_CURVE: u32 = 10;
    pub const RSA_PUBLIC_EXPONENT: u32 = 200;
    pub const NO_AUTH_REQUIRED: u32 = 503;
    pub const CREATION_DATE_TIME: u32 = 701;
    pub const ORIGIN: u32 = 702;
    pub const ROOT_OF_TRUST: u32 = 704;
    pub const OS_VERSION: u32 = 705;
    pub const OS_PATCH_LEVEL: u32 = 706;
    pub const ATTESTATION_APPLICATION_ID: u32 = 709;
    pub const VENDOR_PATCH_LEVEL: u32 = 718;
    pub const BOOT_PATCH_LEVEL: u32 = 719;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Software,
    TrustedEnvironment,
    StrongBox,
}

impl SecurityLevel {
    fn value(self) -> i64 {
        match self {
            SecurityLevel::Software => 0,
            SecurityLevel::TrustedEnvironment => 1,
            SecurityLevel::StrongBox => 2,
        }
    }

    fn from_value(v: i64) -> Result<Self, DerError> {
        match v {
            0 => Ok(SecurityLevel::Software),
            1 => Ok(SecurityLevel::TrustedEnvironment),
            2 => Ok(SecurityLevel::StrongBox),
            other => Err(DerError::Malformed(format!("security level {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifiedBootState {
    #[default]
    Verified,
    SelfSigned,
    Unverified,
    Failed,
}

impl VerifiedBootState {
    fn value(self) -> i64 {
        match self {
            VerifiedBootState::Verified => 0,
            VerifiedBootState::SelfSigned => 1,
            VerifiedBootState::Unverified => 2,
            VerifiedBootState::Failed => 3,
        }
    }

    fn from_value(v: i64) -> Result<Self, DerError> {
        match v {
            0 => Ok(VerifiedBootState::Verified),
            1 => Ok(VerifiedBootState::SelfSigned),
            2 => Ok(VerifiedBootState::Unverified),
            3 => Ok(VerifiedBootState::Failed),
            other => Err(DerError::Malformed(format!("verified boot state {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootOfTrust {
    pub verified_boot_key: Vec<u8>,
    pub device_locked: bool,
    pub verified_boot_state: VerifiedBootState,
    /// Absent before attestation version 3.
    pub verified_boot_hash: Option<Vec<u8>>,
}

impl RootOfTrust {
    pub fn to_tlv(&self) -> Tlv {
        let mut fields = vec![
            Tlv::octet_string(&self.verified_boot_key),
            Tlv::boolean(self.device_locked),
            Tlv::enumerated(self.verified_boot_state.value()),
        ];
        if let Some(hash) = &self.verified_boot_hash {
            fields.push(Tlv::octet_string(hash));
        }
        Tlv::sequence(fields)
    }

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, DerError> {
        let fields = sequence_children(tlv)?;
        if fields.len() < 3 {
            return Err(DerError::Malformed("RootOfTrust needs at least 3 fields".into()));
        }
        Ok(Self {
            verified_boot_key: fields[0].as_octets()?.to_vec(),
            device_locked: fields[1].as_bool()?,
            verified_boot_state: VerifiedBootState::from_value(fields[2].as_integer()?)?,
            verified_boot_hash: fields.get(3).map(|t| t.as_octets().map(<[u8]>::to_vec)).transpose()?,
        })
    }
}

/// Ordered authorization entries keyed by tag number. Values are the
/// unwrapped inner TLVs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationList {
    entries: BTreeMap<u32, Tlv>,
}

impl AuthorizationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tag: u32, value: Tlv) {
        self.entries.insert(tag, value);
    }

    pub fn get(&self, tag: u32) -> Option<&Tlv> {
        self.entries.get(&tag)
    }

    pub fn remove(&mut self, tag: u32) -> Option<Tlv> {
        self.entries.remove(&tag)
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn set_integer(&mut self, tag: u32, v: i64) {
        self.set(tag, Tlv::integer(v));
    }

    pub fn integer(&self, tag: u32) -> Option<i64> {
        self.get(tag).and_then(|t| t.as_integer().ok())
    }

    /// `SET OF INTEGER` entries such as purpose and digest.
    pub fn set_integers(&mut self, tag: u32, values: &[i64]) {
        if values.is_empty() {
            self.remove(tag);
            return;
        }
        self.set(tag, Tlv::set_of(values.iter().map(|v| Tlv::integer(*v)).collect()));
    }

    pub fn integers(&self, tag: u32) -> Vec<i64> {
        self.get(tag)
            .and_then(|t| t.children().ok())
            .map(|members| members.iter().filter_map(|m| m.as_integer().ok()).collect())
            .unwrap_or_default()
    }

    pub fn root_of_trust(&self) -> Result<Option<RootOfTrust>, DerError> {
        self.get(tags::ROOT_OF_TRUST).map(RootOfTrust::from_tlv).transpose()
    }

    pub fn set_root_of_trust(&mut self, rot: &RootOfTrust) {
        self.set(tags::ROOT_OF_TRUST, rot.to_tlv());
    }

    pub fn to_tlv(&self) -> Tlv {
        Tlv::sequence(
            self.entries
                .iter()
                .map(|(tag, value)| Tlv::explicit(*tag, value))
                .collect(),
        )
    }

    pub fn from_tlv(tlv: &Tlv) -> Result<Self, DerError> {
        let mut entries = BTreeMap::new();
        for entry in sequence_children(tlv)? {
            if entry.class != Class::ContextSpecific {
                return Err(DerError::UnexpectedTag {
                    expected: "context-specific authorization".into(),
                    found: format!("{:?} {}", entry.class, entry.tag),
                });
            }
            entries.insert(entry.tag, entry.unwrap_explicit()?);
        }
        Ok(Self { entries })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDescription {
    pub attestation_version: i64,
    pub attestation_security_level: SecurityLevel,
    pub keymint_version: i64,
    pub keymint_security_level: SecurityLevel,
    pub challenge: Vec<u8>,
    pub unique_id: Vec<u8>,
    pub software_enforced: AuthorizationList,
    pub hardware_enforced: AuthorizationList,
}

impl KeyDescription {
    pub fn decode(der: &[u8]) -> Result<Self, DerError> {
        let top = Tlv::parse_exact(der)?;
        let fields = sequence_children(&top)?;
        if fields.len() < 8 {
            return Err(DerError::Malformed(format!(
                "KeyDescription has {} fields, expected 8",
                fields.len()
            )));
        }
        Ok(Self {
            attestation_version: fields[0].as_integer()?,
            attestation_security_level: SecurityLevel::from_value(fields[1].as_integer()?)?,
            keymint_version: fields[2].as_integer()?,
            keymint_security_level: SecurityLevel::from_value(fields[3].as_integer()?)?,
            challenge: fields[4].as_octets()?.to_vec(),
            unique_id: fields[5].as_octets()?.to_vec(),
            software_enforced: AuthorizationList::from_tlv(&fields[6])?,
            hardware_enforced: AuthorizationList::from_tlv(&fields[7])?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        Tlv::sequence(vec![
            Tlv::integer(self.attestation_version),
            Tlv::enumerated(self.attestation_security_level.value()),
            Tlv::integer(self.keymint_version),
            Tlv::enumerated(self.keymint_security_level.value()),
            Tlv::octet_string(&self.challenge),
            Tlv::octet_string(&self.unique_id),
            self.software_enforced.to_tlv(),
            self.hardware_enforced.to_tlv(),
        ])
        .to_der()
    }
}

/// DER of `AttestationApplicationId` for the given packages (version 0, no signature digests).
pub fn application_id(packages: &[String]) -> Vec<u8> {
    let infos = packages
        .iter()
        .map(|p| Tlv::sequence(vec![Tlv::octet_string(p.as_bytes()), Tlv::integer(0)]))
        .collect();
    Tlv::sequence(vec![Tlv::set_of(infos), Tlv::set_of(Vec::new())]).to_der()
}

fn sequence_children(tlv: &Tlv) -> Result<Vec<Tlv>, DerError> {
    if !tlv.is(Class::Universal, TAG_SEQUENCE) {
        return Err(DerError::UnexpectedTag {
            expected: "SEQUENCE".into(),
            found: format!("{:?} {}", tlv.class, tlv.tag),
        });
    }
    tlv.children()
}
