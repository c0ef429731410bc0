//! Attestation certificate handling: the record codec and the forging engine.

pub mod der;
pub mod forge;
pub mod key_description;

pub use forge::{
    issue_self_signed, CertForger, GeneratedKey, KeyGenRequest, ATTESTATION_EXTENSION_OID,
};
pub use key_description::{
    tags, AuthorizationList, KeyDescription, RootOfTrust, SecurityLevel, VerifiedBootState,
};
