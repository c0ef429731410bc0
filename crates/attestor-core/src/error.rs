//! Error types for the attestor core.
//!
//! Configuration and external-service failures are swallowed at the core's
//! boundary (logged, last-good state kept); only forging failures on a
//! mandatory generation ever reach a caller.

use crate::keybox::KeyAlgorithm;
use thiserror::Error;

/// Result type alias for forging operations
pub type ForgeResult<T> = Result<T, ForgeError>;

/// Errors raised while decoding or encoding an attestation record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DerError {
    #[error("unexpected end of input")]
    Truncated,

    #[error("indefinite or oversized length")]
    BadLength,

    #[error("tag number too large")]
    TagOverflow,

    #[error("expected {expected}, found {found}")]
    UnexpectedTag { expected: String, found: String },

    #[error("integer out of range")]
    IntegerOverflow,

    #[error("malformed value: {0}")]
    Malformed(String),
}

/// Errors raised while loading `keybox.xml`.
#[derive(Error, Debug)]
pub enum KeyboxError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("PEM error: {0}")]
    Pem(#[from] std::io::Error),

    #[error("no private key in {algorithm} entry")]
    MissingPrivateKey { algorithm: KeyAlgorithm },

    #[error("no certificates in {algorithm} entry")]
    EmptyChain { algorithm: KeyAlgorithm },

    #[error("invalid {algorithm} private key: {reason}")]
    InvalidKey {
        algorithm: KeyAlgorithm,
        reason: String,
    },

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("keybox contains no usable keys")]
    Empty,
}

/// Errors raised by the certificate forging engine.
#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("no keybox loaded")]
    NoKeybox,

    #[error("keybox has no {0} entry")]
    MissingKeybox(KeyAlgorithm),

    #[error("certificate chain is empty")]
    EmptyChain,

    #[error("leaf certificate has no attestation extension")]
    MissingAttestation,

    #[error("unsupported public key algorithm: {0}")]
    UnsupportedKey(String),

    #[error("attestation record: {0}")]
    Record(#[from] DerError),

    #[error("X.509 encoding: {0}")]
    X509(#[from] x509_cert::der::Error),

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),
}

/// Errors raised by a package-identity resolver.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("package manager unavailable: {0}")]
    Unavailable(String),

    #[error("unknown uid {0}")]
    UnknownUid(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the real hardware keystore primitive.
#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("key generation failed: {0}")]
    Generate(String),

    #[error("key deletion failed: {0}")]
    Delete(String),

    #[error("keystore unavailable: {0}")]
    Unavailable(String),
}
