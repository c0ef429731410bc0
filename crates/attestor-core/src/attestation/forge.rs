//! Certificate Forging Engine.
//!
//! Two paths, both signed by the keybox entry matching the key algorithm:
//!
//! - **leaf hack**: the real hardware leaf is decoded, its hardware-enforced
//!   root of trust and patch levels are rewritten, and it is re-issued under
//!   the keybox chain. Public key and challenge are untouched.
//! - **generate**: a fresh leaf is built from the request and the device
//!   profile, then followed by the keybox chain unmodified.

use super::der::Tlv;
use super::key_description::{
    application_id, tags, AuthorizationList, KeyDescription, RootOfTrust, SecurityLevel,
};
use crate::config::DeviceProfile;
use crate::error::{ForgeError, ForgeResult};
use crate::keybox::{KeyAlgorithm, Keybox, KeyboxEntry, KeyboxSigningKey};
use crate::patch_level::{PatchDate, PatchLevelOverride};
use chrono::{DateTime, Datelike, Duration, Utc};
use rand::rngs::OsRng;
use std::str::FromStr;
use x509_cert::der::asn1::{BitString, GeneralizedTime, ObjectIdentifier, OctetString, UtcTime};
use x509_cert::der::{Decode, Encode, ErrorKind};
use x509_cert::ext::Extension;
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::{Time, Validity};
use x509_cert::{Certificate, TbsCertificate, Version};

pub const ATTESTATION_EXTENSION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.3.6.1.4.1.11129.2.1.17");
const KEY_USAGE_OID: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.15");
const ID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const RSA_ENCRYPTION: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

const DEFAULT_SUBJECT: &str = "CN=Android Keystore Key";
const DEFAULT_RSA_BITS: u32 = 2048;
const DEFAULT_RSA_EXPONENT: u64 = 65537;

/// KeyMint `KeyPurpose` values.
pub mod purpose {
    pub const ENCRYPT: i64 = 0;
    pub const DECRYPT: i64 = 1;
    pub const SIGN: i64 = 2;
    pub const VERIFY: i64 = 3;
    pub const WRAP_KEY: i64 = 5;
    pub const AGREE_KEY: i64 = 6;
    pub const ATTEST_KEY: i64 = 7;
}

const DIGEST_SHA256: i64 = 4;
const ALGORITHM_RSA: i64 = 1;
const ALGORITHM_EC: i64 = 3;
const EC_CURVE_P256: i64 = 1;
const ORIGIN_GENERATED: i64 = 0;

/// Parameters of an intercepted key-generation request.
#[derive(Debug, Clone)]
pub struct KeyGenRequest {
    pub algorithm: KeyAlgorithm,
    /// Bits; EC is always 256, RSA defaults to 2048.
    pub key_size: Option<u32>,
    pub challenge: Vec<u8>,
    pub purposes: Vec<i64>,
    pub digests: Vec<i64>,
    /// DER `SubjectPublicKeyInfo` of a key the caller already holds.
    pub public_key: Option<Vec<u8>>,
    /// DER `AttestationApplicationId`, when the caller supplies one.
    pub application_id: Option<Vec<u8>>,
    pub serial: Option<u64>,
    pub subject: Option<String>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub rsa_public_exponent: Option<u64>,
}

impl KeyGenRequest {
    /// A signing key request with SHA-256 and nothing else specified.
    pub fn new(algorithm: KeyAlgorithm, challenge: impl Into<Vec<u8>>) -> Self {
        Self {
            algorithm,
            key_size: None,
            challenge: challenge.into(),
            purposes: vec![purpose::SIGN, purpose::VERIFY],
            digests: vec![DIGEST_SHA256],
            public_key: None,
            application_id: None,
            serial: None,
            subject: None,
            not_before: None,
            not_after: None,
            rsa_public_exponent: None,
        }
    }
}

/// Result of the generate path.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    /// DER certificates, leaf first.
    pub chain: Vec<Vec<u8>>,
    /// PKCS#8 DER of the key pair generated here; `None` when the request carried a public key.
    pub private_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PatchLevels {
    os: Option<i64>,
    vendor: Option<i64>,
    boot: Option<i64>,
}

/// Forging engine bound to one consistent view of keybox, override and device profile.
pub struct CertForger<'a> {
    keybox: &'a Keybox,
    patch_level: Option<&'a PatchLevelOverride>,
    device: &'a DeviceProfile,
}

impl<'a> CertForger<'a> {
    pub fn new(
        keybox: &'a Keybox,
        patch_level: Option<&'a PatchLevelOverride>,
        device: &'a DeviceProfile,
    ) -> Self {
        Self {
            keybox,
            patch_level,
            device,
        }
    }

    fn entry(&self, algorithm: KeyAlgorithm) -> ForgeResult<&'a KeyboxEntry> {
        self.keybox
            .entry(algorithm)
            .ok_or(ForgeError::MissingKeybox(algorithm))
    }

    /// Rewrite the real leaf and re-issue it under the keybox chain.
    pub fn leaf_hack(&self, real_chain: &[Vec<u8>]) -> ForgeResult<Vec<Vec<u8>>> {
        let leaf_der = real_chain.first().ok_or(ForgeError::EmptyChain)?;
        let leaf = Certificate::from_der(leaf_der)?;
        let mut tbs = leaf.tbs_certificate;

        let algorithm = spki_algorithm(&tbs.subject_public_key_info)?;
        let entry = self.entry(algorithm)?;

        let extensions = tbs.extensions.as_mut().ok_or(ForgeError::MissingAttestation)?;
        let ext = extensions
            .iter_mut()
            .find(|e| e.extn_id == ATTESTATION_EXTENSION_OID)
            .ok_or(ForgeError::MissingAttestation)?;

        let mut record = KeyDescription::decode(ext.extn_value.as_bytes())?;
        let real_rot = record.hardware_enforced.root_of_trust()?;
        record
            .hardware_enforced
            .set_root_of_trust(&self.root_of_trust(real_rot.as_ref()));

        let levels = self.override_levels();
        apply_patch_levels(&mut record, levels);
        ext.extn_value = OctetString::new(record.encode())?;

        tbs.issuer = entry.subject().clone();
        tbs.signature = entry.signature_algorithm();

        tracing::debug!(
            target: "attestor::forge",
            %algorithm,
            os_patch_level = ?levels.os,
            "leaf certificate rewritten"
        );

        let mut chain = vec![sign_tbs(tbs, entry.key())?];
        chain.extend(entry.chain().iter().cloned());
        Ok(chain)
    }

    /// Synthesize a leaf for `request` and chain it to the keybox entry.
    ///
    /// `packages` feeds `attestationApplicationId` when the request has none.
    pub fn generate(&self, request: &KeyGenRequest, packages: &[String]) -> ForgeResult<GeneratedKey> {
        let entry = self.entry(request.algorithm)?;

        let (spki, private_key, key_size) = match &request.public_key {
            Some(der) => {
                let spki = SubjectPublicKeyInfoOwned::from_der(der)?;
                let algorithm = spki_algorithm(&spki)?;
                if algorithm != request.algorithm {
                    return Err(ForgeError::UnsupportedKey(format!(
                        "{algorithm} public key for {} request",
                        request.algorithm
                    )));
                }
                let bits = match algorithm {
                    KeyAlgorithm::Ec => 256,
                    KeyAlgorithm::Rsa => rsa_bits(der)?,
                };
                (spki, None, bits)
            }
            None => {
                let (spki, pkcs8, bits) = generate_key_pair(request)?;
                (spki, Some(pkcs8), bits)
            }
        };

        let record = self.key_description(request, packages, key_size)?;
        let now = Utc::now();
        let not_before = request.not_before.unwrap_or(now);
        let not_after = request.not_after.unwrap_or_else(|| {
            not_before + Duration::days(i64::from(self.device.attestation_validity_days))
        });

        let mut extensions = Vec::with_capacity(2);
        if let Some(bits) = key_usage_bits(&request.purposes) {
            extensions.push(Extension {
                extn_id: KEY_USAGE_OID,
                critical: true,
                extn_value: OctetString::new(Tlv::named_bits(bits).to_der())?,
            });
        }
        extensions.push(Extension {
            extn_id: ATTESTATION_EXTENSION_OID,
            critical: false,
            extn_value: OctetString::new(record.encode())?,
        });

        let tbs = TbsCertificate {
            version: Version::V3,
            serial_number: serial_number(request.serial.unwrap_or(1))?,
            signature: entry.signature_algorithm(),
            issuer: entry.subject().clone(),
            validity: Validity {
                not_before: to_time(not_before)?,
                not_after: to_time(not_after)?,
            },
            subject: Name::from_str(request.subject.as_deref().unwrap_or(DEFAULT_SUBJECT))?,
            subject_public_key_info: spki,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: Some(extensions),
        };

        let mut chain = vec![sign_tbs(tbs, entry.key())?];
        chain.extend(entry.chain().iter().cloned());
        tracing::debug!(
            target: "attestor::forge",
            algorithm = %request.algorithm,
            key_size,
            chain_len = chain.len(),
            "certificate chain generated"
        );
        Ok(GeneratedKey { chain, private_key })
    }

    fn key_description(
        &self,
        request: &KeyGenRequest,
        packages: &[String],
        key_size: u32,
    ) -> ForgeResult<KeyDescription> {
        let mut sw = AuthorizationList::new();
        sw.set_integer(tags::CREATION_DATE_TIME, Utc::now().timestamp_millis());
        let app_id = request
            .application_id
            .clone()
            .unwrap_or_else(|| application_id(packages));
        sw.set(tags::ATTESTATION_APPLICATION_ID, Tlv::octet_string(&app_id));

        let mut hw = AuthorizationList::new();
        hw.set_integers(tags::PURPOSE, &request.purposes);
        hw.set_integer(tags::KEY_SIZE, i64::from(key_size));
        hw.set_integers(tags::DIGEST, &request.digests);
        match request.algorithm {
            KeyAlgorithm::Ec => {
                hw.set_integer(tags::ALGORITHM, ALGORITHM_EC);
                hw.set_integer(tags::EC_CURVE, EC_CURVE_P256);
            }
            KeyAlgorithm::Rsa => {
                hw.set_integer(tags::ALGORITHM, ALGORITHM_RSA);
                let exponent = request.rsa_public_exponent.unwrap_or(DEFAULT_RSA_EXPONENT);
                let exponent = i64::try_from(exponent).map_err(|_| {
                    ForgeError::UnsupportedKey(format!("RSA public exponent {exponent} out of range"))
                })?;
                hw.set_integer(tags::RSA_PUBLIC_EXPONENT, exponent);
            }
        }
        hw.set(tags::NO_AUTH_REQUIRED, Tlv::null());
        hw.set_integer(tags::ORIGIN, ORIGIN_GENERATED);
        hw.set_root_of_trust(&self.root_of_trust(None));
        if let Some(os_version) = self.device.os_version {
            hw.set_integer(tags::OS_VERSION, i64::from(os_version));
        }

        let mut record = KeyDescription {
            attestation_version: self.device.attestation_version,
            attestation_security_level: SecurityLevel::TrustedEnvironment,
            keymint_version: self.device.keymint_version,
            keymint_security_level: SecurityLevel::TrustedEnvironment,
            challenge: request.challenge.clone(),
            unique_id: Vec::new(),
            software_enforced: sw,
            hardware_enforced: hw,
        };
        apply_patch_levels(&mut record, self.resolved_levels());
        Ok(record)
    }

    /// Configured device integrity claims. Boot key and hash fall back to
    /// the real values when not configured.
    fn root_of_trust(&self, real: Option<&RootOfTrust>) -> RootOfTrust {
        let verified_boot_key = match (&self.device.verified_boot_key, real) {
            (None, Some(real)) => real.verified_boot_key.clone(),
            _ => self.device.verified_boot_key_bytes(),
        };
        let verified_boot_hash = self
            .device
            .verified_boot_hash_bytes()
            .or_else(|| real.and_then(|r| r.verified_boot_hash.clone()))
            .or_else(|| Some(vec![0u8; 32]));
        RootOfTrust {
            verified_boot_key,
            device_locked: self.device.device_locked,
            verified_boot_state: self.device.verified_boot_state,
            verified_boot_hash,
        }
    }

    /// Patch levels from the override only.
    fn override_levels(&self) -> PatchLevels {
        let o = self.patch_level;
        PatchLevels {
            os: parse_level("system", o.and_then(|o| o.system.as_deref())).map(|d| d.month_level()),
            vendor: parse_level("vendor", o.and_then(|o| o.vendor.as_deref())).map(|d| d.day_level()),
            boot: parse_level("boot", o.and_then(|o| o.boot.as_deref())).map(|d| d.day_level()),
        }
    }

    /// Override first, then the device's own values.
    fn resolved_levels(&self) -> PatchLevels {
        let over = self.override_levels();
        let device = PatchLevels {
            os: parse_level("device os", self.device.os_patch_level.as_deref()).map(|d| d.month_level()),
            vendor: parse_level("device vendor", self.device.vendor_patch_level.as_deref())
                .map(|d| d.day_level()),
            boot: parse_level("device boot", self.device.boot_patch_level.as_deref())
                .map(|d| d.day_level()),
        };
        PatchLevels {
            os: over.os.or(device.os),
            vendor: over.vendor.or(device.vendor),
            boot: over.boot.or(device.boot),
        }
    }
}

fn parse_level(field: &str, value: Option<&str>) -> Option<PatchDate> {
    let value = value?;
    let date = PatchDate::parse(value);
    if date.is_none() {
        tracing::warn!(target: "attestor::forge", field, value, "unparseable patch level ignored");
    }
    date
}

/// Patch-level tags live in whichever list already carries them, hardware by default.
fn apply_patch_levels(record: &mut KeyDescription, levels: PatchLevels) {
    for (tag, value) in [
        (tags::OS_PATCH_LEVEL, levels.os),
        (tags::VENDOR_PATCH_LEVEL, levels.vendor),
        (tags::BOOT_PATCH_LEVEL, levels.boot),
    ] {
        let Some(value) = value else { continue };
        if record.software_enforced.contains(tag) {
            record.software_enforced.set_integer(tag, value);
        } else {
            record.hardware_enforced.set_integer(tag, value);
        }
    }
}

fn key_usage_bits(purposes: &[i64]) -> Option<u16> {
    let bits = purposes.iter().fold(0u16, |acc, p| {
        acc | match *p {
            purpose::SIGN => 0x8000,     // digitalSignature
            purpose::WRAP_KEY => 0x2000, // keyEncipherment
            purpose::DECRYPT => 0x1000,  // dataEncipherment
            purpose::AGREE_KEY => 0x0800,
            purpose::ATTEST_KEY => 0x0400, // keyCertSign
            _ => 0,
        }
    });
    (bits != 0).then_some(bits)
}

fn spki_algorithm(spki: &SubjectPublicKeyInfoOwned) -> ForgeResult<KeyAlgorithm> {
    let oid = spki.algorithm.oid;
    if oid == ID_EC_PUBLIC_KEY {
        Ok(KeyAlgorithm::Ec)
    } else if oid == RSA_ENCRYPTION {
        Ok(KeyAlgorithm::Rsa)
    } else {
        Err(ForgeError::UnsupportedKey(oid.to_string()))
    }
}

fn rsa_bits(spki_der: &[u8]) -> ForgeResult<u32> {
    use rsa::pkcs8::DecodePublicKey;
    use rsa::traits::PublicKeyParts;
    let key = rsa::RsaPublicKey::from_public_key_der(spki_der)
        .map_err(|e| ForgeError::UnsupportedKey(e.to_string()))?;
    u32::try_from(key.size() * 8).map_err(|e| ForgeError::UnsupportedKey(e.to_string()))
}

fn generate_key_pair(request: &KeyGenRequest) -> ForgeResult<(SubjectPublicKeyInfoOwned, Vec<u8>, u32)> {
    let (spki_der, pkcs8, bits) = match request.algorithm {
        KeyAlgorithm::Ec => {
            use p256::pkcs8::{EncodePrivateKey, EncodePublicKey};
            let key = p256::ecdsa::SigningKey::random(&mut OsRng);
            let spki = key
                .verifying_key()
                .to_public_key_der()
                .map_err(|e| ForgeError::KeyGeneration(e.to_string()))?;
            let pkcs8 = key
                .to_pkcs8_der()
                .map_err(|e| ForgeError::KeyGeneration(e.to_string()))?;
            (spki.as_bytes().to_vec(), pkcs8.as_bytes().to_vec(), 256)
        }
        KeyAlgorithm::Rsa => {
            use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey};
            let bits = request.key_size.unwrap_or(DEFAULT_RSA_BITS);
            let exponent = rsa::BigUint::from(request.rsa_public_exponent.unwrap_or(DEFAULT_RSA_EXPONENT));
            let key = rsa::RsaPrivateKey::new_with_exp(&mut OsRng, bits as usize, &exponent)
                .map_err(|e| ForgeError::KeyGeneration(e.to_string()))?;
            let spki = rsa::RsaPublicKey::from(&key)
                .to_public_key_der()
                .map_err(|e| ForgeError::KeyGeneration(e.to_string()))?;
            let pkcs8 = key
                .to_pkcs8_der()
                .map_err(|e| ForgeError::KeyGeneration(e.to_string()))?;
            (spki.as_bytes().to_vec(), pkcs8.as_bytes().to_vec(), bits)
        }
    };
    Ok((SubjectPublicKeyInfoOwned::from_der(&spki_der)?, pkcs8, bits))
}

/// Positive INTEGER content for a serial number.
fn serial_number(serial: u64) -> ForgeResult<SerialNumber> {
    let bytes = serial.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut content = Vec::with_capacity(9);
    if bytes[start] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(&bytes[start..]);
    Ok(SerialNumber::new(&content)?)
}

/// `UTCTime` through 2049, `GeneralizedTime` after, as RFC 5280 requires.
fn to_time(at: DateTime<Utc>) -> ForgeResult<Time> {
    let secs = u64::try_from(at.timestamp())
        .map_err(|_| x509_cert::der::Error::from(ErrorKind::DateTime))?;
    let since_epoch = std::time::Duration::from_secs(secs);
    if at.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(since_epoch)?))
    }
}

fn sign_tbs(tbs: TbsCertificate, key: &KeyboxSigningKey) -> ForgeResult<Vec<u8>> {
    let signature = key.sign(&tbs.to_der()?)?;
    let cert = Certificate {
        signature_algorithm: tbs.signature.clone(),
        tbs_certificate: tbs,
        signature: BitString::from_bytes(&signature)?,
    };
    Ok(cert.to_der()?)
}

/// Issue a self-signed CA-less certificate for `key`. Used to provision test keyboxes.
pub fn issue_self_signed(
    key: &KeyboxSigningKey,
    subject: &str,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> ForgeResult<Vec<u8>> {
    let name = Name::from_str(subject)?;
    let tbs = TbsCertificate {
        version: Version::V3,
        serial_number: serial_number(1)?,
        signature: key.signature_algorithm(),
        issuer: name.clone(),
        validity: Validity {
            not_before: to_time(not_before)?,
            not_after: to_time(not_after)?,
        },
        subject: name,
        subject_public_key_info: SubjectPublicKeyInfoOwned::from_der(&key.public_key_der()?)?,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None,
    };
    sign_tbs(tbs, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::VerifiedBootState;
    use crate::keybox::test_support::{ec_key, entry, rsa_key};
    use p256::ecdsa::signature::Verifier;

    fn keybox() -> Keybox {
        Keybox::from_entries([entry(ec_key(), "Forge EC Root")])
    }

    fn attestation(cert_der: &[u8]) -> (Certificate, KeyDescription) {
        let cert = Certificate::from_der(cert_der).unwrap();
        let ext = cert
            .tbs_certificate
            .extensions
            .as_ref()
            .unwrap()
            .iter()
            .find(|e| e.extn_id == ATTESTATION_EXTENSION_OID)
            .unwrap();
        let record = KeyDescription::decode(ext.extn_value.as_bytes()).unwrap();
        (cert, record)
    }

    fn verify_ec(cert_der: &[u8], issuer: &KeyboxSigningKey) {
        let KeyboxSigningKey::Ec(key) = issuer else { panic!("EC issuer expected") };
        let cert = Certificate::from_der(cert_der).unwrap();
        let tbs = cert.tbs_certificate.to_der().unwrap();
        let sig = p256::ecdsa::Signature::from_der(cert.signature.raw_bytes()).unwrap();
        key.verifying_key().verify(&tbs, &sig).unwrap();
    }

    #[test]
    fn generate_builds_leaf_under_keybox() {
        let kb = keybox();
        let device = DeviceProfile {
            os_version: Some(150000),
            os_patch_level: Some("2023-01-05".into()),
            vendor_patch_level: Some("2023-01-05".into()),
            ..DeviceProfile::default()
        };
        let patch = PatchLevelOverride::parse(Some("system=2024-05-01")).unwrap();
        let forger = CertForger::new(&kb, Some(&patch), &device);
        let request = KeyGenRequest::new(KeyAlgorithm::Ec, b"nonce".to_vec());

        let generated = forger.generate(&request, &["com.example.bank".to_string()]).unwrap();
        assert!(generated.private_key.is_some());
        assert_eq!(generated.chain.len(), 2);
        let ec_entry = kb.entry(KeyAlgorithm::Ec).unwrap();
        assert_eq!(generated.chain[1], ec_entry.chain()[0]);
        verify_ec(&generated.chain[0], ec_entry.key());

        let (cert, record) = attestation(&generated.chain[0]);
        assert_eq!(cert.tbs_certificate.subject.to_string(), "CN=Android Keystore Key");
        assert_eq!(cert.tbs_certificate.issuer, *ec_entry.subject());
        assert_eq!(record.challenge, b"nonce");
        let hw = &record.hardware_enforced;
        assert_eq!(hw.integer(tags::OS_PATCH_LEVEL), Some(202405));
        assert_eq!(hw.integer(tags::VENDOR_PATCH_LEVEL), Some(20230105));
        assert_eq!(hw.integer(tags::BOOT_PATCH_LEVEL), None);
        assert_eq!(hw.integer(tags::OS_VERSION), Some(150000));
        assert_eq!(hw.integer(tags::ALGORITHM), Some(ALGORITHM_EC));
        let rot = hw.root_of_trust().unwrap().unwrap();
        assert!(rot.device_locked);
        assert_eq!(rot.verified_boot_state, VerifiedBootState::Verified);
        assert!(record.software_enforced.contains(tags::ATTESTATION_APPLICATION_ID));
    }

    #[test]
    fn generate_keeps_supplied_public_key() {
        let kb = keybox();
        let device = DeviceProfile::default();
        let forger = CertForger::new(&kb, None, &device);
        let caller = ec_key();
        let mut request = KeyGenRequest::new(KeyAlgorithm::Ec, b"c".to_vec());
        request.public_key = Some(caller.public_key_der().unwrap());
        request.serial = Some(0x80);

        let generated = forger.generate(&request, &[]).unwrap();
        assert!(generated.private_key.is_none());
        let (cert, _) = attestation(&generated.chain[0]);
        assert_eq!(
            cert.tbs_certificate.subject_public_key_info.to_der().unwrap(),
            caller.public_key_der().unwrap()
        );
        assert_eq!(
            cert.tbs_certificate.serial_number.to_der().unwrap(),
            vec![0x02, 0x02, 0x00, 0x80]
        );
    }

    #[test]
    fn generate_without_entry_reports_algorithm() {
        let kb = keybox();
        let device = DeviceProfile::default();
        let forger = CertForger::new(&kb, None, &device);
        let err = forger
            .generate(&KeyGenRequest::new(KeyAlgorithm::Rsa, Vec::new()), &[])
            .unwrap_err();
        assert!(matches!(err, ForgeError::MissingKeybox(KeyAlgorithm::Rsa)));
    }

    #[test]
    fn generate_rejects_oversized_rsa_exponent() {
        let kb = Keybox::from_entries([entry(rsa_key(), "Forge RSA Root")]);
        let device = DeviceProfile::default();
        let forger = CertForger::new(&kb, None, &device);
        let mut request = KeyGenRequest::new(KeyAlgorithm::Rsa, Vec::new());
        request.public_key = Some(rsa_key().public_key_der().unwrap());
        request.rsa_public_exponent = Some(u64::MAX);
        assert!(matches!(
            forger.generate(&request, &[]),
            Err(ForgeError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn generate_rejects_mismatched_public_key() {
        let kb = keybox();
        let device = DeviceProfile::default();
        let forger = CertForger::new(&kb, None, &device);
        let mut request = KeyGenRequest::new(KeyAlgorithm::Ec, Vec::new());
        request.public_key = Some(rsa_key().public_key_der().unwrap());
        assert!(matches!(
            forger.generate(&request, &[]),
            Err(ForgeError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn leaf_hack_rewrites_root_of_trust_and_keeps_challenge() {
        // A "real" chain issued by a different authority.
        let real_kb = Keybox::from_entries([entry(ec_key(), "Real Device CA")]);
        let honest = DeviceProfile {
            device_locked: false,
            verified_boot_state: VerifiedBootState::Unverified,
            verified_boot_key: Some("11".repeat(32)),
            ..DeviceProfile::default()
        };
        let real = CertForger::new(&real_kb, None, &honest)
            .generate(&KeyGenRequest::new(KeyAlgorithm::Ec, b"real-challenge".to_vec()), &[])
            .unwrap();

        let kb = keybox();
        let profile = DeviceProfile::default();
        let patch = PatchLevelOverride::parse(Some("2024-06")).unwrap();
        let hacked = CertForger::new(&kb, Some(&patch), &profile)
            .leaf_hack(&real.chain)
            .unwrap();

        let ec_entry = kb.entry(KeyAlgorithm::Ec).unwrap();
        assert_eq!(hacked.len(), 2);
        assert_eq!(hacked[1], ec_entry.chain()[0]);
        verify_ec(&hacked[0], ec_entry.key());

        let (before, real_record) = attestation(&real.chain[0]);
        let (after, record) = attestation(&hacked[0]);
        assert_eq!(
            before.tbs_certificate.subject_public_key_info,
            after.tbs_certificate.subject_public_key_info
        );
        assert_eq!(after.tbs_certificate.issuer, *ec_entry.subject());
        assert_eq!(record.challenge, b"real-challenge");
        assert_eq!(record.software_enforced, real_record.software_enforced);

        let rot = record.hardware_enforced.root_of_trust().unwrap().unwrap();
        assert!(rot.device_locked);
        assert_eq!(rot.verified_boot_state, VerifiedBootState::Verified);
        // No boot key configured: the real one is kept.
        assert_eq!(rot.verified_boot_key, vec![0x11; 32]);
        assert_eq!(record.hardware_enforced.integer(tags::OS_PATCH_LEVEL), Some(202406));
        assert_eq!(record.hardware_enforced.integer(tags::BOOT_PATCH_LEVEL), Some(20240601));
    }

    #[test]
    fn leaf_hack_requires_attestation_extension() {
        let kb = keybox();
        let device = DeviceProfile::default();
        let plain = entry(ec_key(), "Plain").chain()[0].clone();
        let err = CertForger::new(&kb, None, &device).leaf_hack(&[plain]).unwrap_err();
        assert!(matches!(err, ForgeError::MissingAttestation));
        let err = CertForger::new(&kb, None, &device).leaf_hack(&[]).unwrap_err();
        assert!(matches!(err, ForgeError::EmptyChain));
    }

    #[test]
    fn key_usage_follows_purposes() {
        assert_eq!(key_usage_bits(&[purpose::SIGN, purpose::VERIFY]), Some(0x8000));
        assert_eq!(key_usage_bits(&[purpose::ATTEST_KEY]), Some(0x0400));
        assert_eq!(key_usage_bits(&[purpose::VERIFY]), None);
    }

    #[test]
    fn far_future_uses_generalized_time() {
        let t = DateTime::parse_from_rfc3339("2055-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert!(matches!(to_time(t).unwrap(), Time::GeneralTime(_)));
        let t = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        assert!(matches!(to_time(t).unwrap(), Time::UtcTime(_)));
    }
}
