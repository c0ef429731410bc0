//! Shared fixtures: keyboxes are generated per test, nothing is checked in.

#![allow(dead_code)]

use attestor_core::attestation::issue_self_signed;
use attestor_core::KeyboxSigningKey;
use chrono::{Duration, Utc};
use p256::pkcs8::LineEnding;
use x509_cert::der::{Decode, EncodePem};
use x509_cert::Certificate;

/// `keybox.xml` with a single EC entry, plus the DER of its root certificate.
pub fn ec_keybox_xml(cn: &str) -> (String, Vec<u8>) {
    let secret = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let key_pem = secret.to_sec1_pem(LineEnding::LF).unwrap().to_string();
    let key = KeyboxSigningKey::Ec(secret.into());
    let now = Utc::now();
    let root = issue_self_signed(&key, &format!("CN={cn}"), now, now + Duration::days(30)).unwrap();
    let root_pem = Certificate::from_der(&root).unwrap().to_pem(LineEnding::LF).unwrap();

    let xml = format!(
        r#"<?xml version="1.0"?>
<AndroidAttestation>
    <NumberOfKeyboxes>1</NumberOfKeyboxes>
    <Keybox DeviceID="fixture">
        <Key algorithm="ecdsa">
            <PrivateKey format="pem">
{key_pem}
            </PrivateKey>
            <CertificateChain>
                <NumberOfCertificates>1</NumberOfCertificates>
                <Certificate format="pem">
{root_pem}
                </Certificate>
            </CertificateChain>
        </Key>
    </Keybox>
</AndroidAttestation>
"#
    );
    (xml, root)
}
