// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Synthetic App Attest PKI and attestation objects for unit tests.

use super::authdata::AAGUID_LEN;
use super::common::concat;
use super::nonce::{NonceForm, NONCE_EXTENSION_OID};
use crate::store::PinnedRoot;
use ciborium::ser::into_writer;
use ciborium::Value;
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::ecdsa::EcdsaSig;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sha::sha256;
use openssl::x509::extension::BasicConstraints;
use openssl::x509::{X509Builder, X509Extension, X509NameBuilder, X509Ref, X509};
use std::sync::atomic::{AtomicU32, Ordering};

pub const TEST_APP_ID: &str = "TEAM123.com.example.app";

static SERIAL: AtomicU32 = AtomicU32::new(1);

fn p256_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn p384_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::SECP384R1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn certificate(
    cn: &str,
    subject_key: &PKey<Private>,
    issuer: Option<(&X509Ref, &PKey<Private>)>,
    ca: bool,
    extension: Option<&[u8]>,
) -> X509 {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_text("CN", cn).unwrap();
    let name = name.build();

    let mut b = X509Builder::new().unwrap();
    b.set_version(2).unwrap();

    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed))
        .unwrap()
        .to_asn1_integer()
        .unwrap();
    b.set_serial_number(&serial).unwrap();

    b.set_subject_name(&name).unwrap();
    match issuer {
        Some((cert, _)) => b.set_issuer_name(cert.subject_name()).unwrap(),
        None => b.set_issuer_name(&name).unwrap(),
    }

    b.set_pubkey(subject_key).unwrap();
    b.set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    b.set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();

    if ca {
        b.append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
    }

    if let Some(v) = extension {
        let oid = Asn1Object::from_str(NONCE_EXTENSION_OID).unwrap();
        let value = Asn1OctetString::new_from_bytes(v).unwrap();
        b.append_extension(X509Extension::new_from_der(&oid, false, &value).unwrap())
            .unwrap();
    }

    let signer = issuer.map(|(_, k)| k).unwrap_or(subject_key);
    b.sign(signer, MessageDigest::sha256()).unwrap();

    b.build()
}

/// DER `OCTET STRING` wrapping `v`
pub fn der_octet_string(v: &[u8]) -> Vec<u8> {
    der_wrap(0x04, v)
}

/// The nonce encoding found in production credCerts:
/// `SEQUENCE { [1] { OCTET STRING nonce } }`
pub fn apple_nonce_extension(nonce: &[u8]) -> Vec<u8> {
    der_wrap(0x30, &der_wrap(0xa1, &der_octet_string(nonce)))
}

fn der_wrap(tag: u8, v: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];

    match v.len() {
        l if l < 0x80 => out.push(l as u8),
        l if l <= 0xff => out.extend_from_slice(&[0x81, l as u8]),
        l => {
            out.push(0x82);
            out.extend_from_slice(&(l as u16).to_be_bytes());
        }
    }

    out.extend_from_slice(v);
    out
}

fn der_integer_bytes(v: &[u8], leading_zeros: usize) -> Vec<u8> {
    let mut content = vec![0u8; leading_zeros];
    if v.first().map_or(true, |b| b & 0x80 != 0) {
        content.push(0x00);
    }
    content.extend_from_slice(v);
    der_wrap(0x02, &content)
}

/// Re-encode a DER ECDSA signature with one superfluous 0x00 in front of `r`.
/// The values are unchanged but the encoding is no longer DER.
pub fn redundant_zero_on_r(sig: &[u8]) -> Vec<u8> {
    let parsed = EcdsaSig::from_der(sig).unwrap();

    let mut body = der_integer_bytes(&parsed.r().to_vec(), 1);
    body.extend(der_integer_bytes(&parsed.s().to_vec(), 0));

    der_wrap(0x30, &body)
}

/// A root, an intermediate issued by the root, and one leaf key pair.
pub struct TestPki {
    pub root_key: PKey<Private>,
    pub root: X509,
    pub intermediate_key: PKey<Private>,
    pub intermediate: X509,
    pub leaf_key: PKey<Private>,
}

impl TestPki {
    pub fn new() -> Self {
        let root_key = p256_key();
        let root = certificate("Test App Attestation Root CA", &root_key, None, true, None);

        let intermediate_key = p256_key();
        let intermediate = certificate(
            "Test App Attestation CA 1",
            &intermediate_key,
            Some((&*root, &root_key)),
            true,
            None,
        );

        Self {
            root_key,
            root,
            intermediate_key,
            intermediate,
            leaf_key: p256_key(),
        }
    }

    pub fn pinned_root(&self) -> PinnedRoot {
        PinnedRoot::from_der(&self.root.to_der().unwrap()).unwrap()
    }

    /// Leaf issued by the root, with the nonce in the production encoding
    pub fn leaf_with_nonce(&self, nonce: &[u8]) -> X509 {
        self.leaf_with_extension_value(&apple_nonce_extension(nonce))
    }

    /// Leaf issued by the root, with the nonce extension carrying `value`
    /// verbatim
    pub fn leaf_with_extension_value(&self, value: &[u8]) -> X509 {
        certificate(
            "leaf",
            &self.leaf_key,
            Some((&*self.root, &self.root_key)),
            false,
            Some(value),
        )
    }

    pub fn leaf_without_nonce(&self) -> X509 {
        certificate(
            "leaf",
            &self.leaf_key,
            Some((&*self.root, &self.root_key)),
            false,
            None,
        )
    }

    pub fn leaf_issued_by_intermediate(&self, nonce: &[u8]) -> X509 {
        certificate(
            "leaf",
            &self.leaf_key,
            Some((&*self.intermediate, &self.intermediate_key)),
            false,
            Some(&apple_nonce_extension(nonce)),
        )
    }

    pub fn leaf_with_p384_key(&self) -> X509 {
        certificate(
            "leaf",
            &p384_key(),
            Some((&*self.root, &self.root_key)),
            false,
            Some(&apple_nonce_extension(&[0u8; 32])),
        )
    }

    /// DER ECDSA signature over `msg` with the leaf key
    pub fn sign(&self, msg: &[u8]) -> Vec<u8> {
        let ec = self.leaf_key.ec_key().unwrap();

        EcdsaSig::sign(&sha256(msg), &ec).unwrap().to_der().unwrap()
    }

    /// `0x04 || x || y` of the leaf key
    pub fn leaf_point(&self) -> Vec<u8> {
        let ec = self.leaf_key.ec_key().unwrap();
        let mut ctx = BigNumContext::new().unwrap();

        ec.public_key()
            .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
            .unwrap()
    }

    /// The leaf key as a COSE_Key map (EC2, ES256, P-256)
    pub fn leaf_cose_key(&self) -> Vec<u8> {
        let point = self.leaf_point();

        cose_key(&point[1..33], &point[33..])
    }
}

pub fn cose_key(x: &[u8], y: &[u8]) -> Vec<u8> {
    let m = Value::Map(vec![
        (Value::from(1), Value::from(2)),
        (Value::from(3), Value::from(-7)),
        (Value::from(-1), Value::from(1)),
        (Value::from(-2), Value::Bytes(x.to_vec())),
        (Value::from(-3), Value::Bytes(y.to_vec())),
    ]);

    let mut out = vec![];
    into_writer(&m, &mut out).unwrap();
    out
}

/// Which key material goes into the attested credential data block
pub enum Credential {
    /// zero-length credential id, empty COSE map
    Empty,
    /// `SHA-256(point)` as the credential id and the real COSE key
    Bound,
    /// explicit credential id and COSE key bytes
    Custom(Vec<u8>, Vec<u8>),
}

/// Builder for a complete attestation object issued under a [`TestPki`].
pub struct Scenario {
    pub pki: TestPki,
    pub app_id: String,
    pub challenge: Vec<u8>,
    pub flags: u8,
    pub counter: u32,
    pub aaguid: [u8; AAGUID_LEN],
    pub credential: Credential,
    pub form: NonceForm,
    pub receipt: Option<Vec<u8>>,
}

/// What [`Scenario::build`] produced, kept apart so tests can tamper with
/// each piece
pub struct Built {
    pub auth_data: Vec<u8>,
    pub x5c: Vec<Vec<u8>>,
    pub sig: Vec<u8>,
    pub receipt: Option<Vec<u8>>,
}

impl Built {
    pub fn encode(&self) -> Vec<u8> {
        encode_envelope(
            "apple-appattest",
            &self.auth_data,
            &self.x5c,
            &self.sig,
            self.receipt.as_deref(),
        )
    }
}

impl Scenario {
    pub fn new() -> Self {
        Self {
            pki: TestPki::new(),
            app_id: TEST_APP_ID.to_string(),
            challenge: b"server issued challenge 0001".to_vec(),
            flags: 0x40,
            counter: 0,
            aaguid: [0u8; AAGUID_LEN],
            credential: Credential::Empty,
            form: NonceForm::HashedChallenge,
            receipt: None,
        }
    }

    pub fn auth_data(&self) -> Vec<u8> {
        let mut v = sha256(self.app_id.as_bytes()).to_vec();
        v.push(self.flags);
        v.extend_from_slice(&self.counter.to_be_bytes());

        if self.flags & 0x40 != 0 {
            let (id, key) = match &self.credential {
                Credential::Empty => (vec![], vec![0xa0]),
                Credential::Bound => (
                    sha256(&self.pki.leaf_point()).to_vec(),
                    self.pki.leaf_cose_key(),
                ),
                Credential::Custom(id, key) => (id.clone(), key.clone()),
            };

            v.extend_from_slice(&self.aaguid);
            v.extend_from_slice(&(id.len() as u16).to_be_bytes());
            v.extend_from_slice(&id);
            v.extend_from_slice(&key);
        }

        v
    }

    pub fn client_data_hash(&self) -> Vec<u8> {
        match self.form {
            NonceForm::HashedChallenge => sha256(&self.challenge).to_vec(),
            NonceForm::RawChallenge => self.challenge.clone(),
        }
    }

    pub fn build(&self) -> Built {
        let auth_data = self.auth_data();
        let cdh = self.client_data_hash();

        let nonce = sha256(&concat(&auth_data, &cdh));
        let leaf = self.pki.leaf_with_nonce(&nonce);

        Built {
            sig: self.pki.sign(&concat(&auth_data, &cdh)),
            x5c: vec![leaf.to_der().unwrap(), self.pki.root.to_der().unwrap()],
            auth_data,
            receipt: self.receipt.clone(),
        }
    }
}

pub fn encode_envelope(
    fmt: &str,
    auth_data: &[u8],
    x5c: &[Vec<u8>],
    sig: &[u8],
    receipt: Option<&[u8]>,
) -> Vec<u8> {
    let mut stmt = vec![
        (
            Value::Text("x5c".to_string()),
            Value::Array(x5c.iter().map(|c| Value::Bytes(c.clone())).collect()),
        ),
        (Value::Text("sig".to_string()), Value::Bytes(sig.to_vec())),
    ];

    if let Some(r) = receipt {
        stmt.push((Value::Text("receipt".to_string()), Value::Bytes(r.to_vec())));
    }

    let m = Value::Map(vec![
        (Value::Text("fmt".to_string()), Value::Text(fmt.to_string())),
        (
            Value::Text("authData".to_string()),
            Value::Bytes(auth_data.to_vec()),
        ),
        (Value::Text("attStmt".to_string()), Value::Map(stmt)),
    ]);

    let mut out = vec![];
    into_writer(&m, &mut out).unwrap();
    out
}
