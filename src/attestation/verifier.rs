// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::authdata::{AuthenticatorData, Environment};
use super::base64::{self, Bytes};
use super::chain::CertificateChain;
use super::credential;
use super::envelope::Envelope;
use super::errors::Error;
use super::nonce::{self, NonceForm};
use super::provider::Crypto;
use super::signature;
use crate::store::PinnedRoot;
use jsonwebtoken::jwk;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use x509_parser::prelude::*;

/// The caller-supplied verification input.  In JSON, the byte fields are
/// base64 strings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationRequest {
    #[serde(rename = "attestationEnvelope", alias = "attestation")]
    pub attestation: Bytes,
    pub challenge: Bytes,
    /// `"<team id>.<bundle id>"`
    #[serde(rename = "expectedAppIdentifier", alias = "appId")]
    pub app_id: String,
    /// The key identifier the app reported, if any
    #[serde(rename = "keyId", default)]
    pub key_id: Option<Bytes>,
}

impl VerificationRequest {
    /// Build a request from base64-encoded attestation and challenge.
    pub fn from_base64(attestation: &str, challenge: &str, app_id: &str) -> Result<Self, Error> {
        Ok(Self {
            attestation: Bytes::try_from(attestation)?,
            challenge: Bytes::try_from(challenge)?,
            app_id: app_id.to_string(),
            key_id: None,
        })
    }

    pub fn set_key_id(&mut self, key_id: &str) -> Result<(), Error> {
        self.key_id = Some(Bytes::try_from(key_id)?);
        Ok(())
    }
}

/// What the caller needs to register the attested key
#[serde_with::serde_as]
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct VerifiedAttestation {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub key_id: [u8; 32],
    pub public_key: jwk::Jwk,
    /// `0x04 || x || y`
    #[serde_as(as = "serde_with::hex::Hex")]
    pub public_key_point: Vec<u8>,
    pub counter: u32,
    pub environment: Option<Environment>,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub credential_id: Vec<u8>,
    pub nonce_form: NonceForm,
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    pub receipt: Option<Vec<u8>>,
}

/// Verifies App Attest attestation objects against one pinned root.
///
/// A `Verifier` holds no mutable state; one instance can serve any number of
/// concurrent verifications.
#[derive(Debug)]
pub struct Verifier<'a> {
    root: &'a PinnedRoot,
    crypto: &'static Crypto,
    allowed_environments: Option<Vec<Environment>>,
}

impl<'a> Verifier<'a> {
    pub fn new(root: &'a PinnedRoot) -> Result<Self, Error> {
        Ok(Self {
            root,
            crypto: Crypto::global()?,
            allowed_environments: None,
        })
    }

    /// Restrict the accepted App Attest environments.  Attestations from an
    /// unlisted or unrecognised environment fail with
    /// [`Error::UnsupportedEnvironment`].
    pub fn set_allowed_environments(&mut self, envs: Vec<Environment>) {
        self.allowed_environments = Some(envs);
    }

    /// Run the full pipeline over a request.
    pub fn verify(&self, req: &VerificationRequest) -> Result<VerifiedAttestation, Error> {
        let res = self.verify_bytes(
            req.attestation.as_slice(),
            req.challenge.as_slice(),
            &req.app_id,
            req.key_id.as_ref().map(|k| k.as_slice()),
        );

        if let Err(e) = &res {
            warn!(reason = e.reason(), error = %e, "attestation rejected");
        }

        res
    }

    /// Run the full pipeline over raw bytes.  Every stage fails fast.
    pub fn verify_bytes(
        &self,
        attestation: &[u8],
        challenge: &[u8],
        app_id: &str,
        key_id: Option<&[u8]>,
    ) -> Result<VerifiedAttestation, Error> {
        let crypto = self.crypto;

        let env = Envelope::decode(attestation)?;
        debug!(format = %env.format, auth_data_len = env.auth_data.len(), "envelope decoded");

        let auth = AuthenticatorData::decode(&env.auth_data)?;
        debug!(flags = auth.flags, counter = auth.counter, "authenticator data parsed");

        let chain = CertificateChain::decode(&env.statement.x5c)?;
        chain.validate(self.root, crypto)?;
        debug!(len = env.statement.x5c.len(), "certificate chain anchored");

        nonce::check_app_id(&auth, app_id, crypto)?;

        let leaf = chain.leaf()?;
        let embedded = nonce::extension_value(&leaf.der)?;
        let client_data_hash = nonce::check_nonce(
            &auth.bytes,
            challenge,
            nonce::unwrap_nonce(&embedded),
            crypto,
        )?;
        debug!(challenge_len = challenge.len(), form = ?client_data_hash.form, "nonce verified");

        let sig = env
            .statement
            .sig
            .as_deref()
            .ok_or_else(|| Error::InvalidSignatureEncoding("missing sig".to_string()))?;

        let key = signature::leaf_key(&leaf.x509, crypto)?;
        signature::verify_signature(&key, sig, &auth.bytes, &client_data_hash.bytes, crypto)?;

        let cred = auth
            .attested_credential
            .as_ref()
            .ok_or(Error::AttestedCredentialDataAbsent)?;

        let environment = auth.environment();
        self.check_environment(environment)?;

        credential::check_credential_key(cred, &key)?;
        credential::check_key_id(cred, &key, key_id, crypto)?;

        debug!(?environment, "attestation verified");

        Ok(VerifiedAttestation {
            key_id: credential::key_id(&key, crypto),
            public_key_point: key.uncompressed_point(),
            public_key: key.jwk,
            counter: auth.counter,
            environment,
            credential_id: cred.credential_id.clone(),
            nonce_form: client_data_hash.form,
            receipt: env.statement.receipt,
        })
    }

    fn check_environment(&self, env: Option<Environment>) -> Result<(), Error> {
        let allowed = match &self.allowed_environments {
            Some(a) => a,
            None => return Ok(()),
        };

        match env {
            Some(e) if allowed.contains(&e) => Ok(()),
            Some(e) => Err(Error::UnsupportedEnvironment(e.as_str().to_string())),
            None => Err(Error::UnsupportedEnvironment("unknown".to_string())),
        }
    }
}

/// Verify a request against the Apple App Attestation Root CA.
pub fn verify_attestation(req: &VerificationRequest) -> Result<VerifiedAttestation, Error> {
    let root = PinnedRoot::apple().map_err(|e| Error::Crypto(format!("pinned root: {e}")))?;

    Verifier::new(root)?.verify(req)
}

/// A certificate as shown by [`Attestation`]
#[serde_with::serde_as]
#[derive(Debug, Serialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    #[serde_as(as = "serde_with::hex::Hex")]
    pub sha256: [u8; 32],
    pub der: Bytes,
}

/// The decoded, unverified contents of an attestation object.  Nothing in
/// here is trustworthy until [`Verifier::verify`] has accepted the object.
#[serde_with::serde_as]
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Attestation {
    pub format: String,
    pub auth_data: AuthenticatorData,
    pub flags: Vec<&'static str>,
    pub environment: Option<Environment>,
    pub certificates: Vec<CertificateInfo>,
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    pub signature: Option<Vec<u8>>,
    pub receipt: Option<Bytes>,
}

impl Attestation {
    /// Decode without any trust decision.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let crypto = Crypto::global()?;

        let env = Envelope::decode(buf)?;
        let auth = AuthenticatorData::decode(&env.auth_data)?;

        let mut certificates = Vec::with_capacity(env.statement.x5c.len());
        for (i, raw) in env.statement.x5c.iter().enumerate() {
            let der = raw.normalize()?;

            let (_, c) = parse_x509_certificate(&der).map_err(|e| {
                Error::UnsupportedCertificateEncoding(format!("x5c[{i}]: {e}"))
            })?;

            certificates.push(CertificateInfo {
                subject: c.subject().to_string(),
                issuer: c.issuer().to_string(),
                sha256: crypto.sha256(&der),
                der: Bytes::from(der),
            });
        }

        Ok(Self {
            format: env.format,
            flags: auth.flag_names(),
            environment: auth.environment(),
            auth_data: auth,
            certificates,
            signature: env.statement.sig,
            receipt: env.statement.receipt.map(Bytes::from),
        })
    }

    /// base64 of every certificate, leaf first
    pub fn x5c_base64(&self) -> Vec<String> {
        self.certificates
            .iter()
            .map(|c| base64::encode(c.der.as_slice()))
            .collect()
    }
}
