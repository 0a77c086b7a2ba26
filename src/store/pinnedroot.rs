// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use openssl::hash::MessageDigest;
use openssl::x509::{X509Ref, X509};
use std::sync::OnceLock;

/// Apple App Attestation Root CA, see
/// <https://www.apple.com/certificateauthority/private/>
pub const APPLE_APP_ATTESTATION_ROOT_CA_PEM: &str =
    include_str!("apple_app_attestation_root_ca.pem");

/// The single trusted certificate every attestation chain must anchor to.
/// It is never mutated once loaded; rotating it is a code or configuration
/// change.
pub struct PinnedRoot {
    cert: X509,
    der: Vec<u8>,
}

impl std::fmt::Debug for PinnedRoot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedRoot")
            .field("subject", &self.cert.subject_name())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl PinnedRoot {
    /// Load the root from its PEM (RFC 7468) encoding.  Only the first
    /// certificate in `pem` is used.
    pub fn from_pem(pem: &[u8]) -> Result<Self, Error> {
        let cert = X509::from_pem(pem).map_err(|e| Error::Syntax(e.to_string()))?;

        Self::from_x509(cert)
    }

    /// Load the root from its DER encoding
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        let cert = X509::from_der(der).map_err(|e| Error::Syntax(e.to_string()))?;

        Self::from_x509(cert)
    }

    fn from_x509(cert: X509) -> Result<Self, Error> {
        let der = cert.to_der().map_err(|e| Error::Syntax(e.to_string()))?;

        // the anchor's key is what intermediates are checked against
        cert.public_key()
            .map_err(|e| Error::Sema(format!("root public key unusable: {e}")))?;

        Ok(Self { cert, der })
    }

    /// The compiled-in Apple App Attestation Root CA, parsed once per
    /// process.
    pub fn apple() -> Result<&'static PinnedRoot, Error> {
        static APPLE: OnceLock<Result<PinnedRoot, Error>> = OnceLock::new();

        APPLE
            .get_or_init(|| PinnedRoot::from_pem(APPLE_APP_ATTESTATION_ROOT_CA_PEM.as_bytes()))
            .as_ref()
            .map_err(|e| e.clone())
    }

    pub fn cert(&self) -> &X509Ref {
        &self.cert
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Byte-for-byte identity with the pinned encoding
    pub fn is(&self, der: &[u8]) -> bool {
        self.der.as_slice() == der
    }

    /// SHA-256 of the DER encoding, as uppercase colon-separated hex
    pub fn fingerprint(&self) -> String {
        match self.cert.digest(MessageDigest::sha256()) {
            Ok(d) => d
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join(":"),
            Err(_) => String::new(),
        }
    }
}
