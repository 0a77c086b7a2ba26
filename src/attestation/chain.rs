// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::envelope::RawCertificate;
use super::errors::Error;
use super::provider::Crypto;
use crate::store::PinnedRoot;
use openssl::x509::X509;
use tracing::debug;

/// A chain element: the parsed certificate and the exact DER it came from
pub struct Certificate {
    pub x509: X509,
    pub der: Vec<u8>,
}

impl Certificate {
    pub fn from_der(der: Vec<u8>, idx: usize) -> Result<Self, Error> {
        let x509 = X509::from_der(&der).map_err(|e| {
            Error::UnsupportedCertificateEncoding(format!("x5c[{idx}]: {e}"))
        })?;

        Ok(Self { x509, der })
    }
}

/// The `x5c` certificates, leaf first
pub struct CertificateChain {
    certs: Vec<Certificate>,
}

impl CertificateChain {
    /// Normalise and parse every chain element
    pub fn decode(raw: &[RawCertificate]) -> Result<Self, Error> {
        if raw.is_empty() {
            return Err(Error::MissingCertificateChain);
        }

        let certs = raw
            .iter()
            .enumerate()
            .map(|(i, r)| Certificate::from_der(r.normalize()?, i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { certs })
    }

    pub fn leaf(&self) -> Result<&Certificate, Error> {
        self.certs.first().ok_or(Error::MissingCertificateChain)
    }

    /// Check that each certificate is signed by its successor and that the
    /// last one either is the pinned root or is signed by it.  Validity
    /// periods, key usage and basic constraints are not examined.
    pub fn validate(&self, root: &PinnedRoot, crypto: &Crypto) -> Result<(), Error> {
        if self.certs.len() < 2 {
            debug!(len = self.certs.len(), "certificate chain too short");
            return Err(Error::UntrustedRoot);
        }

        for (i, pair) in self.certs.windows(2).enumerate() {
            if !crypto.signed_by(&pair[0].x509, &pair[1].x509) {
                return Err(Error::ChainBroken(i));
            }
        }

        let last = &self.certs[self.certs.len() - 1];

        if root.is(&last.der) {
            debug!("chain ends with the pinned root");
            return Ok(());
        }

        if crypto.signed_by(&last.x509, root.cert()) {
            debug!("chain ends with a certificate issued by the pinned root");
            return Ok(());
        }

        Err(Error::UntrustedRoot)
    }
}
