// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The cryptographic capability object used by every verification.
//!
//! [`Crypto::global()`] resolves the provider once per process; afterwards it
//! is immutable and may be shared freely between threads.

use super::base64;
use super::errors::Error;
use jsonwebtoken::jwk;
use openssl::bn::{BigNum, BigNumContext};
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::ecdsa::EcdsaSig;
use openssl::error::ErrorStack;
use openssl::nid::Nid;
use openssl::pkey::Public;
use openssl::x509::X509Ref;
use std::sync::OnceLock;
use tracing::debug;

/// Coordinate (and scalar) width of P-256, in bytes.
pub const COORDINATE_LEN: usize = 32;

/// Length of a raw `r || s` P-256 signature.
pub const RAW_SIGNATURE_LEN: usize = 2 * COORDINATE_LEN;

/// An imported P-256 public key, ready for signature verification.
pub struct PublicKeyHandle {
    key: EcKey<Public>,
}

impl std::fmt::Debug for PublicKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyHandle").finish_non_exhaustive()
    }
}

pub struct Crypto {
    group: EcGroup,
}

impl std::fmt::Debug for Crypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crypto").field("curve", &"P-256").finish()
    }
}

impl Crypto {
    fn new() -> Result<Self, ErrorStack> {
        openssl::init();

        Ok(Self {
            group: EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?,
        })
    }

    /// Return the process-wide provider, initialising it on first use.
    pub fn global() -> Result<&'static Crypto, Error> {
        static CRYPTO: OnceLock<Result<Crypto, String>> = OnceLock::new();

        CRYPTO
            .get_or_init(|| {
                debug!("initialising openssl crypto provider");
                Crypto::new().map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|e| Error::Crypto(e.clone()))
    }

    pub fn sha256(&self, data: &[u8]) -> [u8; 32] {
        openssl::sha::sha256(data)
    }

    /// Whether `cert` carries a valid signature made with `issuer`'s key.
    /// Any failure to evaluate the signature counts as "not signed".
    pub fn signed_by(&self, cert: &X509Ref, issuer: &X509Ref) -> bool {
        let issuer_key = match issuer.public_key() {
            Ok(k) => k,
            Err(e) => {
                debug!(error = %e, "issuer public key unusable");
                return false;
            }
        };

        match cert.verify(&issuer_key) {
            Ok(ok) => ok,
            Err(e) => {
                debug!(error = %e, "certificate signature evaluation failed");
                false
            }
        }
    }

    /// Import an EC P-256 public key from its JWK representation.
    pub fn import_jwk(&self, key: &jwk::Jwk) -> Result<PublicKeyHandle, Error> {
        if let Some(alg) = &key.common.key_algorithm {
            if *alg != jwk::KeyAlgorithm::ES256 {
                return Err(Error::UnsupportedKeyType(format!("algorithm {alg:?}")));
            }
        }

        let ec = match &key.algorithm {
            jwk::AlgorithmParameters::EllipticCurve(ec) => ec,
            a => {
                return Err(Error::UnsupportedKeyType(format!(
                    "unsupported algorithm params {a:?}"
                )))
            }
        };

        if ec.curve != jwk::EllipticCurve::P256 {
            return Err(Error::UnsupportedKeyType(format!(
                "invalid EC curve {:?}",
                ec.curve
            )));
        }

        let x = base64::decode_str(&ec.x)
            .map_err(|e| Error::UnsupportedKeyType(format!("x coordinate: {e}")))?;
        let y = base64::decode_str(&ec.y)
            .map_err(|e| Error::UnsupportedKeyType(format!("y coordinate: {e}")))?;

        let x = BigNum::from_slice(&x).map_err(|e| Error::Crypto(e.to_string()))?;
        let y = BigNum::from_slice(&y).map_err(|e| Error::Crypto(e.to_string()))?;

        let key = EcKey::from_public_key_affine_coordinates(&self.group, &x, &y)
            .map_err(|e| Error::UnsupportedKeyType(format!("point not on P-256: {e}")))?;

        Ok(PublicKeyHandle { key })
    }

    /// Uncompressed SEC1 encoding (`0x04 || x || y`) of an imported key.
    pub fn uncompressed_point(&self, key: &PublicKeyHandle) -> Result<Vec<u8>, Error> {
        let mut ctx = BigNumContext::new().map_err(|e| Error::Crypto(e.to_string()))?;

        key.key
            .public_key()
            .to_bytes(&self.group, PointConversionForm::UNCOMPRESSED, &mut ctx)
            .map_err(|e| Error::Crypto(e.to_string()))
    }

    /// Verify an ECDSA P-256 / SHA-256 signature in raw `r || s` form.
    pub fn verify_raw(
        &self,
        key: &PublicKeyHandle,
        signature: &[u8; RAW_SIGNATURE_LEN],
        message: &[u8],
    ) -> Result<bool, Error> {
        let (r, s) = signature.split_at(COORDINATE_LEN);

        let r = BigNum::from_slice(r).map_err(|e| Error::Crypto(e.to_string()))?;
        let s = BigNum::from_slice(s).map_err(|e| Error::Crypto(e.to_string()))?;

        let sig =
            EcdsaSig::from_private_components(r, s).map_err(|e| Error::Crypto(e.to_string()))?;

        let digest = self.sha256(message);

        match sig.verify(&digest, &key.key) {
            Ok(ok) => Ok(ok),
            Err(e) => {
                // e.g. r or s out of range
                debug!(error = %e, "ecdsa verification errored");
                Ok(false)
            }
        }
    }
}
