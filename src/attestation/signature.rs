// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64;
use super::common::*;
use super::errors::Error;
use super::provider::{Crypto, PublicKeyHandle, COORDINATE_LEN, RAW_SIGNATURE_LEN};
use jsonwebtoken::jwk;
use openssl::bn::{BigNum, BigNumContext, BigNumRef};
use openssl::ecdsa::EcdsaSig;
use openssl::nid::Nid;
use openssl::x509::X509Ref;

/// The leaf certificate's public key, exported as a JWK and imported back
/// into the provider
#[derive(Debug)]
pub struct LeafKey {
    pub jwk: jwk::Jwk,
    pub x: [u8; COORDINATE_LEN],
    pub y: [u8; COORDINATE_LEN],
    pub handle: PublicKeyHandle,
}

impl LeafKey {
    /// `0x04 || x || y`
    pub fn uncompressed_point(&self) -> Vec<u8> {
        let mut p = Vec::with_capacity(1 + 2 * COORDINATE_LEN);
        p.push(0x04);
        p.extend_from_slice(&self.x);
        p.extend_from_slice(&self.y);
        p
    }
}

fn component(v: &BigNumRef, n: &str) -> Result<[u8; COORDINATE_LEN], Error> {
    if v.is_negative() {
        return Err(Error::InvalidSignatureEncoding(format!("{n}: negative")));
    }

    if v.num_bytes() as usize > COORDINATE_LEN {
        return Err(Error::InvalidSignatureEncoding(format!(
            "{n}: {} bytes wide",
            v.num_bytes()
        )));
    }

    padded(v)
}

/// Convert a DER `ECDSA-Sig-Value` (`SEQUENCE { r INTEGER, s INTEGER }`)
/// into the fixed-width `r || s` form.  Only the canonical DER encoding is
/// accepted.
pub fn der_to_raw(sig: &[u8]) -> Result<[u8; RAW_SIGNATURE_LEN], Error> {
    let parsed =
        EcdsaSig::from_der(sig).map_err(|e| Error::InvalidSignatureEncoding(e.to_string()))?;

    // must re-encode byte for byte
    let canonical = parsed.to_der().map_err(|e| Error::Crypto(e.to_string()))?;
    if canonical != sig {
        return Err(Error::InvalidSignatureEncoding(
            "not in canonical DER form".to_string(),
        ));
    }

    let r = component(parsed.r(), "r")?;
    let s = component(parsed.s(), "s")?;

    let mut raw = [0u8; RAW_SIGNATURE_LEN];
    raw[..COORDINATE_LEN].copy_from_slice(&r);
    raw[COORDINATE_LEN..].copy_from_slice(&s);

    Ok(raw)
}

/// Export the leaf's subject public key as a JWK and import it into the
/// provider.  Only P-256 keys are accepted.
pub fn leaf_key(leaf: &X509Ref, crypto: &Crypto) -> Result<LeafKey, Error> {
    let pkey = leaf
        .public_key()
        .map_err(|e| Error::UnsupportedKeyType(e.to_string()))?;

    let ec = pkey
        .ec_key()
        .map_err(|_| Error::UnsupportedKeyType(format!("{:?} key", pkey.id())))?;

    let curve = ec.group().curve_name();
    if curve != Some(Nid::X9_62_PRIME256V1) {
        return Err(Error::UnsupportedKeyType(format!("curve {curve:?}")));
    }

    let mut ctx = BigNumContext::new().map_err(|e| Error::Crypto(e.to_string()))?;
    let mut x = BigNum::new().map_err(|e| Error::Crypto(e.to_string()))?;
    let mut y = BigNum::new().map_err(|e| Error::Crypto(e.to_string()))?;

    ec.public_key()
        .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let x: [u8; COORDINATE_LEN] = padded(&x)?;
    let y: [u8; COORDINATE_LEN] = padded(&y)?;

    let jwk = jwk::Jwk {
        common: jwk::CommonParameters {
            public_key_use: Some(jwk::PublicKeyUse::Signature),
            key_algorithm: Some(jwk::KeyAlgorithm::ES256),
            ..Default::default()
        },
        algorithm: jwk::AlgorithmParameters::EllipticCurve(jwk::EllipticCurveKeyParameters {
            key_type: jwk::EllipticCurveKeyType::EC,
            curve: jwk::EllipticCurve::P256,
            x: base64::encode_url_safe(&x),
            y: base64::encode_url_safe(&y),
        }),
    };

    let handle = crypto.import_jwk(&jwk)?;

    Ok(LeafKey { jwk, x, y, handle })
}

fn padded(v: &BigNumRef) -> Result<[u8; COORDINATE_LEN], Error> {
    let b = v
        .to_vec_padded(COORDINATE_LEN as i32)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    b.try_into()
        .map_err(|_| Error::Crypto("coordinate wider than the curve".to_string()))
}

/// Verify the attestation signature over `authData || clientDataHash`.
pub fn verify_signature(
    key: &LeafKey,
    sig: &[u8],
    auth_data: &[u8],
    client_data_hash: &[u8],
    crypto: &Crypto,
) -> Result<(), Error> {
    let raw = der_to_raw(sig)?;

    if !crypto.verify_raw(&key.handle, &raw, &concat(auth_data, client_data_hash))? {
        return Err(Error::InvalidSignature);
    }

    Ok(())
}
