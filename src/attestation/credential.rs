// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Binding of the attested credential block to the leaf certificate key.

use super::authdata::AttestedCredential;
use super::common::ct_eq;
use super::errors::Error;
use super::provider::Crypto;
use super::signature::LeafKey;
use cose::keys::CoseKey;
use tracing::debug;

// CBOR empty map
const EMPTY_MAP: u8 = 0xa0;

/// The key identifier App Attest hands to the app: `SHA-256(0x04 || x || y)`.
pub fn key_id(key: &LeafKey, crypto: &Crypto) -> [u8; 32] {
    crypto.sha256(&key.uncompressed_point())
}

/// When the credential public key is not the empty map, it must be an EC2
/// P-256 COSE_Key equal to the leaf certificate key.
pub fn check_credential_key(cred: &AttestedCredential, key: &LeafKey) -> Result<(), Error> {
    if cred.public_key.is_empty() || cred.public_key == [EMPTY_MAP] {
        debug!("empty credential public key, skipping key binding");
        return Ok(());
    }

    let mut ck = CoseKey::new();
    ck.bytes = cred.public_key.clone();
    ck.decode()
        .map_err(|e| Error::UnsupportedKeyType(format!("credential public key: {e:?}")))?;

    if ck.kty != Some(cose::keys::EC2) {
        return Err(Error::UnsupportedKeyType(format!(
            "credential public key kty {:?}",
            ck.kty
        )));
    }

    if let Some(crv) = ck.crv {
        if crv != cose::keys::P_256 {
            return Err(Error::UnsupportedKeyType(format!(
                "credential public key crv {crv}"
            )));
        }
    }

    if let Some(alg) = ck.alg {
        if alg != cose::algs::ES256 {
            return Err(Error::UnsupportedKeyType(format!(
                "credential public key alg {alg}"
            )));
        }
    }

    let (x, y) = match (&ck.x, &ck.y) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(Error::CredentialKeyMismatch),
    };

    if !ct_eq(x, &key.x) || !ct_eq(y, &key.y) {
        return Err(Error::CredentialKeyMismatch);
    }

    Ok(())
}

/// A non-empty credential id must be the key identifier of the leaf key.  A
/// key id supplied with the request must equal the credential id.
pub fn check_key_id(
    cred: &AttestedCredential,
    key: &LeafKey,
    expected: Option<&[u8]>,
    crypto: &Crypto,
) -> Result<(), Error> {
    let kid = key_id(key, crypto);

    if !cred.credential_id.is_empty() && !ct_eq(&cred.credential_id, &kid) {
        return Err(Error::KeyIdMismatch);
    }

    if let Some(e) = expected {
        let actual: &[u8] = if cred.credential_id.is_empty() {
            &kid
        } else {
            &cred.credential_id
        };

        if !ct_eq(e, actual) {
            return Err(Error::KeyIdMismatch);
        }
    }

    Ok(())
}
