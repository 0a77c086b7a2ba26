// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Freshness and app binding checks.

use super::authdata::AuthenticatorData;
use super::common::*;
use super::errors::Error;
use super::provider::Crypto;
use serde::Serialize;
use tracing::debug;
use x509_parser::der_parser::asn1_rs::Length;
use x509_parser::der_parser::der::{der_read_element_header, Class, Header, Tag};
use x509_parser::prelude::*;

/// Apple's credCert nonce extension
pub const NONCE_EXTENSION_OID: &str = "1.2.840.113635.100.8.2";

const DIGEST_LEN: usize = 32;

/// Which construction of the nonce the producer used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NonceForm {
    /// `SHA-256(authData || SHA-256(challenge))`
    HashedChallenge,
    /// `SHA-256(authData || challenge)`
    RawChallenge,
}

/// The value appended to the authenticator data for both the nonce and the
/// attestation signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDataHash {
    pub form: NonceForm,
    pub bytes: Vec<u8>,
}

/// The app binding: `rpIdHash` must be `SHA-256("<team>.<bundle>")`.
pub fn check_app_id(auth: &AuthenticatorData, app_id: &str, crypto: &Crypto) -> Result<(), Error> {
    let expected = crypto.sha256(app_id.as_bytes());

    if !ct_eq(&expected, &auth.rp_id_hash) {
        return Err(Error::AppIdentifierMismatch);
    }

    Ok(())
}

/// Fetch the raw value of the nonce extension from the leaf certificate.
pub fn extension_value(leaf_der: &[u8]) -> Result<Vec<u8>, Error> {
    let (_, cert) = parse_x509_certificate(leaf_der)
        .map_err(|e| Error::UnsupportedCertificateEncoding(format!("leaf: {e}")))?;

    cert.extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == NONCE_EXTENSION_OID)
        .map(|ext| ext.value.to_vec())
        .ok_or(Error::MissingNonceExtension)
}

/// Octets needed for the DER header of a single-byte tag with `len` bytes
/// of content
fn minimal_header_len(len: usize) -> usize {
    if len < 0x80 {
        2
    } else {
        2 + (usize::BITS - len.leading_zeros() + 7) as usize / 8
    }
}

/// Split `buf` into its header and contents if it is exactly one DER TLV
/// with a minimally encoded length.
fn der_tlv(buf: &[u8]) -> Option<(Header<'_>, &[u8])> {
    let (contents, hdr) = der_read_element_header(buf).ok()?;

    match hdr.length() {
        Length::Definite(len) if len == contents.len() => {
            if buf.len() - contents.len() != minimal_header_len(len) {
                return None;
            }
            Some((hdr, contents))
        }
        _ => None,
    }
}

fn is_nonce_wrapper(hdr: &Header) -> bool {
    let tag = hdr.tag();

    match hdr.class() {
        Class::Universal if tag == Tag::OctetString => hdr.is_primitive(),
        Class::Universal if tag == Tag::Sequence => hdr.is_constructed(),
        Class::ContextSpecific if tag == Tag(1) => hdr.is_constructed(),
        _ => false,
    }
}

/// Peel DER wrappers off an extension value until the nonce is left.  OCTET
/// STRINGs are unwrapped at any depth, as are the SEQUENCE and `[1]` layers
/// production leaf certificates put around them.  Unwrapping stops as soon
/// as a digest-sized value is reached.
pub fn unwrap_nonce(value: &[u8]) -> &[u8] {
    let mut cur = value;

    while cur.len() != DIGEST_LEN {
        match der_tlv(cur) {
            Some((hdr, inner)) if is_nonce_wrapper(&hdr) => cur = inner,
            _ => break,
        }
    }

    cur
}

/// Recompute the nonce from the authenticator data and the challenge and
/// compare it with the one embedded in the leaf certificate.  The hashed
/// challenge construction is tried first.
pub fn check_nonce(
    auth_data: &[u8],
    challenge: &[u8],
    embedded: &[u8],
    crypto: &Crypto,
) -> Result<ClientDataHash, Error> {
    let candidates = [
        (NonceForm::HashedChallenge, crypto.sha256(challenge).to_vec()),
        (NonceForm::RawChallenge, challenge.to_vec()),
    ];

    for (form, client_data_hash) in candidates {
        let expected = crypto.sha256(&concat(auth_data, &client_data_hash));

        if ct_eq(&expected, embedded) {
            debug!(?form, "nonce matched");
            return Ok(ClientDataHash {
                form,
                bytes: client_data_hash,
            });
        }
    }

    Err(Error::NonceMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::testutil::*;
    use hex_literal::hex;

    const NONCE: [u8; 32] =
        hex!("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f");

    #[test]
    fn unwrap_depths() {
        // raw
        assert_eq!(unwrap_nonce(&NONCE), &NONCE);

        // one OCTET STRING
        let one = der_octet_string(&NONCE);
        assert_eq!(unwrap_nonce(&one), &NONCE);

        // OCTET STRING in OCTET STRING
        let two = der_octet_string(&one);
        assert_eq!(unwrap_nonce(&two), &NONCE);

        // SEQUENCE { [1] { OCTET STRING } }
        let apple = apple_nonce_extension(&NONCE);
        assert_eq!(unwrap_nonce(&apple), &NONCE);
    }

    #[test]
    fn unwrap_long_form_length() {
        let long = [0x55u8; 200];

        let wrapped = der_octet_string(&long);
        assert_eq!(&wrapped[..3], &hex!("0481c8"));
        assert_eq!(unwrap_nonce(&wrapped), &long);

        let longer = [0x55u8; 300];
        let wrapped = der_octet_string(&longer);
        assert_eq!(&wrapped[..4], &hex!("0482012c"));
        assert_eq!(unwrap_nonce(&wrapped), &longer);
    }

    #[test]
    fn unwrap_stops_on_inexact_length() {
        // declared length 0x21 but only 32 content bytes follow
        let mut bad = vec![0x04, 0x21];
        bad.extend_from_slice(&NONCE);

        assert_eq!(unwrap_nonce(&bad), bad.as_slice());
    }

    #[test]
    fn unwrap_stops_on_non_minimal_length() {
        // 32 encoded in long form
        let mut bad = hex!("048120").to_vec();
        bad.extend_from_slice(&NONCE);
        assert_eq!(unwrap_nonce(&bad), bad.as_slice());

        // 200 encoded on two octets
        let long = [0x55u8; 200];
        let mut bad = hex!("048200c8").to_vec();
        bad.extend_from_slice(&long);
        assert_eq!(unwrap_nonce(&bad), bad.as_slice());

        // minimal form inside a non-minimal outer layer
        let mut bad = hex!("308124a1220420").to_vec();
        bad.extend_from_slice(&NONCE);
        assert_eq!(unwrap_nonce(&bad), bad.as_slice());
    }

    #[test]
    fn unwrap_checks_constructed_bit() {
        // primitive [1]
        let mut v = vec![0x81, 0x22];
        v.extend_from_slice(&der_octet_string(&NONCE));
        assert_eq!(unwrap_nonce(&v), v.as_slice());

        // constructed OCTET STRING
        let mut v = vec![0x24, 0x20];
        v.extend_from_slice(&NONCE);
        assert_eq!(unwrap_nonce(&v), v.as_slice());
    }

    #[test]
    fn unwrap_ignores_other_tags() {
        // INTEGER
        let mut v = vec![0x02, 0x20];
        v.extend_from_slice(&NONCE);

        assert_eq!(unwrap_nonce(&v), v.as_slice());
    }

    #[test]
    fn nonce_forms() {
        let crypto = Crypto::global().unwrap();

        let auth_data = [0xadu8; 37];
        let challenge = b"server issued challenge";

        let hashed = crypto.sha256(&concat(&auth_data, &crypto.sha256(challenge)));
        let cdh = check_nonce(&auth_data, challenge, &hashed, crypto).unwrap();
        assert_eq!(cdh.form, NonceForm::HashedChallenge);
        assert_eq!(cdh.bytes, crypto.sha256(challenge).to_vec());

        let raw = crypto.sha256(&concat(&auth_data, challenge));
        let cdh = check_nonce(&auth_data, challenge, &raw, crypto).unwrap();
        assert_eq!(cdh.form, NonceForm::RawChallenge);
        assert_eq!(cdh.bytes, challenge.to_vec());

        assert_eq!(
            check_nonce(&auth_data, challenge, &NONCE, crypto),
            Err(Error::NonceMismatch)
        );
    }

    #[test]
    fn extension_lookup() {
        let pki = TestPki::new();

        let leaf = pki.leaf_with_nonce(&NONCE);
        let v = extension_value(&leaf.to_der().unwrap()).unwrap();
        assert_eq!(unwrap_nonce(&v), &NONCE);

        let leaf = pki.leaf_without_nonce();
        assert_eq!(
            extension_value(&leaf.to_der().unwrap()),
            Err(Error::MissingNonceExtension)
        );
    }
}
