// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The attestation module provides a [`Verifier`] that checks an App Attest
//! attestation object end to end: envelope decoding, authenticator data
//! parsing, certificate chain anchoring to the pinned root, app id and nonce
//! binding, and the attestation signature.
//!
//! # Example
//!
//! ```no_run
//! use appattest::attestation::{Verifier, VerificationRequest};
//! use appattest::store::PinnedRoot;
//!
//! let attestation = std::fs::read("attestation.cbor").expect("reading attestation");
//! let challenge = std::fs::read("challenge.bin").expect("reading challenge");
//!
//! let root = PinnedRoot::apple().expect("loading the App Attest root");
//! let v = Verifier::new(root).expect("initialising the verifier");
//!
//! let req = VerificationRequest {
//!     attestation: attestation.into(),
//!     challenge: challenge.into(),
//!     app_id: "TEAM123.com.example.app".to_string(),
//!     key_id: None,
//! };
//!
//! match v.verify(&req) {
//!     Ok(r) => println!("attested key {}", hex::encode(r.key_id)),
//!     // never hand the specific reason to the device
//!     Err(e) => println!("{}", e.external_message(false)),
//! }
//! ```

pub use self::authdata::{AttestedCredential, AuthenticatorData, Environment, Flag};
pub use self::base64::Bytes;
pub use self::errors::{Error, GENERIC_REJECTION};
pub use self::nonce::NonceForm;
pub use self::provider::Crypto;
pub use self::verifier::{
    verify_attestation, Attestation, CertificateInfo, VerificationRequest, VerifiedAttestation,
    Verifier,
};

mod authdata;
mod base64;
mod chain;
mod common;
mod credential;
mod envelope;
mod errors;
mod nonce;
mod provider;
mod signature;
mod verifier;

#[cfg(test)]
mod testutil;
