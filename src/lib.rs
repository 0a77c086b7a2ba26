// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Apple App Attest attestation verification.
//!
//! This crate provides an API to decode and verify the attestation object an
//! iOS app obtains from `DCAppAttestService.attestKey`.  A successful
//! verification proves that the key was generated in the Secure Enclave of a
//! genuine Apple device, for the expected app, in response to a
//! server-issued challenge.
//!
//! The API allows:
//! * Decoding a CBOR-encoded attestation object for inspection
//! * Verifying it against the pinned Apple App Attestation Root CA
//! * Extracting the attested public key and its key identifier
//!
//! Challenge issuance and replay protection, as well as tracking the
//! assertion counter, are left to the caller.

pub mod attestation;
pub mod config;
pub mod store;
