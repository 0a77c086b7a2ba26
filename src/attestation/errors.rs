// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

/// The uniform rejection handed to untrusted callers.
pub const GENERIC_REJECTION: &str = "attestation invalid";

#[derive(thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("truncated authenticator data: {0}")]
    TruncatedAuthData(String),
    #[error("missing certificate chain")]
    MissingCertificateChain,
    #[error("unsupported certificate encoding: {0}")]
    UnsupportedCertificateEncoding(String),
    #[error("certificate chain broken at index {0}")]
    ChainBroken(usize),
    #[error("certificate chain does not anchor to the pinned root")]
    UntrustedRoot,
    #[error("app identifier mismatch")]
    AppIdentifierMismatch,
    #[error("nonce extension missing from leaf certificate")]
    MissingNonceExtension,
    #[error("nonce mismatch")]
    NonceMismatch,
    #[error("invalid signature encoding: {0}")]
    InvalidSignatureEncoding(String),
    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("attested credential data absent")]
    AttestedCredentialDataAbsent,
    #[error("credential public key does not match the leaf certificate")]
    CredentialKeyMismatch,
    #[error("key identifier mismatch")]
    KeyIdMismatch,
    #[error("unsupported environment: {0}")]
    UnsupportedEnvironment(String),
    #[error("crypto provider failure: {0}")]
    Crypto(String),
}

impl Error {
    /// Stable identifier for structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::InvalidRequest(_) => "invalid_request",
            Error::MalformedEnvelope(_) => "malformed_envelope",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::TruncatedAuthData(_) => "truncated_auth_data",
            Error::MissingCertificateChain => "missing_certificate_chain",
            Error::UnsupportedCertificateEncoding(_) => "unsupported_certificate_encoding",
            Error::ChainBroken(_) => "chain_broken",
            Error::UntrustedRoot => "untrusted_root",
            Error::AppIdentifierMismatch => "app_identifier_mismatch",
            Error::MissingNonceExtension => "missing_nonce_extension",
            Error::NonceMismatch => "nonce_mismatch",
            Error::InvalidSignatureEncoding(_) => "invalid_signature_encoding",
            Error::UnsupportedKeyType(_) => "unsupported_key_type",
            Error::InvalidSignature => "invalid_signature",
            Error::AttestedCredentialDataAbsent => "attested_credential_data_absent",
            Error::CredentialKeyMismatch => "credential_key_mismatch",
            Error::KeyIdMismatch => "key_id_mismatch",
            Error::UnsupportedEnvironment(_) => "unsupported_environment",
            Error::Crypto(_) => "crypto_failure",
        }
    }

    /// The message to hand back to the party that submitted the attestation.
    /// The specific reason is only included when `debug` is set.
    pub fn external_message(&self, debug: bool) -> String {
        if debug {
            format!("{}: {}", self.reason(), self)
        } else {
            GENERIC_REJECTION.to_string()
        }
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}
