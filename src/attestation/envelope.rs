// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::base64;
use super::common::*;
use super::errors::Error;
use bitmask::*;
use ciborium::de::from_reader;
use ciborium::Value;

/// The `fmt` value used by App Attest attestation objects.
pub const APPLE_APPATTEST_FORMAT: &str = "apple-appattest";

const FMT_LABEL: &str = "fmt";
const AUTH_DATA_LABEL: &str = "authData";
const ATT_STMT_LABEL: &str = "attStmt";

const X5C_LABEL: &str = "x5c";
const SIG_LABEL: &str = "sig";
const RECEIPT_LABEL: &str = "receipt";

// RFC 8746 typed array: uint8
const CBOR_TAG_UINT8_ARRAY: u64 = 64;

bitmask! {
    #[derive(Debug)]
    mask KeysSet: u8 where flags Keys {
        Fmt      = 0x01,
        AuthData = 0x02,
        AttStmt  = 0x04,
        X5c      = 0x08,
        Sig      = 0x10,
        Receipt  = 0x20,
    }
}

/// A certificate from the `x5c` array, in whichever representation the
/// producer used for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCertificate {
    /// CBOR byte string (the normal case)
    Der(Vec<u8>),
    /// CBOR array of small unsigned integers
    Octets(Vec<i128>),
    /// CBOR text string carrying base64
    Base64(String),
}

impl RawCertificate {
    fn from_value(v: &Value, idx: usize) -> Result<Self, Error> {
        match v {
            Value::Bytes(b) => Ok(RawCertificate::Der(b.clone())),
            Value::Tag(CBOR_TAG_UINT8_ARRAY, inner) => match inner.as_ref() {
                Value::Bytes(b) => Ok(RawCertificate::Der(b.clone())),
                _ => Err(Error::UnsupportedCertificateEncoding(format!(
                    "x5c[{idx}]: typed array without byte string"
                ))),
            },
            Value::Array(a) => {
                let mut octets = Vec::with_capacity(a.len());
                for e in a.iter() {
                    match e.as_integer() {
                        Some(i) => octets.push(i.into()),
                        None => {
                            return Err(Error::UnsupportedCertificateEncoding(format!(
                                "x5c[{idx}]: non-integer element in byte array"
                            )))
                        }
                    }
                }
                Ok(RawCertificate::Octets(octets))
            }
            Value::Text(s) => Ok(RawCertificate::Base64(s.clone())),
            _ => Err(Error::UnsupportedCertificateEncoding(format!(
                "x5c[{idx}]: unexpected CBOR type"
            ))),
        }
    }

    /// Coerce to the canonical DER byte buffer.
    pub fn normalize(&self) -> Result<Vec<u8>, Error> {
        match self {
            RawCertificate::Der(b) => Ok(b.clone()),
            RawCertificate::Octets(o) => o
                .iter()
                .map(|i| {
                    u8::try_from(*i).map_err(|_| {
                        Error::UnsupportedCertificateEncoding(format!(
                            "byte array element {i} out of range"
                        ))
                    })
                })
                .collect(),
            RawCertificate::Base64(s) => base64::decode_str(s)
                .map_err(|e| Error::UnsupportedCertificateEncoding(e.to_string())),
        }
    }
}

/// The attestation statement (`attStmt`)
#[derive(Debug)]
pub struct Statement {
    /// Certificate chain, leaf first
    pub x5c: Vec<RawCertificate>,
    /// DER-encoded ECDSA signature, absent in some producers' output
    pub sig: Option<Vec<u8>>,
    /// Opaque fraud-assessment receipt
    pub receipt: Option<Vec<u8>>,

    keys_set: KeysSet,
}

impl Default for Statement {
    fn default() -> Self {
        Self {
            x5c: Vec::new(),
            sig: None,
            receipt: None,
            keys_set: KeysSet::none(),
        }
    }
}

impl Statement {
    fn parse(&mut self, contents: &[(Value, Value)]) -> Result<(), Error> {
        for (k, v) in contents.iter() {
            match k.as_text() {
                Some(X5C_LABEL) => self.set_x5c(v)?,
                Some(SIG_LABEL) => self.set_sig(v)?,
                Some(RECEIPT_LABEL) => self.set_receipt(v)?,
                _ => continue,
            }
        }
        Ok(())
    }

    fn set_x5c(&mut self, v: &Value) -> Result<(), Error> {
        if self.keys_set.contains(Keys::X5c) {
            return Err(Error::MalformedEnvelope("duplicated x5c".to_string()));
        }

        let a = v.as_array().ok_or_else(|| {
            Error::UnsupportedCertificateEncoding("x5c MUST be array".to_string())
        })?;

        for (i, c) in a.iter().enumerate() {
            self.x5c.push(RawCertificate::from_value(c, i)?);
        }

        self.keys_set.set(Keys::X5c);

        Ok(())
    }

    fn set_sig(&mut self, v: &Value) -> Result<(), Error> {
        if self.keys_set.contains(Keys::Sig) {
            return Err(Error::MalformedEnvelope("duplicated sig".to_string()));
        }

        self.sig = Some(to_bstr(v, SIG_LABEL)?);

        self.keys_set.set(Keys::Sig);

        Ok(())
    }

    fn set_receipt(&mut self, v: &Value) -> Result<(), Error> {
        if self.keys_set.contains(Keys::Receipt) {
            return Err(Error::MalformedEnvelope("duplicated receipt".to_string()));
        }

        self.receipt = Some(to_bstr(v, RECEIPT_LABEL)?);

        self.keys_set.set(Keys::Receipt);

        Ok(())
    }
}

/// The decoded top-level attestation object
#[derive(Debug)]
pub struct Envelope {
    pub format: String,
    pub auth_data: Vec<u8>,
    pub statement: Statement,

    keys_set: KeysSet,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            format: String::from(""),
            auth_data: Default::default(),
            statement: Default::default(),
            keys_set: KeysSet::none(),
        }
    }
}

impl Envelope {
    /// Decode a CBOR-encoded attestation object.  Trailing bytes after the
    /// top-level map are ignored.
    pub fn decode(buf: &[u8]) -> Result<Envelope, Error> {
        let v: Value = from_reader(buf).map_err(|e| Error::MalformedEnvelope(e.to_string()))?;

        let mut env: Envelope = Default::default();

        if let Value::Map(contents) = v {
            env.parse(&contents)?;
        } else {
            return Err(Error::MalformedEnvelope("expecting map type".to_string()));
        }

        env.validate()?;

        Ok(env)
    }

    fn parse(&mut self, contents: &[(Value, Value)]) -> Result<(), Error> {
        for (k, v) in contents.iter() {
            match k.as_text() {
                Some(FMT_LABEL) => self.set_format(v)?,
                Some(AUTH_DATA_LABEL) => self.set_auth_data(v)?,
                Some(ATT_STMT_LABEL) => self.set_statement(v)?,
                _ => continue,
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        let mandatory_keys = [
            (Keys::Fmt, FMT_LABEL),
            (Keys::AuthData, AUTH_DATA_LABEL),
            (Keys::AttStmt, ATT_STMT_LABEL),
        ];

        for (k, n) in mandatory_keys.iter() {
            if !self.keys_set.contains(*k) {
                return Err(Error::MalformedEnvelope(format!("missing {n}")));
            }
        }

        if self.format != APPLE_APPATTEST_FORMAT {
            return Err(Error::UnsupportedFormat(self.format.clone()));
        }

        Ok(())
    }

    fn set_format(&mut self, v: &Value) -> Result<(), Error> {
        if self.keys_set.contains(Keys::Fmt) {
            return Err(Error::MalformedEnvelope("duplicated fmt".to_string()));
        }

        self.format = to_tstr(v, FMT_LABEL)?;

        self.keys_set.set(Keys::Fmt);

        Ok(())
    }

    fn set_auth_data(&mut self, v: &Value) -> Result<(), Error> {
        if self.keys_set.contains(Keys::AuthData) {
            return Err(Error::MalformedEnvelope("duplicated authData".to_string()));
        }

        self.auth_data = to_bstr(v, AUTH_DATA_LABEL)?;

        self.keys_set.set(Keys::AuthData);

        Ok(())
    }

    fn set_statement(&mut self, v: &Value) -> Result<(), Error> {
        if self.keys_set.contains(Keys::AttStmt) {
            return Err(Error::MalformedEnvelope("duplicated attStmt".to_string()));
        }

        let contents = to_map(v, ATT_STMT_LABEL)?;
        self.statement.parse(contents)?;

        self.keys_set.set(Keys::AttStmt);

        Ok(())
    }
}
