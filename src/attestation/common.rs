// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::errors::Error;
use ciborium::de::from_reader;
use ciborium::Value;
use std::io::Cursor;

pub fn to_bstr(v: &Value, n: &str) -> Result<Vec<u8>, Error> {
    match v.as_bytes() {
        Some(b) => Ok(b.clone()),
        None => Err(Error::MalformedEnvelope(format!("{n} MUST be bstr"))),
    }
}

pub fn to_tstr(v: &Value, n: &str) -> Result<String, Error> {
    match v.as_text() {
        Some(s) => Ok(s.to_string()),
        None => Err(Error::MalformedEnvelope(format!("{n} MUST be tstr"))),
    }
}

pub fn to_map<'a>(v: &'a Value, n: &str) -> Result<&'a Vec<(Value, Value)>, Error> {
    v.as_map()
        .ok_or_else(|| Error::MalformedEnvelope(format!("{n} MUST be map")))
}

/// Decode the first CBOR data item in `buf`, returning it together with the
/// number of bytes it occupied.
pub fn decode_first(buf: &[u8]) -> Result<(Value, usize), String> {
    let mut cursor = Cursor::new(buf);

    let v: Value = from_reader(&mut cursor).map_err(|e| e.to_string())?;

    let consumed = usize::try_from(cursor.position()).map_err(|e| e.to_string())?;

    Ok((v, consumed))
}

/// `a || b`
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

/// Constant-time comparison; slices of different length never match.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}
