// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use super::common::*;
use super::errors::Error;
use bitmask::*;
use serde::{Deserialize, Serialize};

pub const RP_ID_HASH_LEN: usize = 32;
pub const AAGUID_LEN: usize = 16;

/// rpIdHash (32) + flags (1) + counter (4)
pub const MIN_AUTH_DATA_LEN: usize = 37;

const FLAGS_LEN: usize = 1;
const COUNTER_LEN: usize = 4;
const CREDENTIAL_ID_LEN_LEN: usize = 2;

pub const AAGUID_PRODUCTION: &[u8; AAGUID_LEN] = b"appattest\0\0\0\0\0\0\0";
pub const AAGUID_DEVELOPMENT: &[u8; AAGUID_LEN] = b"appattestdevelop";

bitmask! {
    #[derive(Debug)]
    pub mask FlagsSet: u8 where flags Flag {
        UserPresent            = 0x01,
        UserVerified           = 0x04,
        BackupEligible         = 0x08,
        BackedUp               = 0x10,
        AttestedCredentialData = 0x40,
        ExtensionData          = 0x80,
    }
}

const ALL_FLAGS: [(Flag, &str); 6] = [
    (Flag::UserPresent, "UP"),
    (Flag::UserVerified, "UV"),
    (Flag::BackupEligible, "BE"),
    (Flag::BackedUp, "BS"),
    (Flag::AttestedCredentialData, "AT"),
    (Flag::ExtensionData, "ED"),
];

/// The App Attest service environment that produced an attestation,
/// derived from the authenticator id (AAGUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    pub fn from_aaguid(aaguid: &[u8; AAGUID_LEN]) -> Option<Environment> {
        if aaguid == AAGUID_PRODUCTION {
            Some(Environment::Production)
        } else if aaguid == AAGUID_DEVELOPMENT {
            Some(Environment::Development)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Development => "development",
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "production" => Ok(Environment::Production),
            "development" => Ok(Environment::Development),
            x => Err(format!("unknown environment {x}")),
        }
    }
}

/// The attested credential data block, present when the AT flag is set
#[serde_with::serde_as]
#[derive(Debug, Serialize)]
pub struct AttestedCredential {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub aaguid: [u8; AAGUID_LEN],
    #[serde_as(as = "serde_with::hex::Hex")]
    pub credential_id: Vec<u8>,
    /// The credential public key exactly as encoded (a CBOR map)
    #[serde_as(as = "serde_with::hex::Hex")]
    pub public_key: Vec<u8>,
}

/// Authenticator data, see §6.1 of W3C "Web Authentication" Level 2.
#[serde_with::serde_as]
#[derive(Debug, Serialize)]
pub struct AuthenticatorData {
    #[serde_as(as = "serde_with::hex::Hex")]
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub counter: u32,
    pub attested_credential: Option<AttestedCredential>,
    #[serde_as(as = "Option<serde_with::hex::Hex>")]
    pub extensions: Option<Vec<u8>>,

    /// The buffer this was parsed from; signatures and nonces cover it
    #[serde(skip)]
    pub bytes: Vec<u8>,

    #[serde(skip)]
    flags_set: FlagsSet,
}

/// Bounds-checked positional reader over the authenticator data buffer.
struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], Error> {
        let end = self
            .off
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::TruncatedAuthData(format!(
                    "{what}: need {n} bytes at offset {}, have {}",
                    self.off,
                    self.buf.len().saturating_sub(self.off)
                ))
            })?;

        let s = &self.buf[self.off..end];
        self.off = end;

        Ok(s)
    }

    fn take_cbor_map(&mut self, what: &str) -> Result<&'a [u8], Error> {
        let rest = &self.buf[self.off..];

        let (v, consumed) =
            decode_first(rest).map_err(|e| Error::TruncatedAuthData(format!("{what}: {e}")))?;

        if !v.is_map() {
            return Err(Error::TruncatedAuthData(format!("{what} MUST be map")));
        }

        self.take(consumed, what)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.off
    }
}

impl AuthenticatorData {
    /// Parse an authenticator data buffer.  Every region is bounds-checked
    /// right before it is sliced.
    pub fn decode(buf: &[u8]) -> Result<AuthenticatorData, Error> {
        if buf.len() < MIN_AUTH_DATA_LEN {
            return Err(Error::TruncatedAuthData(format!(
                "{} bytes, at least {MIN_AUTH_DATA_LEN} needed",
                buf.len()
            )));
        }

        let mut r = Reader { buf, off: 0 };

        let mut rp_id_hash = [0u8; RP_ID_HASH_LEN];
        rp_id_hash.copy_from_slice(r.take(RP_ID_HASH_LEN, "rpIdHash")?);

        let flags = r.take(FLAGS_LEN, "flags")?[0];

        let mut counter = [0u8; COUNTER_LEN];
        counter.copy_from_slice(r.take(COUNTER_LEN, "signCount")?);
        let counter = u32::from_be_bytes(counter);

        let mut flags_set = FlagsSet::none();
        for (f, _) in ALL_FLAGS {
            if flags & (f as u8) != 0 {
                flags_set.set(f);
            }
        }

        let mut ad = AuthenticatorData {
            rp_id_hash,
            flags,
            counter,
            attested_credential: None,
            extensions: None,
            bytes: buf.to_vec(),
            flags_set,
        };

        if ad.has(Flag::AttestedCredentialData) {
            let mut aaguid = [0u8; AAGUID_LEN];
            aaguid.copy_from_slice(r.take(AAGUID_LEN, "aaguid")?);

            let mut l = [0u8; CREDENTIAL_ID_LEN_LEN];
            l.copy_from_slice(r.take(CREDENTIAL_ID_LEN_LEN, "credentialIdLength")?);
            let l = u16::from_be_bytes(l) as usize;

            let credential_id = r.take(l, "credentialId")?.to_vec();
            let public_key = r.take_cbor_map("credentialPublicKey")?.to_vec();

            ad.attested_credential = Some(AttestedCredential {
                aaguid,
                credential_id,
                public_key,
            });
        }

        if ad.has(Flag::ExtensionData) {
            ad.extensions = Some(r.take_cbor_map("extensions")?.to_vec());
        }

        if r.remaining() != 0 {
            return Err(Error::TruncatedAuthData(format!(
                "{} unaccounted trailing bytes",
                r.remaining()
            )));
        }

        Ok(ad)
    }

    pub fn has(&self, f: Flag) -> bool {
        self.flags_set.contains(f)
    }

    /// Short names of the flags that are set, e.g. `["UP", "AT"]`
    pub fn flag_names(&self) -> Vec<&'static str> {
        ALL_FLAGS
            .iter()
            .filter(|(f, _)| self.has(*f))
            .map(|(_, n)| *n)
            .collect()
    }

    pub fn has_attested_credential_data(&self) -> bool {
        self.has(Flag::AttestedCredentialData)
    }

    /// The service environment, if the AAGUID is one App Attest uses
    pub fn environment(&self) -> Option<Environment> {
        self.attested_credential
            .as_ref()
            .and_then(|c| Environment::from_aaguid(&c.aaguid))
    }
}
