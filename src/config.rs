// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! Verifier configuration, loaded from a JSON document such as:
//!
//! ```json
//! {
//!   "app-id": "TEAM123.com.example.app",
//!   "root-pem": "/etc/appattest/root.pem",
//!   "debug-reasons": false,
//!   "allowed-environments": [ "production" ]
//! }
//! ```
//!
//! Every key is optional.

use crate::attestation::{Environment, Verifier};
use crate::store::PinnedRoot;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error)]
pub enum Error {
    #[error("reading {0}: {1}")]
    Io(String, std::io::Error),
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("pinned root: {0}")]
    Root(crate::store::Error),
    #[error("verifier: {0}")]
    Verifier(crate::attestation::Error),
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct VerifierConfig {
    /// Expected `"<team id>.<bundle id>"` when the caller does not supply one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    /// PEM file replacing the compiled-in Apple root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_pem: Option<PathBuf>,

    /// Hand the specific rejection reason back to the submitter
    #[serde(default)]
    pub debug_reasons: bool,

    /// When set, only attestations from these environments are accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_environments: Option<Vec<Environment>>,
}

impl VerifierConfig {
    pub fn load_json(j: &str) -> Result<Self, Error> {
        serde_json::from_str(j).map_err(|e| Error::Syntax(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let j =
            fs::read_to_string(path).map_err(|e| Error::Io(path.display().to_string(), e))?;

        Self::load_json(&j)
    }

    /// Read and parse the `root-pem` file, if one is configured.
    pub fn load_root(&self) -> Result<Option<PinnedRoot>, Error> {
        let p = match &self.root_pem {
            Some(p) => p,
            None => return Ok(None),
        };

        let pem = fs::read(p).map_err(|e| Error::Io(p.display().to_string(), e))?;

        PinnedRoot::from_pem(&pem).map(Some).map_err(Error::Root)
    }

    /// A verifier anchored at `root` with this configuration's policy
    pub fn verifier<'a>(&self, root: &'a PinnedRoot) -> Result<Verifier<'a>, Error> {
        let mut v = Verifier::new(root).map_err(Error::Verifier)?;

        if let Some(envs) = &self.allowed_environments {
            v.set_allowed_environments(envs.clone());
        }

        Ok(v)
    }
}
