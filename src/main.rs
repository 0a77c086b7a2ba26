// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

use appattest::attestation::{Attestation, Bytes, VerificationRequest};
use appattest::config::VerifierConfig;
use appattest::store::PinnedRoot;
use clap::Parser;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
enum AppAttestCli {
    Verify(VerifyArgs),
    Inspect(InspectArgs),
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Verify an App Attest attestation object against the pinned \
    Apple App Attestation Root CA")]
struct VerifyArgs {
    /// JSON verification request (attestationEnvelope, challenge,
    /// expectedAppIdentifier and optionally keyId)
    #[arg(short, long, conflicts_with_all = ["attestation", "challenge"])]
    request: Option<PathBuf>,

    /// attestation object, raw CBOR or base64
    #[arg(short, long, required_unless_present = "request")]
    attestation: Option<PathBuf>,

    /// challenge file, used byte for byte
    #[arg(short, long, required_unless_present = "request")]
    challenge: Option<PathBuf>,

    /// expected "<team id>.<bundle id>", overrides the configuration
    #[arg(long)]
    app_id: Option<String>,

    /// base64 key identifier reported by the app
    #[arg(short, long)]
    key_id: Option<String>,

    #[arg(long, default_value = "appattest.json")]
    config: PathBuf,

    /// PEM trust anchor, overrides the configuration
    #[arg(long)]
    root_pem: Option<PathBuf>,

    /// print the specific rejection reason
    #[arg(long)]
    debug_reasons: bool,
}

#[derive(Debug, clap::Args)]
#[command(author, version, long_about = None,
    about = "Decode an App Attest attestation object and print its contents \
    without verifying it")]
struct InspectArgs {
    /// attestation object, raw CBOR or base64
    #[arg(short, long, default_value = "attestation.cbor")]
    attestation: PathBuf,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match AppAttestCli::parse() {
        AppAttestCli::Verify(args) => match verify(&args) {
            Ok(Ok(j)) => {
                println!("{j}");
                ExitCode::SUCCESS
            }
            Ok(Err(msg)) => {
                eprintln!("verification failed: {msg}");
                ExitCode::FAILURE
            }
            Err(e) => {
                eprintln!("verification could not run: {e}");
                ExitCode::from(2)
            }
        },

        AppAttestCli::Inspect(args) => match inspect(&args) {
            Ok(j) => {
                println!("{j}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("inspection failed: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

/// Attestation objects are accepted either as raw CBOR or as base64 text.
fn read_attestation(path: &Path) -> Result<Vec<u8>, Box<dyn Error>> {
    let c = fs::read(path)?;

    if let Ok(s) = std::str::from_utf8(&c) {
        if let Ok(b) = Bytes::try_from(s) {
            return Ok(b.into_inner());
        }
    }

    Ok(c)
}

fn load_config(args: &VerifyArgs) -> Result<VerifierConfig, Box<dyn Error>> {
    let mut cfg = if args.config.exists() {
        VerifierConfig::load(&args.config)?
    } else {
        info!(config = %args.config.display(), "no configuration file, using defaults");
        VerifierConfig::default()
    };

    if args.app_id.is_some() {
        cfg.app_id = args.app_id.clone();
    }
    if args.root_pem.is_some() {
        cfg.root_pem = args.root_pem.clone();
    }
    if args.debug_reasons {
        cfg.debug_reasons = true;
    }

    Ok(cfg)
}

fn build_request(
    args: &VerifyArgs,
    cfg: &VerifierConfig,
) -> Result<VerificationRequest, Box<dyn Error>> {
    let mut req = match (&args.request, &args.attestation, &args.challenge) {
        (Some(r), _, _) => serde_json::from_str(&fs::read_to_string(r)?)?,
        (None, Some(a), Some(c)) => VerificationRequest {
            attestation: read_attestation(a)?.into(),
            challenge: fs::read(c)?.into(),
            ..Default::default()
        },
        _ => return Err("either --request or both --attestation and --challenge".into()),
    };

    if let Some(app_id) = &args.app_id {
        req.app_id = app_id.clone();
    } else if req.app_id.is_empty() {
        req.app_id = cfg
            .app_id
            .clone()
            .ok_or("no app id given on the command line or in the configuration")?;
    }

    if let Some(k) = &args.key_id {
        req.set_key_id(k)?;
    }

    Ok(req)
}

/// The outer result carries setup failures, the inner one the verdict.
fn verify(args: &VerifyArgs) -> Result<Result<String, String>, Box<dyn Error>> {
    let cfg = load_config(args)?;
    let req = build_request(args, &cfg)?;

    let owned = cfg.load_root()?;
    let root = match &owned {
        Some(r) => r,
        None => PinnedRoot::apple()?,
    };

    let v = cfg.verifier(root)?;

    match v.verify(&req) {
        Ok(r) => Ok(Ok(serde_json::to_string_pretty(&r)?)),
        Err(e) => Ok(Err(e.external_message(cfg.debug_reasons))),
    }
}

fn inspect(args: &InspectArgs) -> Result<String, Box<dyn Error>> {
    let c = read_attestation(&args.attestation)?;

    let a = Attestation::decode(&c)?;

    Ok(serde_json::to_string_pretty(&a)?)
}
