// Copyright 2023 Contributors to the Veraison project.
// SPDX-License-Identifier: Apache-2.0

//! The trust anchor side of verification: the pinned App Attest root.

pub use self::errors::Error;
pub use self::pinnedroot::PinnedRoot;
pub use self::pinnedroot::APPLE_APP_ATTESTATION_ROOT_CA_PEM;

mod errors;
mod pinnedroot;
