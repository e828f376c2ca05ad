//! Fault taxonomy and the retry classification policy.
//!
//! The compute boundary never decides whether a failure is worth retrying. It
//! tags the failure with a [`FaultKind`] and the worker asks one
//! [`FaultPolicy`] for the [`FaultClass`]. Kinds missing from the policy's
//! transient set are fatal.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What went wrong during an episode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The input is malformed (e.g. missing target column).
    Validation,
    /// Simulated or environmental failure of the computation itself.
    TransientCompute,
    /// I/O failure while fetching or storing a blob.
    BlobTransfer,
    /// Anything the compute boundary could not classify more precisely.
    Internal,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Validation => "validation",
            FaultKind::TransientCompute => "transient_compute",
            FaultKind::BlobTransfer => "blob_transfer",
            FaultKind::Internal => "internal",
        }
    }
}

impl core::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry classification of a fault.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultClass {
    Transient,
    Fatal,
}

/// A tagged failure returned by the compute boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} fault: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TransientCompute, message)
    }

    pub fn blob_transfer(message: impl Into<String>) -> Self {
        Self::new(FaultKind::BlobTransfer, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FaultKind::Internal, message)
    }
}

/// Whitelist of fault kinds that may be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPolicy {
    transient: BTreeSet<FaultKind>,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self::fail_fast()
            .with_transient(FaultKind::TransientCompute)
            .with_transient(FaultKind::BlobTransfer)
    }
}

impl FaultPolicy {
    /// A policy that retries nothing.
    pub fn fail_fast() -> Self {
        Self {
            transient: BTreeSet::new(),
        }
    }

    pub fn with_transient(mut self, kind: FaultKind) -> Self {
        self.transient.insert(kind);
        self
    }

    pub fn classify(&self, kind: FaultKind) -> FaultClass {
        if self.transient.contains(&kind) {
            FaultClass::Transient
        } else {
            FaultClass::Fatal
        }
    }

    pub fn transient_kinds(&self) -> impl Iterator<Item = FaultKind> + '_ {
        self.transient.iter().copied()
    }
}
