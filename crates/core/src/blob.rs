//! Blob addressing shared by the gateway, the workers and the object store.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The three logical buckets of the object store.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    /// Uploaded input tables.
    Datasets,
    /// Serialized fitted models.
    Models,
    /// Single-column prediction tables.
    Results,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Bucket::Datasets, Bucket::Models, Bucket::Results];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Datasets => "datasets",
            Bucket::Models => "models",
            Bucket::Results => "results",
        }
    }
}

impl core::fmt::Display for Bucket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bucket {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "datasets" => Ok(Bucket::Datasets),
            "models" => Ok(Bucket::Models),
            "results" => Ok(Bucket::Results),
            other => Err(DomainError::validation(format!("unknown bucket: {other}"))),
        }
    }
}

/// Location of one blob: bucket plus key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobKey {
    pub bucket: Bucket,
    pub key: String,
}

impl BlobKey {
    pub fn new(bucket: Bucket, key: impl Into<String>) -> Self {
        Self {
            bucket,
            key: key.into(),
        }
    }
}

impl core::fmt::Display for BlobKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// HTTP method a presigned URL grants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BlobMethod {
    Get,
    Put,
}

impl BlobMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobMethod::Get => "GET",
            BlobMethod::Put => "PUT",
        }
    }
}
