use mlq_core::{Fault, JobKind};

use crate::model::NearestCentroid;
use crate::table::Table;

/// A kind-specific compute function.
///
/// `inputs` are the fetched input blobs in argument order; the returned bytes
/// are written to the job's output location. Runs on a blocking thread and
/// must not touch job state.
pub trait Compute: Send + Sync + 'static {
    fn run(&self, kind: JobKind, inputs: &[Vec<u8>]) -> Result<Vec<u8>, Fault>;
}

/// Fit: `[dataset] -> model`. Predict: `[dataset, model] -> result table`.
#[derive(Debug, Copy, Clone, Default)]
pub struct NearestCentroidCompute;

impl NearestCentroidCompute {
    pub fn new() -> Self {
        Self
    }
}

fn expect_inputs(kind: JobKind, inputs: &[Vec<u8>], n: usize) -> Result<(), Fault> {
    if inputs.len() != n {
        return Err(Fault::validation(format!(
            "{kind} expects {n} input blob(s), got {}",
            inputs.len()
        )));
    }
    Ok(())
}

impl Compute for NearestCentroidCompute {
    fn run(&self, kind: JobKind, inputs: &[Vec<u8>]) -> Result<Vec<u8>, Fault> {
        match kind {
            JobKind::Fit => {
                expect_inputs(kind, inputs, 1)?;
                let data = Table::from_bytes(&inputs[0])?;
                let model = NearestCentroid::fit(&data)?;
                Ok(model.to_bytes()?)
            }
            JobKind::Predict => {
                expect_inputs(kind, inputs, 2)?;
                let data = Table::from_bytes(&inputs[0])?;
                let model = NearestCentroid::from_bytes(&inputs[1])?;
                Ok(model.predict(&data)?.to_bytes()?)
            }
        }
    }
}
