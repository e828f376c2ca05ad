use mlq_core::{Fault, JobKind};
use rand::Rng;
use tracing::warn;

use crate::compute::Compute;

/// Wraps a compute function and fails a configurable fraction of runs with a
/// transient fault before doing any work.
#[derive(Debug, Clone)]
pub struct FaultInjector<C> {
    inner: C,
    rate: f64,
}

impl<C: Compute> FaultInjector<C> {
    /// `rate` is clamped to `0.0..=1.0`.
    pub fn new(inner: C, rate: f64) -> Self {
        let rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };
        Self { inner, rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

impl<C: Compute> Compute for FaultInjector<C> {
    fn run(&self, kind: JobKind, inputs: &[Vec<u8>]) -> Result<Vec<u8>, Fault> {
        if self.rate > 0.0 && rand::thread_rng().gen_bool(self.rate) {
            warn!(%kind, rate = self.rate, "injecting simulated transient fault");
            return Err(Fault::transient("simulated transient compute failure"));
        }
        self.inner.run(kind, inputs)
    }
}

#[cfg(test)]
mod tests {
    use mlq_core::FaultKind;

    use super::*;

    struct Echo;

    impl Compute for Echo {
        fn run(&self, _kind: JobKind, inputs: &[Vec<u8>]) -> Result<Vec<u8>, Fault> {
            Ok(inputs.concat())
        }
    }

    #[test]
    fn zero_rate_never_injects() {
        let compute = FaultInjector::new(Echo, 0.0);
        for _ in 0..100 {
            assert_eq!(compute.run(JobKind::Fit, &[vec![1]]).unwrap(), vec![1]);
        }
    }

    #[test]
    fn full_rate_always_injects_transient_faults() {
        let compute = FaultInjector::new(Echo, 1.0);
        let fault = compute.run(JobKind::Fit, &[vec![1]]).unwrap_err();
        assert_eq!(fault.kind, FaultKind::TransientCompute);
    }

    #[test]
    fn rate_is_clamped() {
        assert_eq!(FaultInjector::new(Echo, 7.0).rate(), 1.0);
        assert_eq!(FaultInjector::new(Echo, -1.0).rate(), 0.0);
        assert_eq!(FaultInjector::new(Echo, f64::NAN).rate(), 0.0);
    }
}
