use std::time::Duration;

/// How long a submitting call waits for its job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum Wait {
    /// Return as soon as the job is enqueued.
    #[default]
    Detach,
    /// Poll until the job settles.
    Forever,
    /// Poll until the job settles or the duration passes.
    Within(Duration),
}

impl Wait {
    /// Seconds convention: `None` waits forever, negative detaches, anything
    /// else is a deadline. Deadlines too large for a `Duration` wait forever.
    pub fn from_secs(timeout: Option<f64>) -> Self {
        match timeout {
            None => Wait::Forever,
            Some(secs) if secs.is_nan() || secs < 0.0 => Wait::Detach,
            Some(secs) => Duration::try_from_secs_f64(secs).map_or(Wait::Forever, Wait::Within),
        }
    }
}

impl From<Duration> for Wait {
    fn from(timeout: Duration) -> Self {
        Wait::Within(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_convention() {
        assert_eq!(Wait::from_secs(None), Wait::Forever);
        assert_eq!(Wait::from_secs(Some(-1.0)), Wait::Detach);
        assert_eq!(Wait::from_secs(Some(f64::NAN)), Wait::Detach);
        assert_eq!(Wait::from_secs(Some(f64::INFINITY)), Wait::Forever);
        assert_eq!(Wait::from_secs(Some(0.0)), Wait::Within(Duration::ZERO));
        assert_eq!(
            Wait::from_secs(Some(2.5)),
            Wait::Within(Duration::from_millis(2500))
        );
    }

    #[test]
    fn out_of_range_deadlines_wait_forever() {
        assert_eq!(Wait::from_secs(Some(1e20)), Wait::Forever);
        assert_eq!(Wait::from_secs(Some(f64::MAX)), Wait::Forever);
    }

    #[test]
    fn detach_is_the_default() {
        assert_eq!(Wait::default(), Wait::Detach);
    }
}
