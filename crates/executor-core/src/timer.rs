use std::time::{Duration, Instant};

/// A single shared clock telling every suspension site how long it may wait.
///
/// Monotonic-clock sourced (`Instant`); not `Sync` by design — the driver is
/// single-task, so there is exactly one mutable owner at a time.
#[derive(Debug)]
pub struct DeadlineTimer {
    deadline: Option<Instant>,
}

impl DeadlineTimer {
    /// A timer with no deadline set yet (`time_left()` is zero until `set`).
    pub fn new() -> Self {
        Self { deadline: None }
    }

    /// Replace the deadline with `now + seconds`.
    ///
    /// `seconds` is expected to be finite and non-negative per the contract
    /// in component design §4.1; callers that source it from untrusted input
    /// (coordinator-supplied timing) are responsible for rejecting bad values
    /// with a proper error before they reach this method. As a last line of
    /// defense this clamps NaN/infinite/negative input to zero rather than
    /// panicking in `Duration::from_secs_f64` — a malformed timing value must
    /// never unwind past the driver's cleanup path.
    pub fn set(&mut self, seconds: f64) {
        self.deadline = Instant::now().checked_add(Duration::from_secs_f64(sanitize(seconds)));
    }

    /// Shift the deadline outward by `seconds`. Never shrinks the deadline.
    ///
    /// If no deadline has been set yet, this behaves like `set` — there is
    /// nothing to extend from. See `set`'s doc comment for how out-of-range
    /// input is handled.
    pub fn extend(&mut self, seconds: f64) {
        let extra = Duration::from_secs_f64(sanitize(seconds));
        self.deadline = Some(match self.deadline {
            Some(d) => d + extra,
            None => Instant::now() + extra,
        });
    }

    /// Remaining time until the deadline, floored at zero.
    pub fn time_left(&self) -> f64 {
        match self.deadline {
            Some(d) => d.saturating_duration_since(Instant::now()).as_secs_f64(),
            None => 0.0,
        }
    }

    /// `time_left()` as a `Duration`, convenient for `tokio::time::timeout`.
    pub fn time_left_duration(&self) -> Duration {
        Duration::from_secs_f64(self.time_left())
    }
}

impl Default for DeadlineTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Maps NaN, infinities, and negatives to zero; everything else passes through.
fn sanitize(seconds: f64) -> f64 {
    if seconds.is_finite() && seconds >= 0.0 { seconds } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_timer_has_no_time_left() {
        let timer = DeadlineTimer::new();
        assert_eq!(timer.time_left(), 0.0);
    }

    #[test]
    fn set_then_time_left_is_approximately_the_budget() {
        let mut timer = DeadlineTimer::new();
        timer.set(10.0);
        let left = timer.time_left();
        assert!(left > 9.9 && left <= 10.0, "left = {left}");
    }

    #[test]
    fn extend_is_additive_and_never_shrinks() {
        let mut timer = DeadlineTimer::new();
        timer.set(5.0);
        timer.extend(5.0);
        let left = timer.time_left();
        assert!(left > 9.9 && left <= 10.0, "left = {left}");
    }

    #[test]
    fn extend_without_prior_set_behaves_like_set() {
        let mut timer = DeadlineTimer::new();
        timer.extend(3.0);
        let left = timer.time_left();
        assert!(left > 2.9 && left <= 3.0, "left = {left}");
    }

    #[test]
    fn set_clamps_negative_seconds_to_zero_instead_of_panicking() {
        let mut timer = DeadlineTimer::new();
        timer.set(-1.0);
        assert_eq!(timer.time_left(), 0.0);
    }

    #[test]
    fn set_clamps_non_finite_seconds_to_zero_instead_of_panicking() {
        let mut timer = DeadlineTimer::new();
        timer.set(f64::NAN);
        assert_eq!(timer.time_left(), 0.0);
        timer.set(f64::INFINITY);
        assert_eq!(timer.time_left(), 0.0);
    }

    #[test]
    fn extend_clamps_negative_seconds_to_zero_instead_of_panicking() {
        let mut timer = DeadlineTimer::new();
        timer.set(5.0);
        timer.extend(-100.0);
        let left = timer.time_left();
        assert!(left > 4.9 && left <= 5.0, "left = {left}");
    }
}
