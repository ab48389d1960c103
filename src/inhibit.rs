//! Inhibition gate: minimum spacing between persisted frames.

/// Decides whether the current frame may be persisted, based on the time
/// elapsed since the last persisted frame.
///
/// Admission updates the gate immediately, whether or not the subsequent
/// write succeeds; a failed write is not retried before the next window.
#[derive(Debug)]
pub struct InhibitGate {
    period: f64,
    last_persisted_at: Option<f64>,
}

impl InhibitGate {
    /// `period` is in seconds and must be >= 0; 0 admits every frame.
    pub fn new(period: f64) -> Self {
        Self {
            period,
            last_persisted_at: None,
        }
    }

    /// Returns true iff `now >= last_persisted_at + period` (or nothing has
    /// been persisted yet), recording `now` as the persist time on admission.
    pub fn admit(&mut self, now: f64) -> bool {
        let eligible = match self.last_persisted_at {
            None => true,
            Some(last) => now >= last + self.period,
        };
        if eligible {
            self.last_persisted_at = Some(now);
        }
        eligible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacing_is_enforced() {
        let mut gate = InhibitGate::new(2.0);
        assert!(gate.admit(0.0));
        assert!(!gate.admit(1.0));
        assert!(gate.admit(3.0));
    }

    #[test]
    fn suppressed_frames_do_not_shift_the_window() {
        let mut gate = InhibitGate::new(2.0);
        assert!(gate.admit(0.0));
        assert!(!gate.admit(1.9));
        // Eligibility is still measured from t=0, not t=1.9.
        assert!(gate.admit(2.0));
    }

    #[test]
    fn zero_period_admits_everything() {
        let mut gate = InhibitGate::new(0.0);
        for t in 0..5 {
            assert!(gate.admit(t as f64 * 0.001));
        }
    }
}
