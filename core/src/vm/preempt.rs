use std::cell::Cell;

/// Policy deciding, at each fresh call boundary, whether to force a
/// suspension even absent an explicit yield.
///
/// Consulted only for fresh dispatches: replaying a snapshot chain never
/// re-checks, so a preempted chain always makes progress when resumed.
#[derive(Debug)]
pub enum Preemption {
    /// Only explicit yields suspend.
    Never,
    /// Suspend at every check point; the host resumes on its next turn.
    Always,
    /// Suspend after `n` check points, then reset. Deterministic budgets
    /// for tests and sandboxes.
    Countdown { limit: u32, left: Cell<u32> },
}

impl Preemption {
    pub fn countdown(n: u32) -> Preemption {
        Preemption::Countdown {
            limit: n,
            left: Cell::new(n),
        }
    }

    /// One check point. `n` check points under `Countdown(n)` pass freely;
    /// the `n+1`-th forces a suspension and resets the budget.
    pub fn should_suspend(&self) -> bool {
        match self {
            Preemption::Never => false,
            Preemption::Always => true,
            Preemption::Countdown { limit, left } => {
                let remaining = left.get();
                if remaining == 0 {
                    left.set(*limit);
                    true
                } else {
                    left.set(remaining - 1);
                    false
                }
            }
        }
    }
}

impl Default for Preemption {
    fn default() -> Self {
        Preemption::Never
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_and_always() {
        assert!(!Preemption::Never.should_suspend());
        assert!(Preemption::Always.should_suspend());
        assert!(Preemption::Always.should_suspend());
    }

    #[test]
    fn countdown_fires_after_budget_and_resets() {
        let p = Preemption::countdown(2);
        assert!(!p.should_suspend());
        assert!(!p.should_suspend());
        assert!(p.should_suspend());
        // Budget resets after firing.
        assert!(!p.should_suspend());
        assert!(!p.should_suspend());
        assert!(p.should_suspend());
    }

    #[test]
    fn countdown_zero_fires_immediately() {
        let p = Preemption::countdown(0);
        assert!(p.should_suspend());
        assert!(p.should_suspend());
    }
}
