use std::sync::Arc;
use std::time::Duration;

/// Delay inserted after each successful step that is not the last one.
///
/// Presentation pacing only: the delay carries no ordering or data dependency.
#[derive(Clone)]
pub struct PacingPolicy {
    pace: Arc<dyn Fn(usize, usize) -> Duration + Send + Sync>,
}

impl PacingPolicy {
    /// The same delay after every step.
    pub fn constant(delay: Duration) -> Self {
        Self::from_fn(move |_, _| delay)
    }

    /// No delay at all.
    pub fn none() -> Self {
        Self::constant(Duration::ZERO)
    }

    /// Compute the delay from `(step_index, total_steps)`; `step_index` is zero-based.
    pub fn from_fn(pace: impl Fn(usize, usize) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            pace: Arc::new(pace),
        }
    }

    pub fn delay(&self, step_index: usize, total: usize) -> Duration {
        (self.pace)(step_index, total)
    }
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::constant(Duration::from_secs(5))
    }
}

impl std::fmt::Debug for PacingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacingPolicy").finish_non_exhaustive()
    }
}
