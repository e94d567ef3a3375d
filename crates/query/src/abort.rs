use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative cancellation token.
///
/// Clones share one flag. Long-running loops (the planner, the merge
/// kernels, every backend) poll it and bail out at their next observation
/// point; nobody is interrupted mid-sample, so a cancelled query's buffer is
/// merely incomplete, never torn.
#[derive(Clone, Debug, Default)]
pub struct Aborted {
    flag: Arc<AtomicBool>,
}

impl Aborted {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every observer to stop as soon as practical.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
