//! Usage collection for actions that make their own model calls.

use std::sync::{Arc, Mutex};

use crate::types::usage::UsageTotals;

use super::lock;

/// Shared sink that concurrent actions report sub-call usage into.
///
/// Cloning shares the same running total.
#[derive(Clone, Default)]
pub struct UsageSink {
    inner: Arc<Mutex<UsageSinkInner>>,
}

#[derive(Default)]
struct UsageSinkInner {
    total: UsageTotals,
    reports: u64,
}

impl UsageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage from one sub-call.
    pub fn record(&self, usage: &UsageTotals) {
        let mut inner = lock(&self.inner);
        inner.total = inner.total.merge(usage);
        inner.reports += 1;
    }

    /// Running total of everything recorded so far.
    pub fn total(&self) -> UsageTotals {
        lock(&self.inner).total
    }

    /// Number of reports recorded.
    pub fn report_count(&self) -> u64 {
        lock(&self.inner).reports
    }

    /// Return the total and reset the sink to zero.
    pub fn take(&self) -> UsageTotals {
        let mut inner = lock(&self.inner);
        inner.reports = 0;
        std::mem::take(&mut inner.total)
    }
}

impl std::fmt::Debug for UsageSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageSink")
            .field("total", &self.total())
            .finish()
    }
}
