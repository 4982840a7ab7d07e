//! Filter decision observers

use crate::stage::FilterOutcome;
use bugsync_record::Record;

/// Receives every keep/drop decision of a chain
///
/// Callbacks return nothing and cannot influence the decision.
pub trait FilterObserver: Send + Sync {
    /// Called once per filter per record reaching it
    fn on_decision(&self, filter: &str, record: &Record, outcome: FilterOutcome);
}

/// Logs decisions at debug level
#[derive(Debug, Clone, Default)]
pub struct TracingObserver {
    id_field: Option<String>,
}

impl TracingObserver {
    /// Create observer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Include the value of `field` in each log line
    #[must_use]
    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = Some(field.into());
        self
    }
}

impl FilterObserver for TracingObserver {
    fn on_decision(&self, filter: &str, record: &Record, outcome: FilterOutcome) {
        let id = self
            .id_field
            .as_deref()
            .and_then(|field| record.peek(field))
            .map(bugsync_record::display_value)
            .unwrap_or_default();
        tracing::debug!(filter, record = %id, %outcome, "filter decision");
    }
}

/// Ignores all decisions
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl FilterObserver for NoopObserver {
    fn on_decision(&self, _filter: &str, _record: &Record, _outcome: FilterOutcome) {}
}
