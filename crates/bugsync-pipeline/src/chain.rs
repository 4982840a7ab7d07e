//! Preprocessor chain
//!
//! Runs each record through the configured stages in order. The first
//! filter that drops a record ends its trip; stages after it never see it.

use crate::error::StageError;
use crate::observer::{FilterObserver, NoopObserver};
use crate::stage::{Enricher, Filter, FilterOutcome, Stage};
use bugsync_record::Record;
use std::sync::Arc;

/// Ordered filter/enricher stages with one decision observer
pub struct PreprocessorChain {
    stages: Vec<Stage>,
    observer: Arc<dyn FilterObserver>,
}

impl PreprocessorChain {
    /// Create empty chain (passes every record through)
    #[must_use]
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    /// With decision observer
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn FilterObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// With filter appended
    #[must_use]
    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.stages.push(Stage::Filter(Box::new(filter)));
        self
    }

    /// With enricher appended
    #[must_use]
    pub fn with_enricher(mut self, enricher: impl Enricher + 'static) -> Self {
        self.stages.push(Stage::Enrich(Box::new(enricher)));
        self
    }

    /// Append a stage
    pub fn push(&mut self, stage: Stage) {
        self.stages.push(stage);
    }

    /// Stage names in order
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(Stage::name)
    }

    /// Number of stages
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Check if chain has no stages
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run one record through the chain
    ///
    /// Returns `Ok(None)` if a filter dropped it.
    ///
    /// # Errors
    /// Returns [`StageError`] if a stage needed a field that failed to load.
    pub fn apply(&self, mut record: Record) -> Result<Option<Record>, StageError> {
        for stage in &self.stages {
            match stage {
                Stage::Filter(filter) => {
                    let matches = filter.matches(&mut record).map_err(|source| StageError::Filter {
                        stage: filter.name().to_string(),
                        source,
                    })?;
                    let outcome = if filter.mode().keeps(matches) {
                        FilterOutcome::Kept
                    } else {
                        FilterOutcome::Dropped
                    };
                    self.observer.on_decision(filter.name(), &record, outcome);
                    if outcome == FilterOutcome::Dropped {
                        return Ok(None);
                    }
                }
                Stage::Enrich(enricher) => enricher.enrich(&mut record)?,
            }
        }
        Ok(Some(record))
    }

    /// Run a page of records through the chain, keeping survivors in order
    ///
    /// # Errors
    /// Returns the first [`StageError`]; the rest of the page is discarded.
    pub fn apply_page(&self, records: Vec<Record>) -> Result<Vec<Record>, StageError> {
        let mut survivors = Vec::with_capacity(records.len());
        for record in records {
            if let Some(record) = self.apply(record)? {
                survivors.push(record);
            }
        }
        Ok(survivors)
    }
}

impl Default for PreprocessorChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PreprocessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreprocessorChain")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}
