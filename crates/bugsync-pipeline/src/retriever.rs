//! Paginated retrieval
//!
//! [`PagedRetriever`] pulls pages from a [`SourceQuery`], runs each page
//! through a [`PreprocessorChain`] and yields the survivors one by one. A page
//! is fully fetched and preprocessed before any of its records is yielded,
//! and the next page is fetched only once the previous one is drained.

use crate::chain::PreprocessorChain;
use crate::error::RetrieveError;
use crate::source::SourceQuery;
use bugsync_record::Record;
use serde::Serialize;
use std::collections::VecDeque;

/// Page size used when none is configured
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Counters for one retrieval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalStats {
    /// Pages fetched
    pub pages: usize,
    /// Records returned by the source
    pub fetched: usize,
    /// Records that survived the chain
    pub accepted: usize,
    /// Records dropped by filters
    pub dropped: usize,
}

/// Iterator over preprocessed source records
///
/// The total is refreshed from every page, and retrieval stops once the
/// number of requested records reaches the latest total. Sources that do not
/// report a total stop at the first short page. Any error is yielded once,
/// after which the iterator is exhausted.
pub struct PagedRetriever<'a> {
    query: &'a dyn SourceQuery,
    chain: &'a PreprocessorChain,
    page_size: usize,
    loaded: usize,
    total: Option<usize>,
    buffer: VecDeque<Record>,
    done: bool,
    stats: RetrievalStats,
}

impl<'a> PagedRetriever<'a> {
    /// Create retriever
    ///
    /// # Errors
    /// Returns [`RetrieveError::ZeroPageSize`] if `page_size` is zero
    pub fn new(
        query: &'a dyn SourceQuery,
        chain: &'a PreprocessorChain,
        page_size: usize,
    ) -> Result<Self, RetrieveError> {
        if page_size == 0 {
            return Err(RetrieveError::ZeroPageSize);
        }
        Ok(Self {
            query,
            chain,
            page_size,
            loaded: 0,
            total: None,
            buffer: VecDeque::new(),
            done: false,
            stats: RetrievalStats::default(),
        })
    }

    /// Counters so far
    #[inline]
    #[must_use]
    pub fn stats(&self) -> RetrievalStats {
        self.stats
    }

    /// Latest total reported by the source
    #[inline]
    #[must_use]
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    fn fetch_next_page(&mut self) -> Result<(), RetrieveError> {
        let offset = self.loaded;
        let page = self
            .query
            .fetch_page(offset, self.page_size)
            .map_err(|source| RetrieveError::Fetch { offset, source })?;

        let fetched = page.records.len();
        if page.total.is_some() {
            self.total = page.total;
        }
        self.stats.pages += 1;
        self.stats.fetched += fetched;

        let accepted = self
            .chain
            .apply_page(page.records)
            .map_err(|source| RetrieveError::Stage { offset, source })?;
        self.stats.accepted += accepted.len();
        self.stats.dropped += fetched - accepted.len();

        self.loaded += self.page_size;
        self.done = match self.total {
            Some(total) => self.loaded >= total,
            None => fetched < self.page_size,
        };

        tracing::debug!(
            source = %self.query.describe(),
            offset,
            fetched,
            accepted = accepted.len(),
            total = ?self.total,
            "page retrieved"
        );
        self.buffer.extend(accepted);
        Ok(())
    }
}

impl Iterator for PagedRetriever<'_> {
    type Item = Result<Record, RetrieveError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            if let Err(error) = self.fetch_next_page() {
                self.done = true;
                tracing::error!(%error, "retrieval aborted");
                return Some(Err(error));
            }
        }
    }
}

impl std::fmt::Debug for PagedRetriever<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagedRetriever")
            .field("source", &self.query.describe())
            .field("page_size", &self.page_size)
            .field("loaded", &self.loaded)
            .field("total", &self.total)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
