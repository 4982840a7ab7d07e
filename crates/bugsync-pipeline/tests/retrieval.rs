//! Paged retrieval through a preprocessor chain against the in-memory source

use bugsync_pipeline::{
    ConditionFilter, MatchMode, OnDemandEnricher, PagedRetriever, PreprocessorChain, RetrieveError,
};
use bugsync_record::{Condition, Expression, FieldPath, Record, ResourceFetcher};
use bugsync_test_utils::{vulnerabilities, MemorySource, RecordingObserver};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

fn expr(source: &str) -> Expression {
    Expression::parse(source).unwrap()
}

fn suppressed_filter() -> ConditionFilter {
    ConditionFilter::new(
        "suppressed",
        Condition::IsTrue(expr("${suppressed}")),
        MatchMode::Exclude,
    )
}

fn ids(records: &[Record]) -> Vec<Value> {
    records.iter().filter_map(|r| r.peek("id").cloned()).collect()
}

fn collect(retriever: PagedRetriever<'_>) -> Vec<Record> {
    retriever.map(Result::unwrap).collect()
}

#[test]
fn exclude_filter_drops_without_extra_fetches() {
    let source = MemorySource::new(vulnerabilities(130, "shop"));
    for id in 1..=10 {
        source.set_field(&json!(id), "suppressed", json!(true));
    }
    let observer = Arc::new(RecordingObserver::new());
    let chain = PreprocessorChain::new()
        .with_observer(observer.clone())
        .with_filter(suppressed_filter());

    let mut retriever = PagedRetriever::new(&source, &chain, 50).unwrap();
    let records: Vec<Record> = retriever.by_ref().map(Result::unwrap).collect();

    assert_eq!(records.len(), 120);
    assert_eq!(source.page_fetches(), 3);
    assert_eq!(observer.dropped(), 10);
    assert_eq!(observer.decisions().len(), 130);

    let stats = retriever.stats();
    assert_eq!((stats.pages, stats.fetched, stats.accepted, stats.dropped), (3, 130, 120, 10));
    assert_eq!(retriever.total(), Some(130));
}

#[test]
fn shrinking_source_stops_at_latest_total() {
    let source = MemorySource::new(vulnerabilities(100, "shop"));
    let chain = PreprocessorChain::new();
    let mut retriever = PagedRetriever::new(&source, &chain, 50).unwrap();

    assert!(retriever.next().is_some());
    source.truncate(50);
    let rest = retriever.by_ref().count();

    assert_eq!(rest, 49);
    assert_eq!(source.page_fetches(), 2);
    assert_eq!(retriever.total(), Some(50));
}

#[test]
fn fetch_failure_is_yielded_once_with_offset() {
    let source = MemorySource::new(vulnerabilities(120, "shop")).failing_at(50);
    let chain = PreprocessorChain::new();
    let retriever = PagedRetriever::new(&source, &chain, 50).unwrap();

    let items: Vec<_> = retriever.collect();
    assert_eq!(items.len(), 51);
    assert!(items[..50].iter().all(Result::is_ok));
    let Err(error) = &items[50] else {
        panic!("expected fetch error");
    };
    assert_eq!(error.offset(), Some(50));
    assert!(error.is_retryable());
    assert!(matches!(error, RetrieveError::Fetch { .. }));
}

#[test]
fn zero_page_size_is_rejected() {
    let source = MemorySource::new(Vec::new());
    let chain = PreprocessorChain::new();
    assert!(matches!(
        PagedRetriever::new(&source, &chain, 0),
        Err(RetrieveError::ZeroPageSize)
    ));
}

#[test]
fn reapplying_chain_to_its_output_is_identity() {
    let source = MemorySource::new(vulnerabilities(40, "shop"));
    for id in (2..=40).step_by(3) {
        source.set_field(&json!(id), "suppressed", json!(true));
    }
    let chain = PreprocessorChain::new().with_filter(suppressed_filter());

    let first = collect(PagedRetriever::new(&source, &chain, 7).unwrap());
    let second = chain.apply_page(first.clone()).unwrap();
    assert_eq!(ids(&second), ids(&first));
    assert_eq!(
        second.iter().map(Record::to_json).collect::<Vec<_>>(),
        first.iter().map(Record::to_json).collect::<Vec<_>>()
    );
}

#[test]
fn on_demand_fields_are_fetched_only_when_read() {
    let mut source = MemorySource::new(vulnerabilities(20, "shop"));
    for id in 1..=20 {
        let brief = if id % 2 == 0 { "skip me" } else { "keep me" };
        source = source.with_resource(format!("/vulns/{id}"), json!({ "brief": brief }));
    }
    for id in 1..=10 {
        source.set_field(&json!(id), "suppressed", json!(true));
    }
    let source = Arc::new(source);
    let fetcher: Arc<dyn ResourceFetcher> = source.clone();

    let enricher = OnDemandEnricher::new("details", expr("/vulns/${id}"), fetcher)
        .with_select(FieldPath::field("brief"))
        .cacheable(true);

    // Suppressed records are dropped before anything reads `details`
    let chain = PreprocessorChain::new()
        .with_filter(suppressed_filter())
        .with_enricher(enricher.clone())
        .with_filter(ConditionFilter::new(
            "skip",
            Condition::matches(expr("${details}"), "^skip").unwrap(),
            MatchMode::Exclude,
        ));
    let records = collect(PagedRetriever::new(source.as_ref(), &chain, 8).unwrap());
    assert_eq!(records.len(), 5);
    assert_eq!(source.resource_fetches(), 10);

    // Nothing reads the field: nothing is fetched
    let lazy = PreprocessorChain::new().with_enricher(enricher);
    let records = collect(PagedRetriever::new(source.as_ref(), &lazy, 8).unwrap());
    assert_eq!(records.len(), 20);
    assert_eq!(source.resource_fetches(), 10);
}

proptest! {
    #[test]
    fn pagination_yields_every_record(total in 0usize..300, page_size in 1usize..60) {
        let source = MemorySource::new(vulnerabilities(total as u64, "shop"));
        let chain = PreprocessorChain::new();
        let records = collect(PagedRetriever::new(&source, &chain, page_size).unwrap());

        prop_assert_eq!(records.len(), total);
        prop_assert_eq!(source.page_fetches(), total.div_ceil(page_size).max(1));
    }

    #[test]
    fn without_totals_the_short_page_ends_retrieval(total in 0usize..300, page_size in 1usize..60) {
        let source = MemorySource::new(vulnerabilities(total as u64, "shop")).without_total();
        let chain = PreprocessorChain::new();
        let records = collect(PagedRetriever::new(&source, &chain, page_size).unwrap());

        prop_assert_eq!(records.len(), total);
        prop_assert_eq!(source.page_fetches(), total / page_size + 1);
    }
}
