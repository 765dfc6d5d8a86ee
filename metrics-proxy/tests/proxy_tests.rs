//! Bulk deletion and registration behaviour of the metric proxies.

use dm_metrics_proxy::{ProxyError, new_counter_vec, new_histogram_vec, new_int_gauge_vec};
use pretty_assertions::assert_eq;
use prometheus::core::Collector;
use prometheus::{HistogramOpts, Opts};
use std::collections::HashMap;

fn query<'a>(pairs: &[(&'a str, &'a str)]) -> HashMap<&'a str, &'a str> {
    pairs.iter().copied().collect()
}

fn series_count<C: Collector>(collector: &C) -> usize {
    collector
        .collect()
        .iter()
        .map(|family| family.get_metric().len())
        .sum()
}

#[test]
fn registers_each_label_set_once() {
    let proxy = new_counter_vec(Opts::new("events_total", "events"), &["task", "worker"])
        .expect("build counter vec");

    proxy.with_label_values(&["t1", "w1"]).expect("series").inc();
    proxy.with_label_values(&["t1", "w1"]).expect("series").inc();
    proxy.with_label_values(&["t1", "w2"]).expect("series").inc();

    assert_eq!(proxy.len(), 2);
    assert_eq!(series_count(&proxy), 2);
}

#[test]
fn deletes_all_series_matching_partial_labels() {
    let proxy = new_histogram_vec(
        HistogramOpts::new("query_duration_seconds", "query latency"),
        &["task", "worker"],
    )
    .expect("build histogram vec");

    proxy.with_label_values(&["t1", "w1"]).expect("series").observe(0.1);
    proxy.with_label_values(&["t1", "w2"]).expect("series").observe(0.2);
    proxy.with_label_values(&["t2", "w1"]).expect("series").observe(0.3);

    assert!(proxy.delete_all_about_labels(&query(&[("task", "t1")])));

    assert_eq!(series_count(&proxy), 1);
    let remaining = proxy.labels();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("task").map(String::as_str), Some("t2"));
}

#[test]
fn deletion_is_a_conjunction_of_pairs() {
    let proxy = new_counter_vec(Opts::new("errors_total", "errors"), &["task", "worker"])
        .expect("build counter vec");

    proxy.with_label_values(&["t1", "w1"]).expect("series").inc();
    proxy.with_label_values(&["t1", "w2"]).expect("series").inc();

    assert!(proxy.delete_all_about_labels(&query(&[("task", "t1"), ("worker", "w2")])));

    assert_eq!(series_count(&proxy), 1);
    assert_eq!(proxy.len(), 1);
}

#[test]
fn unmatched_query_deletes_nothing_and_succeeds() {
    let proxy = new_counter_vec(Opts::new("rows_total", "rows"), &["task"])
        .expect("build counter vec");
    proxy.with_label_values(&["t1"]).expect("series").inc();

    assert!(proxy.delete_all_about_labels(&query(&[("task", "nope")])));
    assert!(proxy.delete_all_about_labels(&query(&[("unknown", "t1")])));

    assert_eq!(series_count(&proxy), 1);
}

#[test]
fn reports_failure_when_series_already_gone() {
    let proxy = new_counter_vec(Opts::new("drops_total", "drops"), &["task"])
        .expect("build counter vec");
    proxy.with_label_values(&["t1"]).expect("series").inc();

    // Remove behind the proxy's back; the index still remembers it.
    let full: HashMap<&str, &str> = query(&[("task", "t1")]);
    proxy.inner().remove(&full).expect("direct remove");

    assert!(!proxy.delete_all_about_labels(&query(&[("task", "t1")])));
    assert!(proxy.is_empty());
}

#[test]
fn series_can_be_recreated_after_deletion() {
    let proxy = new_int_gauge_vec(Opts::new("workers", "workers"), &["task"])
        .expect("build gauge vec");
    proxy.with_label_values(&["t1"]).expect("series").set(3);
    assert!(proxy.delete_all_about_labels(&query(&[("task", "t1")])));

    proxy.with_label_values(&["t1"]).expect("series").set(1);

    assert_eq!(proxy.len(), 1);
    assert_eq!(series_count(&proxy), 1);
}

#[test]
fn map_lookup_requires_every_label() {
    let proxy = new_counter_vec(Opts::new("map_total", "map"), &["task", "worker"])
        .expect("build counter vec");

    let err = proxy
        .with(&query(&[("task", "t1"), ("other", "x")]))
        .expect_err("missing worker label");
    assert!(matches!(err, ProxyError::UnknownLabel(name) if name == "worker"));

    proxy
        .with(&query(&[("task", "t1"), ("worker", "w1")]))
        .expect("series")
        .inc();
    assert_eq!(proxy.len(), 1);
}

#[test]
fn wrong_value_count_is_rejected() {
    let proxy = new_counter_vec(Opts::new("count_total", "count"), &["task", "worker"])
        .expect("build counter vec");

    let err = proxy.with_label_values(&["t1"]).expect_err("too few values");
    assert!(matches!(
        err,
        ProxyError::LabelCount {
            expected: 2,
            got: 1
        }
    ));
    assert!(proxy.is_empty());
}
