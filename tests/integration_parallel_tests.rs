//! # Parallel Execution Integration Tests / 并行执行集成测试
//!
//! Wall-clock ordering properties of the action queue: modules of one
//! group never overlap in time, modules of different groups may, and the
//! aggregate exit code is independent of arrival order.

use module_runner::core::models::{TestModule, TestModuleGroup, exit_code};
use module_runner::core::queue::ActionQueue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn module(name: &str) -> TestModule {
    TestModule {
        run_command: name.to_string(),
        run_arguments: Vec::new(),
        working_directory: None,
        environment: BTreeMap::new(),
        target_framework: None,
        architecture: None,
        target_path: None,
        project_path: None,
        supports_session_protocol: true,
    }
}

fn group(names: &[&str]) -> TestModuleGroup {
    TestModuleGroup::new(names.iter().map(|name| module(name)).collect())
}

type Spans = Arc<Mutex<Vec<(String, Instant, Instant)>>>;

fn recording_queue(parallelism: usize, spans: Spans) -> ActionQueue {
    ActionQueue::new(parallelism, CancellationToken::new(), move |module| {
        let spans = Arc::clone(&spans);
        async move {
            let started = Instant::now();
            tokio::time::sleep(Duration::from_millis(40)).await;
            spans
                .lock()
                .unwrap()
                .push((module.run_command.clone(), started, Instant::now()));
            exit_code::SUCCESS
        }
    })
}

fn span_of(spans: &[(String, Instant, Instant)], name: &str) -> (Instant, Instant) {
    spans
        .iter()
        .find(|(n, _, _)| n == name)
        .map(|(_, start, end)| (*start, *end))
        .unwrap_or_else(|| panic!("no span recorded for {name}"))
}

fn overlaps(a: (Instant, Instant), b: (Instant, Instant)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[tokio::test]
async fn modules_of_one_group_never_overlap_in_wall_clock_time() {
    let spans: Spans = Arc::default();
    let queue = recording_queue(4, Arc::clone(&spans));

    queue.enqueue(group(&["multi-a", "multi-b", "multi-c"]));
    queue.enqueue(group(&["other-1"]));
    queue.enqueue(group(&["other-2"]));
    queue.close();
    queue.join().await;

    let spans = spans.lock().unwrap();
    let a = span_of(&spans, "multi-a");
    let b = span_of(&spans, "multi-b");
    let c = span_of(&spans, "multi-c");
    assert!(!overlaps(a, b), "multi-a and multi-b overlapped");
    assert!(!overlaps(b, c), "multi-b and multi-c overlapped");
    assert!(!overlaps(a, c), "multi-a and multi-c overlapped");
}

#[tokio::test]
async fn modules_of_different_groups_do_overlap() {
    let spans: Spans = Arc::default();
    let queue = recording_queue(4, Arc::clone(&spans));

    for index in 0..4 {
        queue.enqueue(group(&[&format!("solo-{index}")]));
    }
    queue.close();
    queue.join().await;

    let spans = spans.lock().unwrap();
    let any_overlap = (0..4).any(|i| {
        (i + 1..4).any(|j| {
            overlaps(
                span_of(&spans, &format!("solo-{i}")),
                span_of(&spans, &format!("solo-{j}")),
            )
        })
    });
    assert!(any_overlap, "four single-module groups on four consumers should overlap");
}

/// The aggregate class is stable no matter which consumer finishes first:
/// run the same mixed workload many times and the aggregate never leaves
/// the failure class.
#[tokio::test]
async fn aggregate_class_is_stable_under_scheduling_noise() {
    for _ in 0..10 {
        let queue = ActionQueue::new(4, CancellationToken::new(), |module| async move {
            // Jitter the completion order.
            let delay = (module.run_command.len() % 3) as u64 * 7;
            tokio::time::sleep(Duration::from_millis(delay)).await;
            match module.run_command.as_str() {
                "fail-3" => 3,
                "fail-5" => 5,
                _ => exit_code::SUCCESS,
            }
        });

        queue.enqueue(group(&["ok"]));
        queue.enqueue(group(&["fail-3"]));
        queue.enqueue(group(&["fail-5"]));
        queue.enqueue(group(&["fine"]));
        queue.close();

        let aggregate = queue.join().await;
        assert_ne!(aggregate, exit_code::SUCCESS);
        assert_ne!(aggregate, exit_code::ZERO_TESTS);
    }
}

#[tokio::test]
async fn empty_queue_drains_to_the_zero_tests_code() {
    let queue = ActionQueue::new(2, CancellationToken::new(), |_module| async {
        exit_code::SUCCESS
    });
    queue.close();
    assert_eq!(queue.join().await, exit_code::ZERO_TESTS);
}
