//! # Action Queue Module / 动作队列模块
//!
//! The bounded-concurrency worker pool: exactly N long-lived consumer
//! loops over one shared, unbounded queue of module groups. Modules inside
//! a group run strictly in order; groups run concurrently with each other.
//! Exit codes are folded into a single aggregate under a dedicated mutex.
//!
//! 有界并发的工作池：恰好 N 个长生命周期的消费循环，
//! 读取一个共享无界的模块组队列。组内模块严格按顺序运行；
//! 组之间彼此并发。退出码在专用互斥锁下折叠为单一聚合值。

use crate::core::models::{TestModuleGroup, exit_code};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The one overall result of a run, folded from per-module exit codes in
/// whatever order they arrive.
///
/// The policy is order-tolerant for the success/failure *class*: success
/// never overwrites a failure, and any two different failure codes collapse
/// to the generic one. Which specific failure code survives before the
/// collapse does depend on arrival order; that is accepted behavior.
pub struct ExitCodeAggregator {
    slot: Mutex<Option<i32>>,
}

impl ExitCodeAggregator {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Folds one module result into the aggregate.
    pub fn report(&self, code: i32) {
        let mut slot = self.slot.lock().unwrap();
        match *slot {
            None => *slot = Some(code),
            Some(current) if current == code => {}
            Some(exit_code::SUCCESS) => *slot = Some(code),
            Some(_) if code == exit_code::SUCCESS => {}
            Some(_) => *slot = Some(exit_code::GENERIC_FAILURE),
        }
    }

    /// The final aggregate. A run where no module ever reported a result
    /// gets the distinct zero-tests code, never plain success.
    pub fn final_code(&self) -> i32 {
        self.slot.lock().unwrap().unwrap_or(exit_code::ZERO_TESTS)
    }
}

impl Default for ExitCodeAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// The worker pool. Construction starts the N consumer loops immediately;
/// producers enqueue whole groups, then `close` and `join`.
///
/// Callers must always drain the queue to completion even when they intend
/// to ignore the aggregate: a partial drain leaves orphaned child
/// processes behind.
pub struct ActionQueue {
    sender: Mutex<Option<mpsc::UnboundedSender<TestModuleGroup>>>,
    consumers: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    aggregate: Arc<ExitCodeAggregator>,
}

impl ActionQueue {
    /// Starts `parallelism` consumer loops running `action` for every
    /// module. The cancellation token is checked between groups only:
    /// in-flight modules always finish naturally.
    pub fn new<F, Fut>(parallelism: usize, cancel: CancellationToken, action: F) -> Self
    where
        F: Fn(crate::core::models::TestModule) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = i32> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel::<TestModuleGroup>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let aggregate = Arc::new(ExitCodeAggregator::new());

        let consumers = (0..parallelism.max(1))
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                let aggregate = Arc::clone(&aggregate);
                let action = action.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        // The receiver lock is held only while waiting for
                        // the next group, never while running one.
                        let group = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        let Some(group) = group else { break };

                        // Cancellation suppresses new group launches but
                        // still drains the queue so join() completes.
                        if cancel.is_cancelled() {
                            continue;
                        }

                        // Strictly sequential inside the group: module k+1
                        // never launches before module k finished.
                        for module in group.modules {
                            let code = action(module).await;
                            aggregate.report(code);
                        }
                    }
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(sender)),
            consumers: Mutex::new(consumers),
            aggregate,
        }
    }

    /// Enqueues one group. Returns `false` once the queue is closed.
    pub fn enqueue(&self, group: TestModuleGroup) -> bool {
        match self.sender.lock().unwrap().as_ref() {
            Some(sender) => sender.send(group).is_ok(),
            None => false,
        }
    }

    /// Closes the producer side. Consumers finish the remaining groups and
    /// then stop.
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// Drains all consumer loops to completion and returns the final
    /// aggregate. The aggregate is meaningless before full drain.
    pub async fn join(&self) -> i32 {
        let consumers = std::mem::take(&mut *self.consumers.lock().unwrap());
        for result in futures::future::join_all(consumers).await {
            if let Err(err) = result {
                tracing::error!("queue consumer loop failed: {err}");
                self.aggregate.report(exit_code::GENERIC_FAILURE);
            }
        }
        self.aggregate.final_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TestModule;
    use std::collections::BTreeMap;
    use std::time::Duration;

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

    #[test]
    fn first_result_wins_the_slot() {
        let aggregate = ExitCodeAggregator::new();
        aggregate.report(3);
        assert_eq!(aggregate.final_code(), 3);
    }

    #[test]
    fn success_never_overwrites_a_failure() {
        let aggregate = ExitCodeAggregator::new();
        aggregate.report(2);
        aggregate.report(exit_code::SUCCESS);
        assert_eq!(aggregate.final_code(), 2);
    }

    #[test]
    fn failure_replaces_success() {
        let aggregate = ExitCodeAggregator::new();
        aggregate.report(exit_code::SUCCESS);
        aggregate.report(5);
        assert_eq!(aggregate.final_code(), 5);
    }

    #[test]
    fn differing_failures_collapse_to_generic() {
        let aggregate = ExitCodeAggregator::new();
        aggregate.report(3);
        aggregate.report(5);
        assert_eq!(aggregate.final_code(), exit_code::GENERIC_FAILURE);
    }

    #[test]
    fn empty_run_reports_zero_tests_not_success() {
        let aggregate = ExitCodeAggregator::new();
        assert_eq!(aggregate.final_code(), exit_code::ZERO_TESTS);
    }

    #[test]
    fn aggregation_class_is_order_independent() {
        // Any permutation of one success and two distinct failures must
        // land in the failure class; the exact code may differ.
        let codes = [exit_code::SUCCESS, 3, 5];
        let permutations: &[[usize; 3]] = &[
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for order in permutations {
            let aggregate = ExitCodeAggregator::new();
            for index in order {
                aggregate.report(codes[*index]);
            }
            assert_ne!(aggregate.final_code(), exit_code::SUCCESS, "order {order:?}");
            assert_ne!(aggregate.final_code(), exit_code::ZERO_TESTS, "order {order:?}");
        }
    }

    #[tokio::test]
    async fn modules_inside_a_group_never_overlap() {
        let events = Arc::new(Mutex::new(Vec::<(String, &'static str)>::new()));
        let log = Arc::clone(&events);

        let queue = ActionQueue::new(4, CancellationToken::new(), move |module| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push((module.run_command.clone(), "start"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                log.lock().unwrap().push((module.run_command.clone(), "end"));
                exit_code::SUCCESS
            }
        });

        queue.enqueue(group(&["g1-a", "g1-b", "g1-c"]));
        queue.enqueue(group(&["g2-a", "g2-b"]));
        queue.close();
        assert_eq!(queue.join().await, exit_code::SUCCESS);

        let events = events.lock().unwrap();
        // Within a group, every start must directly follow the previous
        // module's end.
        let positions = |name: &str, kind: &str| {
            events
                .iter()
                .position(|(n, k)| n == name && *k == kind)
                .unwrap()
        };
        assert!(positions("g1-a", "end") < positions("g1-b", "start"));
        assert!(positions("g1-b", "end") < positions("g1-c", "start"));
        assert!(positions("g2-a", "end") < positions("g2-b", "start"));
    }

    #[tokio::test]
    async fn groups_run_concurrently_across_consumers() {
        let in_flight = Arc::new(Mutex::new(0usize));
        let peak = Arc::new(Mutex::new(0usize));
        let (in_flight_ref, peak_ref) = (Arc::clone(&in_flight), Arc::clone(&peak));

        let queue = ActionQueue::new(4, CancellationToken::new(), move |_module| {
            let in_flight = Arc::clone(&in_flight_ref);
            let peak = Arc::clone(&peak_ref);
            async move {
                {
                    let mut current = in_flight.lock().unwrap();
                    *current += 1;
                    let mut peak = peak.lock().unwrap();
                    *peak = (*peak).max(*current);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                *in_flight.lock().unwrap() -= 1;
                exit_code::SUCCESS
            }
        });

        for index in 0..4 {
            queue.enqueue(group(&[&format!("solo-{index}")]));
        }
        queue.close();
        queue.join().await;

        assert!(*peak.lock().unwrap() > 1, "groups should have overlapped");
    }

    #[tokio::test]
    async fn cancellation_skips_pending_groups_but_drains_the_queue() {
        let cancel = CancellationToken::new();
        let launched = Arc::new(Mutex::new(Vec::<String>::new()));
        let launched_ref = Arc::clone(&launched);
        let cancel_inside = cancel.clone();

        // One consumer so ordering is deterministic: the first group
        // cancels, the second must then be skipped.
        let queue = ActionQueue::new(1, cancel.clone(), move |module| {
            let launched = Arc::clone(&launched_ref);
            let cancel = cancel_inside.clone();
            async move {
                launched.lock().unwrap().push(module.run_command.clone());
                cancel.cancel();
                exit_code::SUCCESS
            }
        });

        queue.enqueue(group(&["first"]));
        queue.enqueue(group(&["second"]));
        queue.close();
        queue.join().await;

        assert_eq!(*launched.lock().unwrap(), vec!["first".to_string()]);
    }

    #[tokio::test]
    async fn enqueue_after_close_is_refused() {
        let queue = ActionQueue::new(1, CancellationToken::new(), |_module| async {
            exit_code::SUCCESS
        });
        queue.close();
        assert!(!queue.enqueue(group(&["late"])));
        queue.join().await;
    }
}
