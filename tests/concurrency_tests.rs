//! # Concurrency Tests using Loom
//!
//! This module uses loom to exhaustively explore the orderings of the
//! exit-code aggregation mutex, the one piece of shared mutable state
//! every consumer loop writes to.

#[cfg(test)]
mod tests {
    use loom::sync::Arc;
    use loom::thread;
    use module_runner::core::models::exit_code;
    use module_runner::core::queue::ExitCodeAggregator;

    /// Two failing reporters and one succeeding reporter race. Whatever
    /// order loom explores, the aggregate must land in the failure class:
    /// success never overwrites a failure, and differing failures collapse
    /// to the generic code.
    #[test]
    fn aggregate_failure_class_is_order_independent() {
        // We spawn a new thread with a larger stack size to prevent a
        // stack overflow during loom's exploration of the model.
        const STACK_SIZE: usize = 8 * 1024 * 1024; // 8 MB

        let builder = std::thread::Builder::new()
            .name("loom-test-thread".into())
            .stack_size(STACK_SIZE);

        let handle = builder
            .spawn(|| {
                loom::model(|| {
                    let aggregate = Arc::new(ExitCodeAggregator::new());
                    let codes = [exit_code::SUCCESS, 3, 5];

                    let mut handles = vec![];
                    for code in codes {
                        let aggregate = aggregate.clone();
                        handles.push(thread::spawn(move || {
                            aggregate.report(code);
                        }));
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }

                    let final_code = aggregate.final_code();
                    // The surviving code depends on arrival order, but the
                    // class never does.
                    assert_ne!(final_code, exit_code::SUCCESS);
                    assert_ne!(final_code, exit_code::ZERO_TESTS);
                    assert!(
                        final_code == 3
                            || final_code == 5
                            || final_code == exit_code::GENERIC_FAILURE,
                        "unexpected aggregate {final_code}"
                    );
                });
            })
            .unwrap();

        handle.join().unwrap();
    }

    /// All-success runs aggregate to success under every interleaving.
    #[test]
    fn all_success_reports_stay_success() {
        loom::model(|| {
            let aggregate = Arc::new(ExitCodeAggregator::new());

            let mut handles = vec![];
            for _ in 0..2 {
                let aggregate = aggregate.clone();
                handles.push(thread::spawn(move || {
                    aggregate.report(exit_code::SUCCESS);
                }));
            }
            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(aggregate.final_code(), exit_code::SUCCESS);
        });
    }
}
