//! # Console Reporting Module / 控制台报告模块
//!
//! The reporter facade every other component talks to. It owns the live
//! progress terminal, turns tracker events into colorful output lines and
//! renders the final run or discovery summary with internationalization
//! support.
//!
//! 此模块是其他组件都与之交互的报告器门面。
//! 它拥有实时进度终端，将跟踪器事件转换为彩色输出行，
//! 并渲染最终的运行或发现摘要，支持国际化。

use crate::core::models::{OutcomeBucket, TestOutcome, decorate_with_frameworks};
use crate::core::protocol::PROTOCOL_VERSION;
use crate::infra::process::CapturedOutput;
use crate::infra::t;
use crate::reporting::progress::{ProgressTerminal, TestProgressState, human_duration};
use crate::reporting::terminal::TerminalBackend;
use colored::*;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SINGLE_INDENT: &str = "  ";
const DOUBLE_INDENT: &str = "    ";

/// Behavior switches of the reporter, resolved once per run.
#[derive(Debug, Clone, Default)]
pub struct ReporterOptions {
    pub is_discovery: bool,
    pub is_help: bool,
    /// Show a line for every passed test, not only failures.
    pub show_passed_tests: bool,
    pub show_progress: bool,
    pub minimum_expected_tests: usize,
}

/// One artifact path a module sent during the run.
#[derive(Debug, Clone)]
pub struct RunArtifact {
    pub module: String,
    pub test_name: Option<String>,
    pub path: String,
}

#[derive(Default)]
struct ReporterState {
    counter: u64,
    slots_by_execution: HashMap<String, usize>,
    completed: Vec<TestProgressState>,
    artifacts: Vec<RunArtifact>,
    handshake_failures: u64,
    bookkeeping_failures: u64,
    was_cancelled: bool,
    is_retry: bool,
    started_at: Option<Instant>,
}

/// Terminal test reporter: tracks every module of the run and is capable of
/// writing through either terminal back-end without flicker.
pub struct TestReporter {
    progress: ProgressTerminal,
    options: ReporterOptions,
    state: Mutex<ReporterState>,
}

impl TestReporter {
    pub fn new(backend: Box<dyn TerminalBackend>, options: ReporterOptions) -> Self {
        let progress = ProgressTerminal::new(backend, options.show_progress);
        Self {
            progress,
            options,
            state: Mutex::new(ReporterState::default()),
        }
    }

    /// Marks the start of the whole run and begins the periodic redraw.
    pub fn execution_started(&self) {
        self.state.lock().unwrap().started_at = Some(Instant::now());
        self.progress.start_showing_progress();
    }

    /// A module's test host handshook: give it a slot and announce it.
    pub fn module_run_started(
        &self,
        display_name: &str,
        target_framework: &str,
        architecture: &str,
        execution_id: &str,
        instance_id: &str,
    ) {
        let try_count = {
            let mut state = self.state.lock().unwrap();
            let slot = match state.slots_by_execution.get(execution_id) {
                Some(slot) => *slot,
                None => {
                    state.counter += 1;
                    let mut progress_state =
                        TestProgressState::new(state.counter, display_name.to_string());
                    progress_state.target_framework = some_nonempty(target_framework);
                    progress_state.architecture = some_nonempty(architecture);
                    let slot = self.progress.add_worker(progress_state);
                    state.slots_by_execution.insert(execution_id.to_string(), slot);
                    slot
                }
            };
            let try_count = self
                .progress
                .update_worker(slot, |progress_state| {
                    progress_state.notify_handshake(instance_id);
                    progress_state.try_count
                })
                .unwrap_or(1);
            state.is_retry |= try_count > 1;
            try_count
        };

        let mut line = String::new();
        if try_count > 1 {
            let _ = write!(
                line,
                "{} ",
                format!("({})", t!("run.try", attempt = try_count)).dimmed()
            );
        }
        let banner = if self.options.is_discovery {
            t!("run.discovering_tests_from")
        } else {
            t!("run.running_tests_from")
        };
        let _ = writeln!(
            line,
            "{banner} {}",
            decorate_with_frameworks(
                display_name,
                some_nonempty(target_framework).as_deref(),
                some_nonempty(architecture).as_deref(),
            )
        );
        self.progress.write_to_terminal(&line);
    }

    /// A test started running inside a module; shown as a detail line.
    pub fn test_in_progress(&self, execution_id: &str, uid: &str, display_name: &str) {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let id = state.counter;
        let Some(slot) = state.slots_by_execution.get(execution_id).copied() else {
            return;
        };
        self.progress.update_worker(slot, |progress_state| {
            progress_state.add_active_test(id, uid, display_name);
        });
    }

    /// A test finished: classify it, update counters and, when it is worth
    /// a line, write it immediately with the failure details attached.
    #[allow(clippy::too_many_arguments)]
    pub fn test_completed(
        &self,
        execution_id: &str,
        uid: &str,
        display_name: &str,
        outcome: TestOutcome,
        duration: Duration,
        reason: Option<&str>,
        error_message: Option<&str>,
        error_stack_trace: Option<&str>,
        standard_output: Option<&str>,
        error_output: Option<&str>,
    ) {
        {
            let state = self.state.lock().unwrap();
            let Some(slot) = state.slots_by_execution.get(execution_id).copied() else {
                return;
            };
            self.progress.update_worker(slot, |progress_state| {
                progress_state.remove_active_test(uid);
                match outcome.bucket() {
                    OutcomeBucket::Passed => progress_state.report_passing_test(),
                    OutcomeBucket::Skipped => progress_state.report_skipped_test(),
                    OutcomeBucket::FailedOrWorse => progress_state.report_failed_test(),
                }
            });
        }

        if outcome == TestOutcome::Passed && !self.options.show_passed_tests {
            return;
        }

        let outcome_text = match outcome {
            TestOutcome::Passed => t!("outcome.passed").green(),
            TestOutcome::Skipped => t!("outcome.skipped").yellow(),
            TestOutcome::Failed | TestOutcome::Error => t!("outcome.failed").red(),
            TestOutcome::Timeout | TestOutcome::Cancelled => {
                format!("{} ({})", t!("outcome.failed"), t!("outcome.cancelled")).red()
            }
        };

        let mut block = String::new();
        let _ = writeln!(
            block,
            "{outcome_text} {display_name} {}",
            format!("({})", human_duration(duration)).dimmed()
        );
        if let Some(reason) = reason {
            if !reason.trim().is_empty() {
                let _ = writeln!(block, "{SINGLE_INDENT}{reason}");
            }
        }
        if let Some(message) = error_message {
            append_indented(&mut block, &message.red().to_string(), SINGLE_INDENT);
        }
        if let Some(stack) = error_stack_trace {
            for frame in stack.lines() {
                let _ = writeln!(block, "{DOUBLE_INDENT}{}", frame.dimmed());
            }
        }
        append_captured_output(&mut block, standard_output, error_output);
        self.progress.write_to_terminal(&block);
    }

    /// A discovered test in discovery mode.
    pub fn test_discovered(&self, execution_id: &str, display_name: &str, uid: &str) {
        let _ = uid;
        let state = self.state.lock().unwrap();
        let Some(slot) = state.slots_by_execution.get(execution_id).copied() else {
            return;
        };
        self.progress.update_worker(slot, |progress_state| {
            progress_state.discover_test(display_name);
        });
    }

    pub fn artifact_added(&self, module: &str, test_name: Option<&str>, path: &str) {
        self.state.lock().unwrap().artifacts.push(RunArtifact {
            module: module.to_string(),
            test_name: test_name.map(str::to_string),
            path: path.to_string(),
        });
    }

    /// The module process exited; retire its slot and report its verdict.
    pub fn module_run_completed(
        &self,
        execution_id: &str,
        exit_code: i32,
        output: &CapturedOutput,
    ) {
        let completed = {
            let mut state = self.state.lock().unwrap();
            let Some(slot) = state.slots_by_execution.get(execution_id).copied() else {
                return;
            };
            let Some(mut progress_state) = self.progress.remove_worker(slot) else {
                return;
            };
            let success = exit_code == 0 && progress_state.failed == 0;
            progress_state.finish(exit_code, success);
            state.completed.push(progress_state.clone());
            progress_state
        };

        if !self.options.is_help && !self.options.is_discovery {
            let mut line = String::new();
            self.append_module_summary(&mut line, &completed);
            self.progress.write_to_terminal(&line);
        }

        // Nothing more to say about a clean exit.
        if exit_code == 0 {
            return;
        }

        let mut block = String::new();
        append_executable_summary(&mut block, exit_code, output);
        self.progress.write_to_terminal(&block);
    }

    /// The process exited without ever completing a handshake: the module
    /// ran zero tests, whatever its exit code says.
    pub fn handshake_failure(
        &self,
        display_name: &str,
        target_framework: Option<&str>,
        exit_code: i32,
        output: &CapturedOutput,
    ) {
        if self.options.is_help {
            // Help sessions of older runners never handshake; stay quiet.
            return;
        }
        self.state.lock().unwrap().handshake_failures += 1;

        let mut block = String::new();
        let _ = writeln!(
            block,
            "{} {}",
            decorate_with_frameworks(display_name, target_framework, None),
            t!("run.zero_tests_ran").red()
        );
        append_executable_summary(&mut block, exit_code, output);
        self.progress.write_to_terminal(&block);
    }

    /// The module advertised only protocol versions this runner does not
    /// speak. Reported, never thrown.
    pub fn handshake_version_rejected(&self, display_name: &str, advertised: &str) {
        let mut block = String::new();
        let _ = writeln!(
            block,
            "{display_name} {}",
            t!(
                "handshake.incompatible_version",
                advertised = advertised,
                supported = PROTOCOL_VERSION
            )
            .red()
        );
        self.progress.write_to_terminal(&block);
    }

    /// Session-start/end bookkeeping did not pair up at process exit.
    pub fn session_bookkeeping_violation(&self, display_name: &str) {
        self.state.lock().unwrap().bookkeeping_failures += 1;
        let mut block = String::new();
        let _ = writeln!(block, "{}", t!("session.mismatch", name = display_name).red());
        self.progress.write_to_terminal(&block);
    }

    /// Lets the user know cancellation started; erases the progress block
    /// exactly once and keeps children untouched.
    pub fn start_cancelling(&self) {
        self.state.lock().unwrap().was_cancelled = true;
        self.progress.stop_showing_progress();
        self.progress
            .write_to_terminal(&format!("\n{}\n\n", t!("run.cancelling")));
    }

    /// Writes a plain line under the renderer mutex.
    pub fn write_message(&self, text: &str) {
        self.progress.write_to_terminal(&format!("{text}\n"));
    }

    /// Ends the run: stops the progress view and prints the summary.
    pub fn run_completed(&self, exit_code: i32) {
        self.progress.stop_showing_progress();
        if self.options.is_help {
            return;
        }
        let summary = if self.options.is_discovery {
            self.discovery_summary()
        } else {
            self.run_summary(exit_code)
        };
        self.progress.write_to_terminal(&summary);
    }

    pub fn has_handshake_failure(&self) -> bool {
        self.state.lock().unwrap().handshake_failures > 0
    }

    pub fn was_cancelled(&self) -> bool {
        self.state.lock().unwrap().was_cancelled
    }

    pub fn total_tests(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.completed.iter().map(TestProgressState::total_tests).sum()
    }

    pub fn failed_tests(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.completed.iter().map(|s| s.failed).sum()
    }

    fn append_module_summary(&self, out: &mut String, module: &TestProgressState) {
        let verdict = match module.success {
            Some(true) => t!("summary.module_passed").green(),
            _ => {
                if module.failed > 0 {
                    t!("summary.module_failed_with", count = module.failed).red()
                } else if module.total_tests() == 0 {
                    t!("run.zero_tests_ran").red()
                } else {
                    t!("summary.module_failed").red()
                }
            }
        };
        let _ = writeln!(
            out,
            "{SINGLE_INDENT}{} {verdict} {}",
            decorate_with_frameworks(
                &module.display_name,
                module.target_framework.as_deref(),
                module.architecture.as_deref(),
            ),
            format!("({})", human_duration(module.elapsed())).dimmed()
        );
    }

    fn run_summary(&self, exit_code: i32) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::new();

        if !state.artifacts.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{SINGLE_INDENT}{}", t!("summary.artifacts_banner"));
            for artifact in &state.artifacts {
                let _ = write!(out, "{DOUBLE_INDENT}- ");
                if let Some(test_name) = &artifact.test_name {
                    let _ = write!(out, "{}", t!("summary.artifact_for_test", name = test_name));
                }
                let _ = writeln!(out, "{}", artifact.path);
            }
        }
        let _ = writeln!(out);

        let total: u64 = state.completed.iter().map(TestProgressState::total_tests).sum();
        let failed: u64 = state.completed.iter().map(|s| s.failed).sum();
        let passed: u64 = state.completed.iter().map(|s| s.passed).sum();
        let skipped: u64 = state.completed.iter().map(|s| s.skipped).sum();
        let retried: u64 = state
            .completed
            .iter()
            .map(|s| s.try_count.saturating_sub(1) as u64)
            .sum();
        let error: u64 = state
            .completed
            .iter()
            .filter(|s| s.success != Some(true) && (s.total_tests() == 0 || s.failed == 0))
            .count() as u64
            + state.handshake_failures
            + state.bookkeeping_failures;

        let any_module_failed =
            state.completed.iter().any(|s| s.success != Some(true)) || state.handshake_failures > 0;
        let not_enough_tests = (total as usize) < self.options.minimum_expected_tests;
        let all_skipped = total == 0 || total == skipped;
        let run_failed = any_module_failed
            || failed > 0
            || not_enough_tests
            || all_skipped
            || state.was_cancelled
            || state.bookkeeping_failures > 0;

        let verdict = if state.was_cancelled {
            t!("summary.aborted").to_string()
        } else if not_enough_tests {
            t!(
                "summary.minimum_policy",
                total = total,
                minimum = self.options.minimum_expected_tests
            )
            .to_string()
        } else if all_skipped {
            t!("run.zero_tests_ran").to_string()
        } else if run_failed {
            t!("summary.failed_verdict").to_string()
        } else {
            t!("summary.passed_verdict").to_string()
        };
        let verdict = if run_failed {
            verdict.red()
        } else {
            verdict.green()
        };
        let _ = writeln!(out, "{} {verdict}", t!("summary.banner"));

        if state.completed.len() > 1 {
            for module in &state.completed {
                self.append_module_summary(&mut out, module);
            }
            let _ = writeln!(out);
        }

        if error > 0 {
            let _ = writeln!(
                out,
                "{SINGLE_INDENT}{}",
                t!("summary.error", count = error).red()
            );
        }
        let _ = write!(out, "{SINGLE_INDENT}{}", t!("summary.total", count = total));
        if retried > 0 {
            let _ = write!(out, "{}", t!("summary.retried", count = retried).dimmed());
        }
        let _ = writeln!(out);
        let failed_line = t!("summary.failed", count = failed);
        let _ = writeln!(
            out,
            "{SINGLE_INDENT}{}",
            if failed > 0 { failed_line.red() } else { failed_line.normal() }
        );
        let passed_line = t!("summary.succeeded", count = passed);
        let colorize_passed = passed > 0 && failed == 0 && error == 0;
        let _ = writeln!(
            out,
            "{SINGLE_INDENT}{}",
            if colorize_passed { passed_line.green() } else { passed_line.normal() }
        );
        let skipped_line = t!("summary.skipped", count = skipped);
        let colorize_skipped = skipped > 0 && skipped == total && failed == 0 && error == 0;
        let _ = writeln!(
            out,
            "{SINGLE_INDENT}{}",
            if colorize_skipped { skipped_line.yellow() } else { skipped_line.normal() }
        );
        let duration = state
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{SINGLE_INDENT}{}",
            t!("summary.duration", duration = human_duration(duration))
        );

        if exit_code != 0 {
            let _ = writeln!(out, "{}", t!("summary.exit_code", code = exit_code));
        }
        out
    }

    fn discovery_summary(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::new();
        let _ = writeln!(out);

        let mut total: u64 = 0;
        for module in &state.completed {
            total += module.discovered;
            let _ = writeln!(
                out,
                "{}",
                t!(
                    "discovery.in_module",
                    count = module.discovered,
                    name = decorate_with_frameworks(
                        &module.display_name,
                        module.target_framework.as_deref(),
                        module.architecture.as_deref(),
                    )
                )
            );
            for name in &module.discovered_names {
                let _ = writeln!(out, "{SINGLE_INDENT}{name}");
            }
            let _ = writeln!(out);
        }

        let verdict = if state.was_cancelled {
            t!("summary.aborted").red()
        } else if state.completed.len() <= 1 {
            t!("discovery.summary_single", count = total).green()
        } else {
            t!(
                "discovery.summary_multi",
                count = total,
                modules = state.completed.len()
            )
            .green()
        };
        let _ = writeln!(out, "{verdict}");
        out
    }
}

fn some_nonempty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn append_indented(out: &mut String, message: &str, indent: &str) {
    for line in message.lines() {
        let _ = writeln!(out, "{indent}{line}");
    }
}

/// The exit code / stdout / stderr block attached to failing processes.
fn append_executable_summary(out: &mut String, exit_code: i32, output: &CapturedOutput) {
    let _ = writeln!(out, "{}: {exit_code}", t!("exec.exit_code"));
    if !output.stdout.is_empty() {
        append_indented(
            out,
            &format!("{}: {}", t!("exec.stdout"), output.stdout_text()),
            SINGLE_INDENT,
        );
    }
    if !output.stderr.is_empty() {
        append_indented(
            out,
            &format!("{}: {}", t!("exec.stderr"), output.stderr_text()),
            SINGLE_INDENT,
        );
    }
}
