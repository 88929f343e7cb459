//! # Run Command Module / 运行命令模块
//!
//! The `run` and `discover` commands: load configuration and manifest,
//! stand up the reporter and the worker pool, drive every module group to
//! completion and fold the results into the process exit code.
//!
//! 此模块实现 `run` 与 `discover` 命令：加载配置和清单、
//! 建立报告器与工作池、驱动每个模块组执行完毕，
//! 并将结果折叠为进程退出码。

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::{
    core::{
        config::{CliOverrides, DEFAULT_CONFIG_FILE, RunSettings, RunnerConfig},
        models::{RunManifest, exit_code},
        planner,
        protocol::CommandLineOptionsMessage,
        queue::ActionQueue,
        session::{ModuleSession, SessionOptions},
        tracker::SessionMode,
    },
    infra::{fs, t},
    reporting::{ReporterOptions, TestReporter, terminal::select_backend},
};

/// Everything the CLI layer hands over for a run- or discovery-mode
/// invocation.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    pub manifest: PathBuf,
    pub config: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub results_directory: Option<PathBuf>,
    pub diagnostics_directory: Option<PathBuf>,
    pub no_progress: bool,
    pub force_ansi: bool,
    pub minimum_expected_tests: Option<usize>,
    pub show_passed: bool,
    pub pass_through: Vec<String>,
}

/// Executes the run/discover command and returns the process exit code.
///
/// # Arguments
/// * `mode` - Run or discovery; help mode goes through the options command
/// * `args` - Parsed command-line arguments
pub async fn execute(mode: SessionMode, args: RunArgs) -> Result<i32> {
    let settings = resolve_settings(&args)?;
    let plan = load_plan(&args.manifest)?;

    let reporter = Arc::new(TestReporter::new(
        select_backend(settings.force_ansi, settings.no_progress),
        ReporterOptions {
            is_discovery: mode == SessionMode::Discovery,
            is_help: mode == SessionMode::Help,
            show_passed_tests: args.show_passed,
            show_progress: !settings.no_progress,
            minimum_expected_tests: settings.minimum_expected_tests,
        },
    ));

    if plan.groups.is_empty() {
        reporter.write_message(&t!("run.zero_tests_ran"));
        return Ok(exit_code::ZERO_TESTS);
    }
    reporter.write_message(&t!(
        "run.starting",
        modules = plan.module_count,
        jobs = settings.parallelism
    ));
    if plan.multi_target_group_count > 0 {
        reporter.write_message(&t!(
            "run.multi_target_groups",
            count = plan.multi_target_group_count
        ));
    }

    let session_options = SessionOptions {
        mode,
        results_directory: prepared_dir(settings.results_directory.as_deref())?,
        diagnostics_directory: prepared_dir(settings.diagnostics_directory.as_deref())?,
        pass_through: settings.pass_through.clone(),
    };

    tracing::info!(
        "test run started at {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S%z")
    );
    reporter.execution_started();
    let cancel = setup_signal_handler(Arc::clone(&reporter));

    let (aggregate, _) = drive_queue(
        plan.groups,
        settings.parallelism,
        session_options,
        Arc::clone(&reporter),
        cancel,
    )
    .await;

    let final_code = finalize_exit_code(mode, aggregate, &settings, &reporter);
    reporter.run_completed(final_code);
    Ok(final_code)
}

/// Applies run-level policies on top of the queue aggregate: zero tests are
/// never a success, the minimum-expected-tests floor holds, and an aborted
/// run cannot end green.
fn finalize_exit_code(
    mode: SessionMode,
    aggregate: i32,
    settings: &RunSettings,
    reporter: &TestReporter,
) -> i32 {
    let mut code = aggregate;
    if mode == SessionMode::Run && code == exit_code::SUCCESS {
        if reporter.total_tests() == 0 {
            code = exit_code::ZERO_TESTS;
        } else if (reporter.total_tests() as usize) < settings.minimum_expected_tests {
            code = exit_code::GENERIC_FAILURE;
        }
    }
    if reporter.was_cancelled() && code == exit_code::SUCCESS {
        code = exit_code::GENERIC_FAILURE;
    }
    code
}

/// Loads the configuration file and resolves it against CLI flags.
pub(crate) fn resolve_settings(args: &RunArgs) -> Result<RunSettings> {
    let (config_path, explicit) = match &args.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    let config = RunnerConfig::load(&config_path, explicit)?;
    if let Some(language) = &config.language {
        rust_i18n::set_locale(language);
    }

    Ok(RunSettings::resolve(
        &config,
        CliOverrides {
            parallelism: args.jobs,
            results_directory: args.results_directory.clone(),
            diagnostics_directory: args.diagnostics_directory.clone(),
            no_progress: args.no_progress,
            force_ansi: args.force_ansi,
            minimum_expected_tests: args.minimum_expected_tests,
            pass_through: args.pass_through.clone(),
        },
    ))
}

/// Reads the manifest document and turns it into an execution plan.
pub(crate) fn load_plan(manifest_path: &Path) -> Result<planner::ExecutionPlan> {
    let manifest_text = fs::read_text_file(manifest_path)?;
    let manifest = RunManifest::from_json(&manifest_text)
        .with_context(|| format!("Failed to parse manifest: {}", manifest_path.display()))?;
    planner::plan_execution(manifest)
}

fn prepared_dir(path: Option<&Path>) -> Result<Option<PathBuf>> {
    path.map(fs::prepare_directory).transpose()
}

/// Sets up a Ctrl-C handler. Cancellation stops the progress view and
/// suppresses new group launches; already-running modules finish naturally
/// and are never killed.
fn setup_signal_handler(reporter: Arc<TestReporter>) -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            reporter.start_cancelling();
            token_clone.cancel();
        }
    });

    token
}

/// Enqueues every group, closes the queue and drains all consumers. Always
/// waits for the full drain; a partial drain would leave orphaned child
/// processes behind.
pub(crate) async fn drive_queue(
    groups: Vec<crate::core::models::TestModuleGroup>,
    parallelism: usize,
    session_options: SessionOptions,
    reporter: Arc<TestReporter>,
    cancel: CancellationToken,
) -> (i32, Vec<CommandLineOptionsMessage>) {
    let help_options = Arc::new(Mutex::new(Vec::new()));
    let help_sink = Arc::clone(&help_options);

    let queue = ActionQueue::new(parallelism, cancel, move |module| {
        let reporter = Arc::clone(&reporter);
        let options = session_options.clone();
        let help_sink = Arc::clone(&help_sink);
        async move {
            let outcome = ModuleSession::new(module, options, reporter).run().await;
            if let Some(options) = outcome.help_options {
                help_sink.lock().unwrap().push(options);
            }
            outcome.exit_code
        }
    });

    for group in groups {
        queue.enqueue(group);
    }
    queue.close();
    let aggregate = queue.join().await;

    let collected = std::mem::take(&mut *help_options.lock().unwrap());
    (aggregate, collected)
}
