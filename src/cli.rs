// src/cli.rs
use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use std::{env, path::PathBuf};

use crate::core::tracker::SessionMode;
use crate::infra::t;

pub mod commands;

/// Pre-parses the command line arguments to find the language setting.
/// This allows i18n to be initialized before the full CLI is built.
/// It looks for a `--lang <VALUE>` argument.
fn pre_parse_language() -> String {
    let args: Vec<String> = env::args().collect();
    if let Some(pos) = args.iter().position(|arg| arg == "--lang") {
        if let Some(lang) = args.get(pos + 1) {
            return lang.clone();
        }
    }
    // Fallback to system language detection
    sys_locale::get_locale().unwrap_or_else(|| "en".to_string())
}

fn manifest_arg(locale: &str) -> Arg {
    Arg::new("manifest")
        .short('m')
        .long("manifest")
        .help(t!("cli.arg_manifest", locale = locale).to_string())
        .value_name("MANIFEST")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

fn config_arg(locale: &str) -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .help(t!("cli.arg_config", locale = locale).to_string())
        .value_name("CONFIG")
        .value_parser(clap::value_parser!(PathBuf))
        .action(ArgAction::Set)
}

fn jobs_arg(locale: &str) -> Arg {
    Arg::new("jobs")
        .short('j')
        .long("jobs")
        .help(t!("cli.arg_jobs", locale = locale).to_string())
        .value_name("JOBS")
        .value_parser(clap::value_parser!(usize))
        .action(ArgAction::Set)
}

fn progress_args(locale: &str) -> [Arg; 2] {
    [
        Arg::new("no-progress")
            .long("no-progress")
            .help(t!("cli.arg_no_progress", locale = locale).to_string())
            .action(ArgAction::SetTrue),
        Arg::new("force-ansi")
            .long("force-ansi")
            .help(t!("cli.arg_force_ansi", locale = locale).to_string())
            .conflicts_with("no-progress")
            .action(ArgAction::SetTrue),
    ]
}

fn build_cli(locale: &str) -> Command {
    Command::new("module-runner")
        .author(env!("CARGO_PKG_AUTHORS"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(t!("cli.about", locale = locale).to_string())
        .arg(
            Arg::new("lang")
                .long("lang")
                .help(t!("cli.arg_lang", locale = locale).to_string())
                .value_name("LANGUAGE")
                .global(true)
                .action(ArgAction::Set),
        )
        .subcommand(
            Command::new("run")
                .about(t!("cli.cmd_run", locale = locale).to_string())
                .arg(manifest_arg(locale))
                .arg(config_arg(locale))
                .arg(jobs_arg(locale))
                .args(progress_args(locale))
                .arg(
                    Arg::new("results-directory")
                        .long("results-directory")
                        .help(t!("cli.arg_results_directory", locale = locale).to_string())
                        .value_name("DIR")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("diagnostics-directory")
                        .long("diagnostics-directory")
                        .help(t!("cli.arg_diagnostics_directory", locale = locale).to_string())
                        .value_name("DIR")
                        .value_parser(clap::value_parser!(PathBuf))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("minimum-expected-tests")
                        .long("minimum-expected-tests")
                        .help(t!("cli.arg_minimum_expected_tests", locale = locale).to_string())
                        .value_name("COUNT")
                        .value_parser(clap::value_parser!(usize))
                        .action(ArgAction::Set),
                )
                .arg(
                    Arg::new("show-passed")
                        .long("show-passed")
                        .help(t!("cli.arg_show_passed", locale = locale).to_string())
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("passthrough")
                        .help(t!("cli.arg_passthrough", locale = locale).to_string())
                        .value_name("MODULE_ARGS")
                        .num_args(0..)
                        .last(true),
                ),
        )
        .subcommand(
            Command::new("discover")
                .about(t!("cli.cmd_discover", locale = locale).to_string())
                .arg(manifest_arg(locale))
                .arg(config_arg(locale))
                .arg(jobs_arg(locale))
                .args(progress_args(locale)),
        )
        .subcommand(
            Command::new("options")
                .about(t!("cli.cmd_options", locale = locale).to_string())
                .arg(manifest_arg(locale))
                .arg(config_arg(locale)),
        )
}

pub async fn run() -> Result<i32> {
    // Pre-parse language and initialize i18n first.
    let language = pre_parse_language();
    rust_i18n::set_locale(&language);

    let matches = build_cli(&language).get_matches();

    match matches.subcommand() {
        Some(("run", run_matches)) => {
            let args = commands::run::RunArgs {
                manifest: run_matches.get_one::<PathBuf>("manifest").unwrap().clone(),
                config: run_matches.get_one::<PathBuf>("config").cloned(),
                jobs: run_matches.get_one::<usize>("jobs").copied(),
                results_directory: run_matches
                    .get_one::<PathBuf>("results-directory")
                    .cloned(),
                diagnostics_directory: run_matches
                    .get_one::<PathBuf>("diagnostics-directory")
                    .cloned(),
                no_progress: run_matches.get_flag("no-progress"),
                force_ansi: run_matches.get_flag("force-ansi"),
                minimum_expected_tests: run_matches
                    .get_one::<usize>("minimum-expected-tests")
                    .copied(),
                show_passed: run_matches.get_flag("show-passed"),
                pass_through: run_matches
                    .get_many::<String>("passthrough")
                    .map(|values| values.cloned().collect())
                    .unwrap_or_default(),
            };
            commands::run::execute(SessionMode::Run, args).await
        }
        Some(("discover", discover_matches)) => {
            let args = commands::run::RunArgs {
                manifest: discover_matches.get_one::<PathBuf>("manifest").unwrap().clone(),
                config: discover_matches.get_one::<PathBuf>("config").cloned(),
                jobs: discover_matches.get_one::<usize>("jobs").copied(),
                no_progress: discover_matches.get_flag("no-progress"),
                force_ansi: discover_matches.get_flag("force-ansi"),
                ..Default::default()
            };
            commands::run::execute(SessionMode::Discovery, args).await
        }
        Some(("options", options_matches)) => {
            commands::options::execute(
                options_matches.get_one::<PathBuf>("manifest").unwrap().clone(),
                options_matches.get_one::<PathBuf>("config").cloned(),
            )
            .await
        }
        _ => {
            // No subcommand given; clap already printed the help text.
            Ok(0)
        }
    }
}
