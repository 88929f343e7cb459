//! # Options Command Module / 选项命令模块
//!
//! Help mode: every module is launched with `--help`, answers with its
//! supported command-line options over the session channel, and the
//! collected lists are rendered as platform/extension sections plus a
//! per-module report of options not supported everywhere.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::{
    cli::commands::run::{RunArgs, drive_queue, load_plan, resolve_settings},
    core::{protocol::CommandLineOptionsMessage, session::SessionOptions, tracker::SessionMode},
    infra::t,
    reporting::{ReporterOptions, TestReporter, terminal::select_backend},
};

pub async fn execute(manifest: PathBuf, config: Option<PathBuf>) -> Result<i32> {
    let args = RunArgs {
        manifest,
        config,
        no_progress: true,
        ..Default::default()
    };
    let settings = resolve_settings(&args)?;
    let plan = load_plan(&args.manifest)?;

    let reporter = Arc::new(TestReporter::new(
        select_backend(false, true),
        ReporterOptions {
            is_help: true,
            show_progress: false,
            ..Default::default()
        },
    ));
    reporter.execution_started();

    let (aggregate, collected) = drive_queue(
        plan.groups,
        settings.parallelism,
        SessionOptions {
            mode: SessionMode::Help,
            ..Default::default()
        },
        Arc::clone(&reporter),
        CancellationToken::new(),
    )
    .await;

    render_option_sections(&reporter, &collected);
    reporter.run_completed(aggregate);
    Ok(aggregate)
}

/// Renders the collected per-module option lists: first the options every
/// module shares, split into platform (built-in) and extension sections,
/// then one paragraph per module that lacks options its siblings have.
fn render_option_sections(reporter: &TestReporter, collected: &[CommandLineOptionsMessage]) {
    // name -> (description, is_builtin), deduplicated across modules.
    let mut by_name: BTreeMap<&str, (&str, bool)> = BTreeMap::new();
    for message in collected {
        for option in &message.options {
            if option.is_hidden {
                continue;
            }
            by_name
                .entry(option.name.as_str())
                .or_insert((option.description.as_str(), option.is_builtin));
        }
    }

    let builtin: Vec<_> = by_name.iter().filter(|(_, (_, b))| *b).collect();
    if !builtin.is_empty() {
        reporter.write_message(&t!("options.platform_banner"));
        for (name, (description, _)) in &builtin {
            reporter.write_message(&format!("  --{name}\t{description}"));
        }
        reporter.write_message("");
    }

    let extension: Vec<_> = by_name.iter().filter(|(_, (_, b))| !*b).collect();
    if !extension.is_empty() {
        reporter.write_message(&t!("options.extension_banner"));
        for (name, (description, _)) in &extension {
            reporter.write_message(&format!("  --{name}\t{description}"));
        }
        reporter.write_message("");
    }

    for message in collected {
        let missing: Vec<&str> = by_name
            .keys()
            .copied()
            .filter(|name| {
                !message
                    .options
                    .iter()
                    .any(|option| option.name == *name && !option.is_hidden)
            })
            .collect();
        if missing.is_empty() {
            continue;
        }
        reporter.write_message(&t!("options.module_missing", name = message.module_path));
        for name in missing {
            reporter.write_message(&format!("  --{name}"));
        }
        reporter.write_message("");
    }
}
