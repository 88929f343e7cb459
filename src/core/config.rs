//! # Runner Configuration Module / 运行器配置模块
//!
//! The optional `ModuleRunner.toml` configuration file and the resolved
//! settings of one run. Command-line flags always win over file values,
//! which win over built-in defaults.
//!
//! 可选的 `ModuleRunner.toml` 配置文件以及一次运行的最终设置。
//! 命令行标志始终优先于文件值，文件值优先于内置默认值。

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "ModuleRunner.toml";

/// Values the configuration file may provide. Everything is optional; the
/// file itself is optional too.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RunnerConfig {
    /// Degree of parallelism of the worker pool.
    pub parallelism: Option<usize>,
    /// Directory test results are written into by the modules.
    pub results_directory: Option<PathBuf>,
    /// Directory modules write diagnostic output into.
    pub diagnostics_directory: Option<PathBuf>,
    /// Disable the live progress view entirely.
    pub no_progress: Option<bool>,
    /// Force the ANSI back-end even when the terminal probe says no.
    pub force_ansi: Option<bool>,
    /// Fail the run when fewer tests than this ran in total.
    pub minimum_expected_tests: Option<usize>,
    /// UI language, e.g. "en" or "zh-CN".
    pub language: Option<String>,
}

impl RunnerConfig {
    /// Loads the configuration file. A missing file at the *default*
    /// location is not an error; a missing explicitly-given path is.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        if !path.exists() {
            if explicit {
                anyhow::bail!("configuration file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration: {}", path.display()))
    }
}

/// The settings one run actually uses, after precedence resolution.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub parallelism: usize,
    pub results_directory: Option<PathBuf>,
    pub diagnostics_directory: Option<PathBuf>,
    pub no_progress: bool,
    pub force_ansi: bool,
    pub minimum_expected_tests: usize,
    /// Tokens after `--` handed to every module verbatim.
    pub pass_through: Vec<String>,
}

/// Command-line overrides, `None` meaning "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub parallelism: Option<usize>,
    pub results_directory: Option<PathBuf>,
    pub diagnostics_directory: Option<PathBuf>,
    pub no_progress: bool,
    pub force_ansi: bool,
    pub minimum_expected_tests: Option<usize>,
    pub pass_through: Vec<String>,
}

impl RunSettings {
    /// CLI flags beat file values beat defaults. The parallelism default is
    /// the machine's logical CPU count, matching how many runner processes
    /// can make progress at once.
    pub fn resolve(config: &RunnerConfig, cli: CliOverrides) -> Self {
        Self {
            parallelism: cli
                .parallelism
                .or(config.parallelism)
                .unwrap_or_else(num_cpus::get)
                .max(1),
            results_directory: cli.results_directory.or_else(|| config.results_directory.clone()),
            diagnostics_directory: cli
                .diagnostics_directory
                .or_else(|| config.diagnostics_directory.clone()),
            no_progress: cli.no_progress || config.no_progress.unwrap_or(false),
            force_ansi: cli.force_ansi || config.force_ansi.unwrap_or(false),
            minimum_expected_tests: cli
                .minimum_expected_tests
                .or(config.minimum_expected_tests)
                .unwrap_or(0),
            pass_through: cli.pass_through,
        }
    }
}
