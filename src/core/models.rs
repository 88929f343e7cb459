//! # Data Models Module / 数据模型模块
//!
//! This module defines the core data structures used throughout the module
//! runner. It includes the test-module manifest handed over by the build
//! system, outcome classification and the exit codes of a whole run.
//!
//! 此模块定义了整个模块运行器中使用的核心数据结构。
//! 它包括构建系统移交的测试模块清单、结果分类以及整次运行的退出码。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Exit codes reported by a whole run or by a single module process.
/// 整次运行或单个模块进程报告的退出码。
pub mod exit_code {
    /// Every module reported success and at least one test ran.
    pub const SUCCESS: i32 = 0;
    /// Catch-all failure, also the collapse value when two different
    /// failure codes meet in the aggregate.
    pub const GENERIC_FAILURE: i32 = 1;
    /// No module ever reported a result. Deliberately distinct from
    /// `SUCCESS` so an empty run can never look green.
    pub const ZERO_TESTS: i32 = 8;
}

/// Identifies one runnable test module: the run command produced by the
/// build system, its arguments, environment and identity metadata.
/// Immutable once constructed.
///
/// 标识一个可运行的测试模块：由构建系统生成的运行命令、
/// 其参数、环境以及身份元数据。构造后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestModule {
    /// The executable to launch.
    pub run_command: String,
    /// Arguments that always come first on the command line, verbatim.
    /// They are already split; no further quoting is applied.
    pub run_arguments: Vec<String>,
    /// Working directory for the child process, when set.
    pub working_directory: Option<PathBuf>,
    /// Environment overrides; values may contain `${VAR}` references which
    /// are expanded at launch time.
    pub environment: BTreeMap<String, String>,
    /// Short target framework the module was built for, e.g. `net9.0`.
    pub target_framework: Option<String>,
    /// Process architecture the module was built for, e.g. `x64`.
    pub architecture: Option<String>,
    /// Path to the module binary, used for display and failure attribution.
    pub target_path: Option<PathBuf>,
    /// Path to the project the module came from, display fallback.
    pub project_path: Option<PathBuf>,
    /// Whether the module speaks the session protocol. Legacy runners are
    /// rejected before anything is launched.
    pub supports_session_protocol: bool,
}

impl TestModule {
    /// The name shown to the user when attributing progress or failures to
    /// this module: the binary path when known, otherwise the project path,
    /// otherwise the bare run command.
    pub fn display_name(&self) -> String {
        if let Some(target) = &self.target_path {
            return target.display().to_string();
        }
        if let Some(project) = &self.project_path {
            return project.display().to_string();
        }
        self.run_command.clone()
    }

    /// `module (tfm|arch)` rendering shared by progress lines and summaries.
    pub fn display_name_with_frameworks(&self) -> String {
        decorate_with_frameworks(
            &self.display_name(),
            self.target_framework.as_deref(),
            self.architecture.as_deref(),
        )
    }
}

/// Appends the `(tfm|arch)` suffix when either part is known.
/// 当已知任一部分时追加 `(tfm|arch)` 后缀。
pub fn decorate_with_frameworks(
    name: &str,
    target_framework: Option<&str>,
    architecture: Option<&str>,
) -> String {
    match (target_framework, architecture) {
        (None, None) => name.to_string(),
        (Some(tfm), None) => format!("{name} ({tfm})"),
        (None, Some(arch)) => format!("{name} ({arch})"),
        (Some(tfm), Some(arch)) => format!("{name} ({tfm}|{arch})"),
    }
}

/// An ordered sequence of modules that must run one after another, while
/// separate groups run concurrently. A single-module group is the common
/// case; multi-module groups come from projects that build several target
/// frameworks which must not run concurrently against shared outputs.
///
/// 一组必须依次运行的模块序列，不同的组并发运行。
/// 单模块组是常见情况；多模块组来自构建多个目标框架的项目，
/// 这些框架不能针对共享输出并发运行。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestModuleGroup {
    pub modules: Vec<TestModule>,
}

impl TestModuleGroup {
    pub fn new(modules: Vec<TestModule>) -> Self {
        Self { modules }
    }

    pub fn is_multi_target(&self) -> bool {
        self.modules.len() > 1
    }
}

/// Final outcome of one test unit, mapped from the state byte a module
/// reports on the wire.
/// 单个测试单元的最终结果，由模块在通道上报告的状态字节映射而来。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    Passed,
    Skipped,
    Failed,
    Error,
    Timeout,
    Cancelled,
}

/// The three buckets the summary counters are kept in. Anything worse than
/// a plain failure still counts as failed.
/// 汇总计数器的三个分类桶。比普通失败更糟的结果仍计为失败。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeBucket {
    Passed,
    Skipped,
    FailedOrWorse,
}

impl TestOutcome {
    pub fn bucket(self) -> OutcomeBucket {
        match self {
            TestOutcome::Passed => OutcomeBucket::Passed,
            TestOutcome::Skipped => OutcomeBucket::Skipped,
            TestOutcome::Failed
            | TestOutcome::Error
            | TestOutcome::Timeout
            | TestOutcome::Cancelled => OutcomeBucket::FailedOrWorse,
        }
    }

    pub fn is_failure(self) -> bool {
        self.bucket() == OutcomeBucket::FailedOrWorse
    }
}

/// One record of the manifest document the build-system collaborator hands
/// over. Field names follow the camelCase convention of that producer.
///
/// 构建系统协作方移交的清单文档中的一条记录。
/// 字段名遵循该生成方的 camelCase 约定。
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestModule {
    pub run_command: String,
    /// A single pre-escaped string; split with shell rules before launch.
    #[serde(default)]
    pub run_arguments: Option<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub target_framework: Option<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub target_path: Option<PathBuf>,
    #[serde(default)]
    pub project_path: Option<PathBuf>,
    /// `false` marks a legacy runner that does not speak the session
    /// protocol. The whole run is rejected when one of these is present.
    #[serde(default = "default_true")]
    pub session_protocol: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestGroup {
    pub modules: Vec<ManifestModule>,
}

/// Root of the manifest document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunManifest {
    pub groups: Vec<ManifestGroup>,
}

impl RunManifest {
    /// Parses the JSON document produced by the build-system step.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_buckets_cover_every_state() {
        assert_eq!(TestOutcome::Passed.bucket(), OutcomeBucket::Passed);
        assert_eq!(TestOutcome::Skipped.bucket(), OutcomeBucket::Skipped);
        for outcome in [
            TestOutcome::Failed,
            TestOutcome::Error,
            TestOutcome::Timeout,
            TestOutcome::Cancelled,
        ] {
            assert_eq!(outcome.bucket(), OutcomeBucket::FailedOrWorse);
            assert!(outcome.is_failure());
        }
    }

    #[test]
    fn display_name_prefers_target_path() {
        let module = TestModule {
            run_command: "dotnet".to_string(),
            run_arguments: vec!["exec".to_string(), "tests.dll".to_string()],
            working_directory: None,
            environment: BTreeMap::new(),
            target_framework: Some("net9.0".to_string()),
            architecture: Some("x64".to_string()),
            target_path: Some(PathBuf::from("/repo/bin/tests.dll")),
            project_path: Some(PathBuf::from("/repo/tests.csproj")),
            supports_session_protocol: true,
        };
        assert_eq!(module.display_name(), "/repo/bin/tests.dll");
        assert_eq!(
            module.display_name_with_frameworks(),
            "/repo/bin/tests.dll (net9.0|x64)"
        );
    }

    #[test]
    fn frameworks_suffix_handles_partial_identity() {
        assert_eq!(decorate_with_frameworks("m", None, None), "m");
        assert_eq!(
            decorate_with_frameworks("m", Some("net9.0"), None),
            "m (net9.0)"
        );
        assert_eq!(
            decorate_with_frameworks("m", None, Some("arm64")),
            "m (arm64)"
        );
    }
}
