//! # Execution Planner Module / 执行计划模块
//!
//! This module turns the manifest handed over by the build system into an
//! execution plan: shell-splitting run arguments, rejecting legacy runners
//! up front and counting the multi-target groups that force sequential
//! execution.
//!
//! 此模块将构建系统移交的清单转换为执行计划：
//! 按 shell 规则拆分运行参数、预先拒绝旧式运行器，
//! 并统计强制顺序执行的多目标组。

use crate::core::models::{ManifestModule, RunManifest, TestModule, TestModuleGroup};
use anyhow::{Result, bail};

/// Represents a complete execution plan for a run.
/// 表示一次运行的完整执行计划。
#[derive(Debug)]
pub struct ExecutionPlan {
    /// The groups to enqueue, in manifest order.
    /// 要入队的组，按清单顺序。
    pub groups: Vec<TestModuleGroup>,
    /// Total number of modules across all groups.
    pub module_count: usize,
    /// Number of groups holding more than one module (multi-target builds).
    pub multi_target_group_count: usize,
}

/// Creates an execution plan for the given manifest.
///
/// Legacy runners that do not speak the session protocol poison the whole
/// run: the plan fails before any process is launched, naming every
/// offending module, rather than running an inconsistent subset.
///
/// # Arguments
/// * `manifest` - The manifest produced by the build-system collaborator
///
/// # Returns
/// An `ExecutionPlan` with every module converted and validated
pub fn plan_execution(manifest: RunManifest) -> Result<ExecutionPlan> {
    let legacy: Vec<String> = manifest
        .groups
        .iter()
        .flat_map(|group| &group.modules)
        .filter(|module| !module.session_protocol)
        .map(|module| module.run_command.clone())
        .collect();

    if !legacy.is_empty() {
        bail!(
            "manifest contains modules that do not speak the session protocol: {}",
            legacy.join(", ")
        );
    }

    let mut groups = Vec::with_capacity(manifest.groups.len());
    for group in manifest.groups {
        let mut modules = Vec::with_capacity(group.modules.len());
        for module in group.modules {
            modules.push(convert_module(module)?);
        }
        if modules.is_empty() {
            continue;
        }
        groups.push(TestModuleGroup::new(modules));
    }

    let module_count = groups.iter().map(|g| g.modules.len()).sum();
    let multi_target_group_count = groups.iter().filter(|g| g.is_multi_target()).count();

    Ok(ExecutionPlan {
        groups,
        module_count,
        multi_target_group_count,
    })
}

/// Converts one manifest record into an immutable `TestModule`. The run
/// arguments arrive as a single pre-escaped string and are split with shell
/// rules here, once, so every later consumer sees a fixed argv.
fn convert_module(module: ManifestModule) -> Result<TestModule> {
    if module.run_command.trim().is_empty() {
        bail!("manifest module has an empty run command");
    }

    let run_arguments = match &module.run_arguments {
        None => Vec::new(),
        Some(raw) if raw.trim().is_empty() => Vec::new(),
        Some(raw) => shlex::split(raw)
            .ok_or_else(|| anyhow::anyhow!("failed to split run arguments: {raw}"))?,
    };

    Ok(TestModule {
        run_command: module.run_command,
        run_arguments,
        working_directory: module.working_directory,
        environment: module.environment,
        target_framework: module.target_framework,
        architecture: module.architecture,
        target_path: module.target_path,
        project_path: module.project_path,
        supports_session_protocol: module.session_protocol,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_from(json: &str) -> RunManifest {
        RunManifest::from_json(json).unwrap()
    }

    #[test]
    fn legacy_module_rejects_the_whole_run() {
        let manifest = manifest_from(
            r#"{"groups": [
                {"modules": [{"runCommand": "good"}]},
                {"modules": [{"runCommand": "old-runner", "sessionProtocol": false}]}
            ]}"#,
        );
        let err = plan_execution(manifest).unwrap_err();
        assert!(err.to_string().contains("old-runner"));
    }

    #[test]
    fn arguments_are_shell_split_once() {
        let manifest = manifest_from(
            r#"{"groups": [{"modules": [
                {"runCommand": "dotnet", "runArguments": "exec \"my tests.dll\""}
            ]}]}"#,
        );
        let plan = plan_execution(manifest).unwrap();
        assert_eq!(
            plan.groups[0].modules[0].run_arguments,
            vec!["exec".to_string(), "my tests.dll".to_string()]
        );
    }

    #[test]
    fn multi_target_groups_are_counted() {
        let manifest = manifest_from(
            r#"{"groups": [
                {"modules": [{"runCommand": "a"}, {"runCommand": "b"}]},
                {"modules": [{"runCommand": "c"}]}
            ]}"#,
        );
        let plan = plan_execution(manifest).unwrap();
        assert_eq!(plan.module_count, 3);
        assert_eq!(plan.multi_target_group_count, 1);
    }

    #[test]
    fn empty_run_command_is_refused() {
        let manifest = manifest_from(r#"{"groups": [{"modules": [{"runCommand": "  "}]}]}"#);
        assert!(plan_execution(manifest).is_err());
    }
}
