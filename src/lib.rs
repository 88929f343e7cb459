//! # Module Runner Library / Module Runner 库
//!
//! This library provides the core functionality for the Module Runner tool,
//! a parallel test-module orchestrator: it launches one runner process per
//! test module, speaks a versioned duplex session protocol with each of
//! them, and renders live, flicker-free terminal progress.
//!
//! 此库为 Module Runner 工具提供核心功能，
//! 这是一个并行测试模块编排器：它为每个测试模块启动一个运行器进程，
//! 与每个进程使用带版本的双工会话协议通信，
//! 并渲染无闪烁的实时终端进度。
//!
//! ## Modules / 模块
//!
//! - `core` - Data models, session protocol, IPC sessions, result tracking
//!   and the worker pool
//! - `infra` - Infrastructure services like process capture and the channel
//!   endpoint
//! - `reporting` - Live progress rendering and the final summaries
//! - `cli` - Command-line interface and commands
//!
//! - `core` - 数据模型、会话协议、IPC 会话、结果跟踪和工作池
//! - `infra` - 基础设施服务，如进程捕获和通道端点
//! - `reporting` - 实时进度渲染和最终摘要
//! - `cli` - 命令行接口和命令

pub mod cli;
pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use crate::core::models;
pub use crate::core::protocol;
pub use crate::core::queue;

/// Initializes the application's internationalization (i18n) based on the system locale.
///
/// This function detects the user's system locale and sets the appropriate
/// language for the application's user interface. It attempts to match the full
/// locale (e.g., "zh-CN"), then just the language code (e.g., "en"), and
/// finally falls back to the default language ("en").
pub fn init() {
    // Detect system locale and set it for i18n.
    // Fallback to "en" if detection fails.
    let locale = sys_locale::get_locale().unwrap_or_else(|| "en".to_string());
    let available_locales = rust_i18n::available_locales!();

    // Try to match the full locale first (e.g., "zh-CN")
    // Then try to match the language part only (e.g., "en" from "en-US")
    // Finally, fall back to "en"
    let lang = if available_locales.contains(&locale.as_str()) {
        &locale
    } else {
        locale
            .split('-')
            .next()
            .filter(|lang_code| available_locales.contains(lang_code))
            .unwrap_or("en")
    };

    rust_i18n::set_locale(lang);
}

// Initialize i18n
rust_i18n::i18n!("locales", fallback = "en");
