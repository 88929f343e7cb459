//! # Reporting Module / 报告模块
//!
//! This module owns everything the user sees: the live progress view with
//! its two terminal back-ends, the per-test output lines and the final
//! colored summary, with internationalization support.
//!
//! 此模块负责用户所见的一切：带有两种终端后端的实时进度视图、
//! 每个测试的输出行以及最终的彩色摘要，支持国际化。

pub mod console;
pub mod progress;
pub mod terminal;

// Re-export the reporter facade
pub use console::{ReporterOptions, TestReporter};
