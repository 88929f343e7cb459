//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for Module Runner,
//! including process capture, the duplex channel endpoint, file system
//! operations, and i18n support.
//!
//! 此模块为 Module Runner 提供基础设施服务，
//! 包括进程捕获、双工通道端点、文件系统操作和国际化支持。

pub mod channel;
pub mod fs;
pub mod process;

// Re-export i18n functions for easier access
pub use rust_i18n::t;
