//! # Core Module / 核心模块
//!
//! This module contains the core functionality of Module Runner:
//! the data models, the session protocol and its codec, the per-process
//! IPC session, result tracking and the bounded-concurrency action queue.
//!
//! 此模块包含 Module Runner 的核心功能：
//! 数据模型、会话协议及其编解码、每进程 IPC 会话、
//! 结果跟踪以及有界并发的动作队列。

pub mod config;
pub mod models;
pub mod planner;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod tracker;

// Re-exports
pub use models::{TestModule, TestModuleGroup};
pub use queue::ActionQueue;
pub use session::ModuleSession;
