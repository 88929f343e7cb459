//! # File System Operations Module / 文件系统操作模块
//!
//! This module provides utilities for file system operations,
//! such as preparing result directories and resolving manifest paths.
//!
//! 此模块提供文件系统操作的实用功能，
//! 如准备结果目录和解析清单路径。

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Creates a directory (and its parents) when it does not exist yet, and
/// hands back its absolute form so child processes receive a stable path
/// regardless of their own working directory.
///
/// # Arguments
/// * `path` - The directory to prepare
///
/// # Returns
/// The canonicalized directory path
pub fn prepare_directory(path: &Path) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    absolute_path(path)
}

/// Reads a whole text file with a path-carrying error.
///
/// # Arguments
/// * `path` - Path of the file to read
///
/// # Returns
/// The file content as a `String`
pub fn read_text_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}

/// Gets the absolute path from a potentially relative path.
///
/// # Arguments
/// * `path` - Path to canonicalize
///
/// # Returns
/// Canonicalized absolute path, or an error if the path doesn't exist
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("Failed to resolve path: {}", path.display()))
}
