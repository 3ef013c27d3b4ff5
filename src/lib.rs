// ABOUTME: Library module for db-backup-exporter
// ABOUTME: Exports all core functionality for use in binary and tests

pub mod archive;
pub mod config;
pub mod dump;
pub mod error;
pub mod export;
pub mod pipeline;
pub mod process;
pub mod restore;
pub mod tools;
