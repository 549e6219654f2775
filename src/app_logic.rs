/*
 * This module provides the application logic layer: `SummarizerApp` drives a scan
 * or a summarization run on top of the core abstractions. Unit tests for the run
 * pipeline are in `handler_tests.rs`.
 */
pub mod handler;

#[cfg(test)]
mod handler_tests;

pub use handler::{APP_NAME, RunContext, RunError, RunReport, SummarizerApp};
