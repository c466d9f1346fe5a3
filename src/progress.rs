// progress.rs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use prettytable::{row, Table};
use std::time::Duration;

/// Severity of a message sent through [`log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Coarse phase of a run, used to prefix log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    Startup,
    Loading,
    PairwiseDistances,
    PathwayIndexing,
    Rarefaction,
    Writing,
}

impl ProcessingStage {
    fn label(self) -> &'static str {
        match self {
            ProcessingStage::Startup => "startup",
            ProcessingStage::Loading => "loading",
            ProcessingStage::PairwiseDistances => "distances",
            ProcessingStage::PathwayIndexing => "pathways",
            ProcessingStage::Rarefaction => "rarefaction",
            ProcessingStage::Writing => "writing",
        }
    }
}

static CURRENT_STAGE: Lazy<Mutex<ProcessingStage>> =
    Lazy::new(|| Mutex::new(ProcessingStage::Startup));

pub fn set_stage(stage: ProcessingStage) {
    *CURRENT_STAGE.lock() = stage;
}

pub fn current_stage() -> ProcessingStage {
    *CURRENT_STAGE.lock()
}

/// Forwards a message to the `log` facade, tagged with the current stage.
pub fn log(level: LogLevel, message: &str) {
    let stage = current_stage().label();
    match level {
        LogLevel::Debug => ::log::debug!("[{}] {}", stage, message),
        LogLevel::Info => ::log::info!("[{}] {}", stage, message),
        LogLevel::Warning => ::log::warn!("[{}] {}", stage, message),
        LogLevel::Error => ::log::error!("[{}] {}", stage, message),
    }
}

pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

/// Progress bar that advances once per finished group.
pub fn create_group_progress(total_groups: usize, message: &str) -> ProgressBar {
    let bar = ProgressBar::new(total_groups as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} groups {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
    );
    bar.set_message(message.to_string());
    bar
}

pub struct StatusBox {
    pub title: String,
    pub stats: Vec<(String, String)>,
}

pub fn display_status_box(status: StatusBox) {
    let mut table = Table::new();
    for (name, value) in &status.stats {
        table.add_row(row![name, value]);
    }
    println!("\n{}", status.title.green().bold());
    table.printstd();
}
