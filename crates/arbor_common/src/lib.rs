pub mod config;
pub mod data;
pub mod file_cache;
pub mod progress_ui;
pub mod report_error;
pub mod util;
