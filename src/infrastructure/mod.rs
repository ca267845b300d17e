pub mod cache;
pub mod db;
pub mod encryption;
pub mod log_sanitizer;
pub mod logging;
