pub mod audit_helper;
pub mod request_info;

// Re-export commonly used functions
pub use audit_helper::{decrypt_for_display, decrypt_required, DecryptContext};
pub use request_info::HttpRequestInfo;
