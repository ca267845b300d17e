pub mod audit_service;
pub mod brute_force_guard;
pub mod encryption_service;

pub use audit_service::AuditLogger;
pub use brute_force_guard::{AttemptStats, BruteForceGuard, FailureOutcome, LoginCheck};
pub use encryption_service::EncryptionManager;
