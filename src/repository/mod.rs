// Repository 抽象层：审计记录存储 + 登录尝试计数存储

pub mod attempt_store;
pub mod audit_attempt_store;
pub mod audit_store;
pub mod pg_audit_store;
pub mod redis_attempt_store;

pub use attempt_store::{AttemptSnapshot, AttemptStore, MemoryAttemptStore};
pub use audit_attempt_store::AuditAttemptStore;
pub use audit_store::{AuditStore, MemoryAuditStore, StoreResult};
pub use pg_audit_store::PgAuditStore;
pub use redis_attempt_store::RedisAttemptStore;
