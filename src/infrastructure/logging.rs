//! 日志系统配置模块
//! 支持结构化日志、日志级别配置和按天轮转
//!
//! 审计写入失败走 `trustcore::audit_fallback` target（本地兜底通道）。

use std::path::Path;

use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::config::LoggingConfig;

/// 审计兜底日志 target
pub const AUDIT_FALLBACK_TARGET: &str = "trustcore::audit_fallback";

const DEFAULT_LOG_DIR: &str = "./logs";
const LOG_FILE_PREFIX: &str = "trustcore.log";

/// 初始化日志系统
///
/// 开启文件日志时返回 WorkerGuard，调用方必须持有到进程退出，否则缓冲日志丢失。
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let json = config.format == "json";

    let stdout_layer = if json {
        fmt::layer()
            .json()
            .with_timer(ChronoUtc::rfc_3339())
            .boxed()
    } else {
        fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .boxed()
    };

    let (file_layer, guard) = if config.enable_file_logging {
        let log_dir = config
            .log_file_path
            .as_deref()
            .map(Path::new)
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new(DEFAULT_LOG_DIR));
        std::fs::create_dir_all(log_dir)?;

        let (writer, guard) = tracing_appender::non_blocking(rolling::daily(log_dir, LOG_FILE_PREFIX));
        let layer = if json {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_timer(ChronoUtc::rfc_3339())
                .boxed()
        } else {
            fmt::layer()
                .with_writer(writer)
                .with_timer(ChronoUtc::rfc_3339())
                .with_ansi(false)
                .boxed()
        };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    Registry::default()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

