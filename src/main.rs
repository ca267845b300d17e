//! TrustCore 运维入口
//!
//! trustcore check              配置、加密自检、数据库与 Redis 连通性
//! trustcore stats              输出审计统计（JSON）
//! trustcore retention [days]   执行审计保留期清理

use anyhow::{bail, Context, Result};
use trustcore::{app_state::AppState, config::Config, infrastructure::logging::init_logging};

enum Command {
    Check,
    Stats,
    Retention(Option<u32>),
}

fn parse_command(args: &[String]) -> Result<Command> {
    match args.first().map(String::as_str) {
        None | Some("check") => Ok(Command::Check),
        Some("stats") => Ok(Command::Stats),
        Some("retention") => {
            let days = args
                .get(1)
                .map(|d| d.parse::<u32>().context("retention days must be a positive integer"))
                .transpose()?;
            if days == Some(0) {
                bail!("retention days must be greater than zero");
            }
            Ok(Command::Retention(days))
        }
        Some(other) => bail!("unknown command '{}', expected check | stats | retention [days]", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载环境变量
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    // 2. 加载并校验配置：密钥环缺失或无效时拒绝启动
    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = Config::from_env_and_file(config_path.as_deref())
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    // 3. 初始化日志（guard 持有到进程退出）
    let _log_guard = init_logging(&config.logging)?;
    tracing::info!("Starting TrustCore");

    // 4. 装配组件
    let state = AppState::new(config).await?;
    state
        .encryption
        .validate_encryption()
        .context("encryption self-test failed")?;

    match command {
        Command::Check => run_check(&state).await,
        Command::Stats => {
            let stats = state.audit.get_audit_statistics().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Retention(days) => {
            let report = state.audit.cleanup_old_logs(days).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn run_check(state: &AppState) -> Result<()> {
    if let Some(pool) = &state.pool {
        trustcore::infrastructure::db::health_check(pool)
            .await
            .context("database health check failed")?;
    }

    for (version, fingerprint) in state.encryption.key_fingerprints() {
        tracing::info!(version = %version, fingerprint = %fingerprint, "Keyring entry");
    }
    tracing::info!(
        current_version = %state.encryption.current_version(),
        attempt_store = state.brute_force.backend(),
        "All checks passed"
    );
    Ok(())
}
