use std::time::Duration;

use anyhow::{Context, Result};
use bioqueue_core::{AppConfig, ShutdownManager};
use clap::{Arg, Command};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;

use app::{AppMode, Application};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("bioqueue")
        .version("0.1.0")
        .about("生物信息学作业调度系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径")
                .default_value("config/bioqueue.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["queue", "scheduler", "all"])
                .default_value("all"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别（覆盖配置文件）")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式（覆盖配置文件）")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .context("缺少配置文件路径")?;
    let mode: AppMode = matches
        .get_one::<String>("mode")
        .context("缺少运行模式")?
        .parse()?;

    let config = AppConfig::load(Some(config_path))
        .with_context(|| format!("加载配置文件失败: {config_path}"))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.logging.level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.logging.format);
    init_logging(log_level, log_format)?;

    info!("启动生物信息学作业调度系统");
    info!("配置文件: {config_path}");
    info!("运行模式: {mode:?}");

    let app = Application::new(config, mode)?;
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let shutdown = shutdown_manager.clone();
        tokio::spawn(async move { app.run(shutdown).await })
    };

    // 外部信号或内部致命错误都会结束等待
    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = shutdown_manager.wait_for_shutdown() => {
            warn!("内部组件触发了关闭");
        }
        result = &mut app_handle => {
            report_exit(result);
            info!("生物信息学作业调度系统已退出");
            return Ok(());
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(30), app_handle).await {
        Ok(result) => report_exit(result),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("生物信息学作业调度系统已退出");
    Ok(())
}

fn report_exit(result: Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用运行失败: {e:#}"),
        Err(e) => error!("应用任务异常退出: {e}"),
    }
}

/// 初始化日志系统
fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 等待关闭信号
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
