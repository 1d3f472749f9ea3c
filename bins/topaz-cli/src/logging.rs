//! 日志初始化.
//!
//! stderr 只显示 warn 以上, 标准输出留给模板与摘要. 完整记录写入
//! `logs/topaz-cli.{date}.log`, 默认 info, 由 -v/-vv 或 TOPAZ_LOG 调整.
//! 库内的 `log` 记录经 tracing-subscriber 的 log 桥接进入两路输出.

use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

const LOG_DIR: &str = "logs";
const LOG_PREFIX: &str = "topaz-cli";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// 安装 stderr 与滚动文件两路输出, `verbosity` 为 -v 的次数
pub fn init(verbosity: u8) -> Result<()> {
    std::fs::create_dir_all(LOG_DIR).context("创建日志目录失败")?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(LOG_DIR)
        .context("创建日志文件失败")?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    LOG_GUARD.set(guard).ok();

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .with_filter(EnvFilter::new("warn"));

    let file_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let file_filter =
        EnvFilter::try_from_env("TOPAZ_LOG").unwrap_or_else(|_| EnvFilter::new(file_level));
    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .event_format(FileFormatter)
        .with_filter(file_filter);

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("安装日志订阅器失败")?;
    Ok(())
}

/// 文件行格式: `[时间] 级别 target > 消息`
struct FileFormatter;

impl<S, N> FormatEvent<S, N> for FileFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(
            writer,
            "[{}] {:5} {} > ",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            meta.level(),
            meta.target(),
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
