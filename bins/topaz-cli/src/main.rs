//! topaz-cli - 编码会话编译工具
//!
//! 读取 JSON 会话配置, 编译全部头部模板并生成码率控制参数, 偏置表与
//! mini-GOP 结构, 以文本或 JSON 形式输出.

mod logging;

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result, bail};
use clap::Parser;
use topaz::config::SessionConfig;
use topaz::session::{EncodeSession, SessionReport};

#[derive(Parser, Debug)]
#[command(name = "topaz-cli", version, about = "Topaz 编码器头部模板与参数表编译工具")]
struct Cli {
    /// 会话配置文件 (JSON), 缺省使用内置默认配置
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 编码标准 (h264, h263, mpeg4, jpeg)
    #[arg(long)]
    standard: Option<String>,

    /// 图像尺寸 (如 "1280x720")
    #[arg(short = 's', long = "size")]
    size: Option<String>,

    /// 码率 (bps)
    #[arg(short = 'b', long = "bitrate")]
    bitrate: Option<u32>,

    /// 帧率
    #[arg(short = 'r', long = "rate")]
    rate: Option<u32>,

    /// 码率控制模式 (none, cbr, vbr, erc, vcm)
    #[arg(long = "rc")]
    rc_mode: Option<String>,

    /// mini-GOP 中的 B 帧数
    #[arg(long = "bframes")]
    b_frames: Option<u8>,

    /// 使用分层 mini-GOP
    #[arg(long)]
    hierarchical: bool,

    /// 以 JSON 输出会话摘要
    #[arg(long)]
    json: bool,

    /// 打印生效的配置后退出
    #[arg(long = "dump-config")]
    dump_config: bool,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("警告: 日志初始化失败: {e:#}");
    }

    if let Err(e) = run(&cli) {
        eprintln!("错误: {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = effective_config(cli)?;
    if cli.dump_config {
        println!("{}", config.to_json_string()?);
        return Ok(());
    }

    log::info!(
        "topaz-cli {}: {} {}x{}, 码率控制 {}",
        topaz::version(),
        config.standard,
        config.width,
        config.height,
        config.rate_control.mode
    );
    let mut session = EncodeSession::new(config).context("建立编码会话失败")?;
    session.compile_all_frames().context("编译逐帧模板失败")?;
    let report = session.report()?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("序列化会话摘要失败")?
        );
    } else {
        print_report(&report);
    }
    Ok(())
}

/// 配置文件 + 命令行覆盖
fn effective_config(cli: &Cli) -> Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };

    if let Some(standard) = &cli.standard {
        config.standard = standard.clone();
    }
    if let Some(size) = &cli.size {
        let Some((width, height)) = parse_size(size) else {
            bail!("无效的图像尺寸: '{size}'");
        };
        config.width = width;
        config.height = height;
    }
    if let Some(bitrate) = cli.bitrate {
        config.rate_control.bits_per_second = bitrate;
    }
    if let Some(rate) = cli.rate {
        config.rate_control.frame_rate = rate;
    }
    if let Some(mode) = &cli.rc_mode {
        config.rate_control.mode = mode.clone();
    }
    if let Some(b_frames) = cli.b_frames {
        config.gop.b_frames = b_frames;
    }
    if cli.hierarchical {
        config.gop.kind = "hierarchical".into();
    }

    config.validate().context("会话配置无效")?;
    Ok(config)
}

/// 解析分辨率字符串 (如 "1280x720")
fn parse_size(s: &str) -> Option<(u32, u32)> {
    let (w, h) = s.split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

fn print_report(report: &SessionReport) {
    println!(
        "topaz {} | {} {}x{}",
        report.version, report.standard, report.width, report.height
    );

    if let Some(rc) = &report.rate_control {
        println!(
            "码率控制: {} {} bps @ {} fps, 缓冲 {} bit, QP {} [{}..{}], 每帧 {} bit",
            rc.mode,
            rc.bits_per_second,
            rc.frame_rate,
            rc.buffer_size,
            rc.initial_qp,
            rc.min_qp,
            rc.max_qp,
            rc.bits_per_frame
        );
    }
    if let Some(gop) = &report.gop {
        let words: Vec<String> = gop.words.iter().map(|w| format!("{w:04x}")).collect();
        println!(
            "mini-GOP: {} B={} [{}] 层级 {:?}",
            gop.kind,
            gop.b_frames,
            words.join(" "),
            gop.pic_on_level
        );
    }
    if let Some(bias) = &report.bias {
        println!(
            "偏置表: SZ1={} 拒绝阈值={:#06x} LRITC={:#08x}, P 帧寄存器写入 {} 次",
            bias.sz1, bias.reject_threshold, bias.cache_chunk_config, bias.register_writes
        );
    }

    for template in &report.templates {
        let frame = template.frame_type.as_deref().unwrap_or("-");
        println!(
            "  {:<24} {:>6} {:>3} 元素 {:>4} 字节  {}",
            template.kind, frame, template.elements, template.bytes, template.hex
        );
    }
    if let Some(jpeg) = &report.jpeg {
        println!("JPEG 头部: {} 字节, 段 {}", jpeg.bytes, jpeg.segments.join(" "));
        println!("  {}", jpeg.hex);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1280x720"), Some((1280, 720)));
        assert_eq!(parse_size("176 x 144"), Some((176, 144)));
        assert_eq!(parse_size("1280"), None);
        assert_eq!(parse_size("axb"), None);
    }

    #[test]
    fn test_verbosity_counts() {
        assert_eq!(Cli::parse_from(["topaz-cli"]).verbose, 0);
        assert_eq!(Cli::parse_from(["topaz-cli", "-vv"]).verbose, 2);
    }

    #[test]
    fn test_overrides_apply() {
        let cli = Cli::parse_from([
            "topaz-cli",
            "--standard",
            "mpeg4",
            "-s",
            "352x288",
            "--bframes",
            "2",
            "--hierarchical",
        ]);
        let config = effective_config(&cli).unwrap();
        assert_eq!(config.standard, "mpeg4");
        assert_eq!((config.width, config.height), (352, 288));
        assert_eq!(config.gop.b_frames, 2);
        assert_eq!(config.gop.kind, "hierarchical");
    }
}
