//! 编码会话集成测试
//!
//! 覆盖配置文件加载, 各标准的会话建立, 逐帧模板缓存与 JPEG 拼接.

use std::io::Write;

use topaz::codec::jpeg;
use topaz::config::SessionConfig;
use topaz::core::{FrameType, Standard, TokenKind};
use topaz::session::EncodeSession;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_config(text: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

// ============================================================
// 配置加载
// ============================================================

#[test]
fn test_load_config_file() {
    init_logger();
    let file = write_config(
        r#"{
            "standard": "h264",
            "width": 1920,
            "height": 1080,
            "rate_control": { "mode": "vbr", "bits_per_second": 4000000 },
            "gop": { "kind": "hierarchical", "b_frames": 3 },
            "h264": { "profile": "high", "transform_8x8": true, "vui": true }
        }"#,
    );
    let config = SessionConfig::load(file.path()).unwrap();
    assert_eq!(config.standard().unwrap(), Standard::H264);
    assert_eq!(config.rate_control.bits_per_second, 4_000_000);
    assert_eq!(config.rate_control.frame_rate, 30, "未给出的字段取默认值");
    assert!(config.h264.cabac);
    config.validate().unwrap();
}

#[test]
fn test_load_reports_path_on_error() {
    let file = write_config("{ \"width\": \"wide\" }");
    let err = SessionConfig::load(file.path()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("会话配置无效"), "错误信息: {message}");

    let missing = file.path().with_extension("missing");
    assert!(SessionConfig::load(&missing).is_err());
}

// ============================================================
// 会话建立
// ============================================================

#[test]
fn test_h264_hierarchical_session() {
    init_logger();
    let config = SessionConfig::from_json_str(
        r#"{
            "width": 1920,
            "height": 1080,
            "rate_control": { "bits_per_second": 4000000 },
            "gop": { "kind": "hierarchical", "b_frames": 3 },
            "h264": { "profile": "high", "vui": true, "hrd_sei": true }
        }"#,
    )
    .unwrap();
    let mut session = EncodeSession::new(config).unwrap();

    let rc = session.rc_params().unwrap();
    assert_eq!(rc.initial_qp, 37, "1080p 4 Mbps 初始 QP");
    assert_eq!(rc.bits_per_frame, 133_333);

    let gop = session.mini_gop().unwrap();
    let positions: Vec<u8> = gop.entries().iter().map(|e| e.position).collect();
    assert_eq!(positions, vec![3, 1, 0, 2], "P 锚点后按二分顺序排列");

    session.compile_all_frames().unwrap();
    let b = session.frame_headers(FrameType::InterB).unwrap();
    let slice = b.last().unwrap();
    assert!(slice.stream().tokens().any(|t| t == TokenKind::ReorderL1));

    let report = session.report().unwrap();
    assert_eq!(report.gop.as_ref().unwrap().words.len(), 4);
    assert!(report.templates.len() > session.sequence_headers().len());
}

#[test]
fn test_mpeg4_session() {
    let config = SessionConfig::from_json_str(
        r#"{
            "standard": "mpeg4",
            "width": 352,
            "height": 288,
            "rate_control": { "bits_per_second": 384000, "frame_rate": 15 },
            "mpeg4": { "vbv": true }
        }"#,
    )
    .unwrap();
    let mut session = EncodeSession::new(config).unwrap();
    assert_eq!(session.sequence_headers().len(), 1, "只有 VOL");

    let p = session.frame_headers(FrameType::InterP).unwrap();
    assert_eq!(p.len(), 1);
    let vop_tokens: Vec<TokenKind> = p[0].stream().tokens().collect();
    assert!(vop_tokens.contains(&TokenKind::VopTimeIncrement));

    let bias = session.bias_tables().unwrap();
    assert_eq!(bias.standard, Standard::Mpeg4);
    assert!(!session.register_writes(FrameType::InterP).unwrap().is_empty());
}

#[test]
fn test_h263_session() {
    let config = SessionConfig::from_json_str(
        r#"{ "standard": "h263", "width": 176, "height": 144, "rate_control": { "mode": "none", "initial_qp": 10 } }"#,
    )
    .unwrap();
    let mut session = EncodeSession::new(config).unwrap();
    assert!(!session.rc_params().unwrap().mode.is_enabled());
    for frame_type in session.frame_types() {
        assert!(!session.frame_headers(frame_type).unwrap().is_empty());
    }
}

#[test]
fn test_manual_bias_requires_overrides() {
    let mut config = SessionConfig {
        standard: "h263".into(),
        width: 176,
        height: 144,
        ..Default::default()
    };
    config.rate_control.mode = "none".into();
    config.rate_control.initial_qp = 10;
    config.bias.rc_biases = false;
    let err = EncodeSession::new(config.clone()).err().unwrap();
    assert!(err.is_config(), "缺少覆盖值应报告配置错误");

    config.bias.ipe_skip_vec = Some(8);
    config.bias.inter_mb = Some(40);
    let session = EncodeSession::new(config).unwrap();
    let bias = session.bias_tables().unwrap();
    assert_eq!(bias.inter_p[10], 0, "偶数 QP 不写偏置");
}

#[test]
fn test_jpeg_session_assembles_image() {
    let config = SessionConfig::from_json_str(
        r#"{ "standard": "jpeg", "width": 1920, "height": 1080, "jpeg": { "quality": 75 } }"#,
    )
    .unwrap();
    let session = EncodeSession::new(config).unwrap();
    let writer = session.jpeg_writer().unwrap();
    let plan = writer.plan();
    assert_eq!(plan.mcus_x, 120);
    assert_eq!(plan.mcus_y, 68);
    assert_eq!(plan.scans, 2, "两个编码核各一个扫描");

    let header = session.jpeg_header().unwrap();
    let scans: [&[u8]; 2] = [&[0x12, 0x34], &[0x56]];
    let image = jpeg::assemble(header, &scans);
    assert_eq!(&image[..2], &[0xFF, 0xD8], "SOI");
    assert_eq!(&image[image.len() - 2..], &[0xFF, 0xD9], "EOI");
    let body = &image[header.len()..];
    assert_eq!(body, &[0x12, 0x34, 0xFF, 0xD0, 0x56, 0xFF, 0xD9]);
}

#[test]
fn test_invalid_session_leaves_nothing_built() {
    let config = SessionConfig {
        standard: "mpeg4".into(),
        width: 352,
        height: 288,
        gop: topaz::config::GopConfig {
            b_frames: 9,
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(EncodeSession::new(config).err().unwrap().is_config());
}
