/// rPPG 心率监测 (无界面)
///
/// 系统架构:
/// 1. 采集线程: 摄像头 / 合成视频源 (独立工作线程)
/// 2. 提取线程: 人脸检测 + 额头ROI绿色均值 (独立工作线程)
/// 3. 分析线程: 滤波 + 峰值/频谱估计 (独立工作线程)
/// 4. 主线程:   订阅事件并输出, 消费显示帧
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use mimalloc::MiMalloc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rppg_rs::detection::{FaceDetector, FixedRegionDetector, SkinRegionDetector};
use rppg_rs::input::{CaptureDevice, SyntheticCamera, SyntheticConfig};
use rppg_rs::{gen_time_string, Args, MonitorConfig, Pipeline, PipelineEvent};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn build_device(args: &Args, config: &MonitorConfig) -> Box<dyn CaptureDevice> {
    let synthetic = || -> Box<dyn CaptureDevice> {
        Box::new(SyntheticCamera::new(SyntheticConfig {
            width: config.capture_width,
            height: config.capture_height,
            pulse_hz: args.pulse_hz,
            ..Default::default()
        }))
    };
    if args.synthetic {
        info!("🧪 使用合成视频源 ({:.2} Hz)", args.pulse_hz);
        return synthetic();
    }

    #[cfg(feature = "camera")]
    {
        use rppg_rs::input::{get_camera_devices, FfmpegCamera};
        for (index, name) in get_camera_devices() {
            info!("📷 可用摄像头 {}: {}", index, name);
        }
        Box::new(
            FfmpegCamera::new(args.camera, config.capture_width, config.capture_height)
                .with_read_timeout(config.queue_timeout()),
        )
    }

    #[cfg(not(feature = "camera"))]
    {
        warn!("⚠️  未启用 camera 特性, 改用合成视频源 (cargo run --features camera)");
        synthetic()
    }
}

fn build_detector(args: &Args, use_fixed_default: bool) -> Box<dyn FaceDetector> {
    if let Some(region) = args.face_region.as_deref() {
        if let Some(det) = FixedRegionDetector::from_slice(region) {
            info!("🎯 固定人脸区域: {:?}", region);
            return Box::new(det);
        }
        warn!("⚠️  --face-region 需要4个数值, 忽略");
    }
    if use_fixed_default {
        let [x, y, w, h] = SyntheticConfig::default().face;
        return Box::new(FixedRegionDetector::new(x, y, w, h));
    }
    info!("🎯 使用肤色区域检测器");
    Box::new(SkinRegionDetector::default())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    info!("🚀 rPPG 心率监测启动");

    let config = MonitorConfig::load(&args.config);
    let device = build_device(&args, &config);
    let detector = build_detector(&args, args.synthetic || !cfg!(feature = "camera"));

    let mut pipeline = Pipeline::new(config)?;
    let events = pipeline.subscribe();
    if args.record {
        pipeline.set_recording(true);
    }
    pipeline.start(device, detector)?;

    let started = Instant::now();
    let run_for = (args.duration > 0.0).then(|| Duration::from_secs_f64(args.duration));
    let mut display_count = 0u64;
    let mut last_report = Instant::now();

    loop {
        if run_for.is_some_and(|d| started.elapsed() >= d) {
            break;
        }
        if let Ok(event) = events.recv_timeout(Duration::from_millis(100)) {
            match &event {
                PipelineEvent::HeartRateUpdated {
                    bpm,
                    is_valid: true,
                    confidence,
                } => info!("💓 {:.1} bpm (置信度 {:.2})", bpm, confidence),
                PipelineEvent::HeartRateUpdated { is_valid: false, .. } => {
                    info!("💓 -- bpm (信号不足)")
                }
                PipelineEvent::FacePresenceChanged { present } => {
                    info!("{}", if *present { "🙂 人脸出现" } else { "🫥 人脸离开" })
                }
                PipelineEvent::SignalQualityUpdated { quality } => {
                    info!("📶 信号质量 {:.0}", quality)
                }
                PipelineEvent::RespirationUpdated { brpm, is_valid } => {
                    info!("🌬️  呼吸 {:.1} 次/分 (有效: {})", brpm, is_valid)
                }
                PipelineEvent::DeviceUnavailable { device, reason } => {
                    warn!("❌ 设备 {} 不可用: {}", device, reason);
                    break;
                }
            }
        }

        // 无界面模式下只统计显示帧
        if pipeline.latest_display_frame().is_some() {
            display_count += 1;
        }
        if last_report.elapsed() >= Duration::from_secs(5) {
            let stats = pipeline.stats();
            info!(
                "📊 采集 {} | 处理 {} | 采样 {} | 估计 {} (有效 {}) | 显示 {}",
                stats.frames_captured,
                stats.frames_processed,
                stats.samples_emitted,
                stats.estimates,
                stats.valid_estimates,
                display_count
            );
            last_report = Instant::now();
        }
    }

    let report = pipeline.stop();
    if !report.is_clean() {
        warn!("⚠️  未退出的线程: {:?}", report.abandoned);
    }
    info!("📊 最终统计: {}", serde_json::to_string(&pipeline.stats())?);

    if args.record {
        let samples = pipeline.recorded_samples();
        let path = format!("rppg_record_{}.json", gen_time_string("_"));
        std::fs::write(&path, serde_json::to_string_pretty(&samples)?)?;
        info!("💾 已保存 {} 条心率记录到 {}", samples.len(), path);
    }
    Ok(())
}
