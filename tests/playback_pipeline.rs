use anyhow::{anyhow, Result};
use myy_playback::core::{AudioFrame, MediaInfo, Packet, PipelineConfig, PlaybackState, PlayerError};
use myy_playback::player::{
    AudioBuffer, AudioSink, Decoder, DemuxerSource, PlaybackContext, ReadStatus, SyntheticAudioDecoder,
    SyntheticSource, SyntheticSpec, SyntheticVideoDecoder,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(3);

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn open_with_sink(
    spec: &SyntheticSpec,
    config: PipelineConfig,
    sink: Option<Arc<AudioBuffer>>,
) -> Result<PlaybackContext> {
    init_logger();
    let source = SyntheticSource::new(spec.clone());
    let video = SyntheticVideoDecoder::new(spec);
    let audio = sink.map(|sink| {
        let decoder: Box<dyn Decoder<Output = AudioFrame>> = Box::new(SyntheticAudioDecoder::new(spec));
        let sink: Arc<dyn AudioSink> = sink;
        (decoder, sink)
    });
    Ok(PlaybackContext::open_with(
        Box::new(source),
        Box::new(video),
        audio,
        config,
    )?)
}

fn open(spec: &SyntheticSpec) -> Result<PlaybackContext> {
    open_with_sink(spec, PipelineConfig::default(), None)
}

/// 等待下一帧并返回 (pts, 像素首字节)
fn wait_frame(ctx: &mut PlaybackContext) -> Result<(i64, u8)> {
    if !ctx.wait_for_frame(WAIT) {
        return Err(anyhow!("等待帧超时"));
    }
    let frame = ctx.get_frame().ok_or_else(|| anyhow!("没有当前帧"))?;
    Ok((frame.pts, frame.pixels[0]))
}

fn advance(ctx: &mut PlaybackContext) -> Result<i64> {
    ctx.advance_frame()?;
    Ok(wait_frame(ctx)?.0)
}

#[test]
fn first_frame_is_published_after_open() -> Result<()> {
    let spec = SyntheticSpec::default();
    let mut ctx = open(&spec)?;

    assert!(ctx.wait_for_frame(WAIT));
    let frame = ctx.get_frame().expect("first frame");
    assert_eq!(frame.pts, 0);
    assert_eq!(frame.duration, 40);
    assert!(frame.is_new);
    assert_eq!(frame.pixels.len(), (spec.width * spec.height * 4) as usize);
    assert_eq!((frame.width, frame.height), (spec.width, spec.height));

    ctx.close();
    Ok(())
}

#[test]
fn pts_never_decreases_without_seek() -> Result<()> {
    let spec = SyntheticSpec::default();
    let mut ctx = open(&spec)?;
    let (mut last, pixel) = wait_frame(&mut ctx)?;
    assert_eq!(pixel, SyntheticSpec::pixel_value(last, 40));

    for _ in 0..60 {
        ctx.advance_frame()?;
        let (pts, pixel) = wait_frame(&mut ctx)?;
        assert!(pts >= last, "pts 从 {} 回退到 {}", last, pts);
        assert_eq!(pts, last + 40);
        assert_eq!(pixel, SyntheticSpec::pixel_value(pts, 40));
        last = pts;
    }
    Ok(())
}

#[test]
fn get_frame_is_idempotent() -> Result<()> {
    let mut ctx = open(&SyntheticSpec::default())?;
    assert!(ctx.wait_for_frame(WAIT));
    advance(&mut ctx)?;

    let first = ctx.get_frame().map(|f| (f.pts, f.is_new));
    let second = ctx.get_frame().map(|f| (f.pts, f.is_new));
    assert_eq!(first, Some((40, false)));
    assert_eq!(second, Some((40, false)));
    Ok(())
}

#[test]
fn seek_delivers_first_frame_at_or_after_target() -> Result<()> {
    let mut ctx = open(&SyntheticSpec::default())?;
    wait_frame(&mut ctx)?;
    for _ in 0..5 {
        advance(&mut ctx)?;
    }

    ctx.seek(7300)?;
    assert_eq!(ctx.state(), PlaybackState::Seeking);
    let (pts, pixel) = wait_frame(&mut ctx)?;
    assert!((7300..7340).contains(&pts), "seek 得到 {}", pts);
    assert_eq!(pixel, SyntheticSpec::pixel_value(pts, 40));

    let stats = ctx.stats();
    assert!(stats.seek_frames_decoded <= 50, "seek 解码了 {} 帧", stats.seek_frames_decoded);
    assert!(stats.frames_skipped >= 30);
    assert_eq!(stats.seeks, 1);

    ctx.update()?;
    assert_eq!(ctx.state(), PlaybackState::Paused);
    assert_eq!(advance(&mut ctx)?, pts + 40);
    Ok(())
}

#[test]
fn latest_seek_wins() -> Result<()> {
    let mut ctx = open(&SyntheticSpec::default())?;
    wait_frame(&mut ctx)?;

    ctx.seek(3000)?;
    ctx.seek(7300)?;
    let (pts, _) = wait_frame(&mut ctx)?;
    assert_eq!(pts, 7320);
    assert_eq!(advance(&mut ctx)?, 7360);
    Ok(())
}

#[test]
fn backward_seek_restarts_from_keyframe() -> Result<()> {
    let mut ctx = open(&SyntheticSpec::default())?;
    wait_frame(&mut ctx)?;
    ctx.seek(5000)?;
    assert_eq!(wait_frame(&mut ctx)?.0, 5000);
    ctx.seek(1000)?;
    assert_eq!(wait_frame(&mut ctx)?.0, 1000);
    assert_eq!(advance(&mut ctx)?, 1040);
    Ok(())
}

#[test]
fn prefetch_window_stays_bounded() -> Result<()> {
    let spec = SyntheticSpec {
        audio: true,
        ..SyntheticSpec::default()
    };
    let config = PipelineConfig::default();
    let mut ctx = open_with_sink(&spec, config.clone(), Some(Arc::new(AudioBuffer::new())))?;
    wait_frame(&mut ctx)?;
    for _ in 0..40 {
        advance(&mut ctx)?;
    }
    // 消费方停下来，让流水线把窗口填满
    thread::sleep(Duration::from_millis(50));

    let stats = ctx.stats();
    assert!(stats.max_outstanding_demux <= config.prefetch_depth);
    assert!(stats.max_outstanding_demux <= config.max_outstanding_requests);
    assert!(stats.max_ready_frames <= config.prefetch_depth);
    assert!(stats.max_video_window <= config.prefetch_depth);
    assert!(stats.frames_decoded <= stats.frames_delivered + 2 * config.prefetch_depth as u64 + 1);
    Ok(())
}

#[test]
fn slots_are_conserved_while_running() -> Result<()> {
    let spec = SyntheticSpec {
        audio: true,
        data_stream: true,
        ..SyntheticSpec::default()
    };
    let mut ctx = open_with_sink(&spec, PipelineConfig::default(), Some(Arc::new(AudioBuffer::new())))?;
    wait_frame(&mut ctx)?;

    for i in 0..30 {
        advance(&mut ctx)?;
        let census = ctx.slot_census();
        assert_eq!(census.total(), 16, "第 {} 次: {:?}", i, census);
        assert!(census.is_conserved());
        if i == 15 {
            ctx.seek(4000)?;
        }
    }
    Ok(())
}

#[test]
fn end_of_stream_pauses_and_pins_position() -> Result<()> {
    let spec = SyntheticSpec {
        duration_ms: 1000,
        codec_delay: 2,
        ..SyntheticSpec::default()
    };
    let mut ctx = open(&spec)?;
    let mut seen = vec![wait_frame(&mut ctx)?.0];

    let deadline = Instant::now() + WAIT;
    while !ctx.is_ended() && Instant::now() < deadline {
        ctx.advance_frame()?;
        if ctx.wait_for_frame(Duration::from_millis(100)) {
            if let Some(frame) = ctx.get_frame() {
                seen.push(frame.pts);
            }
        }
    }

    assert!(ctx.is_ended());
    assert_eq!(ctx.state(), PlaybackState::Paused);
    assert_eq!(ctx.position(), 1000);
    assert_eq!(seen.len(), 25);
    assert_eq!(seen.last(), Some(&960));
    assert!(matches!(ctx.advance_frame(), Err(PlayerError::EndOfStream)));

    // 结束后 play 不会让时钟前进
    ctx.play();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(ctx.position(), 1000);

    // seek 清除结束状态
    ctx.seek(0)?;
    assert!(!ctx.is_ended());
    assert_eq!(wait_frame(&mut ctx)?.0, 0);
    Ok(())
}

#[test]
fn seek_past_end_shows_last_frame_then_ends() -> Result<()> {
    let mut ctx = open(&SyntheticSpec::default())?;
    wait_frame(&mut ctx)?;

    ctx.seek(20_000)?;
    let (pts, _) = wait_frame(&mut ctx)?;
    assert_eq!(pts, 9960);

    let deadline = Instant::now() + WAIT;
    while !ctx.is_ended() && Instant::now() < deadline {
        ctx.update()?;
        thread::sleep(Duration::from_millis(5));
    }
    assert!(ctx.is_ended());
    assert_eq!(ctx.position(), 10_000);
    Ok(())
}

#[test]
fn seek_scan_stops_at_the_limit() -> Result<()> {
    let config = PipelineConfig {
        seek_scan_limit: 5,
        ..PipelineConfig::default()
    };
    let mut ctx = open_with_sink(&SyntheticSpec::default(), config, None)?;
    wait_frame(&mut ctx)?;

    // 关键帧在 6000ms，跳过 5 帧后即使没到目标也显示
    ctx.seek(7300)?;
    let (pts, pixel) = wait_frame(&mut ctx)?;
    assert_eq!(pts, 6200);
    assert_eq!(pixel, SyntheticSpec::pixel_value(pts, 40));
    assert_eq!(ctx.stats().frames_skipped, 5);

    assert_eq!(advance(&mut ctx)?, 6240);
    Ok(())
}

#[test]
fn corrupt_frames_are_skipped() -> Result<()> {
    let spec = SyntheticSpec {
        corrupt_every: Some(5),
        ..SyntheticSpec::default()
    };
    let mut ctx = open(&spec)?;
    let mut last = wait_frame(&mut ctx)?.0;
    for _ in 0..30 {
        let pts = advance(&mut ctx)?;
        assert!(pts > last);
        assert_ne!((pts / 40 + 1) % 5, 0, "损坏的帧 {} 不应该被显示", pts);
        last = pts;
    }
    assert!(ctx.stats().decode_errors > 0);
    Ok(())
}

#[test]
fn transient_read_errors_are_skipped() -> Result<()> {
    let spec = SyntheticSpec {
        read_error_every: Some(7),
        ..SyntheticSpec::default()
    };
    let mut ctx = open(&spec)?;
    let mut last = wait_frame(&mut ctx)?.0;
    for _ in 0..30 {
        let pts = advance(&mut ctx)?;
        assert!(pts > last);
        last = pts;
    }
    assert!(ctx.stats().read_errors > 0);
    Ok(())
}

/// 每次读包都失败的数据源
struct FailingReads(SyntheticSource);

impl DemuxerSource for FailingReads {
    fn read_packet(&mut self, _slot: &mut Packet) -> myy_playback::Result<ReadStatus> {
        Err(PlayerError::TransientIo("device not ready".to_string()))
    }

    fn seek(&mut self, stream_index: usize, target_ms: i64) -> myy_playback::Result<Option<i64>> {
        self.0.seek(stream_index, target_ms)
    }

    fn media_info(&self) -> &MediaInfo {
        self.0.media_info()
    }

    fn video_stream_index(&self) -> Option<usize> {
        self.0.video_stream_index()
    }

    fn audio_stream_index(&self) -> Option<usize> {
        None
    }

    fn description(&self) -> String {
        "failing reads".to_string()
    }
}

#[test]
fn persistent_read_failure_ends_playback() -> Result<()> {
    init_logger();
    let spec = SyntheticSpec::default();
    let config = PipelineConfig {
        max_consecutive_read_errors: 4,
        ..PipelineConfig::default()
    };
    let mut ctx = PlaybackContext::open_with(
        Box::new(FailingReads(SyntheticSource::new(spec.clone()))),
        Box::new(SyntheticVideoDecoder::new(&spec)),
        None,
        config,
    )?;

    let deadline = Instant::now() + WAIT;
    while !ctx.is_ended() && Instant::now() < deadline {
        ctx.update()?;
        thread::sleep(Duration::from_millis(5));
    }

    assert!(ctx.is_ended());
    assert_eq!(ctx.state(), PlaybackState::Paused);
    assert!(ctx.get_frame().is_none());
    assert_eq!(ctx.position(), 10_000);
    assert!(ctx.stats().read_errors >= 4);
    assert!(matches!(ctx.advance_frame(), Err(PlayerError::EndOfStream)));
    Ok(())
}

#[test]
fn playing_follows_the_clock() -> Result<()> {
    let mut ctx = open(&SyntheticSpec::default())?;
    wait_frame(&mut ctx)?;

    ctx.play();
    assert_eq!(ctx.state(), PlaybackState::Playing);
    let started = Instant::now();
    while started.elapsed() < Duration::from_millis(400) {
        ctx.update()?;
        thread::sleep(Duration::from_millis(2));
    }
    ctx.pause();
    let pts = ctx.get_frame().map(|f| f.pts).unwrap_or(0);
    assert!(pts >= 120, "400ms 只播放到 {}ms", pts);
    assert!(pts <= 600);

    let paused_at = ctx.position();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(ctx.position(), paused_at);
    Ok(())
}

#[test]
fn audio_is_written_to_sink_and_cleared_on_seek() -> Result<()> {
    let spec = SyntheticSpec {
        audio: true,
        ..SyntheticSpec::default()
    };
    let sink = Arc::new(AudioBuffer::new());
    let mut ctx = open_with_sink(&spec, PipelineConfig::default(), Some(sink.clone()))?;
    wait_frame(&mut ctx)?;
    for _ in 0..10 {
        advance(&mut ctx)?;
    }
    assert!(sink.buffered_samples() > 0);
    assert!(ctx.stats().audio_frames_decoded > 0);

    ctx.seek(6500)?;
    wait_frame(&mut ctx)?;
    if let Some(pts) = sink.last_pts() {
        assert!(pts >= 6000, "seek 后仍有旧音频 {}ms", pts);
    }
    for _ in 0..5 {
        advance(&mut ctx)?;
    }
    let last = sink.last_pts().expect("seek 后应有新音频");
    assert!(last >= 6000);
    Ok(())
}

#[test]
fn audio_buffer_stays_bounded_without_a_reader() -> Result<()> {
    let spec = SyntheticSpec {
        audio: true,
        ..SyntheticSpec::default()
    };
    // 每个音频包 20ms * 48kHz * 2 声道 = 1920 个样本
    let sink = Arc::new(AudioBuffer::with_capacity(4 * 1920));
    let mut ctx = open_with_sink(&spec, PipelineConfig::default(), Some(sink.clone()))?;
    wait_frame(&mut ctx)?;

    let deadline = Instant::now() + WAIT;
    while sink.dropped_samples() == 0 && Instant::now() < deadline {
        advance(&mut ctx)?;
    }

    assert!(sink.dropped_samples() > 0);
    assert!(sink.buffered_samples() <= sink.capacity());
    assert_eq!(sink.dropped_samples() % 2, 0);
    Ok(())
}

#[test]
fn close_returns_promptly() -> Result<()> {
    let spec = SyntheticSpec {
        audio: true,
        read_delay_ms: 2,
        decode_delay_ms: 2,
        ..SyntheticSpec::default()
    };
    let mut ctx = open_with_sink(&spec, PipelineConfig::default(), Some(Arc::new(AudioBuffer::new())))?;
    wait_frame(&mut ctx)?;
    ctx.advance_frame()?;

    let started = Instant::now();
    ctx.close();
    assert!(started.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[test]
fn drop_without_close_stops_tasks() -> Result<()> {
    let ctx = open(&SyntheticSpec::default())?;
    let started = Instant::now();
    drop(ctx);
    assert!(started.elapsed() < Duration::from_secs(1));
    Ok(())
}

#[test]
fn invalid_config_is_rejected_before_start() {
    init_logger();
    let spec = SyntheticSpec::default();
    let config = PipelineConfig {
        prefetch_depth: 0,
        ..PipelineConfig::default()
    };
    let result = PlaybackContext::open_with(
        Box::new(SyntheticSource::new(spec.clone())),
        Box::new(SyntheticVideoDecoder::new(&spec)),
        None,
        config,
    );
    match result {
        Err(e) => assert!(e.is_fatal()),
        Ok(_) => panic!("无效配置应该被拒绝"),
    }
}

/// 隐藏视频流的数据源
struct AudioOnly(SyntheticSource);

impl DemuxerSource for AudioOnly {
    fn read_packet(&mut self, slot: &mut Packet) -> myy_playback::Result<ReadStatus> {
        self.0.read_packet(slot)
    }

    fn seek(&mut self, stream_index: usize, target_ms: i64) -> myy_playback::Result<Option<i64>> {
        self.0.seek(stream_index, target_ms)
    }

    fn media_info(&self) -> &MediaInfo {
        self.0.media_info()
    }

    fn video_stream_index(&self) -> Option<usize> {
        None
    }

    fn audio_stream_index(&self) -> Option<usize> {
        self.0.audio_stream_index()
    }

    fn description(&self) -> String {
        "audio only".to_string()
    }
}

#[test]
fn source_without_video_is_rejected() {
    init_logger();
    let spec = SyntheticSpec {
        audio: true,
        ..SyntheticSpec::default()
    };
    let result = PlaybackContext::open_with(
        Box::new(AudioOnly(SyntheticSource::new(spec.clone()))),
        Box::new(SyntheticVideoDecoder::new(&spec)),
        None,
        PipelineConfig::default(),
    );
    assert!(matches!(result, Err(PlayerError::NoVideoStream)));
}

#[test]
fn larger_outstanding_limit_keeps_order() -> Result<()> {
    let config = PipelineConfig {
        prefetch_depth: 4,
        max_outstanding_requests: 2,
        ..PipelineConfig::default()
    };
    let mut ctx = open_with_sink(&SyntheticSpec::default(), config, None)?;
    let mut last = wait_frame(&mut ctx)?.0;
    for _ in 0..40 {
        let pts = advance(&mut ctx)?;
        assert_eq!(pts, last + 40);
        last = pts;
    }
    ctx.seek(4100)?;
    assert_eq!(wait_frame(&mut ctx)?.0, 4120);
    Ok(())
}
