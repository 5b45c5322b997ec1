use crate::core::{
    AudioFrame, MediaInfo, PipelineConfig, PixelFormat, PlaybackClock, PlaybackState, PlayerError, Result,
    VideoFrame,
};
use crate::player::audio_output::AudioSink;
use crate::player::channel::{self, Endpoint};
use crate::player::decode_thread::{AudioChunk, DecodeReply, DecodeRequest, DecodeThread};
use crate::player::decoder::Decoder;
use crate::player::demuxer_source::DemuxerSource;
use crate::player::demuxer_thread::{DemuxReply, DemuxRequest, DemuxerThread};
use crate::player::frame_buffer::{frame_buffer, FrameBuffer};
use crate::player::manager::{ManagerCommand, ManagerEvent, ManagerLinks, ManagerThread};
use crate::player::packet_queue::{PacketPool, SlotCensus};
use crate::player::stats::{PipelineStats, StatsSnapshot};
use crate::player::{log_ctx, ShutdownToken};
use crossbeam::utils::Backoff;
use log::{debug, info};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 音频解码器 + 它写入的输出端
pub type AudioPipeline = (Box<dyn Decoder<Output = AudioFrame>>, Arc<dyn AudioSink>);

/// `get_frame` 返回的当前帧视图
#[derive(Debug, Clone, Copy)]
pub struct CurrentFrame<'a> {
    pub pixels: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: i64,
    pub duration: i64,
    /// 这一帧是否第一次被读取
    pub is_new: bool,
}

/// 所有后台线程；drop 时先发停止信号再按顺序 join
struct Tasks {
    shutdown: ShutdownToken,
    manager: Option<ManagerThread>,
    demuxer: Option<DemuxerThread>,
    video: Option<DecodeThread>,
    audio: Option<DecodeThread>,
}

impl Tasks {
    fn new(shutdown: ShutdownToken) -> Self {
        Self {
            shutdown,
            manager: None,
            demuxer: None,
            video: None,
            audio: None,
        }
    }

    fn stop(&mut self) {
        self.shutdown.signal();
        if let Some(mut manager) = self.manager.take() {
            manager.join();
        }
        if let Some(mut demuxer) = self.demuxer.take() {
            demuxer.join();
        }
        if let Some(mut video) = self.video.take() {
            video.join();
        }
        if let Some(mut audio) = self.audio.take() {
            audio.join();
        }
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 播放上下文 - 消费方（渲染循环）使用的唯一入口
///
/// 打开时启动解封装、视频解码、音频解码（可选）和管理线程；
/// `close()` 或 drop 时通知全部线程退出并等待它们结束。
pub struct PlaybackContext {
    media_info: MediaInfo,
    commands: Endpoint<ManagerCommand, ManagerEvent>,
    frames: FrameBuffer,
    pool: PacketPool,
    stats: Arc<PipelineStats>,
    clock: PlaybackClock,
    audio_sink: Option<Arc<dyn AudioSink>>,
    /// 播放 `audio_sink` 的声卡输出（cpal 流不是 Send，留在创建它的线程）
    #[cfg(feature = "audio-output")]
    audio_output: Option<crate::player::audio_output::AudioOutput>,
    tasks: Tasks,
    poll_interval: Duration,

    state: PlaybackState,
    resume_state: PlaybackState,
    generation: u64,
    ended: bool,
    /// 已请求、还没交换出来的帧数（与管理线程的待发布计数一一对应）
    advances_pending: usize,
}

impl PlaybackContext {
    /// 打开媒体文件：FFmpeg 解封装 + 软件解码
    ///
    /// 启用 `audio-output` 时音频按声卡的实际配置重采样并由 cpal 播放；
    /// 否则（或声卡不可用时）写入有上限的内存缓冲（48kHz 立体声）。
    #[cfg(feature = "ffmpeg")]
    pub fn open_for_playback(path: &str, config: PipelineConfig) -> Result<Self> {
        use crate::player::audio_output::AudioBuffer;
        use crate::player::ffmpeg::FfmpegDemuxer;
        use log::warn;

        config.validate()?;
        let demuxer = FfmpegDemuxer::open(path)?;
        let video = demuxer.video_decoder()?;

        #[cfg(feature = "audio-output")]
        let output = if demuxer.audio_stream_index().is_some() {
            match crate::player::audio_output::AudioOutput::new(48000, 2) {
                Ok(output) => Some(output),
                Err(e) => {
                    warn!("{} ⚠️ 音频输出不可用: {}，音频只写入内存缓冲", log_ctx(), e);
                    None
                }
            }
        } else {
            None
        };
        #[cfg(feature = "audio-output")]
        let (rate, channels, sink): (u32, u16, Arc<dyn AudioSink>) = match &output {
            Some(output) => {
                let (rate, channels) = output.config();
                (rate, channels, output.buffer() as Arc<dyn AudioSink>)
            }
            None => (48000, 2, Arc::new(AudioBuffer::new()) as Arc<dyn AudioSink>),
        };
        #[cfg(not(feature = "audio-output"))]
        let (rate, channels, sink): (u32, u16, Arc<dyn AudioSink>) = (48000, 2, Arc::new(AudioBuffer::new()));

        let audio = match demuxer.audio_decoder(rate, channels) {
            Ok(Some(decoder)) => Some((Box::new(decoder) as Box<dyn Decoder<Output = AudioFrame>>, sink)),
            Ok(None) => None,
            Err(e) => {
                warn!("{} ⚠️ 创建音频解码器失败: {}，继续播放（无声音）", log_ctx(), e);
                None
            }
        };

        #[allow(unused_mut)]
        let mut ctx = Self::open_with(Box::new(demuxer), Box::new(video), audio, config)?;

        #[cfg(feature = "audio-output")]
        if let (Some(mut output), true) = (output, ctx.audio_sink.is_some()) {
            match output.start() {
                Ok(()) => ctx.audio_output = Some(output),
                Err(e) => warn!("{} ⚠️ 启动音频输出失败: {}", log_ctx(), e),
            }
        }
        Ok(ctx)
    }

    /// 用给定的数据源和解码器启动流水线
    ///
    /// 初始化错误（配置无效、没有视频流、线程创建失败）同步返回，此时不会留下任何线程。
    pub fn open_with(
        source: Box<dyn DemuxerSource>,
        video_decoder: Box<dyn Decoder<Output = VideoFrame>>,
        audio: Option<AudioPipeline>,
        config: PipelineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if source.video_stream_index().is_none() {
            return Err(PlayerError::NoVideoStream);
        }

        let media_info = source.media_info().clone();
        info!(
            "{} 🎬 打开播放上下文: {}（{}x{}, {}ms, 音频: {}）",
            log_ctx(),
            source.description(),
            media_info.width,
            media_info.height,
            media_info.duration,
            if audio.is_some() { "是" } else { "否" }
        );

        let poll_interval = config.poll_interval();
        let pool = PacketPool::new(config.packet_pool_capacity, poll_interval)?;
        let stats = Arc::new(PipelineStats::new());
        let shutdown = ShutdownToken::new();
        let (frames, writer) = frame_buffer();

        let (commands, manager_consumer) = channel::create::<ManagerCommand, ManagerEvent>("consumer", poll_interval);
        let (manager_demux, demux_endpoint) = channel::create::<DemuxRequest, DemuxReply>("demux", poll_interval);
        let (manager_video, video_endpoint) =
            channel::create::<DecodeRequest, DecodeReply<VideoFrame>>("video", poll_interval);

        let mut tasks = Tasks::new(shutdown.clone());

        let decode_audio = audio.is_some() && source.audio_stream_index().is_some();
        let (manager_audio, audio_sink) = match audio {
            Some((decoder, sink)) if decode_audio => {
                let (manager_side, decoder_side) =
                    channel::create::<DecodeRequest, DecodeReply<AudioChunk>>("audio", poll_interval);
                tasks.audio = Some(DecodeThread::spawn_audio(
                    decoder,
                    sink.clone(),
                    decoder_side,
                    pool.clone(),
                    stats.clone(),
                    shutdown.clone(),
                )?);
                (Some(manager_side), Some(sink))
            }
            _ => (None, None),
        };

        tasks.video = Some(DecodeThread::spawn_video(
            video_decoder,
            video_endpoint,
            pool.clone(),
            stats.clone(),
            shutdown.clone(),
        )?);

        tasks.demuxer = Some(DemuxerThread::start(
            source,
            demux_endpoint,
            pool.clone(),
            decode_audio,
            &config,
            stats.clone(),
            shutdown.clone(),
        )?);

        let links = ManagerLinks {
            consumer: manager_consumer,
            demux: manager_demux,
            video: manager_video,
            audio: manager_audio,
        };
        tasks.manager = Some(ManagerThread::start(
            links,
            writer,
            &config,
            stats.clone(),
            shutdown,
        )?);

        let clock = PlaybackClock::new();
        clock.set_time(media_info.start_time);
        if media_info.duration > 0 {
            clock.set_limit(Some(media_info.end_time()));
        }

        Ok(Self {
            media_info,
            commands,
            frames,
            pool,
            stats,
            clock,
            audio_sink,
            #[cfg(feature = "audio-output")]
            audio_output: None,
            tasks,
            poll_interval,
            state: PlaybackState::Paused,
            resume_state: PlaybackState::Paused,
            generation: 0,
            ended: false,
            advances_pending: 1, // 第一帧自动发布
        })
    }

    /// 请求下一帧；已经播放到流末尾时返回 `EndOfStream`
    pub fn advance_frame(&mut self) -> Result<()> {
        if self.ended {
            return Err(PlayerError::EndOfStream);
        }
        self.commands.send(ManagerCommand::AdvanceFrame)?;
        self.advances_pending += 1;
        Ok(())
    }

    /// 跳转到 `ts_ms`（毫秒）；旧帧立即作废，第一帧是 PTS >= ts_ms 的帧
    pub fn seek(&mut self, ts_ms: i64) -> Result<()> {
        let mut target = ts_ms.max(self.media_info.start_time);
        if self.media_info.duration > 0 {
            target = target.min(self.media_info.end_time());
        }

        self.generation += 1;
        self.frames.begin_generation(self.generation);
        self.frames.take_unread();
        self.commands.send(ManagerCommand::Seek {
            target_ms: target,
            generation: self.generation,
        })?;

        if self.state != PlaybackState::Seeking {
            self.resume_state = self.state;
        }
        self.state = PlaybackState::Seeking;
        self.ended = false;
        // 管理线程收到 Seek 后同样只保留一次待发布
        self.advances_pending = 1;
        self.clock.pause();
        self.clock.set_time(target);
        debug!("{} 🎯 Seek 请求: {}ms（第 {} 代）", log_ctx(), target, self.generation);
        Ok(())
    }

    /// 交换出最新发布的帧并返回当前帧；还没有任何帧时返回 None
    ///
    /// 同一帧第二次读取时 `is_new` 为 false。
    pub fn get_frame(&mut self) -> Option<CurrentFrame<'_>> {
        self.poll_events();
        self.swap_frame();
        let is_new = self.frames.take_unread();
        self.frames.current().map(|target| CurrentFrame {
            pixels: &target.data,
            width: target.width,
            height: target.height,
            format: target.format,
            pts: target.pts,
            duration: target.duration,
            is_new,
        })
    }

    /// 渲染循环每帧调用：处理事件、交换帧，播放中当前帧显示完毕时请求下一帧
    pub fn update(&mut self) -> Result<()> {
        self.poll_events();
        self.swap_frame();

        if self.state != PlaybackState::Playing || self.advances_pending > 0 || self.ended {
            return Ok(());
        }
        let due = match self.frames.current() {
            Some(current) => self.clock.now() >= current.pts + current.duration.max(1),
            None => false,
        };
        if due {
            self.advance_frame()?;
        }
        Ok(())
    }

    /// 等待最近一次请求的帧被交换出来，超时返回 false
    ///
    /// 还有请求没兑现时，之前交换出来但没读取的帧不算。
    pub fn wait_for_frame(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            self.poll_events();
            self.swap_frame();
            if self.advances_pending == 0 && self.frames.has_unread() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            if backoff.is_completed() {
                thread::sleep(self.poll_interval);
            } else {
                backoff.snooze();
            }
        }
    }

    pub fn play(&mut self) {
        if self.ended {
            info!("{} 已到达流末尾，seek 后才能继续播放", log_ctx());
            return;
        }
        if self.state == PlaybackState::Seeking {
            self.resume_state = PlaybackState::Playing;
            return;
        }
        if let Some(current) = self.frames.current() {
            self.clock.set_time(current.pts);
        }
        self.state = PlaybackState::Playing;
        self.clock.play();
        info!("{} ▶️ 播放", log_ctx());
    }

    pub fn pause(&mut self) {
        if self.state == PlaybackState::Seeking {
            self.resume_state = PlaybackState::Paused;
            return;
        }
        self.state = PlaybackState::Paused;
        self.clock.pause();
        info!("{} ⏸️ 暂停", log_ctx());
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// 当前播放位置（毫秒）
    pub fn position(&self) -> i64 {
        self.clock.now()
    }

    /// 是否已播放到流末尾（下一次 seek 前保持）
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn slot_census(&self) -> SlotCensus {
        self.pool.census()
    }

    pub fn audio_sink(&self) -> Option<Arc<dyn AudioSink>> {
        self.audio_sink.clone()
    }

    /// 停止全部线程并释放资源
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.state == PlaybackState::Stopped {
            return;
        }
        info!("{} ⏹️ 关闭播放上下文", log_ctx());
        self.tasks.stop();
        #[cfg(feature = "audio-output")]
        if let Some(mut output) = self.audio_output.take() {
            output.stop();
        }
        self.state = PlaybackState::Stopped;
        self.clock.pause();
        let census = self.pool.census();
        debug!("{} 关闭后槽位分布: {:?}", log_ctx(), census);
    }

    fn swap_frame(&mut self) {
        if self.frames.swap() {
            self.advances_pending = self.advances_pending.saturating_sub(1);
            let paused = self.state == PlaybackState::Paused || self.state == PlaybackState::Seeking;
            if paused && !self.ended {
                if let Some(current) = self.frames.current() {
                    self.clock.set_time(current.pts);
                }
            }
        }
    }

    /// 处理管理线程发来的事件，忽略过期代号的事件
    fn poll_events(&mut self) {
        while let Some(event) = self.commands.try_receive() {
            match event {
                ManagerEvent::SeekCompleted {
                    generation,
                    target_ms,
                    pts,
                } if generation == self.generation => {
                    debug!("{} ✅ Seek 完成: {}ms -> {:?}ms", log_ctx(), target_ms, pts);
                    self.state = self.resume_state;
                    self.clock.set_time(pts.unwrap_or(target_ms));
                    if self.state == PlaybackState::Playing {
                        self.clock.play();
                    }
                }
                ManagerEvent::EndOfStream {
                    generation,
                    last_pts,
                } if generation == self.generation => {
                    let end = if self.media_info.duration > 0 {
                        self.media_info.end_time()
                    } else {
                        last_pts.unwrap_or_else(|| self.clock.now())
                    };
                    info!("{} 🏁 播放结束，位置固定在 {}ms", log_ctx(), end);
                    self.ended = true;
                    self.state = PlaybackState::Paused;
                    self.clock.pin(end);
                }
                stale => debug!("{} 忽略过期事件: {:?}", log_ctx(), stale),
            }
        }
    }
}

impl Drop for PlaybackContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}
