use crate::core::{PipelineConfig, PlayerError, Result, StreamKind, VideoFrame};
use crate::player::channel::Endpoint;
use crate::player::decode_thread::{AudioChunk, DecodeReply, DecodeRequest, NoFrameReason};
use crate::player::demuxer_thread::{DemuxReply, DemuxRequest};
use crate::player::frame_buffer::FrameWriter;
use crate::player::stats::PipelineStats;
use crate::player::{log_ctx, ShutdownToken};
use crossbeam_channel::{never, select, Receiver};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 消费方 -> 管理线程
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerCommand {
    /// 显示下一帧
    AdvanceFrame,
    /// 跳转；代号由消费方分配，单调递增
    Seek { target_ms: i64, generation: u64 },
}

/// 管理线程 -> 消费方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerEvent {
    /// seek 的第一帧已发布（目标超出流末尾且没有任何帧时 pts 为 None）
    SeekCompleted {
        generation: u64,
        target_ms: i64,
        pts: Option<i64>,
    },
    /// 本代的所有帧都已发布，每代只发送一次
    EndOfStream {
        generation: u64,
        last_pts: Option<i64>,
    },
}

/// 管理线程持有的通道端点
pub struct ManagerLinks {
    pub consumer: Endpoint<ManagerEvent, ManagerCommand>,
    pub demux: Endpoint<DemuxRequest, DemuxReply>,
    pub video: Endpoint<DecodeRequest, DecodeReply<VideoFrame>>,
    pub audio: Option<Endpoint<DecodeRequest, DecodeReply<AudioChunk>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// 正常预取和发布
    Steady,
    /// 等待 seek 完成：先等旧请求全部回复，再跳过 PTS 小于目标的帧
    Seeking {
        target_ms: i64,
        scanned: usize,
        demux_done: bool,
    },
    /// 已发送流结束，等待 seek
    Idle,
}

/// 管理线程 - 维护预取窗口、按顺序发布帧、处理 seek
pub struct ManagerThread {
    thread_handle: Option<JoinHandle<()>>,
}

impl ManagerThread {
    pub fn start(
        links: ManagerLinks,
        writer: FrameWriter,
        config: &PipelineConfig,
        stats: Arc<PipelineStats>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let manager = Manager::new(links, writer, config.clone(), stats, shutdown);
        let thread_handle = thread::Builder::new()
            .name("playback-manager".to_string())
            .spawn(move || manager.run())?;

        Ok(Self {
            thread_handle: Some(thread_handle),
        })
    }

    /// 等待线程退出（调用前应先发出停止信号）
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ 管理线程 panic", log_ctx());
            }
        }
    }
}

impl Drop for ManagerThread {
    fn drop(&mut self) {
        self.join();
    }
}

struct Manager {
    links: ManagerLinks,
    writer: FrameWriter,
    config: PipelineConfig,
    stats: Arc<PipelineStats>,
    shutdown: ShutdownToken,

    generation: u64,
    mode: Mode,

    // 预取计数
    packets_requested: usize,
    packets_buffered: usize, // 本代已解封装、还没请求解码的视频包
    frames_requested: usize,
    ready: VecDeque<VideoFrame>,
    audio_requested: usize,
    /// seek 之前发出、还没回复的解码请求
    stale_decodes: usize,

    pending_advances: usize,
    demux_eos: bool,
    video_eos: bool,
    audio_eos: bool,
    eos_sent: bool,
    consecutive_no_packet: usize,
    last_skipped: Option<VideoFrame>,
    last_delivered: Option<i64>,
}

impl Manager {
    fn new(
        links: ManagerLinks,
        writer: FrameWriter,
        config: PipelineConfig,
        stats: Arc<PipelineStats>,
        shutdown: ShutdownToken,
    ) -> Self {
        let has_audio = links.audio.is_some();
        Self {
            links,
            writer,
            config,
            stats,
            shutdown,
            generation: 0,
            mode: Mode::Steady,
            packets_requested: 0,
            packets_buffered: 0,
            frames_requested: 0,
            ready: VecDeque::new(),
            audio_requested: 0,
            stale_decodes: 0,
            // 打开后自动发布第一帧
            pending_advances: 1,
            demux_eos: false,
            video_eos: false,
            audio_eos: !has_audio,
            eos_sent: false,
            consecutive_no_packet: 0,
            last_skipped: None,
            last_delivered: None,
        }
    }

    fn run(mut self) {
        info!("{} 🎮 管理线程启动（预取深度 {}）", log_ctx(), self.config.prefetch_depth);

        let consumer_rx = self.links.consumer.receiver().clone();
        let demux_rx = self.links.demux.receiver().clone();
        let video_rx = self.links.video.receiver().clone();
        let audio_rx: Receiver<DecodeReply<AudioChunk>> = match &self.links.audio {
            Some(audio) => audio.receiver().clone(),
            None => never(),
        };
        let poll = self.config.poll_interval();

        let result = loop {
            if self.shutdown.is_signalled() {
                break Ok(());
            }

            if let Err(e) = self.step() {
                break Err(e);
            }

            let handled = select! {
                recv(consumer_rx) -> msg => match msg {
                    Ok(command) => self.handle_command(command),
                    Err(_) => Err(PlayerError::ChannelClosed("consumer")),
                },
                recv(demux_rx) -> msg => match msg {
                    Ok(reply) => self.handle_demux_reply(reply),
                    Err(_) => Err(PlayerError::ChannelClosed("demux")),
                },
                recv(video_rx) -> msg => match msg {
                    Ok(reply) => {
                        self.handle_video_reply(reply);
                        Ok(())
                    }
                    Err(_) => Err(PlayerError::ChannelClosed("video")),
                },
                recv(audio_rx) -> msg => match msg {
                    Ok(reply) => {
                        self.handle_audio_reply(reply);
                        Ok(())
                    }
                    Err(_) => Err(PlayerError::ChannelClosed("audio")),
                },
                default(poll) => Ok(()),
            };

            if let Err(e) = handled {
                break Err(e);
            }
        };

        match result {
            Ok(()) | Err(PlayerError::ShutdownRequested) => {}
            Err(e) if self.shutdown.is_signalled() => debug!("{} 停止过程中通道关闭: {}", log_ctx(), e),
            Err(e) => error!("{} ❌ 管理线程异常退出: {}", log_ctx(), e),
        }

        let snapshot = self.stats.snapshot();
        info!(
            "{} 🛑 管理线程退出（解码 {} 帧，发布 {} 帧，丢弃过期回复 {} 个）",
            log_ctx(),
            snapshot.frames_decoded,
            snapshot.frames_delivered,
            snapshot.stale_replies
        );
    }

    /// 一轮调度：补充请求、发布等待中的帧、检查流结束
    fn step(&mut self) -> Result<()> {
        self.pump_requests()?;
        self.deliver_pending();
        self.check_end_of_stream()
    }

    /// seek 之前发出的请求都已回复，才能发送新一代的请求
    ///
    /// 旧的解码请求会从解封装队列取包，必须在新一代的包入队之前全部回复。
    fn can_request(&self) -> bool {
        match self.mode {
            Mode::Steady => true,
            Mode::Seeking { demux_done, .. } => demux_done && self.stale_decodes == 0,
            Mode::Idle => false,
        }
    }

    fn pump_requests(&mut self) -> Result<()> {
        if !self.can_request() {
            return Ok(());
        }
        let depth = self.config.prefetch_depth;
        let max_outstanding = self.config.max_outstanding_requests;

        // 解封装：已请求 + 已缓冲的视频包 < 预取深度
        while !self.demux_eos
            && self.packets_requested < max_outstanding
            && self.packets_requested + self.packets_buffered < depth
        {
            self.links.demux.send(DemuxRequest::ReadPacket {
                generation: self.generation,
            })?;
            self.packets_requested += 1;
            self.stats.observe_outstanding_demux(self.packets_requested);
            self.stats
                .observe_video_window(self.packets_requested + self.packets_buffered);
        }

        // 解码：已请求 + 已就绪的帧 < 预取深度
        while self.packets_buffered > 0
            && self.frames_requested < max_outstanding
            && self.frames_requested + self.ready.len() < depth
        {
            self.links.video.send(DecodeRequest::Decode {
                generation: self.generation,
            })?;
            self.packets_buffered -= 1;
            self.frames_requested += 1;
        }

        // 流结束：取出解码器内部缓存的帧
        if self.demux_eos
            && self.packets_buffered == 0
            && !self.video_eos
            && self.frames_requested == 0
            && self.ready.len() < depth
        {
            self.links.video.send(DecodeRequest::Drain {
                generation: self.generation,
            })?;
            self.frames_requested += 1;
        }

        if self.demux_eos && !self.audio_eos && self.audio_requested == 0 {
            if let Some(audio) = &self.links.audio {
                audio.send(DecodeRequest::Drain {
                    generation: self.generation,
                })?;
                self.audio_requested += 1;
            }
        }
        Ok(())
    }

    /// 有等待中的前进请求、就绪帧、且下一帧缓冲空闲时发布
    fn deliver_pending(&mut self) {
        if matches!(self.mode, Mode::Seeking { .. }) {
            return;
        }
        while self.pending_advances > 0 && !self.ready.is_empty() {
            let mut target = match self.writer.try_claim(self.generation) {
                Some(target) => target,
                None => break,
            };
            let frame = match self.ready.pop_front() {
                Some(frame) => frame,
                None => {
                    self.writer.abandon(target);
                    break;
                }
            };

            target.write_frame(&frame);
            if self.writer.publish(target, self.generation) {
                self.pending_advances -= 1;
                self.last_delivered = Some(frame.pts);
                self.stats.frame_delivered();
            } else {
                // 消费方已经开始新的 seek，Seek 命令随后到达
                debug!("{} 帧 {}ms 发布时代号已过期，丢弃", log_ctx(), frame.pts);
                break;
            }
        }
    }

    fn check_end_of_stream(&mut self) -> Result<()> {
        if self.eos_sent || self.mode != Mode::Steady {
            return Ok(());
        }
        let drained = self.demux_eos
            && self.video_eos
            && self.audio_eos
            && self.packets_requested == 0
            && self.packets_buffered == 0
            && self.frames_requested == 0
            && self.audio_requested == 0
            && self.ready.is_empty();
        if !drained {
            return Ok(());
        }

        info!(
            "{} 🏁 第 {} 代播放到流末尾，最后一帧 {:?}ms",
            log_ctx(),
            self.generation,
            self.last_delivered
        );
        self.eos_sent = true;
        self.mode = Mode::Idle;
        self.links.consumer.send(ManagerEvent::EndOfStream {
            generation: self.generation,
            last_pts: self.last_delivered,
        })
    }

    fn handle_command(&mut self, command: ManagerCommand) -> Result<()> {
        match command {
            ManagerCommand::AdvanceFrame => {
                self.pending_advances += 1;
                Ok(())
            }
            ManagerCommand::Seek {
                target_ms,
                generation,
            } => self.begin_seek(target_ms, generation),
        }
    }

    /// 开始 seek：清空就绪帧，flush 解码器，让解封装线程清空队列并 seek
    fn begin_seek(&mut self, target_ms: i64, generation: u64) -> Result<()> {
        info!(
            "{} 🎯 Seek 到 {}ms（第 {} 代，丢弃 {} 个就绪帧，{} 个缓冲包）",
            log_ctx(),
            target_ms,
            generation,
            self.ready.len(),
            self.packets_buffered
        );

        self.generation = generation;
        self.stats.seek_started();
        self.mode = Mode::Seeking {
            target_ms,
            scanned: 0,
            demux_done: false,
        };

        self.ready.clear();
        self.packets_buffered = 0;
        self.stale_decodes = self.frames_requested + self.audio_requested;
        self.pending_advances = 1;
        self.demux_eos = false;
        self.video_eos = false;
        self.audio_eos = self.links.audio.is_none();
        self.eos_sent = false;
        self.consecutive_no_packet = 0;
        self.last_skipped = None;

        self.links.video.send(DecodeRequest::Flush { generation })?;
        if let Some(audio) = &self.links.audio {
            audio.send(DecodeRequest::Flush { generation })?;
        }
        self.links.demux.send(DemuxRequest::Seek {
            target_ms,
            generation,
        })
    }

    fn finish_seek(&mut self, target_ms: i64, frame: Option<VideoFrame>) -> Result<()> {
        let pts = frame.as_ref().map(|f| f.pts);
        if let Some(frame) = frame {
            self.ready.push_back(frame);
            self.stats.observe_ready_frames(self.ready.len());
        }
        self.mode = Mode::Steady;
        self.last_skipped = None;

        info!(
            "{} ✅ Seek 完成: 目标 {}ms，第一帧 {:?}ms（本次解码 {} 帧）",
            log_ctx(),
            target_ms,
            pts,
            self.stats.snapshot().seek_frames_decoded
        );
        self.links.consumer.send(ManagerEvent::SeekCompleted {
            generation: self.generation,
            target_ms,
            pts,
        })
    }

    fn handle_demux_reply(&mut self, reply: DemuxReply) -> Result<()> {
        if !matches!(reply, DemuxReply::Seeked { .. }) {
            self.packets_requested = self.packets_requested.saturating_sub(1);
        }
        if reply.generation() != self.generation {
            self.stats.stale_reply();
            return Ok(());
        }

        match reply {
            DemuxReply::PacketReady { kind, .. } => {
                self.consecutive_no_packet = 0;
                match kind {
                    StreamKind::Video => self.packets_buffered += 1,
                    StreamKind::Audio => {
                        // 音频包立即解码
                        if let Some(audio) = &self.links.audio {
                            audio.send(DecodeRequest::Decode {
                                generation: self.generation,
                            })?;
                            self.audio_requested += 1;
                        }
                    }
                }
            }
            DemuxReply::NoPacket { end_of_stream, .. } => {
                if end_of_stream {
                    debug!("{} 📄 解封装到达流末尾", log_ctx());
                    self.demux_eos = true;
                } else {
                    self.consecutive_no_packet += 1;
                    if self.consecutive_no_packet >= self.config.max_consecutive_read_errors.max(1) {
                        warn!(
                            "{} ⚠️ 连续 {} 次读包失败，按流结束处理",
                            log_ctx(),
                            self.consecutive_no_packet
                        );
                        self.demux_eos = true;
                    }
                }
            }
            DemuxReply::Seeked { landed_ms, .. } => {
                if let Mode::Seeking { demux_done, .. } = &mut self.mode {
                    *demux_done = true;
                    debug!("{} 解封装 seek 落点 {:?}ms", log_ctx(), landed_ms);
                }
            }
        }
        Ok(())
    }

    fn handle_video_reply(&mut self, reply: DecodeReply<VideoFrame>) {
        self.frames_requested = self.frames_requested.saturating_sub(1);
        if reply.generation() != self.generation {
            self.stale_decodes = self.stale_decodes.saturating_sub(1);
            self.stats.stale_reply();
            return;
        }

        let result = match reply {
            DecodeReply::FrameReady { frame, .. } => self.accept_frame(frame),
            DecodeReply::NoFrame { reason, .. } => {
                if reason == NoFrameReason::EndOfStream {
                    self.video_eos = true;
                    self.seek_hit_end()
                } else {
                    Ok(())
                }
            }
        };
        if let Err(e) = result {
            debug!("{} 通知消费方失败: {}", log_ctx(), e);
        }
    }

    /// 新解出的帧：seek 中跳过目标之前的帧，否则进入就绪队列
    fn accept_frame(&mut self, frame: VideoFrame) -> Result<()> {
        match &mut self.mode {
            Mode::Seeking {
                target_ms, scanned, ..
            } => {
                let target = *target_ms;
                if frame.pts < target && *scanned < self.config.seek_scan_limit {
                    *scanned += 1;
                    self.stats.frame_skipped();
                    self.last_skipped = Some(frame);
                    return Ok(());
                }
                if frame.pts < target {
                    warn!(
                        "{} ⚠️ 跳过 {} 帧仍未到达 {}ms，使用 {}ms",
                        log_ctx(),
                        self.config.seek_scan_limit,
                        target,
                        frame.pts
                    );
                }
                self.finish_seek(target, Some(frame))
            }
            Mode::Steady | Mode::Idle => {
                self.ready.push_back(frame);
                self.stats.observe_ready_frames(self.ready.len());
                Ok(())
            }
        }
    }

    /// seek 目标超出流末尾：用最后一帧结束 seek
    fn seek_hit_end(&mut self) -> Result<()> {
        if let Mode::Seeking { target_ms, .. } = self.mode {
            let frame = self.last_skipped.take();
            return self.finish_seek(target_ms, frame);
        }
        Ok(())
    }

    fn handle_audio_reply(&mut self, reply: DecodeReply<AudioChunk>) {
        self.audio_requested = self.audio_requested.saturating_sub(1);
        if reply.generation() != self.generation {
            self.stale_decodes = self.stale_decodes.saturating_sub(1);
            self.stats.stale_reply();
            return;
        }
        match reply {
            DecodeReply::FrameReady { .. } => {}
            DecodeReply::NoFrame {
                reason: NoFrameReason::EndOfStream,
                ..
            } => self.audio_eos = true,
            DecodeReply::NoFrame { .. } => {}
        }
    }
}
