use crate::core::{PipelineConfig, PlayerError, Result, StreamKind};
use crate::player::channel::Endpoint;
use crate::player::demuxer_source::{DemuxerSource, ReadStatus};
use crate::player::packet_queue::PacketPool;
use crate::player::stats::PipelineStats;
use crate::player::{log_ctx, ShutdownToken};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 管理线程 -> 解封装线程
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxRequest {
    /// 读一个包放进对应的解封装队列
    ReadPacket { generation: u64 },
    /// 清空解封装队列并 seek 容器
    Seek { target_ms: i64, generation: u64 },
}

/// 解封装线程 -> 管理线程
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxReply {
    PacketReady {
        kind: StreamKind,
        pts_ms: Option<i64>,
        generation: u64,
    },
    NoPacket {
        end_of_stream: bool,
        generation: u64,
    },
    Seeked {
        generation: u64,
        landed_ms: Option<i64>,
    },
}

impl DemuxReply {
    pub fn generation(&self) -> u64 {
        match *self {
            DemuxReply::PacketReady { generation, .. }
            | DemuxReply::NoPacket { generation, .. }
            | DemuxReply::Seeked { generation, .. } => generation,
        }
    }
}

/// 解封装线程
///
/// 一次只处理一个请求。读包前先从空闲池取槽位，池空时阻塞，这就是整条流水线的背压。
pub struct DemuxerThread {
    thread_handle: Option<JoinHandle<()>>,
}

struct DemuxContext {
    source: Box<dyn DemuxerSource>,
    endpoint: Endpoint<DemuxReply, DemuxRequest>,
    pool: PacketPool,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    max_read_errors: usize,
    stats: Arc<PipelineStats>,
    shutdown: ShutdownToken,
}

impl DemuxerThread {
    /// 启动解封装线程；`decode_audio` 为 false 时音频包直接回收
    pub fn start(
        source: Box<dyn DemuxerSource>,
        endpoint: Endpoint<DemuxReply, DemuxRequest>,
        pool: PacketPool,
        decode_audio: bool,
        config: &PipelineConfig,
        stats: Arc<PipelineStats>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let video_index = source.video_stream_index();
        let audio_index = if decode_audio {
            source.audio_stream_index()
        } else {
            None
        };

        let ctx = DemuxContext {
            source,
            endpoint,
            pool,
            video_index,
            audio_index,
            max_read_errors: config.max_consecutive_read_errors.max(1),
            stats,
            shutdown,
        };

        let thread_handle = thread::Builder::new()
            .name("demuxer".to_string())
            .spawn(move || Self::demux_loop(ctx))?;

        Ok(Self {
            thread_handle: Some(thread_handle),
        })
    }

    /// 等待线程退出（调用前应先发出停止信号）
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ Demuxer 线程 panic", log_ctx());
            }
        }
    }

    fn demux_loop(mut ctx: DemuxContext) {
        info!("{} 🎬 Demuxer 线程启动: {}", log_ctx(), ctx.source.description());

        let mut requests: usize = 0;

        loop {
            let request = match ctx.endpoint.receive(&ctx.shutdown) {
                Ok(request) => request,
                Err(PlayerError::ShutdownRequested) => break,
                Err(e) => {
                    debug!("{} Demuxer 请求通道结束: {}", log_ctx(), e);
                    break;
                }
            };
            requests += 1;

            let reply = match request {
                DemuxRequest::ReadPacket { generation } => match ctx.read_one(generation) {
                    Ok(reply) => reply,
                    Err(PlayerError::ShutdownRequested) => break,
                    Err(e) => {
                        error!("{} ❌ 读包失败: {}", log_ctx(), e);
                        DemuxReply::NoPacket {
                            end_of_stream: false,
                            generation,
                        }
                    }
                },
                DemuxRequest::Seek {
                    target_ms,
                    generation,
                } => ctx.seek(target_ms, generation),
            };

            if ctx.endpoint.send(reply).is_err() {
                debug!("{} 管理线程已退出，Demuxer 停止", log_ctx());
                break;
            }
        }

        info!("{} 🛑 Demuxer 线程退出（共处理 {} 个请求）", log_ctx(), requests);
    }
}

impl DemuxContext {
    /// 读取一个解码器需要的包
    ///
    /// 不需要的流（字幕、未解码的音频）的包直接复用槽位继续读；
    /// 临时错误跳过，连续超过上限后回复 "无包"。
    fn read_one(&mut self, generation: u64) -> Result<DemuxReply> {
        let mut slot = self.pool.free.acquire(&self.shutdown)?;
        let mut consecutive_errors = 0;

        loop {
            if self.shutdown.is_signalled() {
                self.pool.free.release(slot);
                return Err(PlayerError::ShutdownRequested);
            }

            match self.source.read_packet(&mut slot) {
                Ok(ReadStatus::Packet) => {
                    let kind = if Some(slot.stream_index) == self.video_index {
                        StreamKind::Video
                    } else if Some(slot.stream_index) == self.audio_index {
                        StreamKind::Audio
                    } else {
                        continue;
                    };

                    slot.generation = generation;
                    let pts_ms = slot.pts_ms();
                    self.stats.packet_demuxed(kind);
                    match kind {
                        StreamKind::Video => self.pool.video.release(slot),
                        StreamKind::Audio => self.pool.audio.release(slot),
                    }
                    return Ok(DemuxReply::PacketReady {
                        kind,
                        pts_ms,
                        generation,
                    });
                }
                Ok(ReadStatus::EndOfStream) => {
                    debug!("{} 📄 Demuxer 到达文件末尾", log_ctx());
                    self.pool.free.release(slot);
                    return Ok(DemuxReply::NoPacket {
                        end_of_stream: true,
                        generation,
                    });
                }
                Err(e) if e.is_transient() => {
                    self.stats.read_error();
                    consecutive_errors += 1;
                    warn!("{} ⚠️ 读包临时错误（已跳过 {} 次）: {}", log_ctx(), consecutive_errors, e);
                    if consecutive_errors >= self.max_read_errors {
                        self.pool.free.release(slot);
                        return Ok(DemuxReply::NoPacket {
                            end_of_stream: false,
                            generation,
                        });
                    }
                }
                Err(e) => {
                    self.stats.read_error();
                    self.pool.free.release(slot);
                    return Err(e);
                }
            }
        }
    }

    /// 丢弃已解封装但未解码的包，seek 容器到目标之前的关键帧
    fn seek(&mut self, target_ms: i64, generation: u64) -> DemuxReply {
        let (video, audio) = self.pool.recycle_demuxed();
        info!(
            "{} ⏩ Demuxer Seek 到 {}ms（第 {} 代），丢弃 {} 个视频包、{} 个音频包",
            log_ctx(),
            target_ms,
            generation,
            video,
            audio
        );

        let stream_index = self.video_index.unwrap_or(0);
        let landed_ms = match self.source.seek(stream_index, target_ms) {
            Ok(landed) => landed,
            Err(e) => {
                error!("{} ❌ Seek 失败: {}", log_ctx(), e);
                None
            }
        };

        DemuxReply::Seeked {
            generation,
            landed_ms,
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop 时线程仍在运行，等待退出", log_ctx());
            self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::channel;
    use crate::player::synthetic::{SyntheticSource, SyntheticSpec};
    use std::time::{Duration, Instant};

    const POLL: Duration = Duration::from_millis(5);
    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        thread: DemuxerThread,
        manager: Endpoint<DemuxRequest, DemuxReply>,
        pool: PacketPool,
        shutdown: ShutdownToken,
    }

    impl Harness {
        fn start(spec: SyntheticSpec, decode_audio: bool) -> Self {
            let pool = PacketPool::new(8, POLL).unwrap();
            let (manager, demux) = channel::create::<DemuxRequest, DemuxReply>("demux", POLL);
            let shutdown = ShutdownToken::new();
            let thread = DemuxerThread::start(
                Box::new(SyntheticSource::new(spec)),
                demux,
                pool.clone(),
                decode_audio,
                &PipelineConfig::default(),
                Arc::new(PipelineStats::new()),
                shutdown.clone(),
            )
            .unwrap();
            Self {
                thread,
                manager,
                pool,
                shutdown,
            }
        }

        fn request(&self, request: DemuxRequest) -> DemuxReply {
            self.manager.send(request).unwrap();
            self.manager.receive_timeout(WAIT).unwrap().expect("demuxer reply")
        }

        fn read(&self, generation: u64) -> DemuxReply {
            self.request(DemuxRequest::ReadPacket { generation })
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.shutdown.signal();
            self.thread.join();
        }
    }

    #[test]
    fn test_read_moves_slot_to_video_queue() {
        let h = Harness::start(SyntheticSpec::default(), false);
        assert_eq!(
            h.read(0),
            DemuxReply::PacketReady {
                kind: StreamKind::Video,
                pts_ms: Some(0),
                generation: 0,
            }
        );
        assert_eq!(h.pool.video.len(), 1);
        assert_eq!(h.pool.free.len(), 7);
        assert!(h.pool.census().is_conserved());
    }

    #[test]
    fn test_undecoded_streams_are_skipped() {
        let spec = SyntheticSpec {
            audio: true,
            data_stream: true,
            ..SyntheticSpec::default()
        };
        let h = Harness::start(spec, false);
        for i in 0..5 {
            match h.read(0) {
                DemuxReply::PacketReady { kind, pts_ms, .. } => {
                    assert_eq!(kind, StreamKind::Video);
                    assert_eq!(pts_ms, Some(i * 40));
                }
                other => panic!("意外的回复: {:?}", other),
            }
        }
        assert!(h.pool.audio.is_empty());
        assert_eq!(h.pool.census().total(), 8);
    }

    #[test]
    fn test_audio_packets_go_to_audio_queue() {
        let spec = SyntheticSpec {
            audio: true,
            ..SyntheticSpec::default()
        };
        let h = Harness::start(spec, true);
        let mut audio = 0;
        for _ in 0..6 {
            if let DemuxReply::PacketReady {
                kind: StreamKind::Audio,
                ..
            } = h.read(0)
            {
                audio += 1;
            }
        }
        assert!(audio > 0);
        assert_eq!(h.pool.audio.len(), audio);
    }

    #[test]
    fn test_seek_recycles_demuxed_packets() {
        let h = Harness::start(SyntheticSpec::default(), false);
        for _ in 0..3 {
            h.read(0);
        }
        assert_eq!(h.pool.video.len(), 3);

        let reply = h.request(DemuxRequest::Seek {
            target_ms: 5000,
            generation: 1,
        });
        assert_eq!(
            reply,
            DemuxReply::Seeked {
                generation: 1,
                landed_ms: Some(4000),
            }
        );
        assert!(h.pool.video.is_empty());
        assert_eq!(h.pool.free.len(), 8);

        match h.read(1) {
            DemuxReply::PacketReady { pts_ms, generation, .. } => {
                assert_eq!(pts_ms, Some(4000));
                assert_eq!(generation, 1);
            }
            other => panic!("意外的回复: {:?}", other),
        }
    }

    #[test]
    fn test_end_of_stream_reply() {
        let spec = SyntheticSpec {
            duration_ms: 80,
            ..SyntheticSpec::default()
        };
        let h = Harness::start(spec, false);
        assert!(matches!(h.read(0), DemuxReply::PacketReady { .. }));
        assert!(matches!(h.read(0), DemuxReply::PacketReady { .. }));
        assert_eq!(
            h.read(0),
            DemuxReply::NoPacket {
                end_of_stream: true,
                generation: 0,
            }
        );
        assert_eq!(h.pool.free.len(), 6);
    }

    #[test]
    fn test_shutdown_interrupts_blocked_acquire() {
        let mut h = Harness::start(SyntheticSpec::default(), false);
        for _ in 0..8 {
            h.read(0);
        }
        assert!(h.pool.free.is_empty());

        // 池已空，这个请求会阻塞在取槽位上
        h.manager.send(DemuxRequest::ReadPacket { generation: 0 }).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(h.manager.try_receive().is_none());

        let started = Instant::now();
        h.shutdown.signal();
        h.thread.join();
        assert!(started.elapsed() < WAIT);
        assert!(h.pool.census().is_conserved());
    }
}
