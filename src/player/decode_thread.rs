use crate::core::{AudioFrame, PlayerError, Result, StreamKind, VideoFrame};
use crate::player::audio_output::AudioSink;
use crate::player::channel::Endpoint;
use crate::player::decoder::{DecodeOutcome, Decoder};
use crate::player::packet_queue::PacketPool;
use crate::player::stats::PipelineStats;
use crate::player::{log_ctx, ShutdownToken};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// 管理线程 -> 解码线程
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeRequest {
    /// 取下一个已解封装的包解码
    Decode { generation: u64 },
    /// 流结束后取出解码器内部缓存的帧
    Drain { generation: u64 },
    /// seek 后丢弃解码器状态，不回复
    Flush { generation: u64 },
}

/// 没有输出帧的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoFrameReason {
    NeedsMoreInput,
    EndOfStream,
    DecodeError,
    /// 队列里没有包（被 seek 清空了）
    NoPacket,
    /// 取到的包属于另一代，已直接回收
    StalePacket,
}

/// 解码线程 -> 管理线程
#[derive(Debug)]
pub enum DecodeReply<T> {
    FrameReady { frame: T, generation: u64 },
    NoFrame { reason: NoFrameReason, generation: u64 },
}

impl<T> DecodeReply<T> {
    pub fn generation(&self) -> u64 {
        match self {
            DecodeReply::FrameReady { generation, .. } | DecodeReply::NoFrame { generation, .. } => *generation,
        }
    }
}

/// 已写入音频输出的一帧的摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioChunk {
    pub pts: i64,
    pub samples: usize,
}

/// 解码线程（视频或音频各一个）
///
/// 请求严格按提交顺序处理，所以输出顺序等于输入顺序。
pub struct DecodeThread {
    kind: StreamKind,
    thread_handle: Option<JoinHandle<()>>,
}

impl DecodeThread {
    /// 视频解码线程：帧通过回复交给管理线程
    pub fn spawn_video(
        decoder: Box<dyn Decoder<Output = VideoFrame>>,
        endpoint: Endpoint<DecodeReply<VideoFrame>, DecodeRequest>,
        pool: PacketPool,
        stats: Arc<PipelineStats>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let thread_handle = thread::Builder::new()
            .name("video-decoder".to_string())
            .spawn(move || {
                decode_loop(
                    StreamKind::Video,
                    decoder,
                    endpoint,
                    pool,
                    stats,
                    shutdown,
                    |frame| frame,
                    || {},
                )
            })?;

        Ok(Self {
            kind: StreamKind::Video,
            thread_handle: Some(thread_handle),
        })
    }

    /// 音频解码线程：帧直接写入输出端，回复只带摘要；flush 同时清空输出端
    pub fn spawn_audio(
        decoder: Box<dyn Decoder<Output = AudioFrame>>,
        sink: Arc<dyn AudioSink>,
        endpoint: Endpoint<DecodeReply<AudioChunk>, DecodeRequest>,
        pool: PacketPool,
        stats: Arc<PipelineStats>,
        shutdown: ShutdownToken,
    ) -> Result<Self> {
        let flush_sink = sink.clone();
        let thread_handle = thread::Builder::new()
            .name("audio-decoder".to_string())
            .spawn(move || {
                decode_loop(
                    StreamKind::Audio,
                    decoder,
                    endpoint,
                    pool,
                    stats,
                    shutdown,
                    move |frame: AudioFrame| {
                        sink.write(&frame);
                        AudioChunk {
                            pts: frame.pts,
                            samples: frame.data.len(),
                        }
                    },
                    move || flush_sink.clear(),
                )
            })?;

        Ok(Self {
            kind: StreamKind::Audio,
            thread_handle: Some(thread_handle),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// 等待线程退出（调用前应先发出停止信号）
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                error!("{} ❌ {} 解码线程 panic", log_ctx(), self.kind.as_str());
            }
        }
    }
}

impl Drop for DecodeThread {
    fn drop(&mut self) {
        self.join();
    }
}

#[allow(clippy::too_many_arguments)]
fn decode_loop<F, T>(
    kind: StreamKind,
    mut decoder: Box<dyn Decoder<Output = F>>,
    endpoint: Endpoint<DecodeReply<T>, DecodeRequest>,
    pool: PacketPool,
    stats: Arc<PipelineStats>,
    shutdown: ShutdownToken,
    mut deliver: impl FnMut(F) -> T,
    mut on_flush: impl FnMut(),
) where
    F: Send + 'static,
{
    info!("{} 🎞️ {} 解码线程启动: {}", log_ctx(), kind.as_str(), decoder.description());

    let input = match kind {
        StreamKind::Video => pool.video.clone(),
        StreamKind::Audio => pool.audio.clone(),
    };
    let mut decoded: u64 = 0;
    let mut errors: u64 = 0;

    loop {
        let request = match endpoint.receive(&shutdown) {
            Ok(request) => request,
            Err(PlayerError::ShutdownRequested) => break,
            Err(e) => {
                debug!("{} {} 解码请求通道结束: {}", log_ctx(), kind.as_str(), e);
                break;
            }
        };

        let (outcome, generation) = match request {
            DecodeRequest::Decode { generation } => {
                let packet = match input.try_acquire() {
                    Some(packet) => packet,
                    None => {
                        let reply = DecodeReply::NoFrame {
                            reason: NoFrameReason::NoPacket,
                            generation,
                        };
                        if endpoint.send(reply).is_err() {
                            break;
                        }
                        continue;
                    }
                };
                if packet.generation != generation {
                    warn!(
                        "{} ⚠️ {} 包属于第 {} 代，请求是第 {} 代，丢弃",
                        log_ctx(),
                        kind.as_str(),
                        packet.generation,
                        generation
                    );
                    pool.free.release(packet);
                    let reply = DecodeReply::NoFrame {
                        reason: NoFrameReason::StalePacket,
                        generation,
                    };
                    if endpoint.send(reply).is_err() {
                        break;
                    }
                    continue;
                }
                let outcome = decoder.decode(&packet);
                pool.free.release(packet);
                (outcome, generation)
            }
            DecodeRequest::Drain { generation } => (decoder.drain(), generation),
            DecodeRequest::Flush { generation } => {
                decoder.flush();
                on_flush();
                debug!("{} 🧹 {} 解码器已 flush（第 {} 代）", log_ctx(), kind.as_str(), generation);
                continue;
            }
        };

        let reply = match outcome {
            Ok(DecodeOutcome::Frame(frame)) => {
                decoded += 1;
                stats.frame_decoded(kind);
                DecodeReply::FrameReady {
                    frame: deliver(frame),
                    generation,
                }
            }
            Ok(DecodeOutcome::NeedsMoreInput) => DecodeReply::NoFrame {
                reason: NoFrameReason::NeedsMoreInput,
                generation,
            },
            Ok(DecodeOutcome::EndOfStream) => DecodeReply::NoFrame {
                reason: NoFrameReason::EndOfStream,
                generation,
            },
            Err(e) => {
                errors += 1;
                stats.decode_error();
                warn!("{} ⚠️ {} 解码错误（已跳过）: {}", log_ctx(), kind.as_str(), e);
                DecodeReply::NoFrame {
                    reason: NoFrameReason::DecodeError,
                    generation,
                }
            }
        };

        if endpoint.send(reply).is_err() {
            debug!("{} 管理线程已退出，{} 解码线程停止", log_ctx(), kind.as_str());
            break;
        }
    }

    info!(
        "{} 🛑 {} 解码线程退出（解码 {} 帧，错误 {} 次）",
        log_ctx(),
        kind.as_str(),
        decoded,
        errors
    );
}
