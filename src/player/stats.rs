use crate::core::StreamKind;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// 流水线统计（各线程用原子计数更新，消费方随时读取快照）
#[derive(Debug, Default)]
pub struct PipelineStats {
    video_packets: AtomicU64,
    audio_packets: AtomicU64,
    read_errors: AtomicU64,
    frames_decoded: AtomicU64,
    audio_frames_decoded: AtomicU64,
    decode_errors: AtomicU64,
    frames_delivered: AtomicU64,
    stale_replies: AtomicU64,
    frames_skipped: AtomicU64,
    seeks: AtomicU64,
    seek_frames_decoded: AtomicU64,
    max_outstanding_demux: AtomicUsize,
    max_ready_frames: AtomicUsize,
    max_video_window: AtomicUsize,
}

/// 统计快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub video_packets: u64,
    pub audio_packets: u64,
    pub read_errors: u64,
    pub frames_decoded: u64,
    pub audio_frames_decoded: u64,
    pub decode_errors: u64,
    pub frames_delivered: u64,
    /// 因代号过期被丢弃的回复
    pub stale_replies: u64,
    /// seek 后 PTS 小于目标而被跳过的帧
    pub frames_skipped: u64,
    pub seeks: u64,
    /// 最近一次 seek 开始后解码的视频帧数
    pub seek_frames_decoded: u64,
    /// 同时在途的解封装请求峰值
    pub max_outstanding_demux: usize,
    /// 就绪帧队列长度峰值
    pub max_ready_frames: usize,
    /// 视频包预取窗口（已请求 + 已缓冲）峰值
    pub max_video_window: usize,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_demuxed(&self, kind: StreamKind) {
        match kind {
            StreamKind::Video => self.video_packets.fetch_add(1, Ordering::Relaxed),
            StreamKind::Audio => self.audio_packets.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_decoded(&self, kind: StreamKind) {
        match kind {
            StreamKind::Video => {
                self.frames_decoded.fetch_add(1, Ordering::Relaxed);
                self.seek_frames_decoded.fetch_add(1, Ordering::Relaxed);
            }
            StreamKind::Audio => {
                self.audio_frames_decoded.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stale_reply(&self) {
        self.stale_replies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn seek_started(&self) {
        self.seeks.fetch_add(1, Ordering::Relaxed);
        self.seek_frames_decoded.store(0, Ordering::Relaxed);
    }

    pub fn observe_outstanding_demux(&self, n: usize) {
        self.max_outstanding_demux.fetch_max(n, Ordering::Relaxed);
    }

    pub fn observe_ready_frames(&self, n: usize) {
        self.max_ready_frames.fetch_max(n, Ordering::Relaxed);
    }

    pub fn observe_video_window(&self, n: usize) {
        self.max_video_window.fetch_max(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            video_packets: self.video_packets.load(Ordering::Relaxed),
            audio_packets: self.audio_packets.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            audio_frames_decoded: self.audio_frames_decoded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            stale_replies: self.stale_replies.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            seeks: self.seeks.load(Ordering::Relaxed),
            seek_frames_decoded: self.seek_frames_decoded.load(Ordering::Relaxed),
            max_outstanding_demux: self.max_outstanding_demux.load(Ordering::Relaxed),
            max_ready_frames: self.max_ready_frames.load(Ordering::Relaxed),
            max_video_window: self.max_video_window.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_water_marks_keep_maximum() {
        let stats = PipelineStats::new();
        stats.observe_ready_frames(2);
        stats.observe_ready_frames(3);
        stats.observe_ready_frames(1);
        assert_eq!(stats.snapshot().max_ready_frames, 3);
    }

    #[test]
    fn seek_resets_per_seek_counter() {
        let stats = PipelineStats::new();
        stats.frame_decoded(StreamKind::Video);
        stats.frame_decoded(StreamKind::Video);
        stats.seek_started();
        stats.frame_decoded(StreamKind::Video);
        stats.frame_decoded(StreamKind::Audio);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_decoded, 3);
        assert_eq!(snapshot.audio_frames_decoded, 1);
        assert_eq!(snapshot.seek_frames_decoded, 1);
        assert_eq!(snapshot.seeks, 1);
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let stats = PipelineStats::new();
        stats.packet_demuxed(StreamKind::Video);
        let json = stats.snapshot().to_json();
        let back: StatsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.video_packets, 1);
    }
}
