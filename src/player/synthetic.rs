use crate::core::{
    AudioFrame, MediaInfo, Packet, PixelFormat, PlayerError, Result, SampleFormat, TimeBase, VideoFrame,
};
use crate::player::decoder::{DecodeOutcome, Decoder};
use crate::player::demuxer_source::{DemuxerSource, ReadStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

const VIDEO_STREAM: usize = 0;
const AUDIO_STREAM: usize = 1;
const DATA_STREAM: usize = 2;

const MARKER_OK: u8 = 0x00;
const MARKER_CORRUPT: u8 = 0xFF;

/// 合成媒体描述 - 不依赖编解码器的确定性容器
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSpec {
    pub duration_ms: i64,
    pub fps: u32,
    pub keyframe_interval_ms: i64,
    pub width: u32,
    pub height: u32,
    /// 是否带一路音频（每包 `audio_packet_ms`）
    pub audio: bool,
    pub audio_packet_ms: i64,
    pub sample_rate: u32,
    pub channels: u16,
    /// 额外的数据流（解封装时应被丢弃）
    pub data_stream: bool,
    /// 每 n 个视频包有一个损坏的非关键帧
    pub corrupt_every: Option<u64>,
    /// 每 n 次读包出现一次临时读错误（该包丢失）
    pub read_error_every: Option<u64>,
    /// 解码器内部缓存的帧数（模拟编解码延迟）
    pub codec_delay: usize,
    pub read_delay_ms: u64,
    pub decode_delay_ms: u64,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            fps: 25,
            keyframe_interval_ms: 2_000,
            width: 64,
            height: 36,
            audio: false,
            audio_packet_ms: 20,
            sample_rate: 48_000,
            channels: 2,
            data_stream: false,
            corrupt_every: None,
            read_error_every: None,
            codec_delay: 0,
            read_delay_ms: 0,
            decode_delay_ms: 0,
        }
    }
}

impl SyntheticSpec {
    pub fn frame_interval_ms(&self) -> i64 {
        1000 / self.fps.max(1) as i64
    }

    pub fn frame_count(&self) -> i64 {
        self.duration_ms / self.frame_interval_ms()
    }

    /// 某个 PTS 的视频帧的像素填充值
    pub fn pixel_value(pts_ms: i64, interval_ms: i64) -> u8 {
        ((pts_ms / interval_ms.max(1)) % 251) as u8
    }

    fn video_time_base() -> TimeBase {
        TimeBase::new(1, 90_000)
    }

    fn audio_time_base(&self) -> TimeBase {
        TimeBase::new(1, self.sample_rate.max(1) as i32)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    stream: usize,
    pts_ms: i64,
    duration_ms: i64,
    is_key: bool,
    corrupt: bool,
}

/// 合成容器
pub struct SyntheticSource {
    spec: SyntheticSpec,
    entries: Vec<Entry>,
    cursor: usize,
    reads: u64,
    media_info: MediaInfo,
}

impl SyntheticSource {
    pub fn new(spec: SyntheticSpec) -> Self {
        let interval = spec.frame_interval_ms();
        let mut entries = Vec::new();

        for index in 0..spec.frame_count() {
            let pts_ms = index * interval;
            let is_key = spec.keyframe_interval_ms > 0 && pts_ms % spec.keyframe_interval_ms == 0;
            let corrupt = match spec.corrupt_every {
                Some(n) if n > 0 => !is_key && (index as u64 + 1) % n == 0,
                _ => false,
            };
            entries.push(Entry {
                stream: VIDEO_STREAM,
                pts_ms,
                duration_ms: interval,
                is_key,
                corrupt,
            });
        }

        if spec.audio && spec.audio_packet_ms > 0 {
            let mut pts_ms = 0;
            while pts_ms < spec.duration_ms {
                entries.push(Entry {
                    stream: AUDIO_STREAM,
                    pts_ms,
                    duration_ms: spec.audio_packet_ms,
                    is_key: true,
                    corrupt: false,
                });
                pts_ms += spec.audio_packet_ms;
            }
        }

        if spec.data_stream {
            let mut pts_ms = 0;
            while pts_ms < spec.duration_ms {
                entries.push(Entry {
                    stream: DATA_STREAM,
                    pts_ms,
                    duration_ms: 500,
                    is_key: true,
                    corrupt: false,
                });
                pts_ms += 500;
            }
        }

        // 按时间交错，同一时刻视频在前
        entries.sort_by_key(|e| (e.pts_ms, e.stream));

        let media_info = MediaInfo {
            duration: spec.duration_ms,
            start_time: 0,
            time_base: SyntheticSpec::video_time_base(),
            width: spec.width,
            height: spec.height,
            fps: spec.fps as f64,
            video_codec: "synthetic".to_string(),
            audio_codec: if spec.audio { "synthetic-pcm".to_string() } else { "none".to_string() },
            sample_rate: if spec.audio { spec.sample_rate } else { 0 },
            channels: if spec.audio { spec.channels } else { 0 },
        };

        Self {
            spec,
            entries,
            cursor: 0,
            reads: 0,
            media_info,
        }
    }

    /// 剩余未读的包数
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.cursor.min(self.entries.len())
    }
}

impl DemuxerSource for SyntheticSource {
    fn read_packet(&mut self, slot: &mut Packet) -> Result<ReadStatus> {
        if self.spec.read_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.spec.read_delay_ms));
        }
        let entry = match self.entries.get(self.cursor) {
            Some(entry) => *entry,
            None => return Ok(ReadStatus::EndOfStream),
        };
        self.cursor += 1;
        self.reads += 1;

        if let Some(n) = self.spec.read_error_every {
            if n > 0 && self.reads % n == 0 {
                return Err(PlayerError::TransientIo(format!(
                    "合成读错误（第 {} 次读包）",
                    self.reads
                )));
            }
        }

        let time_base = match entry.stream {
            AUDIO_STREAM => self.spec.audio_time_base(),
            _ => SyntheticSpec::video_time_base(),
        };

        slot.reset();
        slot.stream_index = entry.stream;
        slot.time_base = time_base;
        slot.pts = Some(time_base.from_millis(entry.pts_ms));
        slot.dts = slot.pts;
        slot.duration = time_base.from_millis(entry.duration_ms);
        slot.is_key = entry.is_key;
        slot.data.extend_from_slice(&entry.pts_ms.to_le_bytes());
        slot.data.push(if entry.corrupt { MARKER_CORRUPT } else { MARKER_OK });
        Ok(ReadStatus::Packet)
    }

    /// 落到目标之前最近的关键帧
    fn seek(&mut self, _stream_index: usize, target_ms: i64) -> Result<Option<i64>> {
        let interval = self.spec.keyframe_interval_ms.max(1);
        let target = target_ms.clamp(0, self.spec.duration_ms);
        let mut keyframe = target / interval * interval;

        let position = loop {
            let found = self
                .entries
                .iter()
                .position(|e| e.stream == VIDEO_STREAM && e.is_key && e.pts_ms == keyframe);
            match found {
                Some(position) => break Some(position),
                None if keyframe > 0 => keyframe -= interval,
                None => break None,
            }
        };

        match position {
            Some(position) => {
                self.cursor = position;
                Ok(Some(keyframe))
            }
            None => {
                self.cursor = self.entries.len();
                Ok(None)
            }
        }
    }

    fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn video_stream_index(&self) -> Option<usize> {
        Some(VIDEO_STREAM)
    }

    fn audio_stream_index(&self) -> Option<usize> {
        self.spec.audio.then_some(AUDIO_STREAM)
    }

    fn description(&self) -> String {
        format!(
            "Synthetic: {}ms @ {}fps, 关键帧间隔 {}ms, 音频 {}",
            self.spec.duration_ms, self.spec.fps, self.spec.keyframe_interval_ms, self.spec.audio
        )
    }
}

fn parse_payload(packet: &Packet) -> Result<(i64, bool)> {
    if packet.data.len() < 9 {
        return Err(PlayerError::DecodeError(format!("包太短: {} 字节", packet.data.len())));
    }
    let mut pts = [0u8; 8];
    pts.copy_from_slice(&packet.data[..8]);
    Ok((i64::from_le_bytes(pts), packet.data[8] == MARKER_CORRUPT))
}

/// 合成视频解码器：关键帧之前的包输出 NeedsMoreInput，损坏包输出解码错误
pub struct SyntheticVideoDecoder {
    width: u32,
    height: u32,
    interval_ms: i64,
    codec_delay: usize,
    delay: Duration,
    need_keyframe: bool,
    pending: VecDeque<VideoFrame>,
}

impl SyntheticVideoDecoder {
    pub fn new(spec: &SyntheticSpec) -> Self {
        Self {
            width: spec.width,
            height: spec.height,
            interval_ms: spec.frame_interval_ms(),
            codec_delay: spec.codec_delay,
            delay: Duration::from_millis(spec.decode_delay_ms),
            need_keyframe: true,
            pending: VecDeque::new(),
        }
    }
}

impl Decoder for SyntheticVideoDecoder {
    type Output = VideoFrame;

    fn decode(&mut self, packet: &Packet) -> Result<DecodeOutcome<VideoFrame>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let (pts, corrupt) = parse_payload(packet)?;
        if self.need_keyframe {
            if !packet.is_key {
                return Ok(DecodeOutcome::NeedsMoreInput);
            }
            self.need_keyframe = false;
        }
        if corrupt {
            return Err(PlayerError::DecodeError(format!("损坏的帧 {}ms", pts)));
        }

        let format = PixelFormat::RGBA;
        let value = SyntheticSpec::pixel_value(pts, self.interval_ms);
        self.pending.push_back(VideoFrame {
            pts,
            duration: packet.duration_ms(),
            width: self.width,
            height: self.height,
            format,
            data: vec![value; format.buffer_size(self.width, self.height)],
        });

        if self.pending.len() > self.codec_delay {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(DecodeOutcome::Frame(frame));
            }
        }
        Ok(DecodeOutcome::NeedsMoreInput)
    }

    fn drain(&mut self) -> Result<DecodeOutcome<VideoFrame>> {
        Ok(match self.pending.pop_front() {
            Some(frame) => DecodeOutcome::Frame(frame),
            None => DecodeOutcome::EndOfStream,
        })
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.need_keyframe = true;
    }

    fn description(&self) -> String {
        format!("合成视频解码 {}x{}（延迟 {} 帧）", self.width, self.height, self.codec_delay)
    }
}

/// 合成音频解码器：每个包输出一帧常量采样
pub struct SyntheticAudioDecoder {
    sample_rate: u32,
    channels: u16,
    delay: Duration,
}

impl SyntheticAudioDecoder {
    pub fn new(spec: &SyntheticSpec) -> Self {
        Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            delay: Duration::from_millis(spec.decode_delay_ms),
        }
    }
}

impl Decoder for SyntheticAudioDecoder {
    type Output = AudioFrame;

    fn decode(&mut self, packet: &Packet) -> Result<DecodeOutcome<AudioFrame>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        let (pts, _) = parse_payload(packet)?;
        let samples = (self.sample_rate as i64 * packet.duration_ms() / 1000).max(0) as usize;
        Ok(DecodeOutcome::Frame(AudioFrame {
            pts,
            sample_rate: self.sample_rate,
            channels: self.channels,
            format: SampleFormat::F32,
            data: vec![0.25; samples * self.channels as usize],
        }))
    }

    fn drain(&mut self) -> Result<DecodeOutcome<AudioFrame>> {
        Ok(DecodeOutcome::EndOfStream)
    }

    fn flush(&mut self) {}
}
