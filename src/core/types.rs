use serde::{Deserialize, Serialize};

/// 基本流类型（只支持一路视频 + 一路音频）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Video => "video",
            StreamKind::Audio => "audio",
        }
    }
}

/// 流时间基（分数，单位：秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    /// 毫秒时间基（合成源与内部时间戳统一使用）
    pub const MILLIS: TimeBase = TimeBase { num: 1, den: 1000 };

    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// 流时间戳 -> 毫秒
    pub fn to_millis(&self, ts: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        // i128 防止大时间戳溢出
        (ts as i128 * self.num as i128 * 1000 / self.den as i128) as i64
    }

    /// 毫秒 -> 流时间戳
    pub fn from_millis(&self, ms: i64) -> i64 {
        if self.num == 0 {
            return 0;
        }
        (ms as i128 * self.den as i128 / (self.num as i128 * 1000)) as i64
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        TimeBase::MILLIS
    }
}

/// 压缩数据包槽位
///
/// 槽位由回收池统一分配，在 池 / 解封装输出队列 / 解码输入 三者之间移动，
/// 任何时刻只属于其中一个（不实现 Clone）。`data` 的容量在复用时保留。
#[derive(Debug)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: Option<i64>,     // 流时间基
    pub dts: Option<i64>,     // 流时间基
    pub duration: i64,        // 流时间基
    pub time_base: TimeBase,
    pub is_key: bool,
    pub data: Vec<u8>,
    /// 产生该包的请求所属的 seek 代号
    pub generation: u64,
}

impl Packet {
    pub fn empty() -> Self {
        Self {
            stream_index: 0,
            pts: None,
            dts: None,
            duration: 0,
            time_base: TimeBase::default(),
            is_key: false,
            data: Vec::new(),
            generation: 0,
        }
    }

    /// 复用前清空元数据，保留缓冲区容量
    pub fn reset(&mut self) {
        self.stream_index = 0;
        self.pts = None;
        self.dts = None;
        self.duration = 0;
        self.is_key = false;
        self.data.clear();
        self.generation = 0;
    }

    /// 显示时间戳（毫秒），没有 PTS 时回退到 DTS
    pub fn pts_ms(&self) -> Option<i64> {
        self.pts.or(self.dts).map(|ts| self.time_base.to_millis(ts))
    }

    pub fn duration_ms(&self) -> i64 {
        self.time_base.to_millis(self.duration)
    }
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
    RGB,
    YUV420P,
    NV12,
}

impl PixelFormat {
    pub fn buffer_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::RGBA => pixels * 4,
            PixelFormat::RGB => pixels * 3,
            PixelFormat::YUV420P | PixelFormat::NV12 => pixels * 3 / 2,
        }
    }
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    I16,
}

/// 视频帧数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    pub pts: i64,           // 显示时间戳（毫秒）
    pub duration: i64,      // 帧持续时间（毫秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,      // CPU 内存数据
}

/// 音频帧数据
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub pts: i64,           // 显示时间戳（毫秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<f32>,     // 统一使用 f32 格式（交错）
}

impl AudioFrame {
    /// 每声道采样数
    pub fn samples_per_channel(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels as usize
        }
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Opening,
    Playing,
    Paused,
    Seeking,
    Stopped,
}

/// 媒体信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64,          // 总时长（毫秒）
    pub start_time: i64,        // 视频流起始时间（毫秒）
    pub time_base: TimeBase,    // 视频流时间基
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaInfo {
    /// 平均帧间隔（毫秒），帧率未知时按 25fps 估算
    pub fn frame_interval_ms(&self) -> i64 {
        if self.fps > 0.0 {
            (1000.0 / self.fps).round() as i64
        } else {
            40
        }
    }

    /// 流结束时间（毫秒）
    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration
    }
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            duration: 0,
            start_time: 0,
            time_base: TimeBase::default(),
            width: 0,
            height: 0,
            fps: 0.0,
            video_codec: String::new(),
            audio_codec: String::new(),
            sample_rate: 0,
            channels: 0,
        }
    }
}
