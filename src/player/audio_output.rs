use crate::core::AudioFrame;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// 音频输出端抽象
///
/// 音频解码线程直接写入，不经过帧交换，也不对渲染循环施加背压。
pub trait AudioSink: Send + Sync {
    /// 写入一帧（交错 f32）
    fn write(&self, frame: &AudioFrame);

    /// 丢弃所有未播放的采样（seek 时调用）
    fn clear(&self);

    /// 尚未播放的采样数
    fn buffered_samples(&self) -> usize;
}

/// 默认缓存上限：48kHz 立体声 4 秒
pub const DEFAULT_BUFFER_SAMPLES: usize = 48_000 * 2 * 4;

/// 无锁采样缓冲区 - 解码线程写入，输出回调读取
///
/// 超过上限时丢弃最旧的采样，写入方永远不阻塞。
pub struct AudioBuffer {
    samples: SegQueue<f32>,
    capacity: usize,
    volume: Mutex<f32>,
    written: AtomicU64,
    dropped: AtomicU64,
    last_pts: Mutex<Option<i64>>,
}

impl AudioBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SAMPLES)
    }

    /// 最多缓存 `capacity` 个采样（交错，含所有声道）
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: SegQueue::new(),
            capacity: capacity.max(1),
            volume: Mutex::new(1.0),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            last_pts: Mutex::new(None),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 填充输出缓冲，采样不足时补静音，返回实际取到的采样数
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let vol = *self.volume.lock();
        let mut taken = 0;
        for sample in out.iter_mut() {
            match self.samples.pop() {
                Some(value) => {
                    *sample = value * vol;
                    taken += 1;
                }
                None => *sample = 0.0,
            }
        }
        taken
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    /// 累计写入的采样数（包括已被清空的）
    pub fn total_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// 因超过上限被丢弃的采样数
    pub fn dropped_samples(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// 最近写入的帧的 PTS（毫秒）
    pub fn last_pts(&self) -> Option<i64> {
        *self.last_pts.lock()
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for AudioBuffer {
    fn write(&self, frame: &AudioFrame) {
        for sample in &frame.data {
            self.samples.push(*sample);
        }
        self.written.fetch_add(frame.data.len() as u64, Ordering::Relaxed);
        *self.last_pts.lock() = Some(frame.pts);

        // 按整帧（所有声道）丢弃，保持声道交错对齐
        let len = self.samples.len();
        if len > self.capacity {
            let channels = usize::from(frame.channels.max(1));
            let excess = (len - self.capacity).div_ceil(channels) * channels;
            let mut dropped = 0u64;
            for _ in 0..excess {
                if self.samples.pop().is_none() {
                    break;
                }
                dropped += 1;
            }
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
    }

    fn clear(&self) {
        while self.samples.pop().is_some() {}
        *self.last_pts.lock() = None;
    }

    fn buffered_samples(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(feature = "audio-output")]
pub use device::AudioOutput;

#[cfg(feature = "audio-output")]
mod device {
    use super::AudioBuffer;
    use crate::core::{PlayerError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
    use log::{debug, error, info, warn};
    use std::sync::Arc;

    /// 音频输出 - 使用 cpal 播放 `AudioBuffer` 中的采样
    ///
    /// `cpal::Stream` 不是 Send，AudioOutput 只能留在创建它的线程，
    /// 解码线程通过 `buffer()` 拿到共享缓冲区写入。
    pub struct AudioOutput {
        device: Device,
        config: StreamConfig,
        stream: Option<Stream>,
        buffer: Arc<AudioBuffer>,
    }

    impl AudioOutput {
        /// 创建音频输出，设备不支持请求的配置时回退到常见配置
        pub fn new(sample_rate: u32, channels: u16) -> Result<Self> {
            info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
            debug!("使用音频设备: {}", device.name().unwrap_or_default());

            let candidates = [
                (sample_rate, channels),
                (48000, 2),
                (44100, 2),
                (48000, 1),
                (44100, 1),
            ];

            let supported: Vec<SupportedStreamConfigRange> = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
                .collect();

            let (rate, ch) = candidates
                .iter()
                .copied()
                .find(|&(rate, ch)| supported.iter().any(|range| Self::is_compatible(rate, ch, range)))
                .ok_or_else(|| {
                    PlayerError::AudioError(format!(
                        "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                        sample_rate, channels
                    ))
                })?;

            if (rate, ch) != (sample_rate, channels) {
                warn!("⚠️ 音频设备不支持 {} Hz/{} 声道，使用回退配置 {} Hz/{} 声道", sample_rate, channels, rate, ch);
            }

            Ok(Self {
                device,
                config: StreamConfig {
                    channels: ch,
                    sample_rate: cpal::SampleRate(rate),
                    buffer_size: cpal::BufferSize::Default,
                },
                stream: None,
                // 输出端按实际配置缓存 2 秒
                buffer: Arc::new(AudioBuffer::with_capacity(rate as usize * usize::from(ch) * 2)),
            })
        }

        fn is_compatible(rate: u32, channels: u16, range: &SupportedStreamConfigRange) -> bool {
            rate >= range.min_sample_rate().0
                && rate <= range.max_sample_rate().0
                && channels == range.channels()
        }

        /// 解码线程写入的共享缓冲区
        pub fn buffer(&self) -> Arc<AudioBuffer> {
            self.buffer.clone()
        }

        /// 实际使用的 (采样率, 声道数)，音频解码器应按此重采样
        pub fn config(&self) -> (u32, u16) {
            (self.config.sample_rate.0, self.config.channels)
        }

        /// 开始播放
        pub fn start(&mut self) -> Result<()> {
            if self.stream.is_some() {
                return Ok(());
            }

            let buffer = self.buffer.clone();
            let stream = self
                .device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        buffer.fill(data);
                    },
                    move |err| {
                        error!("音频流错误: {}", err);
                    },
                    None,
                )
                .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

            stream
                .play()
                .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

            self.stream = Some(stream);
            info!("音频输出已启动");
            Ok(())
        }

        /// 停止播放
        pub fn stop(&mut self) {
            if self.stream.take().is_some() {
                info!("音频输出已停止");
            }
        }
    }

    impl Drop for AudioOutput {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SampleFormat;

    fn frame(pts: i64, samples: usize) -> AudioFrame {
        AudioFrame {
            pts,
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::F32,
            data: vec![0.5; samples],
        }
    }

    #[test]
    fn write_then_fill_pads_with_silence() {
        let buffer = AudioBuffer::new();
        buffer.write(&frame(0, 4));
        assert_eq!(buffer.buffered_samples(), 4);
        assert_eq!(buffer.last_pts(), Some(0));

        let mut out = [1.0f32; 6];
        assert_eq!(buffer.fill(&mut out), 4);
        assert_eq!(out, [0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(buffer.buffered_samples(), 0);
    }

    #[test]
    fn clear_discards_pending_samples() {
        let buffer = AudioBuffer::new();
        buffer.write(&frame(0, 960));
        buffer.write(&frame(20, 960));
        buffer.clear();
        assert_eq!(buffer.buffered_samples(), 0);
        assert_eq!(buffer.total_written(), 1920);
        assert_eq!(buffer.last_pts(), None);
    }

    #[test]
    fn oldest_samples_are_dropped_over_capacity() {
        let buffer = AudioBuffer::with_capacity(8);
        for pts in 0..5 {
            let mut f = frame(pts * 20, 4);
            f.data = vec![pts as f32; 4];
            buffer.write(&f);
        }
        assert_eq!(buffer.buffered_samples(), 8);
        assert_eq!(buffer.dropped_samples(), 12);
        assert_eq!(buffer.total_written(), 20);

        // 只剩最新的两帧
        let mut out = [0.0f32; 8];
        assert_eq!(buffer.fill(&mut out), 8);
        assert_eq!(out, [3.0, 3.0, 3.0, 3.0, 4.0, 4.0, 4.0, 4.0]);
    }

    #[test]
    fn dropping_keeps_channel_alignment() {
        let buffer = AudioBuffer::with_capacity(5);
        buffer.write(&frame(0, 4));
        buffer.write(&frame(20, 4));
        // 超出 3 个采样，按立体声对齐丢 4 个
        assert_eq!(buffer.dropped_samples(), 4);
        assert_eq!(buffer.buffered_samples(), 4);
    }

    #[test]
    fn volume_is_clamped() {
        let buffer = AudioBuffer::new();
        buffer.set_volume(3.0);
        buffer.write(&frame(0, 1));
        let mut out = [0.0f32; 1];
        buffer.fill(&mut out);
        assert_eq!(out[0], 0.5);
    }
}
