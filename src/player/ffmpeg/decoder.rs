use super::time_base_of;
use crate::core::{AudioFrame, Packet, PixelFormat, PlayerError, Result, SampleFormat, TimeBase, VideoFrame};
use crate::player::decoder::{DecodeOutcome, Decoder};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::debug;
use std::collections::VecDeque;

/// 把回收池槽位还原成 FFmpeg 包（拷贝数据）
fn to_ffmpeg_packet(packet: &Packet) -> ffmpeg::Packet {
    let mut av_packet = ffmpeg::Packet::copy(&packet.data);
    av_packet.set_stream(packet.stream_index);
    av_packet.set_pts(packet.pts);
    av_packet.set_dts(packet.dts);
    av_packet.set_duration(packet.duration);
    if packet.is_key {
        av_packet.set_flags(codec::packet::Flags::KEY);
    }
    av_packet
}

/// 软件视频解码器（输出 RGBA）
pub struct FfmpegVideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<(software::scaling::Context, util::format::Pixel, u32, u32)>,
    time_base: TimeBase,
    frame_interval_ms: i64,
    pending: VecDeque<VideoFrame>,
    eof_sent: bool,
}

// SwsContext 本身不是 Send，但每个解码器实例只会在解码线程中使用
unsafe impl Send for FfmpegVideoDecoder {}

impl FfmpegVideoDecoder {
    pub(super) fn from_stream(stream: format::stream::Stream, frame_interval_ms: i64) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PlayerError::UnsupportedCodec(e.to_string()))?;

        debug!(
            "视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            decoder,
            scaler: None,
            time_base: time_base_of(stream.time_base()),
            frame_interval_ms,
            pending: VecDeque::new(),
            eof_sent: false,
        })
    }

    /// 取走解码器当前能输出的全部帧
    fn receive_all(&mut self) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.convert_frame(&decoded)?;
                    self.pending.push_back(frame);
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => return Ok(()), // EAGAIN
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }
    }

    /// 转换帧格式为 RGBA（按行拷贝，去掉 stride 填充）
    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();
        let format = frame.format();

        let stale = match &self.scaler {
            Some((_, f, w, h)) => *f != format || *w != width || *h != height,
            None => true,
        };
        if stale {
            let context = software::scaling::Context::get(
                format,
                width,
                height,
                util::format::Pixel::RGBA,
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?;
            self.scaler = Some((context, format, width, height));
        }

        let mut rgba = util::frame::Video::empty();
        if let Some((scaler, ..)) = self.scaler.as_mut() {
            scaler.run(frame, &mut rgba)?;
        }

        let pts = frame
            .timestamp()
            .map(|ts| self.time_base.to_millis(ts))
            .unwrap_or(0);

        let row_size = width as usize * 4;
        let stride = rgba.stride(0);
        let src = rgba.data(0);
        let mut data = vec![0u8; row_size * height as usize];
        for (y, dst_row) in data.chunks_exact_mut(row_size).enumerate() {
            let offset = y * stride;
            dst_row.copy_from_slice(&src[offset..offset + row_size]);
        }

        Ok(VideoFrame {
            pts,
            duration: self.frame_interval_ms,
            width,
            height,
            format: PixelFormat::RGBA,
            data,
        })
    }
}

impl Decoder for FfmpegVideoDecoder {
    type Output = VideoFrame;

    fn decode(&mut self, packet: &Packet) -> Result<DecodeOutcome<VideoFrame>> {
        if let Err(e) = self.decoder.send_packet(&to_ffmpeg_packet(packet)) {
            if !matches!(e, ffmpeg::Error::Other { errno: 11 }) {
                return Err(PlayerError::DecodeError(e.to_string()));
            }
        }
        self.receive_all()?;
        Ok(match self.pending.pop_front() {
            Some(frame) => DecodeOutcome::Frame(frame),
            None => DecodeOutcome::NeedsMoreInput,
        })
    }

    fn drain(&mut self) -> Result<DecodeOutcome<VideoFrame>> {
        if !self.eof_sent {
            self.eof_sent = true;
            if let Err(e) = self.decoder.send_eof() {
                debug!("视频解码器 send_eof: {}", e);
            }
            self.receive_all()?;
        }
        Ok(match self.pending.pop_front() {
            Some(frame) => DecodeOutcome::Frame(frame),
            None => DecodeOutcome::EndOfStream,
        })
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.pending.clear();
        self.eof_sent = false;
    }

    fn description(&self) -> String {
        "FFmpeg 软件视频解码".to_string()
    }
}

/// 音频解码器（重采样为交错 f32）
pub struct FfmpegAudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: TimeBase,
    target_channels: u16,
    target_sample_rate: u32,
    pending: VecDeque<AudioFrame>,
    eof_sent: bool,
}

// SwrContext 同上，只在音频解码线程中使用
unsafe impl Send for FfmpegAudioDecoder {}

impl FfmpegAudioDecoder {
    pub(super) fn from_stream(
        stream: format::stream::Stream,
        target_sample_rate: u32,
        target_channels: u16,
    ) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| PlayerError::UnsupportedCodec(e.to_string()))?;

        debug!(
            "音频解码器: {} Hz, {} 声道 → 目标: {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            target_sample_rate,
            target_channels
        );

        Ok(Self {
            decoder,
            resampler: None,
            time_base: time_base_of(stream.time_base()),
            target_channels,
            target_sample_rate,
            pending: VecDeque::new(),
            eof_sent: false,
        })
    }

    fn receive_all(&mut self) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let frame = self.convert_frame(&decoded)?;
                    self.pending.push_back(frame);
                }
                Err(ffmpeg::Error::Other { errno: 11 }) => return Ok(()), // EAGAIN
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) => return Err(PlayerError::DecodeError(e.to_string())),
            }
        }
    }

    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioFrame> {
        if self.resampler.is_none() {
            let target_layout = match self.target_channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };
            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target_sample_rate,
                self.target_channels
            );
            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                frame.channel_layout(),
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.target_sample_rate,
            )?);
        }

        let mut resampled = util::frame::Audio::empty();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.run(frame, &mut resampled)?;
        }

        let pts = frame
            .timestamp()
            .map(|ts| self.time_base.to_millis(ts))
            .unwrap_or(0);

        // 平面缓冲区可能带对齐填充，只取有效部分
        let sample_count = resampled.samples() * self.target_channels as usize;
        let bytes = &resampled.data(0)[..sample_count * std::mem::size_of::<f32>()];
        let data = match bytemuck::try_cast_slice::<u8, f32>(bytes) {
            Ok(samples) => samples.to_vec(),
            Err(_) => bytes
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        };

        Ok(AudioFrame {
            pts,
            sample_rate: self.target_sample_rate,
            channels: self.target_channels,
            format: SampleFormat::F32,
            data,
        })
    }
}

impl Decoder for FfmpegAudioDecoder {
    type Output = AudioFrame;

    fn decode(&mut self, packet: &Packet) -> Result<DecodeOutcome<AudioFrame>> {
        if let Err(e) = self.decoder.send_packet(&to_ffmpeg_packet(packet)) {
            if !matches!(e, ffmpeg::Error::Other { errno: 11 }) {
                return Err(PlayerError::DecodeError(e.to_string()));
            }
        }
        self.receive_all()?;
        Ok(match self.pending.pop_front() {
            Some(frame) => DecodeOutcome::Frame(frame),
            None => DecodeOutcome::NeedsMoreInput,
        })
    }

    fn drain(&mut self) -> Result<DecodeOutcome<AudioFrame>> {
        if !self.eof_sent {
            self.eof_sent = true;
            if let Err(e) = self.decoder.send_eof() {
                debug!("音频解码器 send_eof: {}", e);
            }
            self.receive_all()?;
        }
        Ok(match self.pending.pop_front() {
            Some(frame) => DecodeOutcome::Frame(frame),
            None => DecodeOutcome::EndOfStream,
        })
    }

    fn flush(&mut self) {
        self.decoder.flush();
        self.pending.clear();
        self.eof_sent = false;
    }

    fn description(&self) -> String {
        "FFmpeg 音频解码".to_string()
    }
}
