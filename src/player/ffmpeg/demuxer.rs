use super::time_base_of;
use super::{FfmpegAudioDecoder, FfmpegVideoDecoder};
use crate::core::{MediaInfo, Packet, PlayerError, Result, TimeBase};
use crate::player::demuxer_source::{DemuxerSource, ReadStatus};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info, warn};

/// FFmpeg 解封装器 - 读取媒体文件，把包拷贝进回收池的槽位
pub struct FfmpegDemuxer {
    input_ctx: format::context::Input,
    video_stream_index: Option<usize>,
    audio_stream_index: Option<usize>,
    time_bases: Vec<TimeBase>, // 按流索引
    media_info: MediaInfo,
    source_path: String,
}

impl FfmpegDemuxer {
    /// 打开媒体文件
    pub fn open(path: &str) -> Result<Self> {
        info!("正在打开文件: {}", path);
        ffmpeg::init().map_err(|e| PlayerError::FatalInit(format!("FFmpeg 初始化失败: {}", e)))?;

        let input_ctx = format::input(&path)
            .map_err(|e| PlayerError::OpenError(format!("{}: {}", path, e)))?;

        let video_stream_index = input_ctx
            .streams()
            .best(media::Type::Video)
            .map(|s| s.index())
            .ok_or(PlayerError::NoVideoStream)?;

        let audio_stream_index = input_ctx
            .streams()
            .best(media::Type::Audio)
            .map(|s| s.index());

        debug!("视频流索引: {}", video_stream_index);
        debug!("音频流索引: {:?}", audio_stream_index);

        let time_bases = input_ctx
            .streams()
            .map(|s| time_base_of(s.time_base()))
            .collect();

        let mut demuxer = Self {
            input_ctx,
            video_stream_index: Some(video_stream_index),
            audio_stream_index,
            time_bases,
            media_info: MediaInfo::default(),
            source_path: path.to_string(),
        };
        demuxer.media_info = demuxer.extract_media_info(video_stream_index)?;

        info!(
            "✅ 打开成功: {}x{} @ {:.2}fps, 时长 {}ms, 视频 {}, 音频 {}",
            demuxer.media_info.width,
            demuxer.media_info.height,
            demuxer.media_info.fps,
            demuxer.media_info.duration,
            demuxer.media_info.video_codec,
            demuxer.media_info.audio_codec
        );
        Ok(demuxer)
    }

    fn extract_media_info(&self, video_index: usize) -> Result<MediaInfo> {
        let video_stream = self
            .input_ctx
            .stream(video_index)
            .ok_or(PlayerError::NoVideoStream)?;

        let video_params = video_stream.parameters();
        let video_codec = video_params.id().name().to_string();
        let video_decoder = ffmpeg::codec::context::Context::from_parameters(video_params)
            .and_then(|ctx| ctx.decoder().video())
            .map_err(|e| PlayerError::UnsupportedCodec(format!("{}: {}", video_codec, e)))?;

        let time_base = time_base_of(video_stream.time_base());
        let rate = video_stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            0.0
        };

        // AV_NOPTS_VALUE 为 i64::MIN
        let start_time = match video_stream.start_time() {
            ts if ts == i64::MIN => 0,
            ts => time_base.to_millis(ts),
        };
        let duration = (self.input_ctx.duration() / 1000).max(0); // 微秒转毫秒

        let (audio_codec, sample_rate, channels) = match self.audio_stream() {
            Some(audio_stream) => {
                let params = audio_stream.parameters();
                let codec_name = params.id().name().to_string();
                match ffmpeg::codec::context::Context::from_parameters(params)
                    .and_then(|ctx| ctx.decoder().audio())
                {
                    Ok(audio) => (codec_name, audio.rate(), audio.channels()),
                    Err(e) => {
                        warn!("⚠️ 音频流无法解码，忽略音频: {}", e);
                        ("none".to_string(), 0, 0)
                    }
                }
            }
            None => ("none".to_string(), 0, 0),
        };

        Ok(MediaInfo {
            duration,
            start_time,
            time_base,
            width: video_decoder.width(),
            height: video_decoder.height(),
            fps,
            video_codec,
            audio_codec,
            sample_rate,
            channels,
        })
    }

    fn video_stream(&self) -> Option<format::stream::Stream> {
        self.video_stream_index.and_then(|idx| self.input_ctx.stream(idx))
    }

    fn audio_stream(&self) -> Option<format::stream::Stream> {
        self.audio_stream_index.and_then(|idx| self.input_ctx.stream(idx))
    }

    /// 为视频流创建解码器（输出 RGBA）
    pub fn video_decoder(&self) -> Result<FfmpegVideoDecoder> {
        let stream = self.video_stream().ok_or(PlayerError::NoVideoStream)?;
        FfmpegVideoDecoder::from_stream(stream, self.media_info.frame_interval_ms())
    }

    /// 为音频流创建解码器（输出交错 f32），没有可解码的音频流时返回 None
    pub fn audio_decoder(
        &self,
        target_sample_rate: u32,
        target_channels: u16,
    ) -> Result<Option<FfmpegAudioDecoder>> {
        if self.media_info.sample_rate == 0 {
            return Ok(None);
        }
        match self.audio_stream() {
            Some(stream) => Ok(Some(FfmpegAudioDecoder::from_stream(
                stream,
                target_sample_rate,
                target_channels,
            )?)),
            None => Ok(None),
        }
    }
}

impl DemuxerSource for FfmpegDemuxer {
    fn read_packet(&mut self, slot: &mut Packet) -> Result<ReadStatus> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(ReadStatus::EndOfStream),
            Err(ffmpeg::Error::Other { errno: 11 }) => {
                // EAGAIN
                return Err(PlayerError::TransientIo("EAGAIN".to_string()));
            }
            Err(ffmpeg::Error::InvalidData) => {
                return Err(PlayerError::TransientIo("损坏的包".to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let stream_index = packet.stream();
        slot.reset();
        slot.stream_index = stream_index;
        slot.pts = packet.pts();
        slot.dts = packet.dts();
        slot.duration = packet.duration();
        slot.is_key = packet.is_key();
        slot.time_base = self.time_bases.get(stream_index).copied().unwrap_or_default();
        if let Some(data) = packet.data() {
            slot.data.extend_from_slice(data);
        }
        Ok(ReadStatus::Packet)
    }

    fn seek(&mut self, _stream_index: usize, target_ms: i64) -> Result<Option<i64>> {
        // 全局时间基（微秒），max_ts = target 保证落在目标之前的关键帧
        let timestamp = target_ms * 1000;
        self.input_ctx.seek(timestamp, ..timestamp)?;
        Ok(None)
    }

    fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    fn video_stream_index(&self) -> Option<usize> {
        self.video_stream_index
    }

    fn audio_stream_index(&self) -> Option<usize> {
        self.audio_stream_index
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
