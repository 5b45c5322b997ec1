// FFmpeg 协作方：容器解封装 + 视频/音频解码（feature = "ffmpeg"）

mod decoder;
mod demuxer;

pub use decoder::{FfmpegAudioDecoder, FfmpegVideoDecoder};
pub use demuxer::FfmpegDemuxer;

use crate::core::TimeBase;
use ffmpeg_next as ffmpeg;

fn time_base_of(rational: ffmpeg::Rational) -> TimeBase {
    TimeBase::new(rational.numerator(), rational.denominator())
}
