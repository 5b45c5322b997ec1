// 播放流水线：通道、包回收、解封装/解码/管理线程、帧交换

pub mod shutdown;
pub mod channel;
pub mod packet_queue;
pub mod demuxer_source;
pub mod decoder;
pub mod audio_output;
pub mod demuxer_thread;
pub mod decode_thread;
pub mod frame_buffer;
pub mod stats;
pub mod manager;
pub mod playback;
pub mod synthetic;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

use std::process;
use std::thread;

pub use shutdown::ShutdownToken;
pub use packet_queue::{PacketPool, PacketQueue, SlotCensus};
pub use demuxer_source::{DemuxerSource, ReadStatus};
pub use decoder::{DecodeOutcome, Decoder};
pub use audio_output::{AudioBuffer, AudioSink};
#[cfg(feature = "audio-output")]
pub use audio_output::AudioOutput;
pub use frame_buffer::{FrameBuffer, FramePhase, FrameWriter, PixelTarget};
pub use stats::{PipelineStats, StatsSnapshot};
pub use playback::{AudioPipeline, CurrentFrame, PlaybackContext};
pub use synthetic::{SyntheticAudioDecoder, SyntheticSource, SyntheticSpec, SyntheticVideoDecoder};

/// 日志前缀：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}
