use crate::core::{AudioFrame, Packet, Result, VideoFrame};

/// 单次解码的结果
#[derive(Debug)]
pub enum DecodeOutcome<F> {
    /// 得到一帧
    Frame(F),
    /// 编解码器需要更多输入才能输出（例如还没遇到关键帧）
    NeedsMoreInput,
    /// 编解码器已经输出了全部帧
    EndOfStream,
}

impl<F> DecodeOutcome<F> {
    pub fn is_frame(&self) -> bool {
        matches!(self, DecodeOutcome::Frame(_))
    }
}

/// 解码器抽象接口
///
/// 每次调用最多输出一帧；一个包解出多帧时，多余的帧留在解码器内部，
/// 由后续的 `decode` / `drain` 依次取出，输出顺序与输入顺序一致。
pub trait Decoder: Send {
    type Output: Send + 'static;

    /// 送入一个包并尝试取出一帧
    fn decode(&mut self, packet: &Packet) -> Result<DecodeOutcome<Self::Output>>;

    /// 流结束后取出解码器内部缓存的帧
    fn drain(&mut self) -> Result<DecodeOutcome<Self::Output>>;

    /// 丢弃全部内部状态（seek 后调用）
    fn flush(&mut self);

    fn description(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

pub type BoxedVideoDecoder = Box<dyn Decoder<Output = VideoFrame>>;
pub type BoxedAudioDecoder = Box<dyn Decoder<Output = AudioFrame>>;
