use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("配置解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("无法找到视频流")]
    NoVideoStream,

    #[error("不支持的编解码器: {0}")]
    UnsupportedCodec(String),

    #[error("初始化失败: {0}")]
    FatalInit(String),

    #[error("配置无效: {0}")]
    ConfigError(String),

    /// 读包时的临时错误，跳过该包继续
    #[error("临时读取错误: {0}")]
    TransientIo(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("已到达流末尾")]
    EndOfStream,

    #[error("收到停止信号")]
    ShutdownRequested,

    #[error("通道已关闭: {0}")]
    ChannelClosed(&'static str),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("其他错误: {0}")]
    Other(String),
}

impl PlayerError {
    /// 单个包/帧级别的错误：记录后跳过，不中断流水线
    pub fn is_transient(&self) -> bool {
        matches!(self, PlayerError::TransientIo(_) | PlayerError::DecodeError(_))
    }

    /// 初始化阶段的错误：同步返回给调用方，流水线不会启动
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PlayerError::OpenError(_)
                | PlayerError::NoVideoStream
                | PlayerError::UnsupportedCodec(_)
                | PlayerError::FatalInit(_)
                | PlayerError::ConfigError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
