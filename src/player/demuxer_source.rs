use crate::core::{MediaInfo, Packet, Result};

/// 读包结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// 槽位已填入一个包
    Packet,
    /// 到达容器末尾
    EndOfStream,
}

/// Demuxer 数据源抽象接口
///
/// 不同的媒体源（FFmpeg 容器、内存中的合成流等）实现这个接口，
/// 解封装线程只通过它读包和 seek。
pub trait DemuxerSource: Send {
    /// 读取下一个包到 `slot`（复用槽位的缓冲区）
    ///
    /// 返回：
    /// - Ok(ReadStatus::Packet): 成功读取，`slot` 的元数据和数据已被覆盖
    /// - Ok(ReadStatus::EndOfStream): 到达末尾
    /// - Err(PlayerError::TransientIo): 临时错误，可以继续读下一个包
    /// - Err(_): 其他读取错误
    fn read_packet(&mut self, slot: &mut Packet) -> Result<ReadStatus>;

    /// 在 `stream_index` 上 seek 到 `target_ms` 之前最近的关键帧
    ///
    /// 能确定落点时返回落点时间（毫秒）。
    fn seek(&mut self, stream_index: usize, target_ms: i64) -> Result<Option<i64>>;

    /// 获取媒体信息
    fn media_info(&self) -> &MediaInfo;

    /// 获取视频流索引
    fn video_stream_index(&self) -> Option<usize>;

    /// 获取音频流索引
    fn audio_stream_index(&self) -> Option<usize>;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}
