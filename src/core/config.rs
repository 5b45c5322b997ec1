use crate::core::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 流水线配置
///
/// 预取深度过大浪费内存、拖慢 seek 时的清空；过小则在 I/O 或解码抖动下卡顿。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 预取窗口：在途 + 已缓冲的包（帧）总数上限
    pub prefetch_depth: usize,
    /// 包回收池槽位数
    pub packet_pool_capacity: usize,
    /// 每个通道每个方向同时在途的请求数
    pub max_outstanding_requests: usize,
    /// 阻塞等待的轮询间隔（毫秒），决定停止信号的响应延迟
    pub poll_interval_ms: u64,
    /// seek 落到关键帧后，向前跳帧的上限
    pub seek_scan_limit: usize,
    /// 连续读包错误上限，超过后回复 "无包"
    pub max_consecutive_read_errors: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefetch_depth: 3,
            packet_pool_capacity: 16,
            max_outstanding_requests: 1,
            poll_interval_ms: 5,
            seek_scan_limit: 100,
            max_consecutive_read_errors: 32,
        }
    }
}

impl PipelineConfig {
    /// 从 JSON 字符串加载（缺省字段使用默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// 最少需要的槽位：视频预取窗口 + 解封装/解码各自在途的请求 + 音频周转
    pub fn min_pool_capacity(&self) -> usize {
        self.prefetch_depth + 2 * self.max_outstanding_requests + 2
    }

    pub fn validate(&self) -> Result<()> {
        if self.prefetch_depth == 0 {
            return Err(PlayerError::ConfigError("prefetch_depth 必须大于 0".to_string()));
        }
        if self.max_outstanding_requests == 0 {
            return Err(PlayerError::ConfigError(
                "max_outstanding_requests 必须大于 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(PlayerError::ConfigError("poll_interval_ms 必须大于 0".to_string()));
        }
        if self.packet_pool_capacity < self.min_pool_capacity() {
            return Err(PlayerError::ConfigError(format!(
                "packet_pool_capacity={} 太小，至少需要 {}",
                self.packet_pool_capacity,
                self.min_pool_capacity()
            )));
        }
        Ok(())
    }
}
