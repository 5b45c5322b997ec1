//! 播放器解码流水线
//!
//! 解封装、解码与显示重叠进行：管理线程维护一个有界的预取窗口，按顺序把帧交给
//! 双缓冲帧交换；seek 通过代号让所有在途的旧工作失效。

pub mod core;
pub mod player;

pub use crate::core::{MediaInfo, PipelineConfig, PlaybackState, PlayerError, Result};
pub use crate::player::{CurrentFrame, PlaybackContext};
