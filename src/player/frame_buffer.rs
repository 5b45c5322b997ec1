use crate::core::{PixelFormat, VideoFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 像素目标（一块可复用的帧缓冲），PTS/时长随缓冲一起交换
#[derive(Debug, Clone)]
pub struct PixelTarget {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pts: i64,
    pub duration: i64,
    pub data: Vec<u8>,
}

impl PixelTarget {
    pub fn new() -> Self {
        Self {
            width: 0,
            height: 0,
            format: PixelFormat::RGBA,
            pts: 0,
            duration: 0,
            data: Vec::new(),
        }
    }

    /// 把解码帧拷贝进来，复用已有容量
    pub fn write_frame(&mut self, frame: &VideoFrame) {
        self.width = frame.width;
        self.height = frame.height;
        self.format = frame.format;
        self.pts = frame.pts;
        self.duration = frame.duration;
        self.data.clear();
        self.data.extend_from_slice(&frame.data);
    }
}

impl Default for PixelTarget {
    fn default() -> Self {
        Self::new()
    }
}

/// "下一帧" 缓冲的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramePhase {
    /// 需要新帧，写入方可以认领
    Needed,
    /// 写入方正在填充（不持锁）
    Writing,
    /// 已发布，等待消费方交换
    Ready,
}

struct SlotState {
    next: Option<PixelTarget>, // Writing 期间为 None
    phase: FramePhase,
    generation: u64,
}

/// 双缓冲帧交换 - 消费方
///
/// 消费方持有 "当前帧"，共享槽位里放 "下一帧"。锁只在 O(1) 的标志位和缓冲交换时持有，
/// 像素拷贝在锁外完成。
pub struct FrameBuffer {
    current: PixelTarget,
    has_frame: bool,
    unread: bool,
    shared: Arc<Mutex<SlotState>>,
}

/// 双缓冲帧交换 - 写入方（管理线程）
#[derive(Clone)]
pub struct FrameWriter {
    shared: Arc<Mutex<SlotState>>,
}

/// 创建一对 (消费方, 写入方)
pub fn frame_buffer() -> (FrameBuffer, FrameWriter) {
    let shared = Arc::new(Mutex::new(SlotState {
        next: Some(PixelTarget::new()),
        phase: FramePhase::Needed,
        generation: 0,
    }));

    let buffer = FrameBuffer {
        current: PixelTarget::new(),
        has_frame: false,
        unread: false,
        shared: shared.clone(),
    };
    let writer = FrameWriter { shared };
    (buffer, writer)
}

impl FrameBuffer {
    /// 下一帧已发布时交换两块缓冲并重新置为 Needed，否则什么也不做
    pub fn swap(&mut self) -> bool {
        let mut state = self.shared.lock();
        if state.phase != FramePhase::Ready {
            return false;
        }
        if let Some(next) = state.next.as_mut() {
            std::mem::swap(&mut self.current, next);
        }
        state.phase = FramePhase::Needed;
        drop(state);

        self.has_frame = true;
        self.unread = true;
        true
    }

    /// 开始新的 seek 代：丢弃已发布但未交换的旧帧
    ///
    /// 正在写入的旧帧会在 `publish` 时被拒绝。
    pub fn begin_generation(&mut self, generation: u64) {
        let mut state = self.shared.lock();
        state.generation = generation;
        if state.phase == FramePhase::Ready {
            state.phase = FramePhase::Needed;
        }
    }

    /// 当前显示的帧（还没有交换过任何帧时为 None）
    pub fn current(&self) -> Option<&PixelTarget> {
        self.has_frame.then_some(&self.current)
    }

    /// 当前帧是否第一次被读取，读取后清除标记
    pub fn take_unread(&mut self) -> bool {
        std::mem::replace(&mut self.unread, false)
    }

    pub fn has_unread(&self) -> bool {
        self.unread
    }

    pub fn phase(&self) -> FramePhase {
        self.shared.lock().phase
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }
}

impl FrameWriter {
    /// 认领下一帧缓冲（仅当 Needed 且代号一致），状态变为 Writing
    pub fn try_claim(&self, generation: u64) -> Option<PixelTarget> {
        let mut state = self.shared.lock();
        if state.phase != FramePhase::Needed || state.generation != generation {
            return None;
        }
        let target = state.next.take()?;
        state.phase = FramePhase::Writing;
        Some(target)
    }

    /// 发布写好的帧
    ///
    /// 写入期间消费方开始了新的代时，帧被丢弃（缓冲照样归还），返回 false。
    pub fn publish(&self, target: PixelTarget, generation: u64) -> bool {
        let mut state = self.shared.lock();
        let accepted = state.phase == FramePhase::Writing && state.generation == generation;
        state.next = Some(target);
        state.phase = if accepted { FramePhase::Ready } else { FramePhase::Needed };
        accepted
    }

    /// 放弃写入，归还缓冲
    pub fn abandon(&self, target: PixelTarget) {
        let mut state = self.shared.lock();
        state.next = Some(target);
        state.phase = FramePhase::Needed;
    }
}
