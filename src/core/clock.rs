use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 播放时钟 - 尽力而为的显示时间跟踪
#[derive(Clone)]
pub struct PlaybackClock {
    inner: Arc<Mutex<ClockInner>>,
}

struct ClockInner {
    base_pts: i64,              // 基准 PTS（毫秒）
    base_instant: Instant,      // 基准时刻
    paused: bool,
    paused_at: i64,             // 暂停时的位置
    limit: Option<i64>,         // 时钟上限（流结束时间）
}

impl ClockInner {
    fn now(&self) -> i64 {
        let raw = if self.paused {
            self.paused_at
        } else {
            let elapsed = self.base_instant.elapsed().as_millis() as i64;
            self.base_pts + elapsed
        };
        match self.limit {
            Some(limit) => raw.min(limit),
            None => raw,
        }
    }
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockInner {
                base_pts: 0,
                base_instant: Instant::now(),
                paused: true,
                paused_at: 0,
                limit: None,
            })),
        }
    }

    /// 获取当前播放时间（毫秒）
    pub fn now(&self) -> i64 {
        self.inner.lock().now()
    }

    /// 设置播放位置
    pub fn set_time(&self, pts: i64) {
        let mut inner = self.inner.lock();
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
        inner.paused_at = pts;
    }

    /// 设置时钟上限，到达流末尾后时间不再前进
    pub fn set_limit(&self, limit: Option<i64>) {
        self.inner.lock().limit = limit;
    }

    /// 开始播放
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.paused {
            inner.base_pts = inner.paused_at;
            inner.base_instant = Instant::now();
            inner.paused = false;
        }
    }

    /// 暂停播放
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if !inner.paused {
            inner.paused_at = inner.now();
            inner.paused = true;
        }
    }

    /// 暂停并固定在指定位置（流结束时使用）
    pub fn pin(&self, pts: i64) {
        let mut inner = self.inner.lock();
        inner.paused = true;
        inner.paused_at = pts;
        inner.base_pts = pts;
        inner.base_instant = Instant::now();
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
