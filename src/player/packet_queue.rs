use crate::core::{Packet, PlayerError, Result};
use crate::player::ShutdownToken;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 全局递增的加锁顺序，同时持有两把队列锁时按 rank 从小到大加锁
static NEXT_RANK: AtomicUsize = AtomicUsize::new(0);

/// 包回收队列
///
/// 槽位在 空闲池 -> 解封装输出 -> 解码输入 -> 空闲池 之间循环，避免每个包都分配内存。
/// 同一个池的所有队列共享一个 "在途" 计数：槽位离开任意队列时加一，放回任意队列时减一，
/// 两者都在队列锁内完成，所以 `PacketPool::census` 在持有全部锁时得到的是一致快照。
pub struct PacketQueue {
    name: &'static str,
    rank: usize,
    slots: Mutex<VecDeque<Packet>>,
    available: Condvar,
    in_flight: Arc<AtomicIsize>,
    filled: AtomicBool,
    poll_interval: Duration,
}

impl PacketQueue {
    fn new(name: &'static str, in_flight: Arc<AtomicIsize>, poll_interval: Duration) -> Self {
        Self {
            name,
            rank: NEXT_RANK.fetch_add(1, Ordering::Relaxed),
            slots: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            in_flight,
            filled: AtomicBool::new(false),
            poll_interval,
        }
    }

    /// 独立队列（不属于任何池），主要用于测试
    pub fn standalone(name: &'static str, poll_interval: Duration) -> Self {
        Self::new(name, Arc::new(AtomicIsize::new(0)), poll_interval)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 预先放入 `count` 个空槽位，只能调用一次
    pub fn fill(&self, count: usize) -> Result<()> {
        if self.filled.swap(true, Ordering::SeqCst) {
            return Err(PlayerError::Other(format!("队列 {} 已经填充过", self.name)));
        }
        {
            let mut slots = self.slots.lock();
            slots.reserve(count);
            for _ in 0..count {
                slots.push_back(Packet::empty());
            }
        }
        self.available.notify_all();
        Ok(())
    }

    /// 取出一个槽位，队列为空时阻塞（背压）
    ///
    /// 等待以轮询间隔为上限，停止信号到来时返回 `ShutdownRequested`。
    pub fn acquire(&self, shutdown: &ShutdownToken) -> Result<Packet> {
        let mut slots = self.slots.lock();
        loop {
            if shutdown.is_signalled() {
                return Err(PlayerError::ShutdownRequested);
            }
            if let Some(packet) = slots.pop_front() {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                return Ok(packet);
            }
            self.available.wait_for(&mut slots, self.poll_interval);
        }
    }

    /// 非阻塞取出
    pub fn try_acquire(&self) -> Option<Packet> {
        let mut slots = self.slots.lock();
        let packet = slots.pop_front()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(packet)
    }

    /// 放回一个槽位并唤醒一个等待者
    pub fn release(&self, packet: Packet) {
        {
            let mut slots = self.slots.lock();
            slots.push_back(packet);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.available.notify_one();
    }

    /// 把本队列中的全部槽位原子地移到 `dst`（同时持有两把锁）
    ///
    /// seek 时用来丢弃尚未解码的旧包。返回移动的数量。
    pub fn drain_into(&self, dst: &PacketQueue) -> usize {
        if std::ptr::eq(self, dst) {
            return 0;
        }

        let moved = {
            let (mut src_slots, mut dst_slots) = if self.rank < dst.rank {
                let src = self.slots.lock();
                let dst = dst.slots.lock();
                (src, dst)
            } else {
                let dst = dst.slots.lock();
                let src = self.slots.lock();
                (src, dst)
            };
            let moved = src_slots.len();
            dst_slots.extend(src_slots.drain(..));
            moved
        };

        if moved > 0 {
            dst.available.notify_all();
        }
        moved
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

/// 某一时刻槽位的分布
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotCensus {
    pub capacity: usize,
    pub free: usize,
    pub video: usize,
    pub audio: usize,
    /// 被线程持有（正在读包 / 正在解码）的槽位
    pub in_flight: isize,
}

impl SlotCensus {
    pub fn total(&self) -> isize {
        (self.free + self.video + self.audio) as isize + self.in_flight
    }

    /// 槽位守恒：池 + 各队列 + 在途 == 容量
    pub fn is_conserved(&self) -> bool {
        self.total() == self.capacity as isize
    }
}

/// 一条播放流水线使用的全部包队列
#[derive(Clone)]
pub struct PacketPool {
    capacity: usize,
    in_flight: Arc<AtomicIsize>,
    /// 空闲槽位（已解码、可复用）
    pub free: Arc<PacketQueue>,
    /// 已解封装、等待视频解码
    pub video: Arc<PacketQueue>,
    /// 已解封装、等待音频解码
    pub audio: Arc<PacketQueue>,
}

impl PacketPool {
    pub fn new(capacity: usize, poll_interval: Duration) -> Result<Self> {
        let in_flight = Arc::new(AtomicIsize::new(0));
        // 创建顺序决定 rank：free < video < audio
        let free = Arc::new(PacketQueue::new("free", in_flight.clone(), poll_interval));
        let video = Arc::new(PacketQueue::new("demuxed_video", in_flight.clone(), poll_interval));
        let audio = Arc::new(PacketQueue::new("demuxed_audio", in_flight.clone(), poll_interval));
        free.fill(capacity)?;

        Ok(Self {
            capacity,
            in_flight,
            free,
            video,
            audio,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 把已解封装但未解码的包全部放回空闲池，返回 (视频, 音频) 数量
    pub fn recycle_demuxed(&self) -> (usize, usize) {
        let video = self.video.drain_into(&self.free);
        let audio = self.audio.drain_into(&self.free);
        (video, audio)
    }

    /// 一致的槽位快照（按 rank 顺序持有全部队列锁）
    pub fn census(&self) -> SlotCensus {
        let free = self.free.slots.lock();
        let video = self.video.slots.lock();
        let audio = self.audio.slots.lock();
        SlotCensus {
            capacity: self.capacity,
            free: free.len(),
            video: video.len(),
            audio: audio.len(),
            in_flight: self.in_flight.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(5);

    #[test]
    fn fill_only_once() {
        let queue = PacketQueue::standalone("q", POLL);
        queue.fill(4).unwrap();
        assert_eq!(queue.len(), 4);
        assert!(queue.fill(4).is_err());
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn acquire_and_release_keep_census() {
        let pool = PacketPool::new(16, POLL).unwrap();
        let shutdown = ShutdownToken::new();

        let a = pool.free.acquire(&shutdown).unwrap();
        let b = pool.free.try_acquire().unwrap();
        let census = pool.census();
        assert_eq!(census.free, 14);
        assert_eq!(census.in_flight, 2);
        assert!(census.is_conserved());

        pool.video.release(a);
        pool.audio.release(b);
        let census = pool.census();
        assert_eq!((census.free, census.video, census.audio), (14, 1, 1));
        assert_eq!(census.in_flight, 0);
        assert!(census.is_conserved());
    }

    #[test]
    fn acquire_blocks_until_release() {
        let pool = PacketPool::new(1, POLL).unwrap();
        let shutdown = ShutdownToken::new();
        let held = pool.free.acquire(&shutdown).unwrap();

        let free = pool.free.clone();
        let token = shutdown.clone();
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            let packet = free.acquire(&token).unwrap();
            (packet, started.elapsed())
        });

        thread::sleep(Duration::from_millis(40));
        pool.free.release(held);
        let (packet, waited) = waiter.join().unwrap();
        assert!(waited >= Duration::from_millis(30));
        pool.free.release(packet);
        assert!(pool.census().is_conserved());
    }

    #[test]
    fn shutdown_interrupts_blocked_acquire() {
        let queue = Arc::new(PacketQueue::standalone("empty", POLL));
        let shutdown = ShutdownToken::new();

        let q = queue.clone();
        let token = shutdown.clone();
        let waiter = thread::spawn(move || {
            let started = Instant::now();
            (q.acquire(&token), started.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        let signalled_at = Instant::now();
        shutdown.signal();
        let (result, _) = waiter.join().unwrap();
        assert!(matches!(result, Err(PlayerError::ShutdownRequested)));
        assert!(signalled_at.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn drain_moves_everything_atomically() {
        let pool = PacketPool::new(16, POLL).unwrap();
        for i in 0..5 {
            let mut packet = pool.free.try_acquire().unwrap();
            packet.pts = Some(i);
            pool.video.release(packet);
        }
        for _ in 0..2 {
            let packet = pool.free.try_acquire().unwrap();
            pool.audio.release(packet);
        }

        assert_eq!(pool.recycle_demuxed(), (5, 2));
        let census = pool.census();
        assert_eq!((census.free, census.video, census.audio), (16, 0, 0));
        assert!(census.is_conserved());
        assert_eq!(pool.video.drain_into(&pool.free), 0);
        assert_eq!(pool.free.drain_into(&pool.free), 0);
    }

    #[test]
    fn slots_are_conserved_under_concurrent_cycling() {
        let pool = PacketPool::new(16, POLL).unwrap();
        let shutdown = ShutdownToken::new();
        let mut workers = Vec::new();

        // 生产者：空闲 -> 视频队列
        {
            let pool = pool.clone();
            let token = shutdown.clone();
            workers.push(thread::spawn(move || {
                for _ in 0..2000 {
                    let packet = pool.free.acquire(&token).unwrap();
                    pool.video.release(packet);
                }
            }));
        }
        // 消费者：视频队列 -> 空闲
        {
            let pool = pool.clone();
            workers.push(thread::spawn(move || {
                let mut consumed = 0;
                while consumed < 2000 {
                    match pool.video.try_acquire() {
                        Some(packet) => {
                            pool.free.release(packet);
                            consumed += 1;
                        }
                        None => thread::yield_now(),
                    }
                }
            }));
        }
        // 中途做几次快照
        for _ in 0..50 {
            assert!(pool.census().is_conserved());
            thread::sleep(Duration::from_micros(200));
        }

        for worker in workers {
            worker.join().unwrap();
        }

        let census = pool.census();
        assert!(census.is_conserved());
        assert_eq!(census.free, 16);
    }
}
