use crate::core::{PlayerError, Result};
use crate::player::ShutdownToken;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// 双向通道的一端：向对端发送 `S`，从对端接收 `R`
///
/// 由两条单向 crossbeam 通道组成，`create()` 返回的两端互为对方（收发互换），
/// 不共享任何可变状态。每个方向 FIFO、不丢消息；不同通道之间没有顺序保证。
pub struct Endpoint<S, R> {
    name: &'static str,
    tx: Sender<S>,
    rx: Receiver<R>,
    poll_interval: Duration,
}

/// 创建一对互补的端点 (本地端, 远端)
///
/// 本地端发送 `A`、接收 `B`；远端正好相反。
pub fn create<A, B>(name: &'static str, poll_interval: Duration) -> (Endpoint<A, B>, Endpoint<B, A>) {
    let (a_tx, a_rx) = unbounded::<A>();
    let (b_tx, b_rx) = unbounded::<B>();

    let local = Endpoint {
        name,
        tx: a_tx,
        rx: b_rx,
        poll_interval,
    };
    let remote = Endpoint {
        name,
        tx: b_tx,
        rx: a_rx,
        poll_interval,
    };
    (local, remote)
}

impl<S, R> Endpoint<S, R> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 发送消息并唤醒对端等待者
    pub fn send(&self, msg: S) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| PlayerError::ChannelClosed(self.name))
    }

    /// 阻塞接收，直到有消息（FIFO）
    ///
    /// 每个轮询间隔醒来检查一次停止信号，保证停止时不会永久阻塞。
    pub fn receive(&self, shutdown: &ShutdownToken) -> Result<R> {
        loop {
            if shutdown.is_signalled() {
                return Err(PlayerError::ShutdownRequested);
            }
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(msg) => return Ok(msg),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(PlayerError::ChannelClosed(self.name))
                }
            }
        }
    }

    /// 非阻塞接收，没有消息时返回 None
    pub fn try_receive(&self) -> Option<R> {
        self.rx.try_recv().ok()
    }

    /// 最多等待 `timeout`
    pub fn receive_timeout(&self, timeout: Duration) -> Result<Option<R>> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(PlayerError::ChannelClosed(self.name)),
        }
    }

    /// 已到达但尚未取走的消息数
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// 接收端（供 `select!` 使用）
    pub fn receiver(&self) -> &Receiver<R> {
        &self.rx
    }
}
