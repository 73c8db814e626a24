//! 有界中继队列 (Bounded Relay Queue)
//!
//! 满时丢弃最旧数据 (drop-oldest), 生产者永不阻塞
//! - 采集线程 → 提取线程: 原始帧
//! - 提取线程 → 分析线程: 信号采样
//! - 提取线程 → 渲染端:   显示帧

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

/// 满时丢弃最旧元素的有界FIFO队列
///
/// 克隆得到的是同一条队列的另一个句柄。生产者同时持有接收端,
/// 以便在队列已满时弹出最旧的一个元素再写入。
pub struct DropOldestQueue<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for DropOldestQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
            dropped: Arc::clone(&self.dropped),
        }
    }
}

impl<T> DropOldestQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 非阻塞写入; 队列满时先丢弃最旧元素。返回本次丢弃的元素个数。
    pub fn push(&self, item: T) -> usize {
        let mut item = item;
        let mut evicted = 0;
        loop {
            match self.tx.try_send(item) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    // 消费者可能同时取走元素, 此时无需丢弃
                    if self.rx.try_recv().is_ok() {
                        evicted += 1;
                    }
                    item = back;
                }
                // 两端都由本结构持有, 不会断开
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        if evicted > 0 {
            self.dropped.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        evicted
    }

    /// 阻塞等待直到有数据或超时
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// 清空队列, 返回被清除的元素个数
    pub fn drain(&self) -> usize {
        let mut count = 0;
        while self.rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 累计因溢出丢弃的元素个数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
