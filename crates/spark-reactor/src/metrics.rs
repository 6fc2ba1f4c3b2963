//! 引擎运行计数。`start` 时清零，随时可取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 引擎生命周期内的累积计数，全部为无锁原子。
#[derive(Debug, Default)]
pub struct EngineMetrics {
    accepted: AtomicU64,
    closed: AtomicU64,
    messages_dispatched: AtomicU64,
    reconnect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    callback_panics: AtomicU64,
}

/// 某一时刻的计数快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MetricsSnapshot {
    /// 建立的连接数（入站 + 外连成功）。
    pub accepted: u64,
    /// 走完关闭协议的连接数。
    pub closed: u64,
    /// 消息回调派发次数。
    pub messages_dispatched: u64,
    /// 外连发起次数（含重试）。
    pub reconnect_attempts: u64,
    /// 外连失败次数。
    pub connect_failures: u64,
    /// 被捕获的业务回调 panic 数。
    pub callback_panics: u64,
}

impl EngineMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn reset(&self) {
        self.accepted.store(0, Ordering::Relaxed);
        self.closed.store(0, Ordering::Relaxed);
        self.messages_dispatched.store(0, Ordering::Relaxed);
        self.reconnect_attempts.store(0, Ordering::Relaxed);
        self.connect_failures.store(0, Ordering::Relaxed);
        self.callback_panics.store(0, Ordering::Relaxed);
    }

    pub(crate) fn on_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_closed(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_message(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn on_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}
