//! # connect 模块说明
//!
//! ## 角色定位（Why）
//! - [`Connection`] 是单个存活或排空中 socket 的全部状态：暂存缓冲、
//!   生命周期标志与并发协议用的原子计数；
//! - 关闭协议的三条顺序事实（先移出表再关 socket、关闭通知恰好一次、
//!   消息回调全部结束后才通知关闭）都落在本对象的原子编排上。
//!
//! ## 并发协议（How）
//! - `use_count`：持有方计数（连接表、在途回调、反应器各占一份引用），
//!   归零的那次递减触发池槽位回收；
//! - `read_in_progress`：消息派发重入闸。数据就绪路径 `fetch_add` 得 0
//!   者成为唯一派发循环；关闭路径同样 `fetch_add`，得 0 表示没有在途
//!   派发循环、由关闭方直接发出关闭通知，得非 0 则把通知责任交给派发
//!   循环退出时补发——两条路径恰有一条成立；
//! - `close_notified`：一次性闸（`fetch_add` 即 test-and-set），心跳
//!   超时、对端断开、发送失败并发触发时也只通知一次；
//! - `connected`：任何关闭路径的第一个可见效果就是置 false，在途派发
//!   循环以之为协作取消标志。
//!
//! ## 风险提示（Trade-offs）
//! - 关闭路径在 `read_in_progress` 上的 `fetch_add` 不回退：闸被永久
//!   抬高，杜绝关闭后再起新的派发循环；这是协议的一部分而不是泄漏。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::buffer::RingBuffer;
use crate::io::IoShared;
use crate::socket::SocketHandle;

/// 单个连接对象。由 [`ConnectionPool`](crate::pool::ConnectionPool) 按
/// 槽位发放，经 [`ConnectionTable`](crate::table::ConnectionTable) 共享。
#[derive(Debug)]
pub struct Connection {
    handle: SocketHandle,
    is_server_side: bool,
    pool_slot: usize,
    io: Arc<IoShared>,
    connected: AtomicBool,
    use_count: AtomicI32,
    read_in_progress: AtomicI32,
    close_notified: AtomicI32,
    last_heartbeat_ms: AtomicU64,
    send_flow: AtomicBool,
    recv_buffer: Mutex<RingBuffer>,
    /// 完成式路径下接收暂存装不下的余量，由派发循环消费后回填。
    recv_backlog: Mutex<Vec<u8>>,
    send_buffer: Mutex<RingBuffer>,
    groups: Mutex<Vec<i64>>,
}

impl Connection {
    pub(crate) fn new(
        handle: SocketHandle,
        is_server_side: bool,
        pool_slot: usize,
        io: Arc<IoShared>,
        recv_capacity: usize,
        send_capacity: usize,
    ) -> Self {
        Self {
            handle,
            is_server_side,
            pool_slot,
            io,
            connected: AtomicBool::new(true),
            use_count: AtomicI32::new(0),
            read_in_progress: AtomicI32::new(0),
            close_notified: AtomicI32::new(0),
            last_heartbeat_ms: AtomicU64::new(0),
            send_flow: AtomicBool::new(false),
            recv_buffer: Mutex::new(RingBuffer::with_capacity(recv_capacity)),
            recv_backlog: Mutex::new(Vec::new()),
            send_buffer: Mutex::new(RingBuffer::with_capacity(send_capacity)),
            groups: Mutex::new(Vec::new()),
        }
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    /// 本进程主动外连建立的连接（豁免心跳检查，参与重连登记）。
    pub fn is_server_side(&self) -> bool {
        self.is_server_side
    }

    pub(crate) fn pool_slot(&self) -> usize {
        self.pool_slot
    }

    pub(crate) fn io(&self) -> &Arc<IoShared> {
        &self.io
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// 关闭的第一个可见效果：在表移除的同一临界区内置 false。
    pub(crate) fn begin_close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// 增加一份持有引用，返回新值。
    pub(crate) fn acquire(&self) -> i32 {
        self.use_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 释放一份持有引用，返回新值；归零由池回收槽位。
    pub(crate) fn release_ref(&self) -> i32 {
        let prev = self.use_count.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev >= 1, "use_count underflow");
        prev - 1
    }

    #[cfg(test)]
    pub(crate) fn use_count(&self) -> i32 {
        self.use_count.load(Ordering::SeqCst)
    }

    /// 派发/关闭双方共用的重入闸：返回抬闸前的旧值。
    ///
    /// 数据就绪路径：旧值 0 表示本线程成为唯一派发循环；
    /// 关闭路径：旧值 0 表示没有在途派发循环，可直接发关闭通知。
    pub(crate) fn raise_dispatch_gate(&self) -> i32 {
        self.read_in_progress.fetch_add(1, Ordering::SeqCst)
    }

    /// 派发循环每轮先归一，吸收本轮内到达的重入请求。
    pub(crate) fn settle_dispatch_gate(&self) {
        self.read_in_progress.store(1, Ordering::SeqCst);
    }

    /// 派发循环退出判定：递减后若无重入请求（递减前为 1）返回 true。
    pub(crate) fn lower_dispatch_gate(&self) -> bool {
        self.read_in_progress.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// 连接已断开时派发循环直接清零退出（多线程引擎路径）。
    pub(crate) fn clear_dispatch_gate(&self) {
        self.read_in_progress.store(0, Ordering::SeqCst);
    }

    /// 一次性认领关闭通知；并发触发下只有一个调用方得到 true。
    pub(crate) fn claim_close_notice(&self) -> bool {
        self.close_notified.fetch_add(1, Ordering::SeqCst) == 0
    }

    pub(crate) fn refresh_heartbeat(&self, now_ms: u64) {
        self.last_heartbeat_ms.store(now_ms, Ordering::Relaxed);
    }

    pub(crate) fn last_heartbeat_ms(&self) -> u64 {
        self.last_heartbeat_ms.load(Ordering::Relaxed)
    }

    /// 单飞发送闸：false -> true 的转换只有一个调用方成功。
    pub(crate) fn start_send_flow(&self) -> bool {
        self.send_flow
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn end_send_flow(&self) {
        self.send_flow.store(false, Ordering::SeqCst);
    }

    pub(crate) fn recv_buffer(&self) -> &Mutex<RingBuffer> {
        &self.recv_buffer
    }

    pub(crate) fn send_buffer(&self) -> &Mutex<RingBuffer> {
        &self.send_buffer
    }

    pub(crate) fn recv_backlog(&self) -> &Mutex<Vec<u8>> {
        &self.recv_backlog
    }

    /// 接收暂存区中尚未被业务消费的字节数。
    pub fn readable_len(&self) -> usize {
        self.recv_buffer.lock().len()
    }

    pub(crate) fn join_group(&self, group: i64) {
        let mut groups = self.groups.lock();
        if !groups.contains(&group) {
            groups.push(group);
        }
    }

    /// 命中 `groups` 中任意一个分组即为 true；空集返回 false。
    pub(crate) fn in_any_group(&self, groups: &[i64]) -> bool {
        if groups.is_empty() {
            return false;
        }
        let own = self.groups.lock();
        groups.iter().any(|g| own.contains(g))
    }
}
