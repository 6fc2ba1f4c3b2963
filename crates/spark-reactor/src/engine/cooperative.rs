//! # cooperative 引擎说明
//!
//! ## 角色定位（Why）
//! - 单线程协作引擎：全部网络事件、业务回调与管务都在一条事件循环
//!   线程上推进，回调之间天然串行，无需工作线程池；
//! - 业务主循环（[`ServerHandler::main_tick`]）嵌在事件循环里轮询，
//!   直到其返回 [`TickOutcome::Done`]。
//!
//! ## 事件循环（How）
//! - 每轮：业务主循环一步 -> 消费一批网络事件 -> 轮询在途外连 ->
//!   心跳扫描 -> 重连扫描；
//! - 就绪式后端按 accept / read / write 三类依次消费：完全空闲时以
//!   `io_wait` 阻塞，表非空时读等待只占一个短片，写就绪与新入站的
//!   最坏延迟即为一个短片；完成式后端每轮消费一个完成事件。
//!
//! ## 风险提示（Trade-offs）
//! - 操作面（`connect` / `send_to` / `close_connection` 等）预期在业务
//!   回调内（即事件循环线程上）调用；跨线程调用不破坏内存安全（内部
//!   结构自带锁），但回调会在调用方线程上执行，串行承诺随之失效；
//! - 回调内长阻塞会冻结整个引擎，这是单线程模型的固有契约。

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::connect::Connection;
use crate::error::EngineError;
use crate::io::ConnState;
use crate::metrics::MetricsSnapshot;
use crate::monitor::{CompletionEvent, CompletionMonitor, ReactorBackend, ReadinessMonitor, WaitOutcome};
use crate::pool::ConnectionPool;
use crate::server::{guard_callback, ServerHandler, TickOutcome};
use crate::socket::{ConnectProgress, ConnectStart, SocketDriver, SocketHandle};
use crate::util::PackedAddr;
use crate::Host;

use super::{EngineConfig, EngineShared, MAX_POLL_SIZE};

/// 表非空时读等待的短片上限：三类等待串行，读等待吃满 `io_wait` 会
/// 卡住写就绪、新入站与业务主循环。
const BUSY_READ_SLICE: Duration = Duration::from_millis(10);

/// 单线程协作 socket 服务引擎。
pub struct CooperativeEngine {
    core: Arc<CoopCore>,
    main_thread: Mutex<Option<JoinHandle<()>>>,
}

struct CoopCore {
    shared: EngineShared,
}

impl CooperativeEngine {
    pub fn new(
        driver: Arc<dyn SocketDriver>,
        backend: ReactorBackend,
        server: Arc<dyn ServerHandler>,
    ) -> Self {
        let core = Arc::new(CoopCore {
            shared: EngineShared::new(driver, backend, server),
        });
        // 业务回调侧的发送挂载失败经此回到引擎的关闭协议。
        let weak = Arc::downgrade(&core);
        core.shared.io.set_close_hook(move |handle| {
            if let Some(core) = weak.upgrade() {
                core.close_by_handle(handle);
            }
        });
        Self {
            core,
            main_thread: Mutex::new(None),
        }
    }

    pub fn set_average_connect_count(&self, count: usize) {
        self.core.shared.config.lock().average_connect_count = count;
    }

    /// 心跳间隔（秒），0 关闭心跳检查。
    pub fn set_heartbeat_interval(&self, secs: u64) {
        self.core.shared.config.lock().heartbeat_secs = secs;
    }

    /// 事件循环完全空闲时的有界阻塞间隔。
    pub fn set_io_wait(&self, wait: Duration) {
        self.core.shared.config.lock().io_wait = wait;
    }

    /// 单连接接收/发送暂存容量（字节）。启动前设置。
    pub fn set_buffer_capacity(&self, recv: usize, send: usize) {
        let mut cfg = self.core.shared.config.lock();
        cfg.recv_buffer_capacity = recv;
        cfg.send_buffer_capacity = send;
    }

    /// 登记监听端口。停止状态下只登记，`start` 统一绑定。
    pub fn listen(&self, port: u16) -> bool {
        self.core.shared.listen(port)
    }

    /// 启动引擎：绑定监听端口并拉起事件循环线程。已在运行时幂等成功。
    pub fn start(&self) -> Result<(), EngineError> {
        let core = &self.core;
        if !core.shared.is_stopped() {
            return Ok(());
        }
        let cfg = core.shared.config.lock().clone();
        core.shared.metrics.reset();
        let pool = Arc::new(ConnectionPool::new(
            cfg.average_connect_count,
            cfg.recv_buffer_capacity,
            cfg.send_buffer_capacity,
        )?);
        *core.shared.pool.write() = Some(pool);
        core.shared
            .io
            .backend()
            .start(MAX_POLL_SIZE)
            .map_err(|e| EngineError::MonitorStart {
                reason: e.to_string(),
            })?;
        core.shared.stop.store(false, Ordering::SeqCst);
        if let Err(err) = core.shared.listen_all() {
            core.shared.stop.store(true, Ordering::SeqCst);
            core.shared.io.backend().stop();
            core.shared.close_listeners();
            return Err(err);
        }
        let core_for_loop = Arc::clone(core);
        let spawned = std::thread::Builder::new()
            .name("reactor-coop".into())
            .spawn(move || core_for_loop.event_loop(cfg));
        match spawned {
            Ok(handle) => {
                *self.main_thread.lock() = Some(handle);
                info!("单线程引擎已启动");
                Ok(())
            }
            Err(err) => {
                core.shared.stop.store(true, Ordering::SeqCst);
                core.shared.io.backend().stop();
                core.shared.close_listeners();
                Err(EngineError::MonitorStart {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// 停止引擎并等待事件循环退出。幂等。
    pub fn stop(&self) {
        if self.core.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.shared.io.backend().stop();
        if let Some(handle) = self.main_thread.lock().take() {
            let _ = handle.join();
        }
        self.core.shared.close_listeners();
        info!("单线程引擎已停止");
    }

    /// 阻塞等待事件循环退出。
    pub fn wait_stop(&self) {
        let handle = self.main_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// 登记一个外连目标，由事件循环在下一轮扫描时发起。
    ///
    /// 引擎停止时只登记并返回 false，启动后统一发起。
    pub fn connect(&self, ip: &str, port: u16, retry_secs: i64) -> bool {
        let Ok(ip4) = ip.parse::<Ipv4Addr>() else {
            warn!(ip, port, "外连地址不是合法 IPv4");
            return false;
        };
        self.core
            .shared
            .registry
            .register(PackedAddr::pack(ip4, port), retry_secs);
        !self.core.shared.is_stopped()
    }

    /// 主动关闭一个连接。对未知句柄静默。
    pub fn close_connection(&self, handle: SocketHandle) {
        self.core.close_by_handle(handle);
    }

    /// 向指定连接发送。连接不存在、已断开或发送暂存不足时返回 false。
    pub fn send_to(&self, handle: SocketHandle, bytes: &[u8]) -> bool {
        let Some(conn) = self.core.shared.table.find(handle) else {
            return false;
        };
        let sent = self.core.queue_and_send(&conn, bytes);
        self.core.shared.release(&conn);
        sent
    }

    /// 向命中 `recv_groups` 任一分组且不在 `exclude_groups` 的连接广播。
    pub fn broadcast(&self, recv_groups: &[i64], exclude_groups: &[i64], bytes: &[u8]) {
        for conn in self.core.shared.table.group_targets(recv_groups, exclude_groups) {
            self.core.queue_and_send(&conn, bytes);
            self.core.shared.release(&conn);
        }
    }

    /// 把连接加入广播分组。连接不存在返回 false。
    pub fn join_group(&self, handle: SocketHandle, group: i64) -> bool {
        let Some(conn) = self.core.shared.table.find(handle) else {
            return false;
        };
        conn.join_group(group);
        self.core.shared.release(&conn);
        true
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.shared.metrics.snapshot()
    }

    /// 当前连接池的块大小（未启动时为 `None`）。
    pub fn pool_block(&self) -> Option<usize> {
        self.core.shared.pool.read().as_ref().map(|p| p.block())
    }
}

impl Drop for CooperativeEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl CoopCore {
    fn event_loop(self: Arc<Self>, cfg: EngineConfig) {
        let mut pending: HashSet<SocketHandle> = HashSet::new();
        let mut main_done = false;
        while !self.shared.is_stopped() {
            if !main_done {
                let mut done = false;
                guard_callback(&self.shared.metrics, "main_tick", || {
                    done = self.shared.server.main_tick() == TickOutcome::Done;
                });
                main_done = done;
            }
            let alive = match self.shared.io.backend() {
                ReactorBackend::Readiness(m) => {
                    let m = Arc::clone(m);
                    self.readiness_slice(&m, &mut pending, cfg.io_wait)
                }
                ReactorBackend::Completion(m) => {
                    let m = Arc::clone(m);
                    self.completion_slice(&m, cfg.io_wait)
                }
            };
            if !alive {
                break;
            }
            self.poll_connecting();
            self.heartbeat_sweep(cfg.heartbeat_secs);
            self.reconnect_sweep();
        }
    }

    /// 就绪式后端的一轮事件消费。返回 false 表示后端已停止。
    ///
    /// 完全空闲（无连接、无待排空）时才以 `io_wait` 阻塞；表非空时读
    /// 等待至多一个短片（[`BUSY_READ_SLICE`]），写就绪、新入站与业务
    /// 主循环的最坏延迟即为一个短片。
    fn readiness_slice(
        &self,
        m: &Arc<dyn ReadinessMonitor>,
        pending: &mut HashSet<SocketHandle>,
        wait: Duration,
    ) -> bool {
        let busy = self.shared.table.len() > 0 || !pending.is_empty();
        let accept_wait = if busy { Duration::ZERO } else { wait };
        match m.wait_accept(Some(accept_wait)) {
            WaitOutcome::Stopped => return false,
            WaitOutcome::TimedOut => {}
            WaitOutcome::Ready(listeners) => {
                for listener in listeners {
                    self.drain_accept(m, listener);
                }
            }
        }
        let read_wait = if busy && pending.is_empty() {
            wait.min(BUSY_READ_SLICE)
        } else {
            Duration::ZERO
        };
        match m.wait_read(Some(read_wait)) {
            WaitOutcome::Stopped => return false,
            WaitOutcome::TimedOut => {}
            WaitOutcome::Ready(handles) => pending.extend(handles),
        }
        pending.retain(|h| self.on_readable(*h) == ConnState::Ok);
        match m.wait_write(Some(Duration::ZERO)) {
            WaitOutcome::Stopped => return false,
            WaitOutcome::TimedOut => {}
            WaitOutcome::Ready(handles) => {
                for handle in handles {
                    // 单线程下就地推进到本轮无进展为止。
                    while self.on_send_ready(handle, 0) == ConnState::Ok {}
                }
            }
        }
        true
    }

    /// 完成式后端的一轮事件消费：每轮一个事件。
    fn completion_slice(&self, m: &Arc<dyn CompletionMonitor>, wait: Duration) -> bool {
        match m.wait_event(Some(wait)) {
            CompletionEvent::Stopped => false,
            CompletionEvent::TimedOut => true,
            CompletionEvent::Accepted { accepted, .. } => {
                self.on_accepted(accepted, false);
                true
            }
            CompletionEvent::Recv { handle, bytes } => {
                self.on_completion_recv(handle, &bytes);
                true
            }
            CompletionEvent::Sent { handle, len } => {
                while self.on_send_ready(handle, len) == ConnState::Ok {}
                true
            }
            CompletionEvent::Closed { handle } => {
                self.close_by_handle(handle);
                true
            }
        }
    }

    fn drain_accept(&self, m: &Arc<dyn ReadinessMonitor>, listener: SocketHandle) {
        loop {
            match self.shared.driver().accept(listener) {
                Ok(Some(handle)) => self.on_accepted(handle, false),
                Ok(None) => break,
                Err(err) => {
                    warn!(%listener, error = %err, "accept 出错");
                    break;
                }
            }
        }
        if let Err(err) = m.add_accept_watch(listener) {
            warn!(%listener, error = %err, "监听句柄重挂失败，关闭监听");
            self.shared.driver().close(listener);
        }
    }

    /// 新连接：发放、登记、就地回调、挂载接收。
    fn on_accepted(&self, handle: SocketHandle, is_server_side: bool) {
        let Some(conn) = self.shared.admit(handle, is_server_side) else {
            return;
        };
        let host = Host::new(Arc::clone(&conn));
        guard_callback(&self.shared.metrics, "on_connect", || {
            self.shared.server.on_connect(&host);
        });
        if conn.is_connected() && self.shared.io.arm_recv(&conn).is_err() {
            self.close_by_handle(handle);
        }
    }

    fn on_readable(&self, handle: SocketHandle) -> ConnState {
        let Some(conn) = self.shared.table.find(handle) else {
            return ConnState::Unconnected;
        };
        conn.refresh_heartbeat(self.shared.clock.now_ms());
        let cs = self.shared.io.drain_recv(&conn);
        if cs == ConnState::Unconnected {
            self.shared.release(&conn);
            self.close_by_handle(handle);
            return ConnState::Unconnected;
        }
        if conn.raise_dispatch_gate() == 0 {
            self.msg_loop(&conn);
        }
        self.shared.release(&conn);
        cs
    }

    fn on_completion_recv(&self, handle: SocketHandle, bytes: &[u8]) {
        let Some(conn) = self.shared.table.find(handle) else {
            return;
        };
        conn.refresh_heartbeat(self.shared.clock.now_ms());
        if self.shared.io.ingest_recv(&conn, bytes) == ConnState::Unconnected {
            self.shared.release(&conn);
            self.close_by_handle(handle);
            return;
        }
        if conn.raise_dispatch_gate() == 0 {
            self.msg_loop(&conn);
        }
        self.shared.release(&conn);
    }

    /// 就地消息派发：回调内关闭或消费完即退出，断开时补发关闭通知。
    fn msg_loop(&self, conn: &Arc<Connection>) {
        while !self.shared.is_stopped() {
            self.shared.metrics.on_message();
            let host = Host::new(Arc::clone(conn));
            guard_callback(&self.shared.metrics, "on_msg", || {
                self.shared.server.on_msg(&host);
            });
            // 业务消费后回填完成式滞留余量并补投接收。
            if self.shared.io.replenish_recv(conn) == ConnState::Unconnected {
                self.close_by_handle(conn.handle());
            }
            if !conn.is_connected() || conn.readable_len() == 0 {
                break;
            }
        }
        conn.lower_dispatch_gate();
        if !conn.is_connected() {
            self.notify_close(conn);
        }
    }

    fn on_send_ready(&self, handle: SocketHandle, completed: usize) -> ConnState {
        let Some(conn) = self.shared.table.find(handle) else {
            return ConnState::Unconnected;
        };
        let cs = if conn.is_connected() {
            self.shared.io.drive_send(&conn, completed)
        } else {
            ConnState::WaitSend
        };
        self.shared.release(&conn);
        if cs == ConnState::Unconnected {
            self.close_by_handle(handle);
        }
        cs
    }

    fn queue_and_send(&self, conn: &Arc<Connection>, bytes: &[u8]) -> bool {
        if !conn.is_connected() {
            return false;
        }
        {
            let mut buf = conn.send_buffer().lock();
            if buf.free() < bytes.len() {
                return false;
            }
            buf.append(bytes);
        }
        if self.shared.io.start_send(conn).is_err() {
            self.close_by_handle(conn.handle());
            return false;
        }
        true
    }

    // ---- 关闭协议 ----

    fn close_by_handle(&self, handle: SocketHandle) {
        let Some(conn) = self.shared.table.remove_and_begin_close(handle) else {
            return;
        };
        // 抬闸得 0：无在途派发循环，就地通知；否则由 msg_loop 退出补发。
        if conn.raise_dispatch_gate() == 0 {
            self.notify_close(&conn);
        }
        self.shared.release(&conn);
    }

    /// 关闭通知（至多一次）：回调之后才关 OS 层 socket。
    fn notify_close(&self, conn: &Arc<Connection>) {
        if !conn.claim_close_notice() {
            return;
        }
        if conn.is_server_side() {
            self.shared.registry.reset_by_handle(conn.handle());
        }
        let host = Host::new(Arc::clone(conn));
        guard_callback(&self.shared.metrics, "on_close_connect", || {
            self.shared.server.on_close_connect(&host);
        });
        self.shared.driver().close(conn.handle());
        self.shared.metrics.on_closed();
    }

    // ---- 管务 ----

    fn heartbeat_sweep(&self, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }
        let now = self.shared.clock.now_ms();
        while let Some(handle) = self.shared.table.find_expired(now, interval_secs) {
            info!(%handle, "心跳超时，关闭连接");
            self.close_by_handle(handle);
        }
    }

    fn reconnect_sweep(&self) {
        let now = self.shared.clock.now_ms();
        for due in self.shared.registry.take_due(now) {
            self.shared.metrics.on_reconnect_attempt();
            let ip = due.addr.ip().to_string();
            match self.shared.driver().connect_async(&ip, due.addr.port()) {
                Ok(ConnectStart::Ready(handle)) => {
                    self.shared.registry.mark_connected(due.id, handle);
                    self.on_accepted(handle, true);
                }
                Ok(ConnectStart::Pending(handle)) => {
                    self.shared.registry.mark_started(due.id, handle);
                }
                Err(err) => {
                    warn!(ip, port = due.addr.port(), error = %err, "外连发起失败");
                    self.connect_failed(due.id, due.addr, due.retry_secs);
                }
            }
        }
    }

    /// 轮询在途外连（getpeername 判法的抽象）。
    fn poll_connecting(&self) {
        for entry in self.shared.registry.connecting() {
            match self.shared.driver().poll_connect(entry.handle) {
                ConnectProgress::Connected => {
                    self.shared.registry.mark_connected(entry.id, entry.handle);
                    self.on_accepted(entry.handle, true);
                }
                ConnectProgress::Failed => {
                    self.shared.driver().close(entry.handle);
                    self.connect_failed(entry.id, entry.addr, entry.retry_secs);
                }
                ConnectProgress::Pending => {}
            }
        }
    }

    fn connect_failed(&self, id: u64, addr: PackedAddr, retry_secs: i64) {
        self.shared.metrics.on_connect_failure();
        self.shared.registry.mark_failed(id);
        guard_callback(&self.shared.metrics, "on_connect_failed", || {
            self.shared
                .server
                .on_connect_failed(addr.ip(), addr.port(), retry_secs);
        });
    }
}
