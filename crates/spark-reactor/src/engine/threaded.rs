//! # threaded 引擎说明
//!
//! ## 角色定位（Why）
//! - 多线程反应器引擎：I/O 观察线程只搬运事件，业务回调全部投递到
//!   工作线程池；主协调线程以有界间隔做心跳与重连扫描；
//! - 就绪式后端按事件类别（accept / read / write）各起一组观察线程，
//!   完成式后端以统一的事件循环消费。
//!
//! ## 线程编排（How）
//! - 观察线程：就绪式 3 × `io_threads`，完成式 `io_threads`；
//! - 工作线程池：`work_threads`，顺序保证来自连接上的派发闸而非池；
//! - 主协调线程：等停止信号（有界超时），每轮做心跳扫描与重连扫描；
//! - 外连轮询线程：对在途外连逐个探询，空闲时等唤醒信号。
//!
//! ## 关闭协议（What）
//! - 任何关闭起点都经 `close_by_handle`：表移除（置断开标志）->
//!   关闭通知仲裁 -> 关闭回调 -> OS 层关 socket -> 引用归零回收槽位；
//! - 关闭回调严格排在该连接最后一次消息回调之后、OS 关闭之前。

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
use crate::reconnect::DueEntry;
use crate::server::{guard_callback, ServerHandler};
use crate::socket::{ConnectProgress, ConnectStart, SocketDriver, SocketHandle};
use crate::util::{PackedAddr, Signal};
use crate::workers::WorkerPool;
use crate::Host;

use super::{EngineConfig, EngineShared, MAX_POLL_SIZE};

/// 外连轮询两轮之间的间歇。
const CONNECT_POLL_PAUSE: Duration = Duration::from_millis(20);

/// 多线程 socket 服务引擎。
pub struct ThreadedEngine {
    core: Arc<Core>,
}

struct Core {
    shared: EngineShared,
    workers: WorkerPool,
    stop_signal: Signal,
    connect_wake: Signal,
    io_threads: Mutex<Vec<JoinHandle<()>>>,
    main_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedEngine {
    pub fn new(
        driver: Arc<dyn SocketDriver>,
        backend: ReactorBackend,
        server: Arc<dyn ServerHandler>,
    ) -> Self {
        let core = Arc::new(Core {
            shared: EngineShared::new(driver, backend, server),
            workers: WorkerPool::new(),
            stop_signal: Signal::new(),
            connect_wake: Signal::new(),
            io_threads: Mutex::new(Vec::new()),
            main_thread: Mutex::new(None),
        });
        // 业务线程侧的发送挂载失败经此回到引擎的关闭协议。
        let weak = Arc::downgrade(&core);
        core.shared.io.set_close_hook(move |handle| {
            if let Some(core) = weak.upgrade() {
                core.close_by_handle(handle);
            }
        });
        Self { core }
    }

    /// 预估平均并发连接数（决定连接池块大小）。启动前设置。
    pub fn set_average_connect_count(&self, count: usize) {
        self.core.shared.config.lock().average_connect_count = count;
    }

    /// 心跳间隔（秒），0 关闭心跳检查。
    pub fn set_heartbeat_interval(&self, secs: u64) {
        self.core.shared.config.lock().heartbeat_secs = secs;
    }

    pub fn set_io_thread_count(&self, count: usize) {
        self.core.shared.config.lock().io_threads = count.max(1);
    }

    pub fn set_work_thread_count(&self, count: usize) {
        self.core.shared.config.lock().work_threads = count.max(1);
    }

    /// 反应器等待与管务扫描的有界间隔。
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

    /// 启动引擎。已在运行时幂等成功。
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

        core.workers.start(cfg.work_threads);
        let spawned = self
            .spawn_observers(&cfg)
            .and_then(|()| self.spawn_connect_poll(&cfg))
            .and_then(|()| self.spawn_main(&cfg));
        if let Err(err) = spawned {
            // 已拉起的线程走正常停机路径回收。
            self.stop();
            return Err(EngineError::MonitorStart {
                reason: err.to_string(),
            });
        }
        // 停机期间登记的外连目标统一补发。
        core.reconnect_sweep();
        info!(
            io_threads = cfg.io_threads,
            work_threads = cfg.work_threads,
            "引擎已启动"
        );
        Ok(())
    }

    /// 停止引擎：停反应器、收观察线程、排干工作队列。幂等。
    pub fn stop(&self) {
        let core = &self.core;
        if core.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        core.shared.io.backend().stop();
        core.stop_signal.notify();
        core.connect_wake.notify();
        for handle in core.io_threads.lock().drain(..) {
            let _ = handle.join();
        }
        if let Some(handle) = core.main_thread.lock().take() {
            let _ = handle.join();
        }
        core.workers.stop();
        core.shared.close_listeners();
        info!("引擎已停止");
    }

    /// 阻塞等待引擎停止（主协调线程退出）。
    pub fn wait_stop(&self) {
        let handle = self.core.main_thread.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// 登记并发起一个外连目标。
    ///
    /// `retry_secs`：断开后的补连间隔（秒）；0 为立即补连；负值为一次性
    /// 外连（失败或断开后不再重试）。引擎停止时只登记，启动时统一发起，
    /// 并返回 false。
    pub fn connect(&self, ip: &str, port: u16, retry_secs: i64) -> bool {
        let Ok(ip4) = ip.parse::<Ipv4Addr>() else {
            warn!(ip, port, "外连地址不是合法 IPv4");
            return false;
        };
        self.core
            .shared
            .registry
            .register(PackedAddr::pack(ip4, port), retry_secs);
        if self.core.shared.is_stopped() {
            return false;
        }
        self.core.reconnect_sweep();
        true
    }

    /// 主动关闭一个连接，走完整关闭协议。对未知句柄静默。
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

    fn spawn_observers(&self, cfg: &EngineConfig) -> std::io::Result<()> {
        let mut threads = self.core.io_threads.lock();
        match self.core.shared.io.backend() {
            ReactorBackend::Readiness(m) => {
                for i in 0..cfg.io_threads {
                    threads.push(Self::spawn_named(format!("reactor-accept-{i}"), {
                        let core = Arc::clone(&self.core);
                        let m = Arc::clone(m);
                        let wait = cfg.io_wait;
                        move || Core::accept_loop(&core, &m, wait)
                    })?);
                    threads.push(Self::spawn_named(format!("reactor-read-{i}"), {
                        let core = Arc::clone(&self.core);
                        let m = Arc::clone(m);
                        let wait = cfg.io_wait;
                        move || Core::read_loop(&core, &m, wait)
                    })?);
                    threads.push(Self::spawn_named(format!("reactor-write-{i}"), {
                        let core = Arc::clone(&self.core);
                        let m = Arc::clone(m);
                        let wait = cfg.io_wait;
                        move || Core::write_loop(&core, &m, wait)
                    })?);
                }
            }
            ReactorBackend::Completion(m) => {
                for i in 0..cfg.io_threads {
                    threads.push(Self::spawn_named(format!("reactor-event-{i}"), {
                        let core = Arc::clone(&self.core);
                        let m = Arc::clone(m);
                        let wait = cfg.io_wait;
                        move || Core::completion_loop(&core, &m, wait)
                    })?);
                }
            }
        }
        Ok(())
    }

    fn spawn_connect_poll(&self, cfg: &EngineConfig) -> std::io::Result<()> {
        let core = Arc::clone(&self.core);
        let wait = cfg.io_wait;
        let handle = Self::spawn_named("reactor-connect".into(), move || {
            Core::connect_poll_loop(&core, wait)
        })?;
        self.core.io_threads.lock().push(handle);
        Ok(())
    }

    fn spawn_main(&self, cfg: &EngineConfig) -> std::io::Result<()> {
        let core = Arc::clone(&self.core);
        let heartbeat = cfg.heartbeat_secs;
        let wait = cfg.io_wait;
        let handle = Self::spawn_named("reactor-main".into(), move || {
            loop {
                if core.stop_signal.wait(wait) || core.shared.is_stopped() {
                    break;
                }
                core.heartbeat_sweep(heartbeat);
                core.reconnect_sweep();
            }
        })?;
        *self.core.main_thread.lock() = Some(handle);
        Ok(())
    }

    fn spawn_named(
        name: String,
        body: impl FnOnce() + Send + 'static,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new().name(name).spawn(body)
    }
}

impl Drop for ThreadedEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Core {
    // ---- 就绪式观察循环 ----

    fn accept_loop(core: &Arc<Core>, m: &Arc<dyn ReadinessMonitor>, wait: Duration) {
        loop {
            match m.wait_accept(Some(wait)) {
                WaitOutcome::Stopped => break,
                WaitOutcome::TimedOut => {
                    if core.shared.is_stopped() {
                        break;
                    }
                }
                WaitOutcome::Ready(listeners) => {
                    for listener in listeners {
                        if core.shared.is_stopped() {
                            return;
                        }
                        core.drain_accept(m, listener);
                    }
                }
            }
        }
    }

    fn drain_accept(self: &Arc<Self>, m: &Arc<dyn ReadinessMonitor>, listener: SocketHandle) {
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

    fn read_loop(core: &Arc<Core>, m: &Arc<dyn ReadinessMonitor>, wait: Duration) {
        // 待排空集合：上一轮因让出而未排空的连接留到下一轮继续。
        let mut pending: HashSet<SocketHandle> = HashSet::new();
        loop {
            let timeout = if pending.is_empty() { wait } else { Duration::ZERO };
            match m.wait_read(Some(timeout)) {
                WaitOutcome::Stopped => break,
                WaitOutcome::TimedOut => {
                    if core.shared.is_stopped() {
                        break;
                    }
                }
                WaitOutcome::Ready(handles) => pending.extend(handles),
            }
            pending.retain(|h| core.on_readable(*h) == ConnState::Ok);
        }
    }

    fn write_loop(core: &Arc<Core>, m: &Arc<dyn ReadinessMonitor>, wait: Duration) {
        let mut pending: HashSet<SocketHandle> = HashSet::new();
        loop {
            let timeout = if pending.is_empty() { wait } else { Duration::ZERO };
            match m.wait_write(Some(timeout)) {
                WaitOutcome::Stopped => break,
                WaitOutcome::TimedOut => {
                    if core.shared.is_stopped() {
                        break;
                    }
                }
                WaitOutcome::Ready(handles) => pending.extend(handles),
            }
            pending.retain(|h| core.on_send_ready(*h, 0) == ConnState::Ok);
        }
    }

    // ---- 完成式观察循环 ----

    fn completion_loop(core: &Arc<Core>, m: &Arc<dyn CompletionMonitor>, wait: Duration) {
        loop {
            match m.wait_event(Some(wait)) {
                CompletionEvent::Stopped => break,
                CompletionEvent::TimedOut => {
                    if core.shared.is_stopped() {
                        break;
                    }
                }
                CompletionEvent::Accepted { accepted, .. } => core.on_accepted(accepted, false),
                CompletionEvent::Recv { handle, bytes } => core.on_completion_recv(handle, &bytes),
                CompletionEvent::Sent { handle, len } => {
                    core.on_send_ready(handle, len);
                }
                CompletionEvent::Closed { handle } => core.close_by_handle(handle),
            }
        }
    }

    // ---- 事件处置 ----

    /// 新连接（入站或外连成功）：发放、登记、投递建连任务。
    fn on_accepted(self: &Arc<Self>, handle: SocketHandle, is_server_side: bool) {
        let Some(conn) = self.shared.admit(handle, is_server_side) else {
            return;
        };
        conn.acquire();
        let core = Arc::clone(self);
        let submitted = self.workers.submit({
            let conn = Arc::clone(&conn);
            move || core.connect_worker(conn)
        });
        if !submitted {
            // 停机竞态：建连回调不得丢失，就地执行。
            self.connect_worker(conn);
        }
    }

    /// 建连任务：回调之后挂载首次接收，挂载失败走关闭协议。
    fn connect_worker(self: &Arc<Self>, conn: Arc<Connection>) {
        let host = Host::new(Arc::clone(&conn));
        guard_callback(&self.shared.metrics, "on_connect", || {
            self.shared.server.on_connect(&host);
        });
        if conn.is_connected() && self.shared.io.arm_recv(&conn).is_err() {
            self.close_by_handle(conn.handle());
        }
        self.shared.release(&conn);
    }

    /// 读就绪：排空 socket，必要时成为本连接唯一的消息派发任务。
    fn on_readable(self: &Arc<Self>, handle: SocketHandle) -> ConnState {
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
        self.dispatch_if_first(conn);
        cs
    }

    /// 完成式接收：数据落暂存，再投递下一次接收。
    fn on_completion_recv(self: &Arc<Self>, handle: SocketHandle, bytes: &[u8]) {
        let Some(conn) = self.shared.table.find(handle) else {
            return;
        };
        conn.refresh_heartbeat(self.shared.clock.now_ms());
        if self.shared.io.ingest_recv(&conn, bytes) == ConnState::Unconnected {
            self.shared.release(&conn);
            self.close_by_handle(handle);
            return;
        }
        self.dispatch_if_first(conn);
    }

    /// 抬派发闸：得 0 者把取用引用转交给消息派发任务；否则归还。
    fn dispatch_if_first(self: &Arc<Self>, conn: Arc<Connection>) {
        if conn.raise_dispatch_gate() == 0 {
            let core = Arc::clone(self);
            let submitted = self.workers.submit({
                let conn = Arc::clone(&conn);
                move || core.msg_worker(conn)
            });
            if submitted {
                return;
            }
            // 停机竞态：闸已抬起但任务未入队，就地走一遍派发收尾。
            self.msg_worker(conn);
        } else {
            self.shared.release(&conn);
        }
    }

    /// 消息派发任务：同一连接全局至多一个实例在跑。
    fn msg_worker(self: &Arc<Self>, conn: Arc<Connection>) {
        while !self.shared.is_stopped() {
            if !conn.is_connected() {
                conn.clear_dispatch_gate();
                break;
            }
            conn.settle_dispatch_gate();
            self.shared.metrics.on_message();
            let host = Host::new(Arc::clone(&conn));
            guard_callback(&self.shared.metrics, "on_msg", || {
                self.shared.server.on_msg(&host);
            });
            // 业务消费后回填完成式滞留余量并补投接收。
            if self.shared.io.replenish_recv(&conn) == ConnState::Unconnected {
                self.close_by_handle(conn.handle());
            }
            if conn.readable_len() > 0 {
                continue;
            }
            if conn.lower_dispatch_gate() {
                break;
            }
        }
        if !conn.is_connected() {
            self.notify_on_close(&conn);
        }
        self.shared.release(&conn);
    }

    /// 写可推进：就绪式写就绪或完成式发送完成（`completed` 字节已清账）。
    fn on_send_ready(self: &Arc<Self>, handle: SocketHandle, completed: usize) -> ConnState {
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

    /// 字节入队并确保发送流程在途；挂载失败按对端断开处理。
    fn queue_and_send(self: &Arc<Self>, conn: &Arc<Connection>, bytes: &[u8]) -> bool {
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

    /// 关闭协议入口：表移除（含置断开标志）后做关闭通知仲裁。
    fn close_by_handle(self: &Arc<Self>, handle: SocketHandle) {
        let Some(conn) = self.shared.table.remove_and_begin_close(handle) else {
            return;
        };
        self.notify_on_close(&conn);
        // 归还表的持有引用。
        self.shared.release(&conn);
    }

    /// 关闭通知仲裁：抬闸得 0（无在途派发循环）且首个认领者投递关闭
    /// 任务；否则由派发循环退出路径补发。
    fn notify_on_close(self: &Arc<Self>, conn: &Arc<Connection>) {
        if conn.raise_dispatch_gate() != 0 {
            return;
        }
        if !conn.claim_close_notice() {
            return;
        }
        conn.acquire();
        let core = Arc::clone(self);
        let task_conn = Arc::clone(conn);
        let submitted = self.workers.submit(move || core.close_worker(task_conn));
        if !submitted {
            // 停机排空阶段：关闭回调不得丢失，就地执行。
            self.close_worker(Arc::clone(conn));
        }
    }

    /// 关闭任务：回调之后才关 OS 层 socket（句柄此刻才可能被复用）。
    fn close_worker(&self, conn: Arc<Connection>) {
        if conn.is_server_side() {
            self.shared.registry.reset_by_handle(conn.handle());
        }
        let host = Host::new(Arc::clone(&conn));
        guard_callback(&self.shared.metrics, "on_close_connect", || {
            self.shared.server.on_close_connect(&host);
        });
        self.shared.driver().close(conn.handle());
        self.shared.metrics.on_closed();
        self.shared.release(&conn);
    }

    // ---- 管务 ----

    /// 心跳扫描：每次取一个过期入站连接，移除后重新开始。
    fn heartbeat_sweep(self: &Arc<Self>, interval_secs: u64) {
        if interval_secs == 0 {
            return;
        }
        let now = self.shared.clock.now_ms();
        while let Some(handle) = self.shared.table.find_expired(now, interval_secs) {
            info!(%handle, "心跳超时，关闭连接");
            self.close_by_handle(handle);
        }
    }

    /// 重连扫描：对到期登记项发起外连。
    fn reconnect_sweep(self: &Arc<Self>) {
        let now = self.shared.clock.now_ms();
        let mut started_pending = false;
        for due in self.shared.registry.take_due(now) {
            started_pending |= self.attempt_connect(&due);
        }
        if started_pending {
            self.connect_wake.notify();
        }
    }

    /// 发起一次外连；返回 true 表示进入在途状态（需要轮询）。
    fn attempt_connect(self: &Arc<Self>, due: &DueEntry) -> bool {
        self.shared.metrics.on_reconnect_attempt();
        let ip = due.addr.ip().to_string();
        match self.shared.driver().connect_async(&ip, due.addr.port()) {
            Ok(ConnectStart::Ready(handle)) => {
                self.shared.registry.mark_connected(due.id, handle);
                self.on_accepted(handle, true);
                false
            }
            Ok(ConnectStart::Pending(handle)) => {
                self.shared.registry.mark_started(due.id, handle);
                true
            }
            Err(err) => {
                warn!(ip, port = due.addr.port(), error = %err, "外连发起失败");
                self.shared.registry.mark_failing(due.id);
                self.dispatch_connect_failed(due.id, due.addr, due.retry_secs);
                false
            }
        }
    }

    /// 外连轮询线程：探询在途外连，空闲时等唤醒。
    fn connect_poll_loop(core: &Arc<Core>, wait: Duration) {
        loop {
            if core.shared.is_stopped() {
                break;
            }
            let snapshot = core.shared.registry.connecting();
            if snapshot.is_empty() {
                core.connect_wake.wait(wait);
                continue;
            }
            let mut any_pending = false;
            for entry in snapshot {
                if core.shared.is_stopped() {
                    return;
                }
                match core.shared.driver().poll_connect(entry.handle) {
                    ConnectProgress::Connected => {
                        core.shared.registry.mark_connected(entry.id, entry.handle);
                        core.on_accepted(entry.handle, true);
                    }
                    ConnectProgress::Failed => {
                        core.shared.driver().close(entry.handle);
                        core.shared.registry.mark_failing(entry.id);
                        core.dispatch_connect_failed(entry.id, entry.addr, entry.retry_secs);
                    }
                    ConnectProgress::Pending => any_pending = true,
                }
            }
            if any_pending {
                std::thread::sleep(CONNECT_POLL_PAUSE);
            }
        }
    }

    /// 失败处置：登记项打回待连，失败回调投递到工作线程。
    fn dispatch_connect_failed(self: &Arc<Self>, id: u64, addr: PackedAddr, retry_secs: i64) {
        self.shared.metrics.on_connect_failure();
        let core = Arc::clone(self);
        let submitted = self.workers.submit(move || {
            core.shared.registry.mark_failed(id);
            guard_callback(&core.shared.metrics, "on_connect_failed", || {
                core.shared
                    .server
                    .on_connect_failed(addr.ip(), addr.port(), retry_secs);
            });
        });
        if !submitted {
            self.shared.registry.mark_failed(id);
        }
    }
}
