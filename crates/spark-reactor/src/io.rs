//! # io 模块说明
//!
//! ## 角色定位（Why）
//! - 两个引擎共用的收发推进逻辑：排空接收、推进单飞发送、重新挂载
//!   watch 或投递下一次操作，按后端形态各写一份、引擎只写一份调用；
//! - 收拢为 [`IoShared`] 上的方法，连接对象持有它以便发送路径无需
//!   回引引擎。
//!
//! ## 行为契约（What）
//! - 所有推进函数返回 [`ConnState`]：`Unconnected` 表示连接已不可用，
//!   调用方必须走关闭协议；`WaitRecv` / `WaitSend` 表示本轮推进结束、
//!   等待下一次事件；`Ok` 表示还有进展空间、调用方可继续推进；
//! - 任何 watch 挂载 / 操作投递失败与对端断开同等对待，不静默吞掉。
//!
//! ## 风险提示（Trade-offs）
//! - 接收排空每次唤醒至多推进 1 MiB 即让出（公平性）；依赖就绪式后端
//!   的水平触发语义在重新挂载时补报未消费数据；
//! - 完成式路径的背压靠滞留余量实现：余量未排空前不投递下一次接收，
//!   后续数据积压在后端一侧而不是被丢弃。

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::connect::Connection;
use crate::error::MonitorError;
use crate::monitor::ReactorBackend;
use crate::socket::{RecvOutcome, SendOutcome, SocketDriver, SocketHandle};

/// 单块收发的字节数，与接收/发送暂存的推进粒度一致。
pub(crate) const BLOCK_SIZE: usize = 4096;

/// 单次唤醒的接收排空上限，超出后让出带宽等待下一次事件。
pub(crate) const RECV_YIELD_LIMIT: usize = 1 << 20;

/// 一次 I/O 推进后连接的状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ConnState {
    /// 仍有进展空间，调用方可继续推进。
    Ok,
    /// 本轮接收结束，等待下一次读事件。
    WaitRecv,
    /// 本轮发送结束，等待下一次写事件或新数据。
    WaitSend,
    /// 连接已不可用，调用方必须走关闭协议。
    Unconnected,
}

type CloseHook = Arc<dyn Fn(SocketHandle) + Send + Sync>;

/// 驱动与后端的共享束，连接对象与两个引擎各持一份 [`Arc`]。
pub struct IoShared {
    driver: Arc<dyn SocketDriver>,
    backend: ReactorBackend,
    /// 业务线程侧的挂载失败经此回到引擎的关闭协议。
    close_hook: Mutex<Option<CloseHook>>,
}

impl std::fmt::Debug for IoShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoShared")
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

impl IoShared {
    pub fn new(driver: Arc<dyn SocketDriver>, backend: ReactorBackend) -> Self {
        Self {
            driver,
            backend,
            close_hook: Mutex::new(None),
        }
    }

    /// 登记"注册失败转关闭协议"的入口，引擎构造后设置一次。
    pub(crate) fn set_close_hook(&self, hook: impl Fn(SocketHandle) + Send + Sync + 'static) {
        *self.close_hook.lock() = Some(Arc::new(hook));
    }

    /// 把连接交回引擎的关闭协议（不持锁调用，允许钩子内再入）。
    pub(crate) fn request_close(&self, handle: SocketHandle) {
        let hook = self.close_hook.lock().as_ref().map(Arc::clone);
        if let Some(hook) = hook {
            hook(handle);
        }
    }

    pub(crate) fn driver(&self) -> &Arc<dyn SocketDriver> {
        &self.driver
    }

    pub(crate) fn backend(&self) -> &ReactorBackend {
        &self.backend
    }

    /// 连接建立后的首次接收挂载。
    pub(crate) fn arm_recv(&self, conn: &Connection) -> Result<(), MonitorError> {
        match &self.backend {
            ReactorBackend::Readiness(m) => m.add_read_watch(conn.handle()),
            ReactorBackend::Completion(m) => m.add_recv(conn.handle()),
        }
    }

    /// 就绪式路径：把 socket 上已到的数据排空进接收暂存。
    ///
    /// - **执行 (How)**：按块循环读取；读到 `WouldBlock` 时重新挂载读
    ///   watch 并转入等待；累计推进超过 [`RECV_YIELD_LIMIT`] 时直接返回
    ///   `Ok` 让出（事件仍挂在调用方的待处理集合里，下一轮继续）；
    /// - **边界**：接收暂存已满时同样重新挂载并等待，由业务消费腾出
    ///   空间后靠水平触发补报。
    pub(crate) fn drain_recv(&self, conn: &Connection) -> ConnState {
        let m = match &self.backend {
            ReactorBackend::Readiness(m) => m,
            ReactorBackend::Completion(_) => return ConnState::WaitRecv,
        };
        let mut total = 0usize;
        loop {
            if total >= RECV_YIELD_LIMIT {
                return ConnState::Ok;
            }
            let mut buf = conn.recv_buffer().lock();
            let chunk = buf.writable_chunk();
            if chunk.is_empty() {
                drop(buf);
                return match m.add_read_watch(conn.handle()) {
                    Ok(()) => ConnState::WaitRecv,
                    Err(_) => ConnState::Unconnected,
                };
            }
            let want = chunk.len().min(BLOCK_SIZE);
            match self.driver.recv(conn.handle(), &mut chunk[..want]) {
                RecvOutcome::Data(n) => {
                    buf.commit(n);
                    total += n;
                }
                RecvOutcome::WouldBlock => {
                    drop(buf);
                    return match m.add_read_watch(conn.handle()) {
                        Ok(()) => ConnState::WaitRecv,
                        Err(_) => ConnState::Unconnected,
                    };
                }
                RecvOutcome::Closed | RecvOutcome::Err => return ConnState::Unconnected,
            }
        }
    }

    /// 完成式路径：把后端带回的接收数据落入接收暂存并投递下一次接收。
    ///
    /// 暂存装不下的余量滞留在连接的回填暂存里，此时**不**投递下一次
    /// 接收；待业务消费腾出空间后由派发循环经 [`Self::replenish_recv`]
    /// 回填并补投，不丢一个字节。
    pub(crate) fn ingest_recv(&self, conn: &Connection, bytes: &[u8]) -> ConnState {
        let m = match &self.backend {
            ReactorBackend::Completion(m) => m,
            ReactorBackend::Readiness(_) => return ConnState::WaitRecv,
        };
        {
            let mut backlog = conn.recv_backlog().lock();
            let mut buf = conn.recv_buffer().lock();
            if !backlog.is_empty() {
                let moved = buf.append(&backlog);
                backlog.drain(..moved);
            }
            if backlog.is_empty() {
                let written = buf.append(bytes);
                if written < bytes.len() {
                    backlog.extend_from_slice(&bytes[written..]);
                }
            } else {
                // 余量在前，新数据排队其后，保序。
                backlog.extend_from_slice(bytes);
            }
            if !backlog.is_empty() {
                return ConnState::WaitRecv;
            }
        }
        match m.add_recv(conn.handle()) {
            Ok(()) => ConnState::WaitRecv,
            Err(_) => ConnState::Unconnected,
        }
    }

    /// 完成式路径：业务消费腾出空间后回填滞留余量，排空即补投下一次
    /// 接收。就绪式后端无滞留概念，恒为 `Ok`。
    pub(crate) fn replenish_recv(&self, conn: &Connection) -> ConnState {
        let m = match &self.backend {
            ReactorBackend::Completion(m) => m,
            ReactorBackend::Readiness(_) => return ConnState::Ok,
        };
        {
            let mut backlog = conn.recv_backlog().lock();
            if backlog.is_empty() {
                return ConnState::Ok;
            }
            let moved = conn.recv_buffer().lock().append(&backlog);
            backlog.drain(..moved);
            if !backlog.is_empty() {
                return ConnState::Ok;
            }
        }
        match m.add_recv(conn.handle()) {
            Ok(()) => ConnState::Ok,
            Err(_) => ConnState::Unconnected,
        }
    }

    /// 业务侧新数据入队后的发送流程开启。
    ///
    /// 单飞闸已被占用时直接返回成功：在途流程的"关窗前最后一查"会
    /// 看到新数据。
    pub(crate) fn start_send(&self, conn: &Connection) -> Result<(), MonitorError> {
        if !conn.start_send_flow() {
            return Ok(());
        }
        match &self.backend {
            ReactorBackend::Readiness(m) => m.add_write_watch(conn.handle()),
            ReactorBackend::Completion(_) => match self.drive_send(conn, 0) {
                ConnState::Unconnected => Err(MonitorError::Register {
                    handle: conn.handle().0,
                }),
                _ => Ok(()),
            },
        }
    }

    /// 推进单飞发送流程一步。
    ///
    /// - **执行 (How)**：就绪式按块非阻塞写出，部分写出或窗口满时结束
    ///   本轮并重新挂载写 watch；完成式先对上一次投递的 `completed`
    ///   字节清账，再投递下一块；
    /// - **竞态收口**：发送暂存排空后先放闸再复查——复查见到新数据且
    ///   能重新抢到闸，则继续推进，杜绝"放闸瞬间入队的数据永远等不到
    ///   流程"的窗口。
    pub(crate) fn drive_send(&self, conn: &Connection, completed: usize) -> ConnState {
        match &self.backend {
            ReactorBackend::Completion(m) => {
                {
                    let mut buf = conn.send_buffer().lock();
                    if completed > 0 {
                        buf.consume(completed);
                    }
                    if buf.is_empty() {
                        drop(buf);
                        conn.end_send_flow();
                        if conn.send_buffer().lock().is_empty() {
                            return ConnState::WaitSend;
                        }
                        if !conn.start_send_flow() {
                            return ConnState::WaitSend;
                        }
                    }
                }
                let mut chunk = [0u8; BLOCK_SIZE];
                let n = conn.send_buffer().lock().peek_into(&mut chunk);
                match m.add_send(conn.handle(), Bytes::copy_from_slice(&chunk[..n])) {
                    Ok(()) => ConnState::Ok,
                    Err(_) => ConnState::Unconnected,
                }
            }
            ReactorBackend::Readiness(m) => {
                let mut more_pending = false;
                {
                    let mut buf = conn.send_buffer().lock();
                    if !buf.is_empty() {
                        let mut chunk = [0u8; BLOCK_SIZE];
                        let n = buf.peek_into(&mut chunk);
                        more_pending = buf.len() > n;
                        match self.driver.send(conn.handle(), &chunk[..n]) {
                            SendOutcome::Sent(w) => {
                                buf.consume(w);
                                if w < n {
                                    more_pending = false;
                                }
                            }
                            SendOutcome::WouldBlock => more_pending = false,
                            SendOutcome::Err => return ConnState::Unconnected,
                        }
                    }
                }
                if more_pending {
                    // 整块写出且还有存量，socket 窗口未满：继续推进。
                    return ConnState::Ok;
                }
                conn.end_send_flow();
                if conn.send_buffer().lock().is_empty() {
                    return ConnState::WaitSend;
                }
                if !conn.start_send_flow() {
                    return ConnState::WaitSend;
                }
                match m.add_write_watch(conn.handle()) {
                    Ok(()) => ConnState::WaitSend,
                    Err(_) => ConnState::Unconnected,
                }
            }
        }
    }
}
