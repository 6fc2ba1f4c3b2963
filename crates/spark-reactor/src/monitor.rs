//! # monitor 模块说明
//!
//! ## 角色定位（Why）
//! - 定义引擎消费的反应器后端接口。两种形态：就绪式（epoll 形态，一次性
//!   注册、触发后必须重新挂载）与完成式（IOCP 形态，等待携带结果的完成
//!   事件）；
//! - 平台差异不走编译期分叉，而是构造期选择的 [`ReactorBackend`]，
//!   引擎的派发逻辑只写一份。
//!
//! ## 行为契约（What）
//! - 就绪式的三类 watch（accept / read / write）相互独立，各自一次性：
//!   事件触发后在该类上自动解除，引擎消费完必须重新挂载；
//! - `wait_*` / `wait_event` 都接受有界超时，停止时返回 `Stopped`，
//!   从而让观察线程能够退出；
//! - 注册失败对引擎而言等价于对端断开（连接转入关闭协议）。
//!
//! ## 风险提示（Trade-offs）
//! - 就绪式 watch 要求实现具备水平触发语义：重新挂载时若仍有未消费
//!   数据须再次回报。引擎的有界排空（每次唤醒至多 1 MiB）依赖这一点
//!   让出带宽而不丢事件。

use std::time::Duration;

use bytes::Bytes;

use crate::error::MonitorError;
use crate::socket::SocketHandle;

/// 一次就绪等待的结果。
#[derive(Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// 一批就绪句柄。
    Ready(Vec<SocketHandle>),
    /// 超时，无事件。
    TimedOut,
    /// 监视器已停止，观察线程应退出。
    Stopped,
}

/// 就绪式反应器后端（epoll 形态）。
pub trait ReadinessMonitor: Send + Sync + 'static {
    fn start(&self, max_handles: usize) -> Result<(), MonitorError>;

    /// 停止监视器并唤醒所有阻塞中的 `wait_*` 调用。
    fn stop(&self);

    /// 挂载/重新挂载一次性 accept watch。
    fn add_accept_watch(&self, handle: SocketHandle) -> Result<(), MonitorError>;

    /// 挂载/重新挂载一次性读就绪 watch。
    fn add_read_watch(&self, handle: SocketHandle) -> Result<(), MonitorError>;

    /// 挂载/重新挂载一次性写就绪 watch。
    fn add_write_watch(&self, handle: SocketHandle) -> Result<(), MonitorError>;

    fn wait_accept(&self, timeout: Option<Duration>) -> WaitOutcome;

    fn wait_read(&self, timeout: Option<Duration>) -> WaitOutcome;

    fn wait_write(&self, timeout: Option<Duration>) -> WaitOutcome;
}

/// 完成式后端上报的事件。
#[derive(Debug)]
pub enum CompletionEvent {
    /// 监听句柄上有入站连接完成。
    Accepted {
        listener: SocketHandle,
        accepted: SocketHandle,
    },
    /// 一次投递的接收完成，`bytes` 为收到的数据。
    Recv { handle: SocketHandle, bytes: Bytes },
    /// 一次投递的发送完成，`len` 为已写出的字节数。
    Sent { handle: SocketHandle, len: usize },
    /// 后端检测到连接关闭。
    Closed { handle: SocketHandle },
    /// 等待超时。
    TimedOut,
    /// 监视器已停止。
    Stopped,
}

/// 完成式反应器后端（IOCP 形态）。
///
/// - **契约 (What)**：`add_recv` / `add_send` 各自同一句柄上至多一个在
///   途操作，完成事件到达后才可再次投递；`add_send` 携带待写数据块，
///   完成事件回报实际写出量。
pub trait CompletionMonitor: Send + Sync + 'static {
    fn start(&self, max_handles: usize) -> Result<(), MonitorError>;

    fn stop(&self);

    /// 挂载监听句柄，之后入站连接以 [`CompletionEvent::Accepted`] 上报。
    fn add_accept(&self, listener: SocketHandle) -> Result<(), MonitorError>;

    /// 投递一次接收。
    fn add_recv(&self, handle: SocketHandle) -> Result<(), MonitorError>;

    /// 投递一次发送。
    fn add_send(&self, handle: SocketHandle, bytes: Bytes) -> Result<(), MonitorError>;

    fn wait_event(&self, timeout: Option<Duration>) -> CompletionEvent;
}

/// 构造期选择的平台后端。
///
/// # 教案式注释
/// - **意图 (Why)**：两形态实现同一角色，引擎对其只有一份派发逻辑，
///   部署平台在构造引擎时决定；
/// - **契约 (What)**：`start` / `stop` 对两形态统一转发；形态特有的
///   操作（watch 挂载、投递）由 [`io`](crate::io) 中的共享助手按形态
///   分派，引擎不直接 match。
pub enum ReactorBackend {
    Readiness(std::sync::Arc<dyn ReadinessMonitor>),
    Completion(std::sync::Arc<dyn CompletionMonitor>),
}

impl ReactorBackend {
    pub fn start(&self, max_handles: usize) -> Result<(), MonitorError> {
        match self {
            ReactorBackend::Readiness(m) => m.start(max_handles),
            ReactorBackend::Completion(m) => m.start(max_handles),
        }
    }

    pub fn stop(&self) {
        match self {
            ReactorBackend::Readiness(m) => m.stop(),
            ReactorBackend::Completion(m) => m.stop(),
        }
    }

    /// 挂载监听句柄的 accept 通知（两形态语义一致）。
    pub fn watch_listener(&self, listener: SocketHandle) -> Result<(), MonitorError> {
        match self {
            ReactorBackend::Readiness(m) => m.add_accept_watch(listener),
            ReactorBackend::Completion(m) => m.add_accept(listener),
        }
    }
}

impl std::fmt::Debug for ReactorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReactorBackend::Readiness(_) => f.write_str("ReactorBackend::Readiness"),
            ReactorBackend::Completion(_) => f.write_str("ReactorBackend::Completion"),
        }
    }
}
