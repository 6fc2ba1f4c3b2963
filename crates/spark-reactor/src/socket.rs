//! # socket 模块说明
//!
//! ## 角色定位（Why）
//! - 定义引擎消费的 socket 原语接口：监听、接受、异步外连、收发与关闭；
//! - 引擎核心只依赖本接口，真实 TCP 实现见 [`tcp`](crate::tcp)，测试以
//!   内存替身驱动全部生命周期路径。
//!
//! ## 行为契约（What）
//! - 收发结果以枚举表达而非 `io::Error`：对引擎而言"对端关闭 / 出错"
//!   不是需要传播的错误，而是进入关闭协议的信号；
//! - `recv` 返回 `Closed` 表示对端有序关闭（OS 层读到 0），`Err` 表示
//!   连接错误，两者在派发路径上同等对待；
//! - 所有句柄均为非阻塞语义：`WouldBlock` 表示本轮已无进展，需等待
//!   下一次就绪/完成事件。

use std::fmt;

/// socket 句柄：连接表的键，同时就是业务层可见的主机 id。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct SocketHandle(pub u64);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 一次非阻塞接收的结果。
#[derive(Debug, Eq, PartialEq)]
pub enum RecvOutcome {
    /// 读到 `n` 字节（`n > 0`）。
    Data(usize),
    /// 本轮无数据，等待下一次读就绪事件。
    WouldBlock,
    /// 对端有序关闭。
    Closed,
    /// 连接错误。
    Err,
}

/// 一次非阻塞发送的结果。
#[derive(Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// 写出 `n` 字节（可能小于请求长度）。
    Sent(usize),
    /// 发送窗口已满，等待下一次写就绪事件。
    WouldBlock,
    /// 连接错误。
    Err,
}

/// `connect_async` 的即时结果。
#[derive(Debug, Eq, PartialEq)]
pub enum ConnectStart {
    /// 连接立即建立（本机/快速路径）。
    Ready(SocketHandle),
    /// 连接进行中，由轮询路径跟进。
    Pending(SocketHandle),
}

/// 对进行中外连的一次轮询结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectProgress {
    Pending,
    Connected,
    Failed,
}

/// socket 原语接口（外部协作者）。
///
/// # 教案式注释
/// - **意图 (Why)**：把平台 socket 细节挡在引擎之外，引擎只消费语义化
///   结果；测试替身据此可以精确编排对端断开、半写、句柄复用等场景；
/// - **契约 (What)**：
///   - `accept` 返回 `None` 表示监听队列已空（边缘触发下必须循环取空）；
///   - `close` 幂等，对未知句柄静默；
///   - 实现必须 `Send + Sync`：多线程引擎会从多个观察线程并发调用。
/// - **风险 (Trade-offs)**：接口按句柄寻址而非持有 socket 对象，实现内部
///   需要自己维护句柄表；换来的是引擎侧完全无生命周期耦合。
pub trait SocketDriver: Send + Sync + 'static {
    /// 在 `port` 上建立监听，返回监听句柄。
    fn listen(&self, port: u16) -> Result<SocketHandle, crate::error::SocketError>;

    /// 从监听句柄上取出一个已完成的入站连接；队列已空返回 `Ok(None)`。
    fn accept(&self, listener: SocketHandle)
    -> Result<Option<SocketHandle>, crate::error::SocketError>;

    /// 发起一次非阻塞外连。
    fn connect_async(&self, ip: &str, port: u16)
    -> Result<ConnectStart, crate::error::SocketError>;

    /// 轮询一次进行中的外连。
    fn poll_connect(&self, handle: SocketHandle) -> ConnectProgress;

    /// 非阻塞接收至 `buf`。
    fn recv(&self, handle: SocketHandle, buf: &mut [u8]) -> RecvOutcome;

    /// 非阻塞发送 `buf`。
    fn send(&self, handle: SocketHandle, buf: &[u8]) -> SendOutcome;

    /// 关闭句柄（OS 层）。幂等。
    fn close(&self, handle: SocketHandle);
}
