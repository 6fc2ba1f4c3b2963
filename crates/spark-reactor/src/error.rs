//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为引擎对外暴露的错误语义提供集中定义，启动失败的原因必须可以完整取回
//!   （监听失败要列出全部失败端口，而不是只报告第一个）；
//! - 区分"启动期致命错误"与"运行期由关闭协议吞掉的 IO 失败"两类：后者
//!   永远不会以错误形式浮出业务层。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error` 以兼容 `std::error::Error`；
//! - `Display` 输出即"可取回的错误字符串"，调用方无须再拼装；
//! - 对端断开、发送失败、反应器注册失败一律走关闭协议，不在此定义。

use thiserror::Error;

/// 引擎启动与配置路径的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：`start()` 的失败原因必须结构化且可读，运维通过
///   `to_string()` 即可得到与原因一一对应的描述；
/// - **契约 (What)**：所有变体 `Send + Sync + 'static`，可跨线程传播；
///   监听失败列出每一个未能绑定的端口；
/// - **风险 (Trade-offs)**：端口列表使用 `Vec<u16>`，在启动路径上分配
///   可接受；运行期热路径不构造本类型。
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum EngineError {
    /// 连接池在启动时无法按配置容量建立。
    #[error("connection pool allocation failed for capacity {capacity}")]
    PoolExhausted { capacity: usize },

    /// 一个或多个已注册端口绑定失败，`ports` 为全部失败端口。
    #[error("listen port: {} faild", format_ports(.ports))]
    ListenFailed { ports: Vec<u16> },

    /// 反应器后端启动失败，`reason` 为后端回报的初始化错误。
    #[error("reactor monitor start failed: {reason}")]
    MonitorStart { reason: String },
}

fn format_ports(ports: &[u16]) -> String {
    let mut joined = String::new();
    for port in ports {
        joined.push_str(&port.to_string());
        joined.push(' ');
    }
    joined
}

/// 反应器后端（监视器）接口的错误域。
///
/// - **契约 (What)**：注册失败（`Register`）在引擎语义里等价于对端断开，
///   由调用方转入关闭协议；`Startup` 仅在 `start()` 阶段出现。
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum MonitorError {
    /// 监视器初始化失败。
    #[error("monitor startup failed: {reason}")]
    Startup { reason: String },

    /// 对指定句柄的（再）注册失败。
    #[error("monitor registration failed for handle {handle}")]
    Register { handle: u64 },
}

/// socket 原语接口的错误域。
///
/// - **契约 (What)**：仅覆盖建立监听 / 发起连接等控制面操作；数据面的
///   收发结果以 [`RecvOutcome`](crate::socket::RecvOutcome) /
///   [`SendOutcome`](crate::socket::SendOutcome) 表达，错误即关闭信号。
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum SocketError {
    /// 端口绑定或 listen 调用失败。
    #[error("bind/listen failed on port {port}: {reason}")]
    Listen { port: u16, reason: String },

    /// 发起外连前的 socket 创建 / 配置失败。
    #[error("outbound socket setup failed: {reason}")]
    ConnectSetup { reason: String },

    /// 地址无法解析为 IPv4。
    #[error("invalid address `{addr}`")]
    InvalidAddr { addr: String },
}
