//! # spark-reactor
//!
//! 反应器式 TCP socket 服务引擎。
//!
//! ## 模块概览（Why / What）
//! - [`engine`]：两种引擎形态。多线程
//!   [`ThreadedEngine`]（I/O 观察线程 + 业务工作线程池 + 主协调线程）
//!   与单线程 [`CooperativeEngine`]（一条事件循环承载全部回调）；
//! - [`monitor`]：构造期选择的反应器后端——就绪式（epoll 形态）与
//!   完成式（IOCP 形态）各为一个 trait，引擎的派发逻辑只写一份；
//! - [`socket`] / [`tcp`]：socket 原语接口与 `socket2` 真实实现，测试
//!   以内存替身覆盖全部生命周期路径；
//! - [`connect`] / [`pool`] / [`table`]：连接对象、按块扩容的对象池与
//!   存活连接登记表，三者共同执行关闭协议；
//! - [`reconnect`]：外连目标登记与按间隔补连的状态机；
//! - [`host`] / [`server`]：业务层契约——连接视图与五个回调。
//!
//! ## 引擎承诺（What）
//! - 同一连接的消息回调串行且保序；
//! - 关闭回调恰好一次，严格排在最后一次消息回调之后、OS 层关闭之前；
//! - 句柄先移出登记表再关 socket，OS 复用句柄不会与排空中的旧连接
//!   撞键；
//! - 对端断开、发送失败、反应器注册失败一律收敛进同一条关闭协议。
//!
//! ## 快速上手
//!
//! ```no_run
//! use std::sync::Arc;
//! use spark_reactor::{
//!     EpollMonitor, Host, ReactorBackend, ServerHandler, TcpDriver, ThreadedEngine,
//! };
//!
//! struct Echo;
//!
//! impl ServerHandler for Echo {
//!     fn on_msg(&self, host: &Host) {
//!         let mut buf = [0u8; 4096];
//!         let n = host.recv(&mut buf);
//!         host.send(&buf[..n]);
//!     }
//! }
//!
//! # fn main() -> Result<(), spark_reactor::EngineError> {
//! let backend = ReactorBackend::Readiness(Arc::new(EpollMonitor::new()));
//! let engine = ThreadedEngine::new(Arc::new(TcpDriver::new()), backend, Arc::new(Echo));
//! engine.listen(9000);
//! engine.start()?;
//! engine.wait_stop();
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod connect;
pub mod engine;
#[cfg(unix)]
pub mod epoll;
pub mod error;
pub mod host;
pub(crate) mod io;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod reconnect;
pub mod server;
pub mod socket;
pub mod table;
#[cfg(unix)]
pub mod tcp;
pub mod util;
pub(crate) mod workers;

pub use engine::cooperative::CooperativeEngine;
pub use engine::threaded::ThreadedEngine;
pub use engine::EngineConfig;
#[cfg(unix)]
pub use epoll::EpollMonitor;
pub use error::{EngineError, MonitorError, SocketError};
pub use host::Host;
pub use metrics::MetricsSnapshot;
pub use monitor::{CompletionEvent, CompletionMonitor, ReactorBackend, ReadinessMonitor, WaitOutcome};
pub use server::{ServerHandler, TickOutcome};
pub use socket::{ConnectProgress, ConnectStart, RecvOutcome, SendOutcome, SocketDriver, SocketHandle};
#[cfg(unix)]
pub use tcp::TcpDriver;
