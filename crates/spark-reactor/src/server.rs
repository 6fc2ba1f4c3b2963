//! # server 模块说明
//!
//! ## 角色定位（Why）
//! - 业务层与引擎的唯一契约：[`ServerHandler`] 的五个回调；
//! - 引擎对回调的三条顺序承诺在此明文化（实现见各引擎的派发路径）：
//!   1. 同一连接的消息回调绝不并发，且消息顺序与到达顺序一致；
//!   2. 关闭回调严格排在该连接最后一次消息回调之后；
//!   3. 关闭回调恰好一次。
//!
//! ## 风险提示（Trade-offs）
//! - 回调内 panic 被引擎捕获计数，不击穿 I/O 与工作线程；但回调内
//!   长时间阻塞会占住一个工作线程（单线程引擎则阻塞整个循环），这是
//!   业务方的契约责任。

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::host::Host;
use crate::metrics::EngineMetrics;

/// 单线程引擎业务主循环一次推进的结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    /// 还有待办，下一轮循环继续调用。
    Continue,
    /// 业务主循环完成，引擎不再调用（网络事件照常派发）。
    Done,
}

/// 业务回调契约。所有回调都可能在引擎内部线程上执行，实现必须
/// `Send + Sync`。
pub trait ServerHandler: Send + Sync + 'static {
    /// 连接建立（入站接受或外连成功）。
    fn on_connect(&self, host: &Host) {
        let _ = host;
    }

    /// `host` 上有未消费数据。同一连接串行、有序。
    fn on_msg(&self, host: &Host) {
        let _ = host;
    }

    /// 连接关闭。此刻连接已移出登记表，但 `host` 仍可读出残留数据；
    /// 返回后引擎才关闭 OS 层 socket。
    fn on_close_connect(&self, host: &Host) {
        let _ = host;
    }

    /// 一次外连尝试最终失败（含一次性外连）。
    fn on_connect_failed(&self, ip: std::net::Ipv4Addr, port: u16, retry_secs: i64) {
        let _ = (ip, port, retry_secs);
    }

    /// 单线程引擎的业务主循环，启动后每轮事件循环调用一次，直到返回
    /// [`TickOutcome::Done`]。多线程引擎不调用。
    fn main_tick(&self) -> TickOutcome {
        TickOutcome::Done
    }
}

/// 执行一个业务回调并捕获 panic。
pub(crate) fn guard_callback(metrics: &EngineMetrics, name: &str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        metrics.on_callback_panic();
        warn!(callback = name, "业务回调 panic，已捕获");
    }
}
