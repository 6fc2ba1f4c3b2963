//! 引擎内部公用小件：单调时钟、打包地址、停止/唤醒信号。

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// 引擎自有的单调毫秒时钟。
///
/// # 教案式注释
/// - **意图 (Why)**：心跳与重连的时间戳以引擎启动时刻为纪元，避免挂钟
///   回拨造成"未来的心跳"；比较一律用饱和减法；
/// - **契约 (What)**：`now_ms()` 自构造时刻起单调递增；同一引擎的所有
///   时间戳出自同一实例。
#[derive(Debug)]
pub struct Clock {
    epoch: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

/// IPv4 地址 + 端口的 64 位打包表示，作为重连登记表的键。
///
/// - **契约 (What)**：同一 (ip, port) 打包结果唯一且可逆；
/// - **执行 (How)**：IPv4 的大端序数值左移 16 位，低 16 位存放端口。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct PackedAddr(u64);

impl PackedAddr {
    pub fn pack(ip: Ipv4Addr, port: u16) -> Self {
        Self((u64::from(u32::from(ip)) << 16) | u64::from(port))
    }

    pub fn ip(self) -> Ipv4Addr {
        Ipv4Addr::from((self.0 >> 16) as u32)
    }

    pub fn port(self) -> u16 {
        (self.0 & 0xffff) as u16
    }
}

/// 可多次触发的停止/唤醒信号。
///
/// - **意图 (Why)**：主协调线程与外连轮询线程以有界超时等待，停止或有
///   新外连任务时立即被唤醒；
/// - **契约 (What)**：`notify()` 置位并唤醒所有等待者；`wait(timeout)`
///   返回 `true` 表示信号已触发（并消费该次置位），`false` 表示超时。
#[derive(Debug, Default)]
pub struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cond.notify_all();
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        let mut fired = self.fired.lock();
        if !*fired {
            self.cond.wait_for(&mut fired, timeout);
        }
        let hit = *fired;
        *fired = false;
        hit
    }
}
