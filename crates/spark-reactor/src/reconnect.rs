//! # reconnect 模块说明
//!
//! ## 角色定位（Why）
//! - 外连目标的登记表与重试状态机：业务声明"连到哪里、断了多久重试"，
//!   引擎据此发起、轮询、补连；
//! - 与连接表解耦：登记项的生命周期跨越多次连接建立/断开。
//!
//! ## 状态机（How）
//! - `Unconnected` -> `Connecting`（发起外连）-> `Connected`（轮询确认）
//!   或 `Unconnecting`（轮询失败，失败回调在途）-> `Unconnected`；
//! - 断开回调路径把对应登记项打回 `Unconnected` 并清空句柄，下一次
//!   扫描按重试间隔决定是否再发起；
//! - `retry_secs < 0` 为一次性外连：首次尝试记账后，下一次扫描把登记
//!   项移除（失败则不再重试，成功后断开也不再补连）。

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::socket::SocketHandle;
use crate::util::PackedAddr;

/// 外连登记项的连接状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum LinkState {
    /// 未连接，等待扫描发起。
    Unconnected,
    /// 外连在途，由轮询路径跟进。
    Connecting,
    /// 轮询已判失败，失败回调在途。
    Unconnecting,
    /// 已建立，断开回调负责打回 `Unconnected`。
    Connected,
}

/// 重试到期判定。`last_attempt_ms` 为 `None` 表示从未尝试、立即到期。
pub(crate) fn retry_due(retry_secs: i64, last_attempt_ms: Option<u64>, now_ms: u64) -> bool {
    match last_attempt_ms {
        None => true,
        Some(last) => retry_secs >= 0 && now_ms.saturating_sub(last) >= retry_secs as u64 * 1000,
    }
}

#[derive(Debug)]
struct Entry {
    id: u64,
    addr: PackedAddr,
    retry_secs: i64,
    state: LinkState,
    handle: Option<SocketHandle>,
    last_attempt_ms: Option<u64>,
}

/// 扫描结果：一个到期待连的登记项。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct DueEntry {
    pub id: u64,
    pub addr: PackedAddr,
    pub retry_secs: i64,
}

/// 轮询快照：一个外连在途的登记项。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ConnectingEntry {
    pub id: u64,
    pub addr: PackedAddr,
    pub retry_secs: i64,
    pub handle: SocketHandle,
}

/// 外连登记表。
#[derive(Debug, Default)]
pub struct ReconnectRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry>>,
}

impl ReconnectRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 登记一个外连目标，返回登记项 id。
    pub(crate) fn register(&self, addr: PackedAddr, retry_secs: i64) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push(Entry {
            id,
            addr,
            retry_secs,
            state: LinkState::Unconnected,
            handle: None,
            last_attempt_ms: None,
        });
        id
    }

    /// 扫描：移除已尝试过的一次性登记项，返回到期待连的登记项。
    ///
    /// 返回的登记项已被置为 `Connecting` 并记下本次尝试时刻，调用方
    /// 随后以 [`mark_started`](Self::mark_started) /
    /// [`mark_failed`](Self::mark_failed) 回填结果。
    pub(crate) fn take_due(&self, now_ms: u64) -> Vec<DueEntry> {
        let mut entries = self.entries.lock();
        entries.retain(|e| {
            !(e.retry_secs < 0 && e.state == LinkState::Unconnected && e.last_attempt_ms.is_some())
        });
        let mut due = Vec::new();
        for e in entries.iter_mut() {
            if e.state != LinkState::Unconnected {
                continue;
            }
            if !retry_due(e.retry_secs, e.last_attempt_ms, now_ms) {
                continue;
            }
            e.state = LinkState::Connecting;
            e.last_attempt_ms = Some(now_ms);
            due.push(DueEntry {
                id: e.id,
                addr: e.addr,
                retry_secs: e.retry_secs,
            });
        }
        due
    }

    /// 外连已在途：记下轮询用的句柄。
    pub(crate) fn mark_started(&self, id: u64, handle: SocketHandle) {
        self.with_entry(id, |e| e.handle = Some(handle));
    }

    /// 外连即时建立或轮询确认成功。
    pub(crate) fn mark_connected(&self, id: u64, handle: SocketHandle) {
        self.with_entry(id, |e| {
            e.state = LinkState::Connected;
            e.handle = Some(handle);
        });
    }

    /// 轮询判失败，失败回调在途（回调完成后调 [`mark_failed`](Self::mark_failed)）。
    pub(crate) fn mark_failing(&self, id: u64) {
        self.with_entry(id, |e| e.state = LinkState::Unconnecting);
    }

    /// 失败处置完成：清句柄、打回待连状态（一次性项由下次扫描移除）。
    pub(crate) fn mark_failed(&self, id: u64) {
        self.with_entry(id, |e| {
            e.state = LinkState::Unconnected;
            e.handle = None;
        });
    }

    /// 外连在途项的快照，供轮询线程逐个探询。
    pub(crate) fn connecting(&self) -> Vec<ConnectingEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.state == LinkState::Connecting)
            .filter_map(|e| {
                e.handle.map(|handle| ConnectingEntry {
                    id: e.id,
                    addr: e.addr,
                    retry_secs: e.retry_secs,
                    handle,
                })
            })
            .collect()
    }

    /// 已建立的外连断开：按句柄把登记项打回待连状态。
    ///
    /// 找不到对应登记项（入站连接或已移除）时静默。
    pub(crate) fn reset_by_handle(&self, handle: SocketHandle) {
        let mut entries = self.entries.lock();
        if let Some(e) = entries
            .iter_mut()
            .find(|e| e.state == LinkState::Connected && e.handle == Some(handle))
        {
            e.state = LinkState::Unconnected;
            e.handle = None;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn with_entry(&self, id: u64, f: impl FnOnce(&mut Entry)) {
        let mut entries = self.entries.lock();
        if let Some(e) = entries.iter_mut().find(|e| e.id == id) {
            f(e);
        }
    }
}
