//! # table 模块说明
//!
//! ## 角色定位（Why）
//! - 全部存活连接的权威登记表：句柄到连接对象的映射；
//! - 关闭协议的第一步（移除并置断开标志）必须发生在表锁的同一临界区
//!   内，其后才允许 OS 层关闭——这样句柄被 OS 复用时新连接总能插入
//!   成功，不会与排空中的旧连接撞键。
//!
//! ## 行为契约（What）
//! - `insert` / `find` 都会为取用方增加一份持有引用，取用方用毕必须经
//!   [`ConnectionPool::release`](crate::pool::ConnectionPool::release) 归还；
//! - `remove_and_begin_close` 把表自身的那份引用转交给调用方，由调用方
//!   在发出关闭通知后归还；
//! - 心跳扫描以"每次取一个过期句柄、移除后重新开始"的方式容忍扫描
//!   期间的并发增删。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connect::Connection;
use crate::socket::SocketHandle;

/// 过期判定：距上次活跃至少一个完整心跳间隔。
pub(crate) fn heartbeat_expired(now_ms: u64, last_ms: u64, interval_secs: u64) -> bool {
    interval_secs > 0 && now_ms.saturating_sub(last_ms) >= interval_secs * 1000
}

/// 存活连接登记表。
#[derive(Debug, Default)]
pub struct ConnectionTable {
    inner: Mutex<HashMap<SocketHandle, Arc<Connection>>>,
}

impl ConnectionTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// 登记新连接并建立表的持有引用；句柄已占用时拒绝（调用方回收）。
    pub(crate) fn insert(&self, conn: Arc<Connection>) -> bool {
        let mut inner = self.inner.lock();
        if inner.contains_key(&conn.handle()) {
            return false;
        }
        conn.acquire();
        inner.insert(conn.handle(), conn);
        true
    }

    /// 取用一个存活连接，同时增加一份持有引用。
    pub(crate) fn find(&self, handle: SocketHandle) -> Option<Arc<Connection>> {
        let inner = self.inner.lock();
        let conn = inner.get(&handle)?;
        conn.acquire();
        Some(Arc::clone(conn))
    }

    /// 关闭协议第一步：同一临界区内移出表并置断开标志。
    ///
    /// 返回的 [`Arc`] 仍背着表的那份持有引用，调用方发出关闭通知后
    /// 负责归还。
    pub(crate) fn remove_and_begin_close(&self, handle: SocketHandle) -> Option<Arc<Connection>> {
        let conn = self.inner.lock().remove(&handle)?;
        conn.begin_close();
        Some(conn)
    }

    /// 取一个心跳过期的入站连接句柄；外连（server side）豁免。
    pub(crate) fn find_expired(&self, now_ms: u64, interval_secs: u64) -> Option<SocketHandle> {
        let inner = self.inner.lock();
        inner
            .values()
            .find(|c| {
                !c.is_server_side() && heartbeat_expired(now_ms, c.last_heartbeat_ms(), interval_secs)
            })
            .map(|c| c.handle())
    }

    /// 广播目标快照：命中 `recv_groups` 任意分组且不在 `exclude_groups`
    /// 中的连接，每个目标带一份持有引用。
    pub(crate) fn group_targets(
        &self,
        recv_groups: &[i64],
        exclude_groups: &[i64],
    ) -> Vec<Arc<Connection>> {
        let inner = self.inner.lock();
        inner
            .values()
            .filter(|c| c.in_any_group(recv_groups) && !c.in_any_group(exclude_groups))
            .map(|c| {
                c.acquire();
                Arc::clone(c)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::tests_support::{NullDriver, NullReadiness};
    use crate::io::IoShared;
    use crate::monitor::ReactorBackend;
    use proptest::prelude::*;

    fn sample_conn(handle: u64, is_server_side: bool) -> Arc<Connection> {
        Arc::new(Connection::new(
            SocketHandle(handle),
            is_server_side,
            0,
            Arc::new(IoShared::new(
                Arc::new(NullDriver),
                ReactorBackend::Readiness(Arc::new(NullReadiness)),
            )),
            16,
            16,
        ))
    }

    #[test]
    fn insert_rejects_duplicate_handle() {
        let table = ConnectionTable::new();
        assert!(table.insert(sample_conn(1, false)));
        assert!(!table.insert(sample_conn(1, false)), "同句柄二次登记应被拒绝");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn find_adds_a_holder_reference() {
        let table = ConnectionTable::new();
        let conn = sample_conn(2, false);
        table.insert(Arc::clone(&conn));
        assert_eq!(conn.use_count(), 1, "表占一份引用");
        let found = table.find(SocketHandle(2)).unwrap();
        assert_eq!(found.use_count(), 2, "取用方再占一份");
        assert!(table.find(SocketHandle(9)).is_none());
    }

    #[test]
    fn remove_marks_disconnected_and_frees_key() {
        let table = ConnectionTable::new();
        table.insert(sample_conn(3, false));
        let removed = table.remove_and_begin_close(SocketHandle(3)).unwrap();
        assert!(!removed.is_connected());
        // 键已释放：句柄复用的新连接立即可登记，即使旧连接仍在排空。
        assert!(table.insert(sample_conn(3, false)));
    }

    #[test]
    fn expiry_skips_outbound_connections() {
        let table = ConnectionTable::new();
        let inbound = sample_conn(4, false);
        let outbound = sample_conn(5, true);
        inbound.refresh_heartbeat(0);
        outbound.refresh_heartbeat(0);
        table.insert(inbound);
        table.insert(outbound);
        assert_eq!(
            table.find_expired(10_000, 5),
            Some(SocketHandle(4)),
            "只有入站连接参与心跳判定"
        );
        table.remove_and_begin_close(SocketHandle(4));
        assert_eq!(table.find_expired(10_000, 5), None);
    }

    proptest! {
        /// 过期判定对任意时刻组合成立：恰在 age >= interval*1000 时过期，
        /// 且时钟差值永不下溢。
        #[test]
        fn expiry_matches_age_threshold(
            last in 0u64..u64::MAX / 4,
            age in 0u64..1_000_000u64,
            interval in 1u64..600u64,
        ) {
            let now = last + age;
            prop_assert_eq!(
                heartbeat_expired(now, last, interval),
                age >= interval * 1000
            );
            // last 在 now 之后（极端竞态）时饱和减法归零，不得误判过期。
            prop_assert!(!heartbeat_expired(last, now, interval));
        }
    }

    #[test]
    fn zero_interval_never_expires() {
        assert!(!heartbeat_expired(1_000_000, 0, 0));
    }
}
