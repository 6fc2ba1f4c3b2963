//! # pool 模块说明
//!
//! ## 角色定位（Why）
//! - 按槽位发放 [`Connection`]，容量按预估平均连接数一次算好，耗尽时
//!   整块扩容，避免高频建连/断连下的逐个分配；
//! - 槽位回收由 `use_count` 归零驱动（见 [`connect`](crate::connect) 的
//!   持有引用协议），内存安全本身交给 [`Arc`]，池只做槽位记账。
//!
//! ## 行为契约（What）
//! - 初始块大小为满足 `m * m >= 2 * average` 的最小 `m`，且不低于 200；
//! - `checkout` 发放 `use_count = 0` 的新连接，第一份引用由连接表的
//!   插入动作建立；
//! - `release` 递减持有引用，归零的那次把槽位放回空闲列表。

use std::sync::Arc;

use parking_lot::Mutex;

use crate::connect::Connection;
use crate::error::EngineError;
use crate::io::IoShared;
use crate::socket::SocketHandle;

/// 初始块的下限，低于此值的预估一律按 200 处理。
const MIN_BLOCK: usize = 200;

/// 初始块大小：满足 `m * m >= 2 * average` 的最小 `m`，下限 [`MIN_BLOCK`]。
pub(crate) fn block_size_for(average_connect_count: usize) -> usize {
    let target = average_connect_count.saturating_mul(2);
    let mut m: usize = 2;
    while m * m < target {
        m += 1;
    }
    m.max(MIN_BLOCK)
}

#[derive(Debug)]
struct PoolSlots {
    free: Vec<usize>,
    allocated: usize,
    live: usize,
}

/// 连接对象池。
#[derive(Debug)]
pub struct ConnectionPool {
    block: usize,
    recv_capacity: usize,
    send_capacity: usize,
    slots: Mutex<PoolSlots>,
}

impl ConnectionPool {
    pub(crate) fn new(
        average_connect_count: usize,
        recv_capacity: usize,
        send_capacity: usize,
    ) -> Result<Self, EngineError> {
        if recv_capacity == 0 || send_capacity == 0 {
            return Err(EngineError::PoolExhausted {
                capacity: average_connect_count,
            });
        }
        let block = block_size_for(average_connect_count);
        Ok(Self {
            block,
            recv_capacity,
            send_capacity,
            slots: Mutex::new(PoolSlots {
                free: (0..block).rev().collect(),
                allocated: block,
                live: 0,
            }),
        })
    }

    /// 初始块大小（亦即后续每次扩容的粒度）。
    pub fn block(&self) -> usize {
        self.block
    }

    #[cfg(test)]
    pub(crate) fn live(&self) -> usize {
        self.slots.lock().live
    }

    /// 发放一个新连接对象，空闲槽位耗尽时整块扩容。
    pub(crate) fn checkout(
        &self,
        handle: SocketHandle,
        is_server_side: bool,
        io: Arc<IoShared>,
    ) -> Arc<Connection> {
        let slot = {
            let mut slots = self.slots.lock();
            let slot = match slots.free.pop() {
                Some(slot) => slot,
                None => {
                    let base = slots.allocated;
                    slots.allocated += self.block;
                    slots.free.extend((base + 1..base + self.block).rev());
                    base
                }
            };
            slots.live += 1;
            slot
        };
        Arc::new(Connection::new(
            handle,
            is_server_side,
            slot,
            io,
            self.recv_capacity,
            self.send_capacity,
        ))
    }

    /// 释放一份持有引用；归零的那次回收槽位。
    pub(crate) fn release(&self, conn: &Connection) {
        if conn.release_ref() == 0 {
            let mut slots = self.slots.lock();
            slots.free.push(conn.pool_slot());
            slots.live -= 1;
        }
    }
}
