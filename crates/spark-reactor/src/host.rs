//! # host 模块说明
//!
//! ## 角色定位（Why）
//! - 业务回调视角下的连接：读取已到数据、发送、加入广播分组；
//! - 不暴露连接对象本身：生命周期协议（引用计数、关闭编排）全部留在
//!   引擎内部，业务层拿到的是一个可克隆的轻量视图。
//!
//! ## 行为契约（What）
//! - `recv` 消费接收暂存；派发循环以"暂存是否仍有数据"决定是否再次
//!   回调，业务在 `on_msg` 中消费多少决定了回调批次的粒度；
//! - `send` 把字节入队并确保发送流程在途；连接已断开或暂存满时返回
//!   false，字节不入队；
//! - 关闭回调期间 `host` 仍可读残留数据，但 `send` 必然返回 false。

use std::sync::Arc;

use crate::connect::Connection;
use crate::socket::SocketHandle;

/// 业务层的连接视图。克隆廉价（内部为 [`Arc`]）。
#[derive(Clone, Debug)]
pub struct Host {
    conn: Arc<Connection>,
}

impl Host {
    pub(crate) fn new(conn: Arc<Connection>) -> Self {
        Self { conn }
    }

    /// 连接标识，与关闭、定向发送接口使用同一套句柄。
    pub fn id(&self) -> SocketHandle {
        self.conn.handle()
    }

    /// 本进程主动外连建立的连接。
    pub fn is_outbound(&self) -> bool {
        self.conn.is_server_side()
    }

    /// 接收暂存中尚未消费的字节数。
    pub fn readable_len(&self) -> usize {
        self.conn.readable_len()
    }

    /// 读出并消费至多 `buf.len()` 字节，返回实际读出数。
    pub fn recv(&self, buf: &mut [u8]) -> usize {
        self.conn.recv_buffer().lock().read_into(buf)
    }

    /// 只读不消费。
    pub fn peek(&self, buf: &mut [u8]) -> usize {
        self.conn.recv_buffer().lock().peek_into(buf)
    }

    /// 把 `bytes` 全量入队并确保发送流程在途。
    ///
    /// 连接已断开、发送暂存空间不足或发送流程挂载失败时返回 false；
    /// 空间不足时整段都不入队（不发半条消息）。挂载失败按对端断开
    /// 处理，连接交回引擎的关闭协议。
    pub fn send(&self, bytes: &[u8]) -> bool {
        if !self.conn.is_connected() {
            return false;
        }
        {
            let mut buf = self.conn.send_buffer().lock();
            if buf.free() < bytes.len() {
                return false;
            }
            buf.append(bytes);
        }
        if self.conn.io().start_send(&self.conn).is_err() {
            self.conn.io().request_close(self.conn.handle());
            return false;
        }
        true
    }

    /// 加入一个广播分组。重复加入幂等。
    pub fn join_group(&self, group: i64) {
        self.conn.join_group(group);
    }

    pub(crate) fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }
}
