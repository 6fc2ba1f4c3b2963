//! # tcp 模块说明
//!
//! ## 角色定位（Why）
//! - [`SocketDriver`] 的真实 TCP 实现：`socket2` 建非阻塞 socket，句柄
//!   表把 OS socket 挡在引擎之外；
//! - 测试走内存替身，本模块只在真实部署路径上被引擎消费。
//!
//! ## 执行逻辑（How）
//! - 非阻塞外连的"进行中"以 `EINPROGRESS` / `WouldBlock` 判定，轮询用
//!   `peer_addr` + `take_error` 区分已建立 / 仍在途 / 已失败；
//! - `close` 仅从句柄表移除，socket 随 drop 关闭，幂等。

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::fd::AsRawFd;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::debug;

use crate::error::SocketError;
use crate::socket::{
    ConnectProgress, ConnectStart, RecvOutcome, SendOutcome, SocketDriver, SocketHandle,
};

const LISTEN_BACKLOG: i32 = 1024;

/// 基于 `socket2` 的 TCP 驱动。
///
/// 句柄即原始 fd：[`EpollMonitor`](crate::epoll::EpollMonitor) 据此直接
/// 挂载，无需二次映射。fd 被 OS 复用的场景由引擎的关闭协议兜底（表
/// 移除先于 OS 关闭）。
#[derive(Debug, Default)]
pub struct TcpDriver {
    sockets: Mutex<HashMap<SocketHandle, Socket>>,
}

impl TcpDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, socket: Socket) -> SocketHandle {
        let handle = SocketHandle(socket.as_raw_fd() as u64);
        self.sockets.lock().insert(handle, socket);
        handle
    }

    fn nonblocking_stream() -> Result<Socket, SocketError> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| SocketError::ConnectSetup {
                reason: e.to_string(),
            })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| SocketError::ConnectSetup {
                reason: e.to_string(),
            })?;
        Ok(socket)
    }

    fn in_progress(err: &std::io::Error) -> bool {
        matches!(err.kind(), std::io::ErrorKind::WouldBlock)
            || err.raw_os_error() == Some(libc::EINPROGRESS)
    }
}

impl SocketDriver for TcpDriver {
    fn listen(&self, port: u16) -> Result<SocketHandle, SocketError> {
        let wrap = |e: std::io::Error| SocketError::Listen {
            port,
            reason: e.to_string(),
        };
        let socket =
            Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).map_err(wrap)?;
        socket.set_reuse_address(true).map_err(wrap)?;
        socket.set_nonblocking(true).map_err(wrap)?;
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
        socket.bind(&addr.into()).map_err(wrap)?;
        socket.listen(LISTEN_BACKLOG).map_err(wrap)?;
        Ok(self.register(socket))
    }

    fn accept(&self, listener: SocketHandle) -> Result<Option<SocketHandle>, SocketError> {
        let accepted = {
            let sockets = self.sockets.lock();
            let Some(socket) = sockets.get(&listener) else {
                return Ok(None);
            };
            match socket.accept() {
                Ok((stream, _peer)) => stream,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => {
                    debug!(%listener, error = %e, "accept 出错，本轮放弃");
                    return Ok(None);
                }
            }
        };
        if let Err(e) = accepted.set_nonblocking(true) {
            debug!(%listener, error = %e, "新连接置非阻塞失败，丢弃");
            return Ok(None);
        }
        Ok(Some(self.register(accepted)))
    }

    fn connect_async(&self, ip: &str, port: u16) -> Result<ConnectStart, SocketError> {
        let target: Ipv4Addr = ip.parse().map_err(|_| SocketError::InvalidAddr {
            addr: format!("{ip}:{port}"),
        })?;
        let socket = Self::nonblocking_stream()?;
        let addr = SocketAddr::V4(SocketAddrV4::new(target, port));
        match socket.connect(&addr.into()) {
            Ok(()) => Ok(ConnectStart::Ready(self.register(socket))),
            Err(e) if Self::in_progress(&e) => Ok(ConnectStart::Pending(self.register(socket))),
            Err(e) => Err(SocketError::ConnectSetup {
                reason: e.to_string(),
            }),
        }
    }

    fn poll_connect(&self, handle: SocketHandle) -> ConnectProgress {
        let sockets = self.sockets.lock();
        let Some(socket) = sockets.get(&handle) else {
            return ConnectProgress::Failed;
        };
        if socket.peer_addr().is_ok() {
            return ConnectProgress::Connected;
        }
        match socket.take_error() {
            Ok(Some(_)) | Err(_) => ConnectProgress::Failed,
            Ok(None) => ConnectProgress::Pending,
        }
    }

    fn recv(&self, handle: SocketHandle, buf: &mut [u8]) -> RecvOutcome {
        let sockets = self.sockets.lock();
        let Some(mut socket) = sockets.get(&handle) else {
            return RecvOutcome::Err;
        };
        match socket.read(buf) {
            Ok(0) => RecvOutcome::Closed,
            Ok(n) => RecvOutcome::Data(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => RecvOutcome::WouldBlock,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => RecvOutcome::WouldBlock,
            Err(_) => RecvOutcome::Err,
        }
    }

    fn send(&self, handle: SocketHandle, buf: &[u8]) -> SendOutcome {
        let sockets = self.sockets.lock();
        let Some(mut socket) = sockets.get(&handle) else {
            return SendOutcome::Err;
        };
        match socket.write(buf) {
            Ok(n) => SendOutcome::Sent(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => SendOutcome::WouldBlock,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => SendOutcome::WouldBlock,
            Err(_) => SendOutcome::Err,
        }
    }

    fn close(&self, handle: SocketHandle) {
        // 从句柄表移除即关闭（drop 收尾），重复关闭静默。
        self.sockets.lock().remove(&handle);
    }
}
