//! # engine 模块说明
//!
//! ## 角色定位（Why）
//! - 引擎的公共骨架：运行参数、两引擎共享的状态束与生命周期助手；
//! - 两个引擎（多线程 [`ThreadedEngine`](threaded::ThreadedEngine) 与
//!   单线程 [`CooperativeEngine`](cooperative::CooperativeEngine)）对外
//!   暴露同一套操作面，差异只在回调执行位置与线程编排。
//!
//! ## 行为契约（What）
//! - 所有 `set_*` 参数只在 `start` 时生效；运行中修改对当前会话无效；
//! - `listen` 在停止状态下只登记端口，`start` 统一绑定；任一端口绑定
//!   失败则启动失败并回滚；
//! - 注册/投递失败一律按对端断开处理，进入关闭协议。

pub mod cooperative;
pub mod threaded;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::connect::Connection;
use crate::error::EngineError;
use crate::io::IoShared;
use crate::metrics::EngineMetrics;
use crate::monitor::ReactorBackend;
use crate::pool::ConnectionPool;
use crate::reconnect::ReconnectRegistry;
use crate::server::ServerHandler;
use crate::socket::{SocketDriver, SocketHandle};
use crate::table::ConnectionTable;
use crate::util::Clock;

/// 反应器单会话可监视的句柄上限。
pub(crate) const MAX_POLL_SIZE: usize = 20_000;

/// 引擎运行参数。
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// 预估平均并发连接数，决定连接池的块大小。
    pub average_connect_count: usize,
    /// 心跳间隔（秒）。0 表示关闭心跳检查。
    pub heartbeat_secs: u64,
    /// 多线程引擎每类事件的观察线程数。
    pub io_threads: usize,
    /// 业务回调工作线程数。
    pub work_threads: usize,
    /// 单连接接收暂存容量（字节）。
    pub recv_buffer_capacity: usize,
    /// 单连接发送暂存容量（字节）。
    pub send_buffer_capacity: usize,
    /// 反应器等待与管务（心跳/重连扫描）的有界间隔。
    pub io_wait: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            average_connect_count: 5000,
            heartbeat_secs: 0,
            io_threads: 16,
            work_threads: 16,
            recv_buffer_capacity: 1 << 20,
            send_buffer_capacity: 1 << 20,
            io_wait: Duration::from_secs(10),
        }
    }
}

/// 两引擎共享的状态束。
pub(crate) struct EngineShared {
    pub config: Mutex<EngineConfig>,
    pub io: Arc<IoShared>,
    pub table: ConnectionTable,
    pub pool: RwLock<Option<Arc<ConnectionPool>>>,
    pub registry: ReconnectRegistry,
    pub server: Arc<dyn ServerHandler>,
    pub clock: Clock,
    pub metrics: Arc<EngineMetrics>,
    pub stop: AtomicBool,
    /// 登记的监听端口 -> 绑定后的监听句柄。
    pub listeners: Mutex<BTreeMap<u16, Option<SocketHandle>>>,
}

impl EngineShared {
    pub(crate) fn new(
        driver: Arc<dyn SocketDriver>,
        backend: ReactorBackend,
        server: Arc<dyn ServerHandler>,
    ) -> Self {
        Self {
            config: Mutex::new(EngineConfig::default()),
            io: Arc::new(IoShared::new(driver, backend)),
            table: ConnectionTable::new(),
            pool: RwLock::new(None),
            registry: ReconnectRegistry::new(),
            server,
            clock: Clock::new(),
            metrics: Arc::new(EngineMetrics::new()),
            stop: AtomicBool::new(true),
            listeners: Mutex::new(BTreeMap::new()),
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub(crate) fn driver(&self) -> &Arc<dyn SocketDriver> {
        self.io.driver()
    }

    /// 登记监听端口；引擎运行中则立即绑定。
    pub(crate) fn listen(&self, port: u16) -> bool {
        {
            let mut listeners = self.listeners.lock();
            if listeners.contains_key(&port) {
                return true;
            }
            listeners.insert(port, None);
        }
        if self.is_stopped() {
            return true;
        }
        self.bind_port(port)
    }

    /// 绑定单个已登记端口并挂载 accept 通知。
    pub(crate) fn bind_port(&self, port: u16) -> bool {
        let handle = match self.io.driver().listen(port) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(port, error = %err, "监听端口绑定失败");
                return false;
            }
        };
        if let Err(err) = self.io.backend().watch_listener(handle) {
            warn!(port, error = %err, "监听句柄挂载失败");
            self.io.driver().close(handle);
            return false;
        }
        self.listeners.lock().insert(port, Some(handle));
        debug!(port, %handle, "监听端口就绪");
        true
    }

    /// 启动时绑定全部已登记端口；任一失败返回全部失败端口。
    pub(crate) fn listen_all(&self) -> Result<(), EngineError> {
        let ports: Vec<u16> = self.listeners.lock().keys().copied().collect();
        let failed: Vec<u16> = ports.into_iter().filter(|p| !self.bind_port(*p)).collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(EngineError::ListenFailed { ports: failed })
        }
    }

    /// 停止时关闭全部监听句柄，端口登记保留待下次启动。
    pub(crate) fn close_listeners(&self) {
        let mut listeners = self.listeners.lock();
        for (_, slot) in listeners.iter_mut() {
            if let Some(handle) = slot.take() {
                self.io.driver().close(handle);
            }
        }
    }

    /// 为新 socket 发放连接对象并登记入表（关闭协议的镜像起点）。
    ///
    /// 返回的 [`Arc`] 不额外持有引用，表的那份已在内部建立；句柄撞键
    /// （协议上不应发生）时回收对象并返回 `None`。
    pub(crate) fn admit(&self, handle: SocketHandle, is_server_side: bool) -> Option<Arc<Connection>> {
        let pool = self.pool.read().as_ref().map(Arc::clone)?;
        let conn = pool.checkout(handle, is_server_side, Arc::clone(&self.io));
        conn.refresh_heartbeat(self.clock.now_ms());
        if !self.table.insert(Arc::clone(&conn)) {
            warn!(%handle, "句柄撞键，新连接被拒绝");
            self.io.driver().close(handle);
            return None;
        }
        self.metrics.on_accepted();
        Some(conn)
    }

    /// 归还一份连接持有引用（池在场时）。
    pub(crate) fn release(&self, conn: &Connection) {
        if let Some(pool) = self.pool.read().as_ref() {
            pool.release(conn);
        }
    }
}
