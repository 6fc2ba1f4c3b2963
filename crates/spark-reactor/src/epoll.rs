//! # epoll 模块说明
//!
//! ## 角色定位（Why）
//! - [`ReadinessMonitor`] 的 Linux 生产实现：accept / read / write 三类
//!   事件各占一个 epoll 实例，互不干扰地被各自的观察线程消费；
//! - 一次性语义用 `EPOLLONESHOT` 落实：事件触发后该 fd 在本实例上
//!   自动解除，引擎消费完重新挂载；水平触发保证重挂时未消费数据
//!   会被补报。
//!
//! ## 执行逻辑（How）
//! - socket 句柄即原始 fd（见 [`tcp`](crate::tcp)），挂载时直接作为
//!   `epoll_event` 的用户数据写入，无需任何映射表；
//! - 每个 epoll 实例里常驻一个 eventfd：`stop()` 写入一次即唤醒所有
//!   阻塞中的等待者并令其返回 `Stopped`；
//! - 挂载先试 `EPOLL_CTL_MOD`（重挂是高频路径），`ENOENT` 时退回
//!   `EPOLL_CTL_ADD`。
//!
//! ## 风险提示（Trade-offs）
//! - `start` 只允许在所有观察线程退出后再次调用：重建会关闭旧 fd，
//!   在途的 `epoll_wait` 不得跨越这次重建（引擎的 stop/join 顺序保证
//!   这一点）。

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::MonitorError;
use crate::monitor::{ReadinessMonitor, WaitOutcome};
use crate::socket::SocketHandle;

/// eventfd 在 `epoll_event` 用户数据里的专用标记。
const WAKE_TOKEN: u64 = u64::MAX;

/// 单次 `epoll_wait` 取出的事件上限。
const EVENT_BATCH: usize = 64;

#[derive(Clone, Copy, Debug)]
struct ClassFd {
    ep: libc::c_int,
    wake: libc::c_int,
}

impl ClassFd {
    fn create() -> io::Result<Self> {
        let ep = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if ep < 0 {
            return Err(io::Error::last_os_error());
        }
        let wake = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if wake < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(ep) };
            return Err(err);
        }
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let rc = unsafe { libc::epoll_ctl(ep, libc::EPOLL_CTL_ADD, wake, &mut ev) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(wake);
                libc::close(ep);
            }
            return Err(err);
        }
        Ok(Self { ep, wake })
    }

    fn close(self) {
        unsafe {
            libc::close(self.wake);
            libc::close(self.ep);
        }
    }

    fn notify(self) {
        let one: u64 = 1;
        let rc = unsafe {
            libc::write(
                self.wake,
                (&one as *const u64).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            )
        };
        if rc < 0 {
            warn!("eventfd 唤醒写入失败");
        }
    }

    fn drain_wake(self) {
        let mut buf: u64 = 0;
        unsafe {
            libc::read(
                self.wake,
                (&mut buf as *mut u64).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            );
        }
    }
}

/// 三类事件各一个 epoll 实例的就绪式监视器。
#[derive(Debug, Default)]
pub struct EpollMonitor {
    running: AtomicBool,
    classes: Mutex<Option<[ClassFd; 3]>>,
}

const CLASS_ACCEPT: usize = 0;
const CLASS_READ: usize = 1;
const CLASS_WRITE: usize = 2;

impl EpollMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn arm(&self, class: usize, handle: SocketHandle, events: u32) -> Result<(), MonitorError> {
        let Some(fds) = *self.classes.lock() else {
            return Err(MonitorError::Register { handle: handle.0 });
        };
        let fd = handle.0 as libc::c_int;
        let mut ev = libc::epoll_event {
            events: events | libc::EPOLLONESHOT as u32,
            u64: handle.0,
        };
        // 重挂是高频路径，先 MOD 再按需 ADD。
        let rc = unsafe { libc::epoll_ctl(fds[class].ep, libc::EPOLL_CTL_MOD, fd, &mut ev) };
        if rc == 0 {
            return Ok(());
        }
        if io::Error::last_os_error().raw_os_error() == Some(libc::ENOENT) {
            let rc = unsafe { libc::epoll_ctl(fds[class].ep, libc::EPOLL_CTL_ADD, fd, &mut ev) };
            if rc == 0 {
                return Ok(());
            }
        }
        Err(MonitorError::Register { handle: handle.0 })
    }

    fn wait(&self, class: usize, timeout: Option<Duration>) -> WaitOutcome {
        if !self.running.load(Ordering::SeqCst) {
            return WaitOutcome::Stopped;
        }
        let Some(fds) = *self.classes.lock() else {
            return WaitOutcome::Stopped;
        };
        let ms: libc::c_int = match timeout {
            None => -1,
            Some(t) => t.as_millis().min(i32::MAX as u128) as libc::c_int,
        };
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; EVENT_BATCH];
        let n = unsafe {
            libc::epoll_wait(fds[class].ep, events.as_mut_ptr(), EVENT_BATCH as libc::c_int, ms)
        };
        if n < 0 {
            // EINTR 按一次空转处理，其余错误视为监视器失效。
            return if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                WaitOutcome::TimedOut
            } else {
                WaitOutcome::Stopped
            };
        }
        if n == 0 {
            return WaitOutcome::TimedOut;
        }
        let mut ready = Vec::with_capacity(n as usize);
        let mut woke = false;
        for ev in events.iter().take(n as usize) {
            if ev.u64 == WAKE_TOKEN {
                fds[class].drain_wake();
                woke = true;
            } else {
                ready.push(SocketHandle(ev.u64));
            }
        }
        if woke && !self.running.load(Ordering::SeqCst) {
            return WaitOutcome::Stopped;
        }
        if ready.is_empty() {
            WaitOutcome::TimedOut
        } else {
            WaitOutcome::Ready(ready)
        }
    }
}

impl ReadinessMonitor for EpollMonitor {
    fn start(&self, _max_handles: usize) -> Result<(), MonitorError> {
        let mut classes = self.classes.lock();
        if let Some(old) = classes.take() {
            for fds in old {
                fds.close();
            }
        }
        let build = || -> io::Result<[ClassFd; 3]> {
            let accept = ClassFd::create()?;
            let read = ClassFd::create().inspect_err(|_| accept.close())?;
            let write = ClassFd::create().inspect_err(|_| {
                accept.close();
                read.close();
            })?;
            Ok([accept, read, write])
        };
        match build() {
            Ok(fds) => {
                *classes = Some(fds);
                self.running.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(err) => Err(MonitorError::Startup {
                reason: err.to_string(),
            }),
        }
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(fds) = *self.classes.lock() {
            for class in fds {
                class.notify();
            }
        }
    }

    fn add_accept_watch(&self, handle: SocketHandle) -> Result<(), MonitorError> {
        self.arm(CLASS_ACCEPT, handle, libc::EPOLLIN as u32)
    }

    fn add_read_watch(&self, handle: SocketHandle) -> Result<(), MonitorError> {
        self.arm(CLASS_READ, handle, libc::EPOLLIN as u32)
    }

    fn add_write_watch(&self, handle: SocketHandle) -> Result<(), MonitorError> {
        self.arm(CLASS_WRITE, handle, libc::EPOLLOUT as u32)
    }

    fn wait_accept(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.wait(CLASS_ACCEPT, timeout)
    }

    fn wait_read(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.wait(CLASS_READ, timeout)
    }

    fn wait_write(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.wait(CLASS_WRITE, timeout)
    }
}

impl Drop for EpollMonitor {
    fn drop(&mut self) {
        if let Some(fds) = self.classes.lock().take() {
            for class in fds {
                class.close();
            }
        }
    }
}
