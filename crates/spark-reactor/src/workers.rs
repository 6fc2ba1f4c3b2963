//! # workers 模块说明
//!
//! ## 角色定位（Why）
//! - 多线程引擎的业务回调执行池：连接建立、消息派发、关闭通知都以
//!   任务形式投递到这里，I/O 观察线程绝不直接执行业务代码；
//! - 顺序保证不靠池（池内线程互不协调），靠连接对象上的派发闸：同一
//!   连接同一时刻至多一个任务在池里跑它的回调。
//!
//! ## 行为契约（What）
//! - `stop` 关闭入队端后逐个 join，已入队任务全部执行完毕才返回——
//!   在途的关闭通知不会被吞掉；
//! - 任务内的 panic 被捕获并记录，不得击穿工作线程。

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use tracing::warn;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// 业务回调执行池。
#[derive(Debug, Default)]
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn start(&self, count: usize) {
        let (tx, rx) = unbounded::<Job>();
        let mut threads = self.threads.lock();
        for i in 0..count.max(1) {
            let rx = rx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("reactor-worker-{i}"))
                .spawn(move || {
                    while let Ok(job) = rx.recv() {
                        if catch_unwind(AssertUnwindSafe(job)).is_err() {
                            warn!("工作任务 panic，已捕获");
                        }
                    }
                });
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => warn!(%err, "工作线程创建失败"),
            }
        }
        *self.sender.lock() = Some(tx);
    }

    /// 投递一个任务；池已停止时返回 false，任务被丢弃。
    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// 关闭入队端并等待全部已入队任务执行完毕。
    pub(crate) fn stop(&self) {
        drop(self.sender.lock().take());
        let mut threads = self.threads.lock();
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }
}
