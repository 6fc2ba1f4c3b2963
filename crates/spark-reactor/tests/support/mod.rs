//! 集成测试的内存网络替身与事件记录器。
//!
//! - [`SimNet`]：同时实现 [`SocketDriver`] 与 [`ReadinessMonitor`] 的
//!   可编排内存网络——测试注入入站连接、数据、断开与外连结果，
//!   监视器的一次性 watch 与水平触发补报语义在此如实模拟；
//! - [`SimCompletionNet`]：完成式后端形态的对应替身；
//! - [`RecordingServer`]：按到达顺序记录回调的业务替身，可配置
//!   "每次消息回调消费多少字节"与阻塞关闭回调的闸门。

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use spark_reactor::{
    CompletionEvent, CompletionMonitor, ConnectProgress, ConnectStart, Host, MonitorError,
    ReadinessMonitor, RecvOutcome, SendOutcome, ServerHandler, SocketDriver, SocketError,
    SocketHandle, TickOutcome, WaitOutcome,
};

/// 轮询等待条件成立，超时 panic。
pub fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    panic!("等待超时: {what}");
}

// ---------------------------------------------------------------- SimNet

enum RxItem {
    Data(Vec<u8>),
    Close,
    Error,
}

#[derive(Default)]
struct SimSocket {
    rx: VecDeque<RxItem>,
    tx: Vec<u8>,
    max_write: Option<usize>,
    write_blocked: bool,
}

struct Listener {
    port: u16,
    backlog: VecDeque<u64>,
}

enum ConnectScript {
    Ready,
    Pending,
    Fail,
}

#[derive(Default)]
struct SimState {
    next_handle: u64,
    sockets: HashMap<u64, SimSocket>,
    listeners: HashMap<u64, Listener>,
    failed_ports: HashSet<u16>,
    armed_accept: HashSet<u64>,
    armed_read: HashSet<u64>,
    armed_write: HashSet<u64>,
    write_arm_count: HashMap<u64, usize>,
    connect_scripts: HashMap<(String, u16), VecDeque<ConnectScript>>,
    connect_attempts: HashMap<(String, u16), usize>,
    pending_connects: HashMap<u64, ConnectProgress>,
    os_closed: Vec<u64>,
}

struct WaitQueue {
    tx: Sender<SocketHandle>,
    rx: Receiver<SocketHandle>,
}

impl Default for WaitQueue {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

/// 就绪式形态的内存网络替身。
#[derive(Default)]
pub struct SimNet {
    state: Mutex<SimState>,
    accept_q: WaitQueue,
    read_q: WaitQueue,
    write_q: WaitQueue,
    stopped: AtomicBool,
}

impl SimNet {
    pub fn new() -> Arc<Self> {
        let net = Self::default();
        net.state.lock().next_handle = 1000;
        Arc::new(net)
    }

    fn alloc_handle(state: &mut SimState) -> u64 {
        let h = state.next_handle;
        state.next_handle += 1;
        h
    }

    /// 令后续 `listen(port)` 失败。
    pub fn fail_port(&self, port: u16) {
        self.state.lock().failed_ports.insert(port);
    }

    pub fn clear_failed_ports(&self) {
        self.state.lock().failed_ports.clear();
    }

    /// 注入一个入站连接，返回其句柄。
    pub fn inject_inbound(&self, port: u16) -> SocketHandle {
        let mut state = self.state.lock();
        let handle = Self::alloc_handle(&mut state);
        self.inject_inbound_locked(&mut state, port, handle);
        SocketHandle(handle)
    }

    /// 注入一个指定句柄的入站连接（句柄复用场景）。
    pub fn inject_inbound_with_handle(&self, port: u16, handle: SocketHandle) {
        let mut state = self.state.lock();
        self.inject_inbound_locked(&mut state, port, handle.0);
    }

    fn inject_inbound_locked(&self, state: &mut SimState, port: u16, handle: u64) {
        state.sockets.insert(handle, SimSocket::default());
        let listener_id = state
            .listeners
            .iter()
            .find(|(_, l)| l.port == port)
            .map(|(id, _)| *id)
            .expect("端口未监听");
        state
            .listeners
            .get_mut(&listener_id)
            .expect("监听器刚刚查到")
            .backlog
            .push_back(handle);
        if state.armed_accept.remove(&listener_id) {
            let _ = self.accept_q.tx.send(SocketHandle(listener_id));
        }
    }

    /// 向连接注入对端数据。
    pub fn push_data(&self, handle: SocketHandle, bytes: &[u8]) {
        let mut state = self.state.lock();
        if let Some(sock) = state.sockets.get_mut(&handle.0) {
            sock.rx.push_back(RxItem::Data(bytes.to_vec()));
        }
        if state.armed_read.remove(&handle.0) {
            let _ = self.read_q.tx.send(handle);
        }
    }

    /// 注入对端有序关闭。
    pub fn push_close(&self, handle: SocketHandle) {
        let mut state = self.state.lock();
        if let Some(sock) = state.sockets.get_mut(&handle.0) {
            sock.rx.push_back(RxItem::Close);
        }
        if state.armed_read.remove(&handle.0) {
            let _ = self.read_q.tx.send(handle);
        }
    }

    /// 限制单次写出的最大字节数（半写场景）。
    pub fn set_max_write(&self, handle: SocketHandle, max: usize) {
        if let Some(sock) = self.state.lock().sockets.get_mut(&handle.0) {
            sock.max_write = Some(max);
        }
    }

    /// 连接上已写出的全部字节。
    pub fn sent_bytes(&self, handle: SocketHandle) -> Vec<u8> {
        self.state
            .lock()
            .sockets
            .get(&handle.0)
            .map(|s| s.tx.clone())
            .unwrap_or_default()
    }

    /// OS 层是否已关闭该句柄。
    pub fn os_closed(&self, handle: SocketHandle) -> bool {
        self.state.lock().os_closed.contains(&handle.0)
    }

    /// 写 watch 的挂载次数（半写需要多轮挂载）。
    pub fn write_arm_count(&self, handle: SocketHandle) -> usize {
        self.state
            .lock()
            .write_arm_count
            .get(&handle.0)
            .copied()
            .unwrap_or(0)
    }

    /// 为 (ip, port) 编排下一次外连的即时结果。
    pub fn script_connect(&self, ip: &str, port: u16, script: &str) {
        let script = match script {
            "ready" => ConnectScript::Ready,
            "pending" => ConnectScript::Pending,
            _ => ConnectScript::Fail,
        };
        self.state
            .lock()
            .connect_scripts
            .entry((ip.to_string(), port))
            .or_default()
            .push_back(script);
    }

    /// (ip, port) 上的外连发起次数。
    pub fn connect_attempts(&self, ip: &str, port: u16) -> usize {
        self.state
            .lock()
            .connect_attempts
            .get(&(ip.to_string(), port))
            .copied()
            .unwrap_or(0)
    }

    /// 把一个在途外连的轮询结果翻转为成功/失败。
    pub fn resolve_connect(&self, handle: SocketHandle, progress: ConnectProgress) {
        self.state.lock().pending_connects.insert(handle.0, progress);
    }

    /// 最近一个处于在途状态的外连句柄。
    pub fn last_pending_connect(&self) -> Option<SocketHandle> {
        self.state
            .lock()
            .pending_connects
            .iter()
            .filter(|(_, p)| **p == ConnectProgress::Pending)
            .map(|(h, _)| SocketHandle(*h))
            .max()
    }

    fn wait_on(&self, q: &WaitQueue, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return WaitOutcome::Stopped;
            }
            match q.rx.recv_timeout(Duration::from_millis(5)) {
                Ok(first) => {
                    let mut batch = vec![first];
                    batch.extend(q.rx.try_iter());
                    return WaitOutcome::Ready(batch);
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return WaitOutcome::TimedOut;
                        }
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return WaitOutcome::Stopped;
                }
            }
        }
    }
}

impl SocketDriver for SimNet {
    fn listen(&self, port: u16) -> Result<SocketHandle, SocketError> {
        let mut state = self.state.lock();
        if state.failed_ports.contains(&port) {
            return Err(SocketError::Listen {
                port,
                reason: "address in use (simulated)".into(),
            });
        }
        let handle = Self::alloc_handle(&mut state);
        state.listeners.insert(
            handle,
            Listener {
                port,
                backlog: VecDeque::new(),
            },
        );
        Ok(SocketHandle(handle))
    }

    fn accept(&self, listener: SocketHandle) -> Result<Option<SocketHandle>, SocketError> {
        let mut state = self.state.lock();
        Ok(state
            .listeners
            .get_mut(&listener.0)
            .and_then(|l| l.backlog.pop_front())
            .map(SocketHandle))
    }

    fn connect_async(&self, ip: &str, port: u16) -> Result<ConnectStart, SocketError> {
        let mut state = self.state.lock();
        *state
            .connect_attempts
            .entry((ip.to_string(), port))
            .or_insert(0) += 1;
        let script = state
            .connect_scripts
            .get_mut(&(ip.to_string(), port))
            .and_then(|q| q.pop_front())
            .unwrap_or(ConnectScript::Pending);
        match script {
            ConnectScript::Ready => {
                let handle = Self::alloc_handle(&mut state);
                state.sockets.insert(handle, SimSocket::default());
                Ok(ConnectStart::Ready(SocketHandle(handle)))
            }
            ConnectScript::Pending => {
                let handle = Self::alloc_handle(&mut state);
                state.sockets.insert(handle, SimSocket::default());
                state
                    .pending_connects
                    .insert(handle, ConnectProgress::Pending);
                Ok(ConnectStart::Pending(SocketHandle(handle)))
            }
            ConnectScript::Fail => Err(SocketError::ConnectSetup {
                reason: "connection refused (simulated)".into(),
            }),
        }
    }

    fn poll_connect(&self, handle: SocketHandle) -> ConnectProgress {
        self.state
            .lock()
            .pending_connects
            .get(&handle.0)
            .copied()
            .unwrap_or(ConnectProgress::Failed)
    }

    fn recv(&self, handle: SocketHandle, buf: &mut [u8]) -> RecvOutcome {
        let mut state = self.state.lock();
        let Some(sock) = state.sockets.get_mut(&handle.0) else {
            return RecvOutcome::Err;
        };
        match sock.rx.front_mut() {
            None => RecvOutcome::WouldBlock,
            Some(RxItem::Close) => RecvOutcome::Closed,
            Some(RxItem::Error) => RecvOutcome::Err,
            Some(RxItem::Data(data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                data.drain(..n);
                if data.is_empty() {
                    sock.rx.pop_front();
                }
                RecvOutcome::Data(n)
            }
        }
    }

    fn send(&self, handle: SocketHandle, buf: &[u8]) -> SendOutcome {
        let mut state = self.state.lock();
        let Some(sock) = state.sockets.get_mut(&handle.0) else {
            return SendOutcome::Err;
        };
        if sock.write_blocked {
            return SendOutcome::WouldBlock;
        }
        let n = sock.max_write.unwrap_or(usize::MAX).min(buf.len());
        sock.tx.extend_from_slice(&buf[..n]);
        SendOutcome::Sent(n)
    }

    fn close(&self, handle: SocketHandle) {
        let mut state = self.state.lock();
        state.sockets.remove(&handle.0);
        state.listeners.remove(&handle.0);
        state.os_closed.push(handle.0);
    }
}

impl ReadinessMonitor for SimNet {
    fn start(&self, _max_handles: usize) -> Result<(), MonitorError> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn add_accept_watch(&self, handle: SocketHandle) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        let pending = state
            .listeners
            .get(&handle.0)
            .map(|l| !l.backlog.is_empty())
            .ok_or(MonitorError::Register { handle: handle.0 })?;
        if pending {
            // 水平触发：重挂时仍有未消费的入站连接，立即补报。
            let _ = self.accept_q.tx.send(handle);
        } else {
            state.armed_accept.insert(handle.0);
        }
        Ok(())
    }

    fn add_read_watch(&self, handle: SocketHandle) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        let Some(sock) = state.sockets.get(&handle.0) else {
            return Err(MonitorError::Register { handle: handle.0 });
        };
        if sock.rx.is_empty() {
            state.armed_read.insert(handle.0);
        } else {
            let _ = self.read_q.tx.send(handle);
        }
        Ok(())
    }

    fn add_write_watch(&self, handle: SocketHandle) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        let Some(sock) = state.sockets.get(&handle.0) else {
            return Err(MonitorError::Register { handle: handle.0 });
        };
        let write_blocked = sock.write_blocked;
        *state.write_arm_count.entry(handle.0).or_insert(0) += 1;
        if write_blocked {
            state.armed_write.insert(handle.0);
        } else {
            let _ = self.write_q.tx.send(handle);
        }
        Ok(())
    }

    fn wait_accept(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.wait_on(&self.accept_q, timeout)
    }

    fn wait_read(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.wait_on(&self.read_q, timeout)
    }

    fn wait_write(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.wait_on(&self.write_q, timeout)
    }
}

// ------------------------------------------------------- SimCompletionNet

#[derive(Default)]
struct CompletionState {
    next_handle: u64,
    sockets: HashMap<u64, SimSocket>,
    listeners: HashMap<u64, Listener>,
    /// 已投递但暂无数据的接收，数据到达时直接转为完成事件。
    pending_recv: HashSet<u64>,
    connect_scripts: HashMap<(String, u16), VecDeque<ConnectScript>>,
    connect_attempts: HashMap<(String, u16), usize>,
    pending_connects: HashMap<u64, ConnectProgress>,
    os_closed: Vec<u64>,
}

/// 完成式形态的内存网络替身。
pub struct SimCompletionNet {
    state: Mutex<CompletionState>,
    events_tx: Sender<CompletionEvent>,
    events_rx: Receiver<CompletionEvent>,
    stopped: AtomicBool,
}

impl Default for SimCompletionNet {
    fn default() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            state: Mutex::new(CompletionState {
                next_handle: 5000,
                ..CompletionState::default()
            }),
            events_tx,
            events_rx,
            stopped: AtomicBool::new(false),
        }
    }
}

impl SimCompletionNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inject_inbound(&self, port: u16) -> SocketHandle {
        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.sockets.insert(handle, SimSocket::default());
        let listener = state
            .listeners
            .iter()
            .find(|(_, l)| l.port == port)
            .map(|(id, _)| *id)
            .expect("端口未监听");
        let _ = self.events_tx.send(CompletionEvent::Accepted {
            listener: SocketHandle(listener),
            accepted: SocketHandle(handle),
        });
        SocketHandle(handle)
    }

    pub fn push_data(&self, handle: SocketHandle, bytes: &[u8]) {
        let mut state = self.state.lock();
        if state.pending_recv.remove(&handle.0) {
            let _ = self.events_tx.send(CompletionEvent::Recv {
                handle,
                bytes: Bytes::copy_from_slice(bytes),
            });
        } else if let Some(sock) = state.sockets.get_mut(&handle.0) {
            sock.rx.push_back(RxItem::Data(bytes.to_vec()));
        }
    }

    pub fn push_close(&self, handle: SocketHandle) {
        let mut state = self.state.lock();
        if state.pending_recv.remove(&handle.0) {
            let _ = self.events_tx.send(CompletionEvent::Closed { handle });
        } else if let Some(sock) = state.sockets.get_mut(&handle.0) {
            sock.rx.push_back(RxItem::Close);
        }
    }

    pub fn sent_bytes(&self, handle: SocketHandle) -> Vec<u8> {
        self.state
            .lock()
            .sockets
            .get(&handle.0)
            .map(|s| s.tx.clone())
            .unwrap_or_default()
    }

    pub fn os_closed(&self, handle: SocketHandle) -> bool {
        self.state.lock().os_closed.contains(&handle.0)
    }

    pub fn script_connect(&self, ip: &str, port: u16, script: &str) {
        let script = match script {
            "ready" => ConnectScript::Ready,
            "pending" => ConnectScript::Pending,
            _ => ConnectScript::Fail,
        };
        self.state
            .lock()
            .connect_scripts
            .entry((ip.to_string(), port))
            .or_default()
            .push_back(script);
    }

    pub fn connect_attempts(&self, ip: &str, port: u16) -> usize {
        self.state
            .lock()
            .connect_attempts
            .get(&(ip.to_string(), port))
            .copied()
            .unwrap_or(0)
    }

    pub fn resolve_connect(&self, handle: SocketHandle, progress: ConnectProgress) {
        self.state.lock().pending_connects.insert(handle.0, progress);
    }

    pub fn last_pending_connect(&self) -> Option<SocketHandle> {
        self.state
            .lock()
            .pending_connects
            .iter()
            .filter(|(_, p)| **p == ConnectProgress::Pending)
            .map(|(h, _)| SocketHandle(*h))
            .max()
    }
}

impl SocketDriver for SimCompletionNet {
    fn listen(&self, port: u16) -> Result<SocketHandle, SocketError> {
        let mut state = self.state.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.listeners.insert(
            handle,
            Listener {
                port,
                backlog: VecDeque::new(),
            },
        );
        Ok(SocketHandle(handle))
    }

    fn accept(&self, _listener: SocketHandle) -> Result<Option<SocketHandle>, SocketError> {
        // 完成式形态直接以 Accepted 事件上报，不走就绪式 accept。
        Ok(None)
    }

    fn connect_async(&self, ip: &str, port: u16) -> Result<ConnectStart, SocketError> {
        let mut state = self.state.lock();
        *state
            .connect_attempts
            .entry((ip.to_string(), port))
            .or_insert(0) += 1;
        let script = state
            .connect_scripts
            .get_mut(&(ip.to_string(), port))
            .and_then(|q| q.pop_front())
            .unwrap_or(ConnectScript::Pending);
        let handle = state.next_handle;
        state.next_handle += 1;
        match script {
            ConnectScript::Ready => {
                state.sockets.insert(handle, SimSocket::default());
                Ok(ConnectStart::Ready(SocketHandle(handle)))
            }
            ConnectScript::Pending => {
                state.sockets.insert(handle, SimSocket::default());
                state
                    .pending_connects
                    .insert(handle, ConnectProgress::Pending);
                Ok(ConnectStart::Pending(SocketHandle(handle)))
            }
            ConnectScript::Fail => Err(SocketError::ConnectSetup {
                reason: "connection refused (simulated)".into(),
            }),
        }
    }

    fn poll_connect(&self, handle: SocketHandle) -> ConnectProgress {
        self.state
            .lock()
            .pending_connects
            .get(&handle.0)
            .copied()
            .unwrap_or(ConnectProgress::Failed)
    }

    fn recv(&self, _handle: SocketHandle, _buf: &mut [u8]) -> RecvOutcome {
        // 完成式形态的数据走 Recv 事件。
        RecvOutcome::WouldBlock
    }

    fn send(&self, _handle: SocketHandle, _buf: &[u8]) -> SendOutcome {
        SendOutcome::WouldBlock
    }

    fn close(&self, handle: SocketHandle) {
        let mut state = self.state.lock();
        state.sockets.remove(&handle.0);
        state.listeners.remove(&handle.0);
        state.pending_recv.remove(&handle.0);
        state.os_closed.push(handle.0);
    }
}

impl CompletionMonitor for SimCompletionNet {
    fn start(&self, _max_handles: usize) -> Result<(), MonitorError> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn add_accept(&self, listener: SocketHandle) -> Result<(), MonitorError> {
        if self.state.lock().listeners.contains_key(&listener.0) {
            Ok(())
        } else {
            Err(MonitorError::Register { handle: listener.0 })
        }
    }

    fn add_recv(&self, handle: SocketHandle) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        let Some(sock) = state.sockets.get_mut(&handle.0) else {
            return Err(MonitorError::Register { handle: handle.0 });
        };
        match sock.rx.pop_front() {
            None => {
                state.pending_recv.insert(handle.0);
            }
            Some(RxItem::Data(data)) => {
                let _ = self.events_tx.send(CompletionEvent::Recv {
                    handle,
                    bytes: Bytes::from(data),
                });
            }
            Some(RxItem::Close) | Some(RxItem::Error) => {
                let _ = self.events_tx.send(CompletionEvent::Closed { handle });
            }
        }
        Ok(())
    }

    fn add_send(&self, handle: SocketHandle, bytes: Bytes) -> Result<(), MonitorError> {
        let mut state = self.state.lock();
        let Some(sock) = state.sockets.get_mut(&handle.0) else {
            return Err(MonitorError::Register { handle: handle.0 });
        };
        let n = sock.max_write.unwrap_or(usize::MAX).min(bytes.len());
        sock.tx.extend_from_slice(&bytes[..n]);
        let _ = self
            .events_tx
            .send(CompletionEvent::Sent { handle, len: n });
        Ok(())
    }

    fn wait_event(&self, timeout: Option<Duration>) -> CompletionEvent {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if self.stopped.load(Ordering::SeqCst) {
                return CompletionEvent::Stopped;
            }
            match self.events_rx.recv_timeout(Duration::from_millis(5)) {
                Ok(event) => return event,
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                    if let Some(d) = deadline {
                        if Instant::now() >= d {
                            return CompletionEvent::TimedOut;
                        }
                    }
                }
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    return CompletionEvent::Stopped;
                }
            }
        }
    }
}

// -------------------------------------------------------- RecordingServer

/// 业务回调的记录项，按全局到达顺序入列。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Event {
    Connected { handle: u64, outbound: bool },
    Msg { handle: u64, bytes: Vec<u8> },
    CloseEntered { handle: u64 },
    Closed { handle: u64 },
    ConnectFailed { port: u16, retry_secs: i64 },
}

/// 按到达顺序记录回调的业务替身。
pub struct RecordingServer {
    events: Mutex<Vec<Event>>,
    /// 每次消息回调消费的字节数；0 表示全量消费。
    msg_chunk: usize,
    /// 每连接的消息回调并发度峰值（契约上必须恒为 1）。
    in_msg: Mutex<HashMap<u64, i32>>,
    max_msg_concurrency: Mutex<i32>,
    /// 关闭回调的阻塞闸（测试打开后回调才返回）。
    close_gate: Mutex<Option<Receiver<()>>>,
    ticks: AtomicUsize,
    /// 返回 Done 前 main_tick 的调用次数。
    ticks_until_done: usize,
}

impl RecordingServer {
    pub fn new() -> Arc<Self> {
        Self::with_msg_chunk(0)
    }

    /// 每次 `on_msg` 恰好消费 `chunk` 字节（凑不齐不消费）。
    pub fn with_msg_chunk(chunk: usize) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            msg_chunk: chunk,
            in_msg: Mutex::new(HashMap::new()),
            max_msg_concurrency: Mutex::new(0),
            close_gate: Mutex::new(None),
            ticks: AtomicUsize::new(0),
            ticks_until_done: 1,
        })
    }

    /// 使关闭回调阻塞，直到测试通过返回的发送端放行。
    pub fn gate_close(&self) -> Sender<()> {
        let (tx, rx) = unbounded();
        *self.close_gate.lock() = Some(rx);
        tx
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn connected_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Connected { .. }))
    }

    pub fn msg_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Msg { .. }))
    }

    pub fn closed_count(&self) -> usize {
        self.count(|e| matches!(e, Event::Closed { .. }))
    }

    pub fn connect_failed_count(&self) -> usize {
        self.count(|e| matches!(e, Event::ConnectFailed { .. }))
    }

    pub fn close_entered(&self, handle: SocketHandle) -> bool {
        self.count(|e| matches!(e, Event::CloseEntered { handle: h } if *h == handle.0)) > 0
    }

    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn max_msg_concurrency(&self) -> i32 {
        *self.max_msg_concurrency.lock()
    }

    /// 校验一条连接的完整生命周期：消息保序、关闭恰好一次且在最后。
    pub fn assert_ordered_lifecycle(&self, handle: SocketHandle, expect_msgs: usize) {
        let events = self.events.lock();
        let mine: Vec<&Event> = events
            .iter()
            .filter(|e| match e {
                Event::Connected { handle: h, .. }
                | Event::Msg { handle: h, .. }
                | Event::CloseEntered { handle: h }
                | Event::Closed { handle: h } => *h == handle.0,
                Event::ConnectFailed { .. } => false,
            })
            .collect();
        assert!(
            matches!(mine.first(), Some(Event::Connected { .. })),
            "第一条必须是建立回调: {mine:?}"
        );
        let msgs: Vec<&&Event> = mine
            .iter()
            .filter(|e| matches!(e, Event::Msg { .. }))
            .collect();
        assert_eq!(msgs.len(), expect_msgs, "消息回调次数不符");
        let closed: Vec<usize> = mine
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, Event::Closed { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(closed.len(), 1, "关闭回调必须恰好一次");
        assert_eq!(closed[0], mine.len() - 1, "关闭回调必须是最后一条");
    }
}

impl ServerHandler for RecordingServer {
    fn on_connect(&self, host: &Host) {
        self.events.lock().push(Event::Connected {
            handle: host.id().0,
            outbound: host.is_outbound(),
        });
    }

    fn on_msg(&self, host: &Host) {
        let depth = {
            let mut in_msg = self.in_msg.lock();
            let d = in_msg.entry(host.id().0).or_insert(0);
            *d += 1;
            *d
        };
        {
            let mut max = self.max_msg_concurrency.lock();
            *max = (*max).max(depth);
        }
        if self.msg_chunk == 0 {
            let mut buf = vec![0u8; host.readable_len()];
            let n = host.recv(&mut buf);
            buf.truncate(n);
            self.events.lock().push(Event::Msg {
                handle: host.id().0,
                bytes: buf,
            });
        } else if host.readable_len() >= self.msg_chunk {
            let mut buf = vec![0u8; self.msg_chunk];
            host.recv(&mut buf);
            self.events.lock().push(Event::Msg {
                handle: host.id().0,
                bytes: buf,
            });
        }
        let mut in_msg = self.in_msg.lock();
        if let Some(d) = in_msg.get_mut(&host.id().0) {
            *d -= 1;
        }
    }

    fn on_close_connect(&self, host: &Host) {
        self.events.lock().push(Event::CloseEntered {
            handle: host.id().0,
        });
        let gate = self.close_gate.lock().as_ref().cloned();
        if let Some(rx) = gate {
            let _ = rx.recv_timeout(Duration::from_secs(5));
        }
        self.events.lock().push(Event::Closed {
            handle: host.id().0,
        });
    }

    fn on_connect_failed(&self, _ip: std::net::Ipv4Addr, port: u16, retry_secs: i64) {
        self.events
            .lock()
            .push(Event::ConnectFailed { port, retry_secs });
    }

    fn main_tick(&self) -> TickOutcome {
        let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if n >= self.ticks_until_done {
            TickOutcome::Done
        } else {
            TickOutcome::Continue
        }
    }
}
