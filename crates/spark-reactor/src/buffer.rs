//! # buffer 模块说明
//!
//! ## 角色定位（Why）
//! - 收发两侧的字节暂存区：接收侧由派发循环写入、业务回调消费；发送侧由
//!   多个生产者追加、单飞发送流程按块读出；
//! - 容量固定，高连接数下不随流量抖动反复分配。
//!
//! ## 行为契约（What）
//! - `writable_chunk` 暴露一段**连续**可写区域，配合 `commit(n)` 完成
//!   "先收后记账"的填充方式；
//! - `peek_into` 只读不消费，`consume(n)` 在 OS 层确认写出后再清账——
//!   部分写出时剩余字节留在缓冲中等待下一次发送就绪事件。
//!
//! ## 风险提示（Trade-offs）
//! - 环形结构意味着 `writable_chunk` 在回绕点最多只给到尾段长度，填充
//!   循环必须容忍"一次给不满"的情况并继续迭代。

/// 固定容量的字节环形缓冲。
#[derive(Debug)]
pub struct RingBuffer {
    data: Box<[u8]>,
    /// 读游标：下一个未消费字节的位置。
    head: usize,
    /// 当前存量字节数，恒有 `len <= data.len()`。
    len: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.data.len() - self.len
    }

    /// 返回写游标起始的一段连续可写区域；空闲为零时返回空切片。
    ///
    /// 调用方向其中写入 `n` 字节后必须调用 [`commit(n)`](Self::commit)。
    pub fn writable_chunk(&mut self) -> &mut [u8] {
        let cap = self.data.len();
        let tail = (self.head + self.len) % cap;
        if self.len == cap {
            return &mut self.data[0..0];
        }
        let end = if self.head > tail { self.head } else { cap };
        &mut self.data[tail..end]
    }

    /// 记账：声明已向 `writable_chunk` 写入 `n` 字节。
    pub fn commit(&mut self, n: usize) {
        debug_assert!(n <= self.free());
        self.len += n;
    }

    /// 追加一段字节，返回实际写入数量（空闲不足时截断）。
    pub fn append(&mut self, mut src: &[u8]) -> usize {
        let mut written = 0;
        while !src.is_empty() {
            let chunk = self.writable_chunk();
            if chunk.is_empty() {
                break;
            }
            let n = chunk.len().min(src.len());
            chunk[..n].copy_from_slice(&src[..n]);
            self.commit(n);
            src = &src[n..];
            written += n;
        }
        written
    }

    /// 只读拷贝至 `dst`，不移动读游标；返回拷贝的字节数。
    pub fn peek_into(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        let cap = self.data.len();
        let first = n.min(cap - self.head);
        dst[..first].copy_from_slice(&self.data[self.head..self.head + first]);
        if first < n {
            dst[first..n].copy_from_slice(&self.data[..n - first]);
        }
        n
    }

    /// 消费 `n` 字节（`n` 超过存量时按存量截断），返回实际消费数。
    pub fn consume(&mut self, n: usize) -> usize {
        let n = n.min(self.len);
        self.head = (self.head + n) % self.data.len();
        self.len -= n;
        if self.len == 0 {
            // 清空时归位读游标，后续可写区域最大化。
            self.head = 0;
        }
        n
    }

    /// 读出并消费，等价于 `peek_into` + `consume`。
    pub fn read_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.peek_into(dst);
        self.consume(n);
        n
    }
}
