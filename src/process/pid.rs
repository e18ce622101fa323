//! # 进程标识符分配模块
//!
//! 提供 PID 的分配与回收。PID 以 RAII 句柄的形式持有，
//! 句柄析构时自动归还编号供后续进程复用。

use alloc::vec::Vec;
use lazy_static::lazy_static;
use spin::Mutex;

/// PID 分配器
///
/// 顺序递增分配，回收的编号入栈等待复用。
pub struct PidAllocator {
    current: usize,
    recycled: Vec<usize>,
}

impl PidAllocator {
    pub fn new() -> Self {
        Self {
            current: 1,
            recycled: Vec::new(),
        }
    }

    pub fn alloc(&mut self) -> PidHandle {
        if let Some(pid) = self.recycled.pop() {
            PidHandle(pid)
        } else {
            self.current += 1;
            PidHandle(self.current - 1)
        }
    }

    pub fn dealloc(&mut self, pid: usize) {
        assert!(pid < self.current);
        assert!(
            !self.recycled.iter().any(|&p| p == pid),
            "pid {} has been deallocated!",
            pid
        );
        self.recycled.push(pid);
    }
}

lazy_static! {
    /// 全局 PID 分配器
    static ref PID_ALLOCATOR: Mutex<PidAllocator> = Mutex::new(PidAllocator::new());
}

/// PID 句柄
///
/// 析构时自动归还编号。
pub struct PidHandle(pub usize);

impl Drop for PidHandle {
    fn drop(&mut self) {
        PID_ALLOCATOR.lock().dealloc(self.0);
    }
}

/// 分配一个新 PID
pub fn pid_alloc() -> PidHandle {
    PID_ALLOCATOR.lock().alloc()
}
