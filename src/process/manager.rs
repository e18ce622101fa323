//! # 进程全局表模块
//!
//! 维护 PID 到进程控制块的全局映射，支撑面向指定进程的信号投递
//! （`sigkill`）。就绪队列与调度策略属于嵌入内核，此处只保管
//! 查找表本身。

use super::ProcessControlBlock;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    /// PID → 进程控制块映射
    static ref PID2PROCESS: Mutex<BTreeMap<usize, Arc<ProcessControlBlock>>> =
        Mutex::new(BTreeMap::new());
}

/// 登记新进程
pub fn insert_into_pid2process(pid: usize, process: Arc<ProcessControlBlock>) {
    PID2PROCESS.lock().insert(pid, process);
}

/// 按 PID 查找进程
pub fn pid2process(pid: usize) -> Option<Arc<ProcessControlBlock>> {
    PID2PROCESS.lock().get(&pid).map(Arc::clone)
}

/// 注销进程
///
/// ## Panics
///
/// 进程不在表中时 panic，这意味着重复退出。
pub fn remove_from_pid2process(pid: usize) {
    if PID2PROCESS.lock().remove(&pid).is_none() {
        panic!("cannot find pid {} in pid2process!", pid);
    }
}
