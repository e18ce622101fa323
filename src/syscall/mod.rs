//! # 系统调用处理模块
//!
//! 本核心拥有的系统调用入口。编号遵循 RISC-V Linux 约定：
//!
//! - `SYSCALL_KILL` (129) - 向指定进程投递信号
//! - `SYSCALL_SIGNAL` (134) - 注册信号处理动作
//! - `SYSCALL_SIGPROCMASK` (135) - 替换信号屏蔽集合
//! - `SYSCALL_SBRK` (214) - 调整堆断点（惰性增长）
//! - `SYSCALL_MUNMAP` (215) - 解除内存映射
//! - `SYSCALL_MMAP` (222) - 建立内存映射
//!
//! ## 调用约定
//!
//! `a7` 存放调用号，`a0`~`a5` 存放参数，返回值写回 `a0`。
//! 参数错误一律以 -1 报告给调用进程，不改变内核状态。

mod mm;
mod process;

pub use mm::*;
pub use process::*;

use crate::mm::PageTable;
use crate::process::ProcessControlBlock;
use alloc::sync::Arc;
use log::warn;

const SYSCALL_KILL: usize = 129;
const SYSCALL_SIGNAL: usize = 134;
const SYSCALL_SIGPROCMASK: usize = 135;
const SYSCALL_SBRK: usize = 214;
const SYSCALL_MUNMAP: usize = 215;
const SYSCALL_MMAP: usize = 222;

/// 系统调用分发器
///
/// 由陷阱分发器调用。无法识别的调用号记录诊断信息并返回 -1，
/// 调用号准入的粗粒度过滤（沙箱）在进入这里之前完成。
///
/// ## Arguments
///
/// * `process` - 发起调用的进程
/// * `page_table` - 该进程的页表原语（`munmap`/`sbrk` 使用）
/// * `syscall_id` - 系统调用编号
/// * `args` - `a0`~`a5` 寄存器参数
pub fn syscall(
    process: &Arc<ProcessControlBlock>,
    page_table: &mut dyn PageTable,
    syscall_id: usize,
    args: [usize; 6],
) -> isize {
    match syscall_id {
        SYSCALL_KILL => sys_sigkill(args[0], args[1]),
        SYSCALL_SIGNAL => sys_signal(process, args[0], args[1]),
        SYSCALL_SIGPROCMASK => sys_sigprocmask(process, args[0] as u32),
        SYSCALL_SBRK => sys_sbrk(process, page_table, args[0] as isize),
        SYSCALL_MUNMAP => sys_munmap(process, page_table, args[0], args[1]),
        SYSCALL_MMAP => sys_mmap(
            process,
            args[0],
            args[1],
            args[2] as u32,
            args[3] as u32,
            args[4] as isize,
            args[5],
        ),
        _ => {
            warn!(
                "[kernel] unsupported syscall_id {} from pid {}",
                syscall_id,
                process.getpid()
            );
            -1
        }
    }
}
