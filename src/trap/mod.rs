//! # 陷阱处理模块
//!
//! 用户态陷阱的唯一入口。汇编跳板保存现场后，嵌入内核从
//! `scause`/`stval` 解码出 [`UserTrapCause`] 并调用 [`user_trap`]；
//! 返回的 [`TrapControl`] 告知回到用户态、让出处理器还是终结进程。
//!
//! 每条非终结的陷阱返回路径按固定顺序执行：
//! 处理函数返回检测 → 按因处理 → 被杀死检查 → 单次信号投递 →
//! 再次被杀死检查 →（仅时钟中断）抢占决策。
//!
//! 内核态陷阱走独立的 [`kernel_trap`]：只认设备与时钟中断，
//! 其余一律 panic，内核代码被假定不产生缺页。

mod context;

pub use context::{HandlerReturn, TrapContext};

use crate::mm::{FaultAccess, PageTable, VirtAddr, handle_page_fault};
use crate::process::{ProcessControlBlock, ProcessStatus};
use crate::syscall::syscall;
use crate::timer;
use alloc::sync::Arc;
use log::{debug, error, warn};

const INTERRUPT_BIT: usize = 1 << (usize::BITS - 1);

const EXCEPTION_USER_ENV_CALL: usize = 8;
const EXCEPTION_INST_PAGE_FAULT: usize = 12;
const EXCEPTION_LOAD_PAGE_FAULT: usize = 13;
const EXCEPTION_STORE_PAGE_FAULT: usize = 15;
const INTERRUPT_SUPERVISOR_TIMER: usize = 5;
const INTERRUPT_SUPERVISOR_EXTERNAL: usize = 9;

/// 用户态陷阱原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTrapCause {
    /// 系统调用（`ecall`）
    Syscall,
    /// 缺页，`addr` 为 `stval` 中的出错地址
    PageFault { addr: usize, access: FaultAccess },
    /// 外部设备中断，设备服务由嵌入内核在调用前完成
    DeviceInterrupt,
    /// 时钟中断
    TimerInterrupt,
    /// 无法识别的原因，终结性
    Unexpected { scause: usize, stval: usize },
}

impl UserTrapCause {
    /// 从 `scause`/`stval` 原始位解码
    pub fn decode(scause: usize, stval: usize) -> Self {
        if scause & INTERRUPT_BIT != 0 {
            match scause & !INTERRUPT_BIT {
                INTERRUPT_SUPERVISOR_TIMER => UserTrapCause::TimerInterrupt,
                INTERRUPT_SUPERVISOR_EXTERNAL => UserTrapCause::DeviceInterrupt,
                _ => UserTrapCause::Unexpected { scause, stval },
            }
        } else {
            match scause {
                EXCEPTION_USER_ENV_CALL => UserTrapCause::Syscall,
                EXCEPTION_INST_PAGE_FAULT => UserTrapCause::PageFault {
                    addr: stval,
                    access: FaultAccess::Fetch,
                },
                EXCEPTION_LOAD_PAGE_FAULT => UserTrapCause::PageFault {
                    addr: stval,
                    access: FaultAccess::Load,
                },
                EXCEPTION_STORE_PAGE_FAULT => UserTrapCause::PageFault {
                    addr: stval,
                    access: FaultAccess::Store,
                },
                _ => UserTrapCause::Unexpected { scause, stval },
            }
        }
    }
}

/// 内核态陷阱原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelTrapCause {
    DeviceInterrupt,
    TimerInterrupt,
    Unexpected { scause: usize, stval: usize },
}

impl KernelTrapCause {
    pub fn decode(scause: usize, stval: usize) -> Self {
        if scause & INTERRUPT_BIT != 0 {
            match scause & !INTERRUPT_BIT {
                INTERRUPT_SUPERVISOR_TIMER => KernelTrapCause::TimerInterrupt,
                INTERRUPT_SUPERVISOR_EXTERNAL => KernelTrapCause::DeviceInterrupt,
                _ => KernelTrapCause::Unexpected { scause, stval },
            }
        } else {
            KernelTrapCause::Unexpected { scause, stval }
        }
    }
}

/// 调度器抢占决策接口
///
/// 多级反馈队列的队列选择与时间片记账属于嵌入内核，
/// 陷阱返回路径只消费这两个判断。
pub trait Preemption {
    /// 当前进程的时间片是否耗尽
    fn time_slice_exhausted(&self) -> bool;
    /// 是否有更高优先级的进程就绪
    fn higher_priority_ready(&self) -> bool;
}

/// 陷阱返回路径的处置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapControl {
    /// 正常回到用户态
    Return,
    /// 让出处理器后再回到用户态
    Yield,
    /// 进程终结，携带退出码
    Exit(i32),
}

/// 用户态陷阱处理
///
/// ## Arguments
///
/// * `process` - 陷入的进程
/// * `page_table` - 该进程的页表原语
/// * `preempt` - 调度器抢占决策钩子
/// * `cause` - 已解码的陷阱原因
///
/// ## Returns
///
/// [`TrapControl::Exit`] 时调用方负责走进程退出路径，
/// 其余情况经跳板回到用户态。
pub fn user_trap(
    process: &Arc<ProcessControlBlock>,
    page_table: &mut dyn PageTable,
    preempt: &dyn Preemption,
    cause: UserTrapCause,
) -> TrapControl {
    // 处理函数返回检测：上一次注入的用户处理函数执行完毕后，
    // 进程的下一次陷入（无论何因）先恢复被保存的现场
    {
        let mut inner = process.inner_exclusive_access();
        if let HandlerReturn::InHandler(saved) = inner.trap_cx.handler_return {
            inner.trap_cx.sepc = saved;
            inner.trap_cx.handler_return = HandlerReturn::Normal;
        }
    }

    let mut timer_interrupt = false;
    match cause {
        UserTrapCause::Syscall => {
            if let Some(control) = check_killed(process) {
                return control;
            }
            let (id, args) = {
                let mut inner = process.inner_exclusive_access();
                // sepc 指向 ecall 本身，返回时执行下一条指令
                inner.trap_cx.sepc += 4;
                (inner.trap_cx.syscall_id(), inner.trap_cx.syscall_args())
            };
            let ret = syscall(process, page_table, id, args);
            process.inner_exclusive_access().trap_cx.set_syscall_ret(ret);
        }
        UserTrapCause::PageFault { addr, access } => {
            let heap_size = process.inner_exclusive_access().size;
            match handle_page_fault(
                page_table,
                &process.vmas,
                heap_size,
                VirtAddr(addr),
                access,
            ) {
                Ok(resolution) => {
                    debug!(
                        "[kernel] page fault at {:#x} resolved: {:?}",
                        addr, resolution
                    );
                }
                Err(err) => {
                    warn!(
                        "[kernel] PageFault in application, kernel killed it. addr={:#x} {:?}",
                        addr, err
                    );
                    let mut inner = process.inner_exclusive_access();
                    inner.killed = true;
                    inner.exit_code = -1;
                }
            }
        }
        UserTrapCause::DeviceInterrupt => {}
        UserTrapCause::TimerInterrupt => {
            timer_interrupt = true;
            timer::tick();
            process.inner_exclusive_access().utime += 1;
        }
        UserTrapCause::Unexpected { scause, stval } => {
            error!(
                "[kernel] unexpected scause {:#x}, stval = {:#x}, pid = {}",
                scause,
                stval,
                process.getpid()
            );
            let mut inner = process.inner_exclusive_access();
            inner.killed = true;
            inner.exit_code = -1;
        }
    }

    if let Some(control) = check_killed(process) {
        return control;
    }

    // 每条返回路径恰好一轮信号投递
    process.dispatch_once();
    if let Some(control) = check_killed(process) {
        return control;
    }

    if timer_interrupt && (preempt.time_slice_exhausted() || preempt.higher_priority_ready()) {
        return TrapControl::Yield;
    }
    TrapControl::Return
}

/// 内核态陷阱处理
///
/// ## Returns
///
/// 时钟中断上按抢占钩子判断是否让出处理器。
///
/// ## Panics
///
/// 设备与时钟中断之外的任何原因都视为内核不变式被破坏，
/// 直接 panic。
pub fn kernel_trap(
    cause: KernelTrapCause,
    current: Option<&Arc<ProcessControlBlock>>,
    preempt: &dyn Preemption,
) -> bool {
    match cause {
        KernelTrapCause::DeviceInterrupt => false,
        KernelTrapCause::TimerInterrupt => {
            timer::tick();
            if let Some(process) = current {
                let mut inner = process.inner_exclusive_access();
                if inner.status == ProcessStatus::Running {
                    inner.stime += 1;
                    drop(inner);
                    return preempt.time_slice_exhausted() || preempt.higher_priority_ready();
                }
            }
            false
        }
        KernelTrapCause::Unexpected { scause, stval } => {
            panic!("kerneltrap: scause {:#x}, stval = {:#x}", scause, stval);
        }
    }
}

fn check_killed(process: &Arc<ProcessControlBlock>) -> Option<TrapControl> {
    let inner = process.inner_exclusive_access();
    if inner.killed {
        Some(TrapControl::Exit(inner.exit_code))
    } else {
        None
    }
}
