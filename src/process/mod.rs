//! # 进程管理模块
//!
//! 提供进程控制块与围绕它的信号投递操作。调度循环、上下文切换与
//! 程序加载属于嵌入内核；这里保管的是缺页处理与信号机制所依赖的
//! 进程状态：生命周期状态、被杀死标记、堆断点、时间统计、文件
//! 描述符表、VMA 注册表、信号状态机与陷阱上下文。
//!
//! ## 并发约定
//!
//! 每个进程的可变状态由自身的锁保护，临界区保持短小；
//! [`ProcessControlBlock::dispatch_once`] 在执行逐信号动作前
//! 显式释放锁，再按需重新获取，避免跨动作持锁。VMA 注册表
//! 自带独立的锁，置于锁外持有。

use crate::fs::File;
use crate::mm::VmaRegistry;
use crate::trap::{HandlerReturn, TrapContext};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

pub mod manager;
mod pid;
pub mod signal;

pub use manager::{insert_into_pid2process, pid2process, remove_from_pid2process};
pub use pid::{PidHandle, pid_alloc};
pub use signal::{
    MAX_SIG, SIGCHLD, SIGCONT, SIGKILL, SIGSTOP, SIGWINCH, SignalDisposition, SignalError,
    SignalFlags, SignalState,
};

/// 信号停止使用的保留等待通道
///
/// 非地址的哨兵值，用于把"被 `SIGSTOP` 停住"与普通 I/O 等待
/// 区分开；`SIGCONT` 只唤醒睡在该通道上的进程。
pub const SIGNAL_STOP_CHANNEL: usize = 1;

/// 进程状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// 就绪，等待调度
    Ready,
    /// 正在 CPU 上执行
    Running,
    /// 睡眠，`channel` 标识等待原因
    Sleeping { channel: usize },
    /// 已退出，等待父进程回收
    Zombie,
}

/// 进程控制块
///
/// PID 与 VMA 注册表置于锁外：前者创建后不变，后者自带锁。
pub struct ProcessControlBlock {
    /// 进程标识符句柄，析构时自动回收编号
    pub pid: PidHandle,
    /// 虚拟内存区域注册表
    pub vmas: VmaRegistry,
    inner: Mutex<ProcessControlBlockInner>,
}

/// 进程控制块内部可变状态
pub struct ProcessControlBlockInner {
    /// 进程当前状态
    pub status: ProcessStatus,
    /// 被杀死标记，每次陷阱返回路径都会检查
    pub killed: bool,
    /// 退出码
    pub exit_code: i32,
    /// 堆断点（`sbrk` 维护），堆按需分配的上界
    pub size: usize,
    /// 用户态时间片计数
    pub utime: usize,
    /// 内核态时间片计数
    pub stime: usize,
    /// 文件描述符表，标准描述符由嵌入内核装配
    pub fd_table: Vec<Option<Arc<dyn File + Send + Sync>>>,
    /// 信号状态机
    pub signal: SignalState,
    /// 陷阱上下文
    pub trap_cx: TrapContext,
    /// 父进程
    pub parent: Option<Weak<ProcessControlBlock>>,
    /// 子进程列表
    pub children: Vec<Arc<ProcessControlBlock>>,
}

impl ProcessControlBlockInner {
    /// 分配最小的空闲文件描述符
    pub fn alloc_fd(&mut self) -> usize {
        if let Some(fd) = (0..self.fd_table.len()).find(|fd| self.fd_table[*fd].is_none()) {
            fd
        } else {
            self.fd_table.push(None);
            self.fd_table.len() - 1
        }
    }
}

impl ProcessControlBlock {
    /// 创建新进程
    ///
    /// 程序镜像的加载与地址空间的搭建由嵌入内核完成，这里接收
    /// 已确定的入口地址、用户栈指针与初始断点。新进程处于就绪
    /// 状态并登记进全局 PID 表。
    pub fn new(entry: usize, user_sp: usize, size: usize) -> Arc<Self> {
        let pid = pid_alloc();
        let process = Arc::new(Self {
            pid,
            vmas: VmaRegistry::new(),
            inner: Mutex::new(ProcessControlBlockInner {
                status: ProcessStatus::Ready,
                killed: false,
                exit_code: 0,
                size,
                utime: 0,
                stime: 0,
                fd_table: Vec::new(),
                signal: SignalState::new(),
                trap_cx: TrapContext::app_init_context(entry, user_sp),
                parent: None,
                children: Vec::new(),
            }),
        });
        insert_into_pid2process(process.getpid(), Arc::clone(&process));
        process
    }

    /// 获取内部状态的独占访问
    pub fn inner_exclusive_access(&self) -> MutexGuard<'_, ProcessControlBlockInner> {
        self.inner.lock()
    }

    /// 进程 PID
    pub fn getpid(&self) -> usize {
        self.pid.0
    }

    /// 创建子进程
    ///
    /// VMA 注册表逐区域复制且文件引用独立计数；信号动作表与屏蔽
    /// 集合继承，待决集合清空；陷阱上下文复制后把 `a0` 置零，
    /// 使子进程从 `fork` 返回 0。页表的写时复制搭建由嵌入内核在
    /// 调用本方法的同时完成。
    pub fn fork(self: &Arc<Self>) -> Arc<Self> {
        let mut parent_inner = self.inner_exclusive_access();
        let mut trap_cx = parent_inner.trap_cx.clone();
        trap_cx.set_syscall_ret(0);
        let child = Arc::new(Self {
            pid: pid_alloc(),
            vmas: self.vmas.duplicate(),
            inner: Mutex::new(ProcessControlBlockInner {
                status: ProcessStatus::Ready,
                killed: false,
                exit_code: 0,
                size: parent_inner.size,
                utime: 0,
                stime: 0,
                fd_table: parent_inner
                    .fd_table
                    .iter()
                    .map(|f| f.as_ref().map(Arc::clone))
                    .collect(),
                signal: SignalState::inherit(&parent_inner.signal),
                trap_cx,
                parent: Some(Arc::downgrade(self)),
                children: Vec::new(),
            }),
        });
        parent_inner.children.push(Arc::clone(&child));
        drop(parent_inner);
        insert_into_pid2process(child.getpid(), Arc::clone(&child));
        child
    }

    /// 进程退出
    ///
    /// 转入僵尸状态，清空文件描述符表，释放全部 VMA（连同其
    /// 文件引用），并从全局 PID 表注销。控制块本体留待父进程
    /// 回收。
    pub fn exit(&self, exit_code: i32) {
        {
            let mut inner = self.inner_exclusive_access();
            inner.status = ProcessStatus::Zombie;
            inner.exit_code = exit_code;
            inner.fd_table.clear();
        }
        self.vmas.clear();
        remove_from_pid2process(self.getpid());
    }

    /// 向本进程投递信号
    ///
    /// 置待决位；若进程正在睡眠则转为就绪，保证待决信号总能
    /// 尽快得到一次投递评估——即便它随后会被忽略。
    ///
    /// ## Errors
    ///
    /// 信号编号越界时返回 [`SignalError::BadSignal`]。
    pub fn raise(&self, sig: usize) -> Result<(), SignalError> {
        if !(1..=MAX_SIG).contains(&sig) {
            return Err(SignalError::BadSignal);
        }
        let mut inner = self.inner_exclusive_access();
        inner.signal.set_pending(sig);
        if let ProcessStatus::Sleeping { .. } = inner.status {
            inner.status = ProcessStatus::Ready;
        }
        Ok(())
    }

    /// 单次信号投递
    ///
    /// 每条陷阱返回路径恰好调用一次。取编号最小的可投递信号，
    /// 清其待决位后释放锁再执行动作，一次最多处理一个信号，
    /// 保证信号风暴下的返回延迟有界。
    ///
    /// 动作依次为：
    /// - `SIGKILL`：标记被杀死，终结性动作
    /// - `SIGSTOP`：运行中的进程睡到保留通道上
    /// - `SIGCONT`：只唤醒睡在保留通道上的进程
    /// - 其余查动作表：忽略；默认（`SIGCHLD`/`SIGCONT`/`SIGWINCH`
    ///   为空操作，其余标记被杀死）；用户处理函数则在无在途注入
    ///   时改写陷阱上下文
    pub fn dispatch_once(&self) {
        let mut inner = self.inner_exclusive_access();
        let Some(sig) = inner.signal.take_lowest_deliverable() else {
            return;
        };
        let disposition = inner.signal.disposition(sig);
        drop(inner);

        match sig {
            SIGKILL => self.mark_killed(sig),
            SIGSTOP => {
                let mut inner = self.inner_exclusive_access();
                if inner.status == ProcessStatus::Running {
                    inner.status = ProcessStatus::Sleeping {
                        channel: SIGNAL_STOP_CHANNEL,
                    };
                }
            }
            SIGCONT => {
                let mut inner = self.inner_exclusive_access();
                if let ProcessStatus::Sleeping { channel } = inner.status {
                    if channel == SIGNAL_STOP_CHANNEL {
                        inner.status = ProcessStatus::Ready;
                    }
                }
            }
            _ => match disposition {
                SignalDisposition::Ignore => {}
                SignalDisposition::Default => {
                    if !matches!(sig, SIGCHLD | SIGWINCH) {
                        self.mark_killed(sig);
                    }
                }
                SignalDisposition::Handler(handler) => {
                    let mut inner = self.inner_exclusive_access();
                    if inner.trap_cx.handler_return == HandlerReturn::Normal {
                        let saved = inner.trap_cx.sepc;
                        inner.trap_cx.handler_return = HandlerReturn::InHandler(saved);
                        inner.trap_cx.sepc = handler;
                        inner.trap_cx.x[10] = sig;
                    }
                }
            },
        }
    }

    fn mark_killed(&self, sig: usize) {
        let mut inner = self.inner_exclusive_access();
        inner.killed = true;
        inner.exit_code = -(sig as i32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::signal::{SIGINT, SIGTERM, SIGUSR1};

    fn running_process() -> Arc<ProcessControlBlock> {
        let p = ProcessControlBlock::new(0x1000, 0x8000, 0);
        p.inner_exclusive_access().status = ProcessStatus::Running;
        p
    }

    #[test]
    fn raise_wakes_sleeping_target() {
        let p = ProcessControlBlock::new(0x1000, 0x8000, 0);
        p.inner_exclusive_access().status = ProcessStatus::Sleeping { channel: 42 };
        p.raise(SIGUSR1).unwrap();
        let inner = p.inner_exclusive_access();
        assert_eq!(inner.status, ProcessStatus::Ready);
        assert!(inner.signal.is_pending(SIGUSR1));
    }

    #[test]
    fn raise_rejects_bad_signal() {
        let p = running_process();
        assert_eq!(p.raise(0), Err(SignalError::BadSignal));
        assert_eq!(p.raise(999), Err(SignalError::BadSignal));
    }

    #[test]
    fn sigkill_marks_killed() {
        let p = running_process();
        p.raise(SIGKILL).unwrap();
        p.dispatch_once();
        let inner = p.inner_exclusive_access();
        assert!(inner.killed);
        assert_eq!(inner.exit_code, -9);
    }

    #[test]
    fn stop_then_cont_round_trip_preserves_trapframe() {
        let p = running_process();
        {
            let mut inner = p.inner_exclusive_access();
            inner.trap_cx.sepc = 0x4242;
            inner.trap_cx.x[10] = 0x99;
        }
        p.raise(SIGSTOP).unwrap();
        p.dispatch_once();
        assert_eq!(
            p.inner_exclusive_access().status,
            ProcessStatus::Sleeping {
                channel: SIGNAL_STOP_CHANNEL
            }
        );

        // SIGCONT 的投递本身会把目标唤醒
        p.raise(SIGCONT).unwrap();
        assert_eq!(p.inner_exclusive_access().status, ProcessStatus::Ready);
        p.dispatch_once();
        let inner = p.inner_exclusive_access();
        assert!(!inner.killed);
        assert_eq!(inner.trap_cx.sepc, 0x4242);
        assert_eq!(inner.trap_cx.x[10], 0x99);
    }

    #[test]
    fn cont_does_not_wake_io_sleep_channel() {
        let p = ProcessControlBlock::new(0x1000, 0x8000, 0);
        p.inner_exclusive_access().status = ProcessStatus::Sleeping { channel: 0xdead };
        {
            // 直接置待决位，绕过 raise 的唤醒语义，单测 SIGCONT 动作
            let mut inner = p.inner_exclusive_access();
            inner.signal.set_pending(SIGCONT);
        }
        p.dispatch_once();
        assert_eq!(
            p.inner_exclusive_access().status,
            ProcessStatus::Sleeping { channel: 0xdead }
        );
    }

    #[test]
    fn default_action_kills_except_benign() {
        let p = running_process();
        p.raise(SIGCHLD).unwrap();
        p.dispatch_once();
        assert!(!p.inner_exclusive_access().killed);

        p.raise(SIGWINCH).unwrap();
        p.dispatch_once();
        assert!(!p.inner_exclusive_access().killed);

        p.raise(SIGTERM).unwrap();
        p.dispatch_once();
        let inner = p.inner_exclusive_access();
        assert!(inner.killed);
        assert_eq!(inner.exit_code, -(SIGTERM as i32));
    }

    #[test]
    fn ignored_signal_is_consumed_silently() {
        let p = running_process();
        p.inner_exclusive_access()
            .signal
            .register(SIGINT, SignalDisposition::Ignore)
            .unwrap();
        p.raise(SIGINT).unwrap();
        p.dispatch_once();
        let mut inner = p.inner_exclusive_access();
        assert!(!inner.killed);
        assert!(!inner.signal.is_pending(SIGINT));
        assert_eq!(inner.signal.take_lowest_deliverable(), None);
    }

    #[test]
    fn handler_injection_rewrites_pc_and_a0() {
        let p = running_process();
        {
            let mut inner = p.inner_exclusive_access();
            inner.trap_cx.sepc = 0x5000;
            inner
                .signal
                .register(SIGUSR1, SignalDisposition::Handler(0x9000))
                .unwrap();
        }
        p.raise(SIGUSR1).unwrap();
        p.dispatch_once();
        let inner = p.inner_exclusive_access();
        assert_eq!(inner.trap_cx.sepc, 0x9000);
        assert_eq!(inner.trap_cx.x[10], SIGUSR1);
        assert_eq!(inner.trap_cx.handler_return, HandlerReturn::InHandler(0x5000));
    }

    #[test]
    fn at_most_one_handler_in_flight() {
        let p = running_process();
        {
            let mut inner = p.inner_exclusive_access();
            inner.trap_cx.sepc = 0x5000;
            inner
                .signal
                .register(SIGUSR1, SignalDisposition::Handler(0x9000))
                .unwrap();
            inner
                .signal
                .register(SIGTERM, SignalDisposition::Handler(0xa000))
                .unwrap();
        }
        p.raise(SIGUSR1).unwrap();
        p.dispatch_once();
        // 处理函数尚未返回，进程再次陷入并收到第二个信号
        p.raise(SIGTERM).unwrap();
        p.dispatch_once();
        let inner = p.inner_exclusive_access();
        // 保存的返回地址没有被第二次注入覆盖
        assert_eq!(inner.trap_cx.handler_return, HandlerReturn::InHandler(0x5000));
        assert_eq!(inner.trap_cx.sepc, 0x9000);
    }

    #[test]
    fn one_signal_per_dispatch_round() {
        let p = running_process();
        p.inner_exclusive_access()
            .signal
            .register(SIGUSR1, SignalDisposition::Ignore)
            .unwrap();
        p.raise(SIGUSR1).unwrap();
        p.raise(SIGTERM).unwrap();
        p.dispatch_once();
        // 第一轮只消耗编号最小的 SIGUSR1
        let inner = p.inner_exclusive_access();
        assert!(!inner.killed);
        assert!(inner.signal.is_pending(SIGTERM));
        drop(inner);
        p.dispatch_once();
        assert!(p.inner_exclusive_access().killed);
    }

    #[test]
    fn fork_inherits_signal_setup_and_duplicates_vmas() {
        use crate::mm::{MapFlags, MapProt};

        let parent = running_process();
        {
            let mut inner = parent.inner_exclusive_access();
            inner
                .signal
                .register(SIGUSR1, SignalDisposition::Handler(0x9000))
                .unwrap();
            inner.signal.set_blocked_mask(SignalFlags::SIGTERM);
            inner.signal.set_pending(SIGINT);
        }
        parent
            .vmas
            .insert(
                0x40000000,
                0x1000,
                0,
                MapProt::READ | MapProt::WRITE,
                MapFlags::ANONYMOUS | MapFlags::PRIVATE,
                None,
            )
            .unwrap();

        let child = parent.fork();
        assert_ne!(child.getpid(), parent.getpid());
        assert_eq!(child.vmas.count(), 1);
        let inner = child.inner_exclusive_access();
        assert_eq!(inner.status, ProcessStatus::Ready);
        assert_eq!(
            inner.signal.disposition(SIGUSR1),
            SignalDisposition::Handler(0x9000)
        );
        assert_eq!(inner.signal.blocked_mask(), SignalFlags::SIGTERM);
        assert!(!inner.signal.is_pending(SIGINT));
        assert_eq!(inner.trap_cx.x[10], 0);
        drop(inner);

        assert_eq!(
            parent.inner_exclusive_access().children[0].getpid(),
            child.getpid()
        );
        child.exit(0);
        parent.exit(0);
    }

    #[test]
    fn exit_releases_vmas_and_unregisters_pid() {
        use crate::mm::{MapFlags, MapProt};

        let p = running_process();
        p.vmas
            .insert(
                0x40000000,
                0x1000,
                0,
                MapProt::READ,
                MapFlags::ANONYMOUS | MapFlags::PRIVATE,
                None,
            )
            .unwrap();
        let pid = p.getpid();
        assert!(pid2process(pid).is_some());
        p.exit(-1);
        assert_eq!(p.vmas.count(), 0);
        assert!(pid2process(pid).is_none());
        let inner = p.inner_exclusive_access();
        assert_eq!(inner.status, ProcessStatus::Zombie);
        assert_eq!(inner.exit_code, -1);
    }
}
