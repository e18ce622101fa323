//! # 进程信号模块
//!
//! 提供类 Unix 信号的基础表示与每进程信号状态机。信号集合以
//! 位集合（bitflags）表示，编号 `1..=MAX_SIG` 与传统 Unix 信号
//! 编号保持一致。
//!
//! ## 组成
//!
//! - [`SignalFlags`]：信号位集合类型（位 `1 << signum`）
//! - [`SignalDisposition`]：单个信号的处理动作
//! - [`SignalState`]：待决集合、屏蔽集合与动作表的封装
//!
//! ## 状态机
//!
//! 单个信号由待决位与屏蔽位组合出三种有效状态：空闲、待决、
//! 待决但被屏蔽。只有"待决且未屏蔽"的信号可被投递，投递顺序
//! 取最小编号。`SIGKILL` 与 `SIGSTOP` 永远不能被捕捉或忽略，
//! 该不变式由 [`SignalState::register`] 集中强制，外部无法绕过。

use bitflags::bitflags;

/// 支持的最大信号编号（含）
pub const MAX_SIG: usize = 31;

pub const SIGHUP: usize = 1;
pub const SIGINT: usize = 2;
pub const SIGQUIT: usize = 3;
pub const SIGILL: usize = 4;
pub const SIGTRAP: usize = 5;
pub const SIGABRT: usize = 6;
pub const SIGBUS: usize = 7;
pub const SIGFPE: usize = 8;
pub const SIGKILL: usize = 9;
pub const SIGUSR1: usize = 10;
pub const SIGSEGV: usize = 11;
pub const SIGUSR2: usize = 12;
pub const SIGPIPE: usize = 13;
pub const SIGALRM: usize = 14;
pub const SIGTERM: usize = 15;
pub const SIGCHLD: usize = 17;
pub const SIGCONT: usize = 18;
pub const SIGSTOP: usize = 19;
pub const SIGTSTP: usize = 20;
pub const SIGWINCH: usize = 28;

bitflags! {
    /// 信号位集合
    ///
    /// 每一位对应一个信号，位序即信号编号（`1 << signum`）。
    /// 结合 `insert`/`contains`/`remove` 维护待决集合与屏蔽集合。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SignalFlags: u32 {
        const SIGHUP = 1 << 1;
        const SIGINT = 1 << 2;
        const SIGQUIT = 1 << 3;
        const SIGILL = 1 << 4;
        const SIGTRAP = 1 << 5;
        const SIGABRT = 1 << 6;
        const SIGBUS = 1 << 7;
        const SIGFPE = 1 << 8;
        const SIGKILL = 1 << 9;
        const SIGUSR1 = 1 << 10;
        const SIGSEGV = 1 << 11;
        const SIGUSR2 = 1 << 12;
        const SIGPIPE = 1 << 13;
        const SIGALRM = 1 << 14;
        const SIGTERM = 1 << 15;
        const SIGSTKFLT = 1 << 16;
        const SIGCHLD = 1 << 17;
        const SIGCONT = 1 << 18;
        const SIGSTOP = 1 << 19;
        const SIGTSTP = 1 << 20;
        const SIGTTIN = 1 << 21;
        const SIGTTOU = 1 << 22;
        const SIGURG = 1 << 23;
        const SIGXCPU = 1 << 24;
        const SIGXFSZ = 1 << 25;
        const SIGVTALRM = 1 << 26;
        const SIGPROF = 1 << 27;
        const SIGWINCH = 1 << 28;
        const SIGIO = 1 << 29;
        const SIGPWR = 1 << 30;
        const SIGSYS = 1 << 31;
    }
}

impl SignalFlags {
    /// 由信号编号取位掩码，编号越界返回 `None`
    pub fn from_sig(sig: usize) -> Option<SignalFlags> {
        if (1..=MAX_SIG).contains(&sig) {
            SignalFlags::from_bits(1 << sig)
        } else {
            None
        }
    }
}

/// 单个信号的处理动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDisposition {
    /// 默认动作
    Default,
    /// 忽略
    Ignore,
    /// 用户态处理函数入口地址
    Handler(usize),
}

/// 信号操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalError {
    /// 信号编号越界
    BadSignal,
    /// `SIGKILL`/`SIGSTOP` 不可捕捉、不可忽略
    Uncatchable,
    /// 处理函数地址不在用户地址空间内
    BadHandler,
}

/// 每进程信号状态
///
/// 字段不对外暴露，所有变更通过操作进行，便于集中维护不变式。
/// 由所属进程的锁保护。
#[derive(Clone)]
pub struct SignalState {
    pending: SignalFlags,
    blocked: SignalFlags,
    actions: [SignalDisposition; MAX_SIG + 1],
}

impl SignalState {
    /// 进程创建时的空状态
    pub fn new() -> Self {
        Self {
            pending: SignalFlags::empty(),
            blocked: SignalFlags::empty(),
            actions: [SignalDisposition::Default; MAX_SIG + 1],
        }
    }

    /// fork 时的继承状态
    ///
    /// 动作表与屏蔽集合继承自父进程，待决集合从空开始。
    pub fn inherit(parent: &SignalState) -> Self {
        Self {
            pending: SignalFlags::empty(),
            blocked: parent.blocked,
            actions: parent.actions,
        }
    }

    /// 注册处理动作，返回旧动作
    ///
    /// ## Errors
    ///
    /// - [`SignalError::BadSignal`] - 编号不在 `1..=MAX_SIG`
    /// - [`SignalError::Uncatchable`] - 目标为 `SIGKILL`/`SIGSTOP`
    ///
    /// 失败不改变任何已有状态。
    pub fn register(
        &mut self,
        sig: usize,
        disposition: SignalDisposition,
    ) -> Result<SignalDisposition, SignalError> {
        if !(1..=MAX_SIG).contains(&sig) {
            return Err(SignalError::BadSignal);
        }
        if sig == SIGKILL || sig == SIGSTOP {
            return Err(SignalError::Uncatchable);
        }
        let old = self.actions[sig];
        self.actions[sig] = disposition;
        Ok(old)
    }

    /// 查询处理动作
    pub fn disposition(&self, sig: usize) -> SignalDisposition {
        self.actions[sig]
    }

    /// 置待决位
    pub fn set_pending(&mut self, sig: usize) {
        if let Some(flag) = SignalFlags::from_sig(sig) {
            self.pending.insert(flag);
        }
    }

    /// 信号是否待决（含被屏蔽的）
    pub fn is_pending(&self, sig: usize) -> bool {
        SignalFlags::from_sig(sig).is_some_and(|f| self.pending.contains(f))
    }

    /// 取出编号最小的可投递信号并清除其待决位
    ///
    /// 可投递 = 待决且未被屏蔽。无可投递信号时返回 `None`，
    /// 不改变任何状态。
    pub fn take_lowest_deliverable(&mut self) -> Option<usize> {
        let deliverable = self.pending - self.blocked;
        if deliverable.is_empty() {
            return None;
        }
        let sig = deliverable.bits().trailing_zeros() as usize;
        self.pending -= SignalFlags::from_sig(sig).unwrap();
        Some(sig)
    }

    /// 替换屏蔽集合，返回旧集合
    pub fn set_blocked_mask(&mut self, mask: SignalFlags) -> SignalFlags {
        core::mem::replace(&mut self.blocked, mask)
    }

    /// 当前屏蔽集合
    pub fn blocked_mask(&self) -> SignalFlags {
        self.blocked
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}
