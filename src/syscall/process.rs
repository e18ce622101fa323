//! # 信号相关系统调用
//!
//! 实现 `signal`/`sigkill`/`sigprocmask`。处理函数沿用传统的
//! 整数编码：0 为默认动作（`SIG_DFL`），1 为忽略（`SIG_IGN`），
//! 其余解释为用户态处理函数入口地址；错误一律返回 -1
//! （`SIG_ERR`）。

use crate::config::MAXUVA;
use crate::process::{ProcessControlBlock, SignalDisposition, SignalFlags, pid2process};
use alloc::sync::Arc;

/// 默认动作的编码
pub const SIG_DFL: usize = 0;
/// 忽略动作的编码
pub const SIG_IGN: usize = 1;

fn encode_disposition(disposition: SignalDisposition) -> isize {
    match disposition {
        SignalDisposition::Default => SIG_DFL as isize,
        SignalDisposition::Ignore => SIG_IGN as isize,
        SignalDisposition::Handler(addr) => addr as isize,
    }
}

/// 系统调用：注册信号处理动作
///
/// 实现 `signal(2)`。在进程锁下原子替换动作表表项并返回旧动作。
///
/// ## Arguments
///
/// * `sig` - 信号编号，`1..=31`
/// * `handler` - 动作编码；处理函数地址必须落在用户地址空间内
///
/// ## Returns
///
/// 成功返回旧动作的编码。编号越界、目标为 `SIGKILL`/`SIGSTOP`
/// 或地址畸形时返回 -1，不改变任何已有状态。
pub fn sys_signal(process: &Arc<ProcessControlBlock>, sig: usize, handler: usize) -> isize {
    let disposition = match handler {
        SIG_DFL => SignalDisposition::Default,
        SIG_IGN => SignalDisposition::Ignore,
        addr if addr >= MAXUVA => return -1,
        addr => SignalDisposition::Handler(addr),
    };
    let mut inner = process.inner_exclusive_access();
    match inner.signal.register(sig, disposition) {
        Ok(old) => encode_disposition(old),
        Err(_) => -1,
    }
}

/// 系统调用：向指定进程投递信号
///
/// 实现 `sigkill`。置目标的待决位；睡眠中的目标被转为就绪，
/// 保证信号尽快得到一次投递评估。
///
/// ## Returns
///
/// 成功返回 0；信号编号越界或目标进程不存在返回 -1。
pub fn sys_sigkill(pid: usize, sig: usize) -> isize {
    match pid2process(pid) {
        Some(process) => match process.raise(sig) {
            Ok(()) => 0,
            Err(_) => -1,
        },
        None => -1,
    }
}

/// 系统调用：替换信号屏蔽集合
///
/// ## Returns
///
/// 成功返回旧屏蔽集合的位表示；掩码含非法位时返回 -1。
pub fn sys_sigprocmask(process: &Arc<ProcessControlBlock>, mask: u32) -> isize {
    let mut inner = process.inner_exclusive_access();
    if let Some(flags) = SignalFlags::from_bits(mask) {
        inner.signal.set_blocked_mask(flags).bits() as isize
    } else {
        -1
    }
}
