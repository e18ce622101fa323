//! # 时钟滴答模块
//!
//! 维护全局滴答计数。时钟中断的编程（`sbi_set_timer`）由嵌入
//! 内核完成，陷阱分发器在每次时钟中断时调用 [`tick`]。
//! 计数器由专属的锁串行化，时钟中断处理只为自增而短暂持锁。

use lazy_static::lazy_static;
use spin::Mutex;

lazy_static! {
    /// 全局滴答计数器及其锁
    static ref TICKS: Mutex<u64> = Mutex::new(0);
}

/// 滴答一次，返回新的计数值
pub fn tick() -> u64 {
    let mut ticks = TICKS.lock();
    *ticks += 1;
    *ticks
}

/// 读取当前滴答计数
pub fn ticks() -> u64 {
    *TICKS.lock()
}
