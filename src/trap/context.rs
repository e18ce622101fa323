//! # 陷阱上下文模块
//!
//! 保存用户程序陷入内核时的寄存器现场。跳板页与内核栈指针等
//! 恢复路径细节由嵌入内核的汇编层维护，这里只保留信号注入与
//! 系统调用需要读写的部分。

/// 注入的用户态信号处理函数状态
///
/// "正处于注入的处理函数中"以显式的带数据枚举表示：
/// [`InHandler`](HandlerReturn::InHandler) 保存进入处理函数前的
/// 程序计数器。同一时刻最多一个处理函数在途，这一不变式由
/// 类型本身承载（单槽位，无处存放第二个返回地址）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerReturn {
    /// 正常执行流
    Normal,
    /// 正在执行注入的处理函数，保存被打断时的 `sepc`
    InHandler(usize),
}

/// 陷阱上下文
///
/// 通用寄存器按 RISC-V 编号保存：`x[10]` 即 `a0`，`x[17]` 即 `a7`。
#[repr(C)]
#[derive(Debug, Clone)]
pub struct TrapContext {
    /// 通用寄存器 x0 ~ x31
    pub x: [usize; 32],
    /// 陷入时的用户程序计数器
    pub sepc: usize,
    /// 信号处理函数注入标记
    pub handler_return: HandlerReturn,
}

impl TrapContext {
    /// 构造应用初始上下文
    ///
    /// ## Arguments
    ///
    /// * `entry` - 用户程序入口地址
    /// * `sp` - 用户栈指针
    pub fn app_init_context(entry: usize, sp: usize) -> Self {
        let mut cx = Self {
            x: [0; 32],
            sepc: entry,
            handler_return: HandlerReturn::Normal,
        };
        cx.set_sp(sp);
        cx
    }

    /// 设置栈指针（x2）
    pub fn set_sp(&mut self, sp: usize) {
        self.x[2] = sp;
    }

    /// 系统调用号（a7）
    pub fn syscall_id(&self) -> usize {
        self.x[17]
    }

    /// 系统调用参数（a0 ~ a5）
    pub fn syscall_args(&self) -> [usize; 6] {
        [
            self.x[10], self.x[11], self.x[12], self.x[13], self.x[14], self.x[15],
        ]
    }

    /// 写系统调用返回值（a0）
    pub fn set_syscall_ret(&mut self, ret: isize) {
        self.x[10] = ret as usize;
    }
}
