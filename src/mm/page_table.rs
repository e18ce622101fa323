//! # 页表接口模块
//!
//! 定义本库消费的页表原语接口。页表的多级结构、物理页帧分配与
//! TLB 刷新均由嵌入内核实现；缺页处理与 `munmap` 只通过
//! [`PageTable`] 特征操作它们。
//!
//! ## 接口约定
//!
//! - 映射总是"按需 + 清零"：[`PageTable::map_zeroed`] 一步完成
//!   帧分配、清零与建立映射，分配失败以 [`FrameAllocError`] 报告
//! - [`PageTable::unmap_range`] 对区间内未映射的页（空洞）必须
//!   静默跳过，`munmap` 与 `sbrk` 收缩都依赖这一点
//! - 写时复制位是页表项中的软件保留位，仅通过
//!   [`PageTable::is_cow`] / [`PageTable::repair_cow`] 读写

use super::address::{VPNRange, VirtPageNum};
use bitflags::bitflags;

bitflags! {
    /// 页表项标志位
    ///
    /// 低 8 位与 RISC-V Sv39 页表项标志一致，`COW` 使用
    /// 软件保留位（RSW），硬件不解释其含义。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PTEFlags: u16 {
        /// 有效位
        const V = 1 << 0;
        /// 可读
        const R = 1 << 1;
        /// 可写
        const W = 1 << 2;
        /// 可执行
        const X = 1 << 3;
        /// 用户态可访问
        const U = 1 << 4;
        /// 全局映射
        const G = 1 << 5;
        /// 已访问
        const A = 1 << 6;
        /// 已修改
        const D = 1 << 7;
        /// 写时复制（软件保留位）
        const COW = 1 << 8;
    }
}

/// 物理页帧分配失败
///
/// 同步发生在缺页处理内部时等同于不可修复的缺页，
/// 调用方会将进程标记为被杀死。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameAllocError;

/// 页表原语接口
///
/// 每个进程的地址空间由嵌入内核持有；陷阱处理路径在当前进程
/// 自己的内核栈上调用这些方法，因此实现无需额外加锁。
pub trait PageTable {
    /// 查询页表项标志
    ///
    /// ## Returns
    ///
    /// 页已映射时返回其标志位，否则返回 `None`。
    fn walk_entry(&self, vpn: VirtPageNum) -> Option<PTEFlags>;

    /// 在 `vpn` 处按需映射一个清零页帧
    ///
    /// ## Arguments
    ///
    /// * `vpn` - 目标虚拟页号，调用方保证尚未映射
    /// * `flags` - 最终写入页表项的标志位（实现方负责补上有效位）
    ///
    /// ## Errors
    ///
    /// 物理页帧耗尽时返回 [`FrameAllocError`]，不得留下半建立的映射。
    fn map_zeroed(&mut self, vpn: VirtPageNum, flags: PTEFlags) -> Result<(), FrameAllocError>;

    /// 解除区间内所有已映射页，未映射的页静默跳过
    fn unmap_range(&mut self, range: VPNRange);

    /// 该页是否被标记为写时复制
    fn is_cow(&self, vpn: VirtPageNum) -> bool;

    /// 写时复制修复
    ///
    /// 分配私有页帧、拷贝原页内容、以可写权限重建映射并清除
    /// 写时复制位。
    ///
    /// ## Errors
    ///
    /// 物理页帧耗尽时返回 [`FrameAllocError`]，原映射保持不变。
    fn repair_cow(&mut self, vpn: VirtPageNum) -> Result<(), FrameAllocError>;
}
