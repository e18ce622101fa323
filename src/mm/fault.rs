//! # 缺页分类与修复模块
//!
//! 每次用户态缺页陷阱调用一次 [`handle_page_fault`]，在写时复制
//! 修复、VMA 按需分配、堆（sbrk）按需分配与不可修复终止之间裁决。
//!
//! ## 裁决顺序（不可重排）
//!
//! 1. **写时复制检查**（仅写缺页）：写时复制页可能本身源自私有
//!    VMA 映射，因此必须先于 VMA 查找
//! 2. **VMA 按需分配**：命中注册表的地址按区域保护位建立清零页，
//!    私有区域剥夺写权限并打上写时复制位，先于堆增长检查，
//!    避免落在堆范围内的 mmap 区域被堆回退路径遮蔽
//! 3. **堆按需分配**：地址严格低于进程记录的断点且低于用户地址
//!    上界时补一个清零页
//! 4. **不可修复**：交由调用方把进程标记为被杀死；按需分配途中的
//!    页帧耗尽与不可修复缺页同样处理，不留下不一致的中间状态

use super::address::VirtAddr;
use super::page_table::{PTEFlags, PageTable};
use super::vma::{MapFlags, MapProt, VmaRegistry};
use crate::config::MAXUVA;

/// 缺页访问类型
///
/// 由陷阱分发器从 `scause` 解码得到。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAccess {
    /// 读缺页
    Load,
    /// 写缺页
    Store,
    /// 取指缺页
    Fetch,
}

/// 缺页修复的结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// 完成写时复制修复
    CowRepaired,
    /// 在 VMA 区域内完成按需分配
    MappedVma,
    /// 在堆范围内完成按需分配
    MappedHeap,
}

/// 不可修复的缺页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 物理页帧耗尽
    OutOfMemory,
    /// 地址不属于任何可修复的范围
    Unmapped,
}

/// 将区域保护位转换为页表项标志
///
/// 用户态可访问位恒置；私有区域剥夺写权限并改打写时复制位，
/// 使私有映射（无论匿名还是文件映射）统一表现为
/// "首写之前只读"，为任何后续 fork 提供一致的写时复制语义。
fn prot_to_pte_flags(prot: MapProt, flags: MapFlags) -> PTEFlags {
    let mut pte = PTEFlags::U;
    if prot.contains(MapProt::READ) {
        pte |= PTEFlags::R;
    }
    if prot.contains(MapProt::WRITE) {
        pte |= PTEFlags::W;
    }
    if prot.contains(MapProt::EXEC) {
        pte |= PTEFlags::X;
    }
    if flags.contains(MapFlags::PRIVATE) {
        pte = (pte | PTEFlags::COW) - PTEFlags::W;
    }
    pte
}

/// 缺页裁决与修复
///
/// ## Arguments
///
/// * `page_table` - 当前进程的页表原语
/// * `vmas` - 当前进程的 VMA 注册表
/// * `heap_size` - 进程记录的断点（`sbrk` 维护的大小）
/// * `va` - 缺页地址（`stval`）
/// * `access` - 访问类型
///
/// ## Errors
///
/// 返回 [`FaultError`] 时调用方应将进程标记为被杀死；
/// 本函数不留下部分建立的映射。
pub fn handle_page_fault(
    page_table: &mut dyn PageTable,
    vmas: &VmaRegistry,
    heap_size: usize,
    va: VirtAddr,
    access: FaultAccess,
) -> Result<FaultResolution, FaultError> {
    let vpn = va.floor();

    if access == FaultAccess::Store && page_table.is_cow(vpn) {
        page_table
            .repair_cow(vpn)
            .map_err(|_| FaultError::OutOfMemory)?;
        return Ok(FaultResolution::CowRepaired);
    }

    if let Some(area) = vmas.lookup(va.0) {
        let flags = prot_to_pte_flags(area.prot, area.flags);
        page_table
            .map_zeroed(vpn, flags)
            .map_err(|_| FaultError::OutOfMemory)?;
        return Ok(FaultResolution::MappedVma);
    }

    if va.0 < heap_size && va.0 < MAXUVA {
        page_table
            .map_zeroed(vpn, PTEFlags::R | PTEFlags::W | PTEFlags::X | PTEFlags::U)
            .map_err(|_| FaultError::OutOfMemory)?;
        return Ok(FaultResolution::MappedHeap);
    }

    Err(FaultError::Unmapped)
}
