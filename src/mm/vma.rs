//! # 虚拟内存区域（VMA）注册表模块
//!
//! 管理每个进程通过 `mmap` 建立的虚拟内存区域记录，提供地址查找、
//! 不重叠插入、区间移除、空闲区间搜索、fork 复制与进程退出时的
//! 整体清理。
//!
//! ## 核心类型
//!
//! - [`VirtMemArea`] - 单个连续映射区域的记录
//! - [`VmaRegistry`] - 定长槽位（[`MAX_VMA`]）的区域注册表
//! - [`MapProt`] / [`MapFlags`] - `mmap` 的保护位与映射标志
//!
//! ## 不变式
//!
//! - 同一注册表内任意两个存活区域的地址范围互不重叠，
//!   重叠判定采用左闭右开区间比较
//! - 文件映射区域在其整个生命周期内持有对文件对象的一份引用，
//!   且在销毁时恰好释放一次（由 [`Arc`] 的所有权保证）
//! - 所有操作在各自的完整临界区内持有注册表锁
//!
//! ## 边界策略
//!
//! 注册表不支持区域的拆分与合并：`munmap` 只移除被请求区间
//! **完全覆盖**的区域，部分覆盖的区域记录保持原样（其下层页面
//! 由页表层面解除映射）。与现有区域冲突的 `MAP_FIXED` 请求直接
//! 失败，不会挤占已有区域。

use super::address::VirtAddr;
use crate::config::{MAX_VMA, MAXUVA, PAGE_SIZE, page_round_down, page_round_up};
use crate::fs::File;
use alloc::sync::Arc;
use bitflags::bitflags;
use spin::Mutex;

bitflags! {
    /// `mmap` 保护标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapProt: u32 {
        /// 页可读
        const READ = 0x1;
        /// 页可写
        const WRITE = 0x2;
        /// 页可执行
        const EXEC = 0x4;
    }
}

bitflags! {
    /// `mmap` 映射标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// 共享映射
        const SHARED = 0x01;
        /// 私有映射（写时复制）
        const PRIVATE = 0x02;
        /// 强制使用给定地址，不作为提示解释
        const FIXED = 0x04;
        /// 匿名映射，不关联文件
        const ANONYMOUS = 0x08;
    }
}

/// 虚拟内存区域
///
/// 描述进程地址空间中一段连续的映射区间及其访问规则。
/// 文件映射区域独占地持有一份文件引用，区域销毁时随之释放。
pub struct VirtMemArea {
    /// 起始虚拟地址（页对齐）
    base: VirtAddr,
    /// 区域长度（字节，页对齐且非零）
    len: usize,
    /// 文件偏移量（文件映射使用）
    offset: usize,
    /// 保护标志
    prot: MapProt,
    /// 映射标志
    flags: MapFlags,
    /// 关联的文件（`None` 表示匿名映射）
    file: Option<Arc<dyn File + Send + Sync>>,
}

impl VirtMemArea {
    fn end(&self) -> usize {
        self.base.0 + self.len
    }

    fn contains(&self, addr: usize) -> bool {
        addr >= self.base.0 && addr < self.end()
    }

    /// 与 `[start, end)` 是否重叠（左闭右开比较）
    fn overlaps(&self, start: usize, end: usize) -> bool {
        !(start >= self.end() || end <= self.base.0)
    }

    /// 为 fork 复制出一份独立记录
    ///
    /// 文件引用重新计数，复制出的区域是独立的所有者。
    fn duplicate(&self) -> Self {
        Self {
            base: self.base,
            len: self.len,
            offset: self.offset,
            prot: self.prot,
            flags: self.flags,
            file: self.file.as_ref().map(Arc::clone),
        }
    }
}

/// 区域元数据快照
///
/// [`VmaRegistry::lookup`] 的返回值。不携带文件引用，
/// 避免查找操作扰动文件对象的引用计数。
#[derive(Debug, Clone, Copy)]
pub struct AreaInfo {
    pub base: VirtAddr,
    pub len: usize,
    pub offset: usize,
    pub prot: MapProt,
    pub flags: MapFlags,
}

/// 注册表操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmaError {
    /// 长度为零
    BadLength,
    /// 与存活区域的地址范围重叠
    Overlap,
    /// 没有空闲槽位
    NoSlot,
}

struct RegistryInner {
    slots: [Option<VirtMemArea>; MAX_VMA],
    count: usize,
}

/// 虚拟内存区域注册表
///
/// 每个进程一份，内部以单把锁保护定长槽位数组与存活计数。
/// 槽位的占用状态即区域的存活状态。
pub struct VmaRegistry {
    inner: Mutex<RegistryInner>,
}

impl VmaRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                slots: core::array::from_fn(|_| None),
                count: 0,
            }),
        }
    }

    /// 插入一个新区域
    ///
    /// 起始地址向下、长度向上对齐到页边界后检查重叠并占用空闲槽位。
    /// 文件引用的所有权随调用转移：插入成功后由区域持有，任一失败
    /// 路径上随 `file` 参数的丢弃而释放。
    ///
    /// ## Arguments
    ///
    /// * `addr` - 起始虚拟地址
    /// * `len` - 长度（字节），零长度请求被拒绝
    /// * `offset` - 文件偏移量
    /// * `prot` - 保护标志
    /// * `flags` - 映射标志
    /// * `file` - 关联的文件引用（匿名映射传 `None`）
    ///
    /// ## Returns
    ///
    /// 成功时返回对齐后的起始地址。
    pub fn insert(
        &self,
        addr: usize,
        len: usize,
        offset: usize,
        prot: MapProt,
        flags: MapFlags,
        file: Option<Arc<dyn File + Send + Sync>>,
    ) -> Result<VirtAddr, VmaError> {
        if len == 0 {
            return Err(VmaError::BadLength);
        }
        let base = page_round_down(addr);
        let len = page_round_up(len);

        let mut inner = self.inner.lock();
        if inner
            .slots
            .iter()
            .flatten()
            .any(|v| v.overlaps(base, base + len))
        {
            return Err(VmaError::Overlap);
        }
        let slot = inner
            .slots
            .iter_mut()
            .find(|s| s.is_none())
            .ok_or(VmaError::NoSlot)?;
        *slot = Some(VirtMemArea {
            base: VirtAddr(base),
            len,
            offset,
            prot,
            flags,
            file,
        });
        inner.count += 1;
        Ok(VirtAddr(base))
    }

    /// 查找包含指定地址的存活区域
    pub fn lookup(&self, addr: usize) -> Option<AreaInfo> {
        let inner = self.inner.lock();
        inner.slots.iter().flatten().find(|v| v.contains(addr)).map(|v| AreaInfo {
            base: v.base,
            len: v.len,
            offset: v.offset,
            prot: v.prot,
            flags: v.flags,
        })
    }

    /// 移除被 `[addr, addr+len)` 完全覆盖的所有区域
    ///
    /// 部分覆盖的区域保持原样。被移除区域的文件引用随之释放。
    ///
    /// ## Returns
    ///
    /// 实际移除的区域数量。
    pub fn remove(&self, addr: usize, len: usize) -> usize {
        let end = addr + len;
        let mut removed = 0;
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut() {
            let covered = slot
                .as_ref()
                .is_some_and(|v| addr <= v.base.0 && v.end() <= end);
            if covered {
                *slot = None;
                removed += 1;
            }
        }
        inner.count -= removed;
        removed
    }

    /// 搜索一段空闲的虚拟地址区间
    ///
    /// `hint` 非零时先尝试对齐后的提示地址；不可用或未给出提示时，
    /// 从用户地址空间顶端向下首次适配：每遇到冲突区域即跳到其
    /// 起始地址下方继续，直到低于一页的保护下界为止。
    ///
    /// ## Returns
    ///
    /// 找到的起始地址，无可用区间时返回 `None`。
    pub fn find_free_range(&self, hint: usize, len: usize) -> Option<VirtAddr> {
        let len = page_round_up(len);
        if len == 0 || len >= MAXUVA {
            return None;
        }
        let inner = self.inner.lock();

        if hint != 0 {
            let addr = page_round_down(hint);
            let conflict = inner
                .slots
                .iter()
                .flatten()
                .any(|v| v.overlaps(addr, addr + len));
            if !conflict && addr + len < MAXUVA {
                return Some(VirtAddr(addr));
            }
        }

        let mut addr = MAXUVA - len;
        'scan: while addr >= PAGE_SIZE {
            for v in inner.slots.iter().flatten() {
                if v.overlaps(addr, addr + len) {
                    if v.base.0 < len + PAGE_SIZE {
                        break 'scan;
                    }
                    addr = v.base.0 - len;
                    continue 'scan;
                }
            }
            return Some(VirtAddr(addr));
        }
        None
    }

    /// fork 时复制出结构相同的注册表
    ///
    /// 每个文件映射区域的引用重新计数，父子注册表互为独立所有者。
    pub fn duplicate(&self) -> Self {
        let src = self.inner.lock();
        let new = Self::new();
        {
            let mut dst = new.inner.lock();
            for (i, slot) in src.slots.iter().enumerate() {
                dst.slots[i] = slot.as_ref().map(VirtMemArea::duplicate);
            }
            dst.count = src.count;
        }
        new
    }

    /// 进程退出时的整体清理
    ///
    /// 释放所有存活区域持有的文件引用并腾空全部槽位。
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        for slot in inner.slots.iter_mut() {
            *slot = None;
        }
        inner.count = 0;
    }

    /// 当前存活区域数量
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }
}

impl Default for VmaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
