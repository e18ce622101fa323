//! 测试用页表实现
//!
//! 以 `BTreeMap` 模拟单级映射，页帧为共享字节数组，完整模拟
//! 按需分配、权限检查与写时复制（包括 fork 时的共享降权），
//! 使缺页路径的行为可以在宿主机上端到端观察。

use super::address::{VPNRange, VirtAddr, VirtPageNum};
use super::page_table::{FrameAllocError, PTEFlags, PageTable};
use crate::config::PAGE_SIZE;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

type Frame = Arc<Mutex<Vec<u8>>>;

struct MockEntry {
    flags: PTEFlags,
    frame: Frame,
}

/// 模拟的用户访问失败（相当于硬件再次触发缺页）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessFault;

pub struct MockPageTable {
    entries: BTreeMap<VirtPageNum, MockEntry>,
    frame_budget: Option<usize>,
    alloc_count: usize,
}

impl MockPageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            frame_budget: None,
            alloc_count: 0,
        }
    }

    /// 限定可分配页帧总数，用于模拟物理内存耗尽
    pub fn with_frame_budget(budget: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            frame_budget: Some(budget),
            alloc_count: 0,
        }
    }

    /// 累计分配过的页帧数
    pub fn alloc_count(&self) -> usize {
        self.alloc_count
    }

    fn alloc_frame(&mut self) -> Result<Frame, FrameAllocError> {
        if let Some(budget) = self.frame_budget {
            if self.alloc_count >= budget {
                return Err(FrameAllocError);
            }
        }
        self.alloc_count += 1;
        Ok(Arc::new(Mutex::new(vec![0u8; PAGE_SIZE])))
    }

    /// 模拟用户态读一个字
    pub fn read_word(&self, va: VirtAddr) -> Result<u32, AccessFault> {
        let entry = self.entries.get(&va.floor()).ok_or(AccessFault)?;
        if !entry.flags.contains(PTEFlags::R | PTEFlags::U) {
            return Err(AccessFault);
        }
        let frame = entry.frame.lock();
        let off = va.page_offset();
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&frame[off..off + 4]);
        Ok(u32::from_le_bytes(bytes))
    }

    /// 模拟用户态写一个字
    pub fn write_word(&mut self, va: VirtAddr, val: u32) -> Result<(), AccessFault> {
        let entry = self.entries.get(&va.floor()).ok_or(AccessFault)?;
        if !entry.flags.contains(PTEFlags::W | PTEFlags::U) {
            return Err(AccessFault);
        }
        let mut frame = entry.frame.lock();
        let off = va.page_offset();
        frame[off..off + 4].copy_from_slice(&val.to_le_bytes());
        Ok(())
    }

    /// 模拟用户态存储指令：失败则走缺页修复并重试
    ///
    /// 硬件上修复后的重试由陷阱返回自动完成，这里以有限次循环模拟。
    pub fn user_store(
        &mut self,
        vmas: &crate::mm::VmaRegistry,
        heap_size: usize,
        va: VirtAddr,
        val: u32,
    ) -> Result<(), crate::mm::FaultError> {
        for _ in 0..3 {
            if self.write_word(va, val).is_ok() {
                return Ok(());
            }
            crate::mm::handle_page_fault(self, vmas, heap_size, va, crate::mm::FaultAccess::Store)?;
        }
        panic!("store at {:?} still faulting after repair", va);
    }

    /// 模拟用户态加载指令：失败则走缺页修复并重试
    pub fn user_load(
        &mut self,
        vmas: &crate::mm::VmaRegistry,
        heap_size: usize,
        va: VirtAddr,
    ) -> Result<u32, crate::mm::FaultError> {
        for _ in 0..3 {
            if let Ok(val) = self.read_word(va) {
                return Ok(val);
            }
            crate::mm::handle_page_fault(self, vmas, heap_size, va, crate::mm::FaultAccess::Load)?;
        }
        panic!("load at {:?} still faulting after repair", va);
    }

    /// 模拟 fork 时的地址空间复制
    ///
    /// 所有可写映射在父子两侧同时降为只读并打上写时复制位，
    /// 页帧共享；只读映射原样共享。
    pub fn fork_cow(&mut self) -> MockPageTable {
        let mut child = MockPageTable {
            entries: BTreeMap::new(),
            frame_budget: self.frame_budget,
            alloc_count: 0,
        };
        for (vpn, entry) in self.entries.iter_mut() {
            if entry.flags.contains(PTEFlags::W) {
                entry.flags = (entry.flags - PTEFlags::W) | PTEFlags::COW;
            }
            child.entries.insert(
                *vpn,
                MockEntry {
                    flags: entry.flags,
                    frame: Arc::clone(&entry.frame),
                },
            );
        }
        child
    }
}

impl PageTable for MockPageTable {
    fn walk_entry(&self, vpn: VirtPageNum) -> Option<PTEFlags> {
        self.entries.get(&vpn).map(|e| e.flags)
    }

    fn map_zeroed(&mut self, vpn: VirtPageNum, flags: PTEFlags) -> Result<(), FrameAllocError> {
        debug_assert!(!self.entries.contains_key(&vpn));
        let frame = self.alloc_frame()?;
        self.entries.insert(
            vpn,
            MockEntry {
                flags: flags | PTEFlags::V,
                frame,
            },
        );
        Ok(())
    }

    fn unmap_range(&mut self, range: VPNRange) {
        for vpn in range {
            self.entries.remove(&vpn);
        }
    }

    fn is_cow(&self, vpn: VirtPageNum) -> bool {
        self.entries
            .get(&vpn)
            .is_some_and(|e| e.flags.contains(PTEFlags::COW))
    }

    fn repair_cow(&mut self, vpn: VirtPageNum) -> Result<(), FrameAllocError> {
        let shared = {
            let entry = self.entries.get(&vpn).expect("repair_cow on unmapped page");
            assert!(entry.flags.contains(PTEFlags::COW));
            Arc::strong_count(&entry.frame) > 1
        };
        if shared {
            let copy: Vec<u8> = {
                let entry = self.entries.get(&vpn).unwrap();
                let frame = entry.frame.lock();
                frame.clone()
            };
            let new_frame = self.alloc_frame()?;
            *new_frame.lock() = copy;
            let entry = self.entries.get_mut(&vpn).unwrap();
            entry.frame = new_frame;
            entry.flags = (entry.flags - PTEFlags::COW) | PTEFlags::W;
        } else {
            // 页帧已独占，原地升权即可
            let entry = self.entries.get_mut(&vpn).unwrap();
            entry.flags = (entry.flags - PTEFlags::COW) | PTEFlags::W;
        }
        Ok(())
    }
}
