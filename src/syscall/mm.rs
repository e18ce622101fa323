//! # 内存映射相关系统调用
//!
//! 实现 `mmap`/`munmap`/`sbrk`。三者都只登记意图：物理页帧一律
//! 推迟到首次访问缺页时再分配（参见
//! [`handle_page_fault`](crate::mm::handle_page_fault)）。

use crate::config::{MAXUVA, page_round_down, page_round_up};
use crate::fs::File;
use crate::mm::{MapFlags, MapProt, PageTable, VPNRange, VirtAddr};
use crate::process::ProcessControlBlock;
use alloc::sync::Arc;
use log::debug;

/// 系统调用：建立内存映射
///
/// 实现 `mmap(2)` 的子集。校验通过后仅在 VMA 注册表中登记区域，
/// 页面按需到位。
///
/// ## Arguments
///
/// * `addr` - 期望地址；`MAP_FIXED` 时必须使用（按页对齐后），
///   否则作为空闲区间搜索的提示
/// * `len` - 映射长度（字节）
/// * `prot` - `PROT_READ`/`PROT_WRITE`/`PROT_EXEC` 组合
/// * `flags` - `MAP_SHARED`/`MAP_PRIVATE`/`MAP_FIXED`/`MAP_ANONYMOUS`
/// * `fd` - 文件映射的描述符，匿名映射传 -1
/// * `offset` - 文件偏移量
///
/// ## Returns
///
/// 成功返回映射的起始地址；任何校验失败返回 -1。
/// 失败发生在文件引用已复制之后时，该引用随之释放。
pub fn sys_mmap(
    process: &Arc<ProcessControlBlock>,
    addr: usize,
    len: usize,
    prot: u32,
    flags: u32,
    fd: isize,
    offset: usize,
) -> isize {
    if len == 0 || len >= MAXUVA {
        return -1;
    }
    let prot = MapProt::from_bits_truncate(prot);
    let flags = MapFlags::from_bits_truncate(flags);
    if flags.contains(MapFlags::SHARED) && flags.contains(MapFlags::PRIVATE) {
        return -1;
    }

    // 文件映射先复制一份引用，所有权从这里一路移交给区域记录
    let file: Option<Arc<dyn File + Send + Sync>> = if flags.contains(MapFlags::ANONYMOUS) {
        None
    } else {
        if fd < 0 {
            return -1;
        }
        let inner = process.inner_exclusive_access();
        match inner.fd_table.get(fd as usize) {
            Some(Some(f)) => Some(Arc::clone(f)),
            _ => return -1,
        }
    };

    let target = if flags.contains(MapFlags::FIXED) {
        if addr == 0 || addr >= MAXUVA {
            return -1;
        }
        page_round_down(addr)
    } else {
        match process.vmas.find_free_range(addr, len) {
            Some(va) => va.0,
            None => return -1,
        }
    };

    match process.vmas.insert(target, len, offset, prot, flags, file) {
        Ok(base) => base.0 as isize,
        Err(err) => {
            debug!("[kernel] mmap at {:#x} rejected: {:?}", target, err);
            -1
        }
    }
}

/// 系统调用：解除内存映射
///
/// 页表区间无条件解除（对空洞安全），注册表只移除被请求区间
/// 完全覆盖的区域记录；部分覆盖的区域记录保持原样，其页面在
/// 请求区间内的部分已不再映射。
pub fn sys_munmap(
    process: &Arc<ProcessControlBlock>,
    page_table: &mut dyn PageTable,
    addr: usize,
    len: usize,
) -> isize {
    if addr == 0 || len == 0 {
        return -1;
    }
    if process.vmas.lookup(addr).is_none() {
        return -1;
    }
    let start = page_round_down(addr);
    let end = page_round_up(addr + len);
    page_table.unmap_range(VPNRange::new(VirtAddr(start).floor(), VirtAddr(end).floor()));
    process.vmas.remove(start, end - start);
    0
}

/// 系统调用：调整堆断点
///
/// 增长只抬高进程记录的断点，页面由堆缺页路径按需补齐；
/// 收缩立即解除被释放区间的页表映射并压低断点。
///
/// ## Returns
///
/// 成功返回调整前的断点；越过用户地址上界或降到负值返回 -1。
pub fn sys_sbrk(
    process: &Arc<ProcessControlBlock>,
    page_table: &mut dyn PageTable,
    delta: isize,
) -> isize {
    let mut inner = process.inner_exclusive_access();
    let old = inner.size;
    let Some(new) = (old as isize).checked_add(delta) else {
        return -1;
    };
    if new < 0 {
        return -1;
    }
    let new = new as usize;
    if delta >= 0 {
        if new >= MAXUVA {
            return -1;
        }
    } else {
        page_table.unmap_range(VPNRange::new(
            VirtAddr(page_round_up(new)).floor(),
            VirtAddr(page_round_up(old)).floor(),
        ));
    }
    inner.size = new;
    old as isize
}
