//! # 内存管理模块
//!
//! 汇集虚拟地址类型、页表原语接口、VMA 注册表与缺页裁决逻辑。
//! 页表的具体实现与物理页帧分配器由嵌入内核提供（参见
//! [`PageTable`]），本模块只负责策略：哪里该有页、页该带什么
//! 权限、什么时候复制。

mod address;
mod fault;
mod page_table;
mod vma;

#[cfg(test)]
pub(crate) mod mock;

pub use address::{SimpleRange, SimpleRangeIterator, StepByOne, VPNRange, VirtAddr, VirtPageNum};
pub use fault::{FaultAccess, FaultError, FaultResolution, handle_page_fault};
pub use page_table::{FrameAllocError, PTEFlags, PageTable};
pub use vma::{AreaInfo, MapFlags, MapProt, VirtMemArea, VmaError, VmaRegistry};
