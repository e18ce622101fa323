//! # 文件对象接口模块
//!
//! 定义内存映射文件所依赖的文件对象接口。打开文件表、目录与
//! 磁盘布局均属于嵌入内核；本库只以 `Arc<dyn File>` 的形式持有
//! 文件引用，引用计数的复制与释放完全由 [`Arc`](alloc::sync::Arc)
//! 的所有权语义承担：
//!
//! - `mmap` 在插入区域前克隆一份引用（对应打开文件表的 `dup`）
//! - 区域销毁（`munmap` 完全覆盖、进程退出、插入失败回滚）时
//!   随区域记录的丢弃恰好释放一次

/// 文件对象接口
///
/// 文件映射的合法性检查与未来的按需读取都经由该接口。
pub trait File: Send + Sync {
    /// 文件是否可读
    fn readable(&self) -> bool;
    /// 文件是否可写
    fn writable(&self) -> bool;
}
