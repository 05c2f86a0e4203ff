//! 后端抽象。
//!
//! 每种后端只通过 [Backend] 这一处间接调用完成分配、释放、拷贝和队列管理，
//! 对象池和描述符不感知具体硬件。

mod blob;
mod common_cpu;
mod reference;

#[cfg(use_cuda)]
mod nvidia_gpu;
#[cfg(use_cl)]
mod opencl;

pub use blob::{Blob, ALIGNMENT};
pub use common_cpu::Cpu;
pub use reference::Reference;

#[cfg(use_cuda)]
pub use nvidia_gpu::{DevBuf, Gpu, GpuQueue};
#[cfg(use_cl)]
pub use opencl::{ClDevice, SvmBuf};

use crate::{DeviceType, Error};
use std::{ptr::copy_nonoverlapping, sync::Arc};

/// 后端分配的原始存储，持有所有权。
pub enum RawMem {
    Host(Blob),
    #[cfg(use_cuda)]
    Cuda(DevBuf),
    #[cfg(use_cl)]
    Cl(SvmBuf),
}

/// 后端的执行队列。主机后端没有独立队列。
pub enum RawQueue {
    #[cfg(use_cuda)]
    Cuda(GpuQueue),
    #[cfg(use_cl)]
    Cl(clrt::CommandQueue),
}

impl RawMem {
    pub fn len(&self) -> usize {
        match self {
            Self::Host(blob) => blob.len(),
            #[cfg(use_cuda)]
            Self::Cuda(buf) => buf.len(),
            #[cfg(use_cl)]
            Self::Cl(buf) => buf.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 算力后端。
///
/// 约定一种设备类型上的存储如何分配、释放和访问。
pub trait Backend: Send + Sync + 'static {
    /// 后端对应的设备类型，写入每个句柄的最高字节。
    fn device_type(&self) -> DeviceType;
    /// 可见设备数量。
    fn device_count(&self) -> usize;

    /// 在 `device` 上分配 `size` 字节。
    fn malloc(&self, device: usize, size: usize) -> Result<RawMem, Error>;
    /// 归还由 [Backend::malloc] 分配的存储。
    fn free(&self, mem: RawMem) -> Result<(), Error>;
    /// 将存储物化为可做偏移运算的地址。
    ///
    /// 这是唯一的地址计算点，视图的偏移只在创建时叠加一次。
    fn address(&self, mem: &RawMem) -> *mut u8;

    fn copy_from_host(&self, device: usize, dst: *mut u8, src: &[u8]) -> Result<(), Error>;
    fn copy_to_host(&self, device: usize, dst: &mut [u8], src: *const u8) -> Result<(), Error>;

    /// 为上下文准备执行队列。`use_default` 时使用设备默认队列。
    #[inline]
    fn create_queue(&self, _device: usize, _use_default: bool) -> Result<Option<RawQueue>, Error> {
        Ok(None)
    }
    #[inline]
    fn synchronize(&self, _queue: Option<&RawQueue>) -> Result<(), Error> {
        Ok(())
    }
    #[inline]
    fn destroy_queue(&self, queue: RawQueue) -> Result<(), Error> {
        drop(queue);
        Ok(())
    }
}

/// 按构建配置选择后端。
pub fn select() -> Arc<dyn Backend> {
    #[cfg(use_cuda)]
    if let Some(gpu) = Gpu::init() {
        return Arc::new(gpu);
    }
    #[cfg(use_cl)]
    if let Some(cl) = ClDevice::init() {
        return Arc::new(cl);
    }
    if cfg!(use_cpu) || !cfg!(use_ref) {
        Arc::new(Cpu)
    } else {
        Arc::new(Reference::new())
    }
}

/// 主机后端共用的拷贝。
#[inline]
pub(crate) fn host_copy(dst: *mut u8, src: *const u8, len: usize) {
    if len > 0 {
        unsafe { copy_nonoverlapping(src, dst, len) }
    }
}

#[test]
fn test_select() {
    let backend = select();
    assert!(backend.device_count() > 0);
    let mem = backend.malloc(0, 64).unwrap();
    assert_eq!(mem.len(), 64);
    assert!(!backend.address(&mem).is_null());
    backend.free(mem).unwrap();
}
