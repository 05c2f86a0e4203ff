use super::{Backend, RawMem, RawQueue};
use crate::{alloc_failed, bad_parameter, free_failed, DeviceType, Error};
use cublas::{Cublas, CublasSpore};
use cuda::{ContextResource, ContextSpore, DevByte, DevMemSpore, Device, StreamSpore};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    ptr::null_mut,
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 英伟达 GPU 后端，每个设备使用其主上下文。
pub struct Gpu {
    contexts: Vec<cuda::Context>,
}

/// 显存块。
pub struct DevBuf {
    device: usize,
    ptr: *mut u8,
    len: usize,
    spore: DevMemSpore,
}

/// 上下文的执行队列和绑定在队列上的 cublas 句柄。
pub struct GpuQueue {
    device: usize,
    stream: Option<StreamSpore>,
    cublas: CublasSpore,
}

unsafe impl Send for Gpu {}
unsafe impl Sync for Gpu {}
unsafe impl Send for DevBuf {}
unsafe impl Sync for DevBuf {}
unsafe impl Send for GpuQueue {}
unsafe impl Sync for GpuQueue {}

impl DevBuf {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Gpu {
    pub fn init() -> Option<Self> {
        if let Err(cuda::NoDevice) = cuda::init() {
            return None;
        }
        let contexts = (0..Device::count())
            .map(|i| Device::new(i as _).retain_primary())
            .collect::<Vec<_>>();
        if contexts.is_empty() {
            None
        } else {
            log::debug!("cuda backend with {} device(s)", contexts.len());
            Some(Self { contexts })
        }
    }

    fn context(&self, device: usize) -> Result<&cuda::Context, Error> {
        self.contexts
            .get(device)
            .ok_or_else(|| bad_parameter(format!("cuda device {device} not found")))
    }
}

impl Backend for Gpu {
    #[inline]
    fn device_type(&self) -> DeviceType {
        DeviceType::Cuda
    }

    #[inline]
    fn device_count(&self) -> usize {
        self.contexts.len()
    }

    fn malloc(&self, device: usize, size: usize) -> Result<RawMem, Error> {
        // 驱动在显存不足时 panic
        let (ptr, spore) = self
            .context(device)?
            .apply(|ctx| {
                catch_unwind(AssertUnwindSafe(|| {
                    let mem = ctx.malloc::<u8>(size);
                    (mem.as_ptr().cast_mut().cast::<u8>(), mem.sporulate())
                }))
            })
            .map_err(|_| alloc_failed(format!("cuda device {device} can't allocate {size} bytes")))?;
        Ok(RawMem::Cuda(DevBuf {
            device,
            ptr,
            len: size,
            spore,
        }))
    }

    #[allow(unreachable_patterns)]
    fn free(&self, mem: RawMem) -> Result<(), Error> {
        match mem {
            RawMem::Cuda(DevBuf { device, spore, .. }) => {
                self.context(device)?
                    .apply(|ctx| drop(spore.sprout(ctx)));
                Ok(())
            }
            _ => Err(free_failed("memory not allocated by cuda")),
        }
    }

    #[inline]
    #[allow(unreachable_patterns)]
    fn address(&self, mem: &RawMem) -> *mut u8 {
        match mem {
            RawMem::Cuda(buf) => buf.ptr,
            _ => null_mut(),
        }
    }

    fn copy_from_host(&self, device: usize, dst: *mut u8, src: &[u8]) -> Result<(), Error> {
        self.context(device)?.apply(|_| {
            let dst = unsafe { from_raw_parts_mut(dst.cast::<DevByte>(), src.len()) };
            cuda::memcpy_h2d(dst, src)
        });
        Ok(())
    }

    fn copy_to_host(&self, device: usize, dst: &mut [u8], src: *const u8) -> Result<(), Error> {
        self.context(device)?.apply(|_| {
            let src = unsafe { from_raw_parts(src.cast::<DevByte>(), dst.len()) };
            cuda::memcpy_d2h(dst, src)
        });
        Ok(())
    }

    fn create_queue(&self, device: usize, use_default: bool) -> Result<Option<RawQueue>, Error> {
        let queue = self.context(device)?.apply(|ctx| {
            let cublas = Cublas::new(ctx);
            let stream = if use_default {
                None
            } else {
                let stream = ctx.stream();
                cublas.set_stream(&stream);
                Some(stream.sporulate())
            };
            GpuQueue {
                device,
                stream,
                cublas: cublas.sporulate(),
            }
        });
        Ok(Some(RawQueue::Cuda(queue)))
    }

    #[allow(unreachable_patterns)]
    fn synchronize(&self, queue: Option<&RawQueue>) -> Result<(), Error> {
        if let Some(RawQueue::Cuda(queue)) = queue {
            self.context(queue.device)?.apply(|ctx| ctx.synchronize());
        }
        Ok(())
    }

    #[allow(unreachable_patterns)]
    fn destroy_queue(&self, queue: RawQueue) -> Result<(), Error> {
        match queue {
            RawQueue::Cuda(GpuQueue {
                device,
                stream,
                cublas,
            }) => {
                self.context(device)?.apply(|ctx| {
                    ctx.synchronize();
                    drop(cublas.sprout(ctx));
                    if let Some(stream) = stream {
                        drop(stream.sprout(ctx))
                    }
                });
                Ok(())
            }
            _ => Err(free_failed("queue not created by cuda")),
        }
    }
}
