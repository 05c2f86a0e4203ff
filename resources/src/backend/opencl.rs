use super::{Backend, RawMem, RawQueue};
use crate::{bad_parameter, free_failed, DeviceType, Error};
use clrt::{Context, Platform, SvmBlob};
use std::ptr::null_mut;

/// OpenCL 后端，所有平台上的设备按发现顺序编号。
pub struct ClDevice {
    contexts: Vec<Context>,
}

/// 共享虚拟存储块。
pub struct SvmBuf {
    ptr: *mut u8,
    blob: SvmBlob,
}

unsafe impl Send for ClDevice {}
unsafe impl Sync for ClDevice {}
unsafe impl Send for SvmBuf {}
unsafe impl Sync for SvmBuf {}

impl SvmBuf {
    #[inline]
    pub fn len(&self) -> usize {
        self.blob.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClDevice {
    pub fn init() -> Option<Self> {
        let contexts = Platform::all()
            .into_iter()
            .flat_map(|platform| platform.devices())
            .map(|device| device.context())
            .collect::<Vec<_>>();
        if contexts.is_empty() {
            None
        } else {
            log::debug!("opencl backend with {} device(s)", contexts.len());
            Some(Self { contexts })
        }
    }

    fn context(&self, device: usize) -> Result<&Context, Error> {
        self.contexts
            .get(device)
            .ok_or_else(|| bad_parameter(format!("opencl device {device} not found")))
    }
}

impl Backend for ClDevice {
    #[inline]
    fn device_type(&self) -> DeviceType {
        DeviceType::OpenCl
    }

    #[inline]
    fn device_count(&self) -> usize {
        self.contexts.len()
    }

    fn malloc(&self, device: usize, size: usize) -> Result<RawMem, Error> {
        let blob = self.context(device)?.malloc::<u8>(size);
        let ptr = blob.as_ptr().cast_mut().cast();
        Ok(RawMem::Cl(SvmBuf { ptr, blob }))
    }

    #[allow(unreachable_patterns)]
    fn free(&self, mem: RawMem) -> Result<(), Error> {
        match mem {
            RawMem::Cl(SvmBuf { blob, .. }) => {
                drop(blob);
                Ok(())
            }
            _ => Err(free_failed("memory not allocated by opencl")),
        }
    }

    #[inline]
    #[allow(unreachable_patterns)]
    fn address(&self, mem: &RawMem) -> *mut u8 {
        match mem {
            RawMem::Cl(buf) => buf.ptr,
            _ => null_mut(),
        }
    }

    fn copy_from_host(&self, _device: usize, _dst: *mut u8, _src: &[u8]) -> Result<(), Error> {
        Err(bad_parameter("svm memory must be mapped through a command queue"))
    }

    fn copy_to_host(&self, _device: usize, _dst: &mut [u8], _src: *const u8) -> Result<(), Error> {
        Err(bad_parameter("svm memory must be mapped through a command queue"))
    }

    fn create_queue(&self, device: usize, _use_default: bool) -> Result<Option<RawQueue>, Error> {
        Ok(Some(RawQueue::Cl(self.context(device)?.queue())))
    }

    #[allow(unreachable_patterns)]
    fn synchronize(&self, queue: Option<&RawQueue>) -> Result<(), Error> {
        if let Some(RawQueue::Cl(queue)) = queue {
            queue.finish()
        }
        Ok(())
    }
}
