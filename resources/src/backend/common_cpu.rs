use super::{host_copy, Backend, Blob, RawMem};
use crate::{alloc_failed, bad_parameter, free_failed, DeviceType, Error};
use std::ptr::null_mut;

/// 主机 CPU 后端，只有一个设备。
#[derive(Clone, Copy, Default, Debug)]
pub struct Cpu;

impl Cpu {
    #[inline]
    fn check_device(device: usize) -> Result<(), Error> {
        if device == 0 {
            Ok(())
        } else {
            Err(bad_parameter(format!("cpu has no device {device}")))
        }
    }
}

impl Backend for Cpu {
    #[inline]
    fn device_type(&self) -> DeviceType {
        DeviceType::Cpu
    }

    #[inline]
    fn device_count(&self) -> usize {
        1
    }

    fn malloc(&self, device: usize, size: usize) -> Result<RawMem, Error> {
        Self::check_device(device)?;
        Blob::new(size)
            .map(RawMem::Host)
            .ok_or_else(|| alloc_failed(format!("host malloc of {size} bytes failed")))
    }

    #[allow(unreachable_patterns)]
    fn free(&self, mem: RawMem) -> Result<(), Error> {
        match mem {
            RawMem::Host(blob) => {
                drop(blob);
                Ok(())
            }
            _ => Err(free_failed("memory not allocated on host")),
        }
    }

    #[inline]
    #[allow(unreachable_patterns)]
    fn address(&self, mem: &RawMem) -> *mut u8 {
        match mem {
            RawMem::Host(blob) => blob.as_mut_ptr(),
            _ => null_mut(),
        }
    }

    fn copy_from_host(&self, device: usize, dst: *mut u8, src: &[u8]) -> Result<(), Error> {
        Self::check_device(device)?;
        host_copy(dst, src.as_ptr(), src.len());
        Ok(())
    }

    fn copy_to_host(&self, device: usize, dst: &mut [u8], src: *const u8) -> Result<(), Error> {
        Self::check_device(device)?;
        host_copy(dst.as_mut_ptr(), src, dst.len());
        Ok(())
    }
}

#[test]
fn test_cpu() {
    use crate::ErrorKind;

    let cpu = Cpu;
    assert_eq!(cpu.device_type(), DeviceType::Cpu);
    assert_eq!(
        cpu.malloc(1, 16).err().map(|e| e.kind),
        Some(ErrorKind::BadParameter)
    );
    assert_eq!(
        cpu.malloc(0, usize::MAX).err().map(|e| e.kind),
        Some(ErrorKind::AllocFailed)
    );

    let mem = cpu.malloc(0, 16).unwrap();
    let ptr = cpu.address(&mem);
    cpu.copy_from_host(0, ptr, &[1, 2, 3, 4]).unwrap();
    let mut back = [0u8; 4];
    cpu.copy_to_host(0, &mut back, ptr).unwrap();
    assert_eq!(back, [1, 2, 3, 4]);
    assert!(cpu.create_queue(0, false).unwrap().is_none());
    cpu.free(mem).unwrap();
}
