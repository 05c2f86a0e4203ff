use super::{host_copy, Backend, Blob, RawMem};
use crate::{alloc_failed, bad_parameter, free_failed, DeviceType, Error};
use std::{
    collections::HashMap,
    ptr::null_mut,
    sync::{Mutex, MutexGuard, PoisonError},
};

/// 参考实现后端。
///
/// 存储在主机上分配并清零，同时记录每次分配，可以模拟多个设备和有限容量。
pub struct Reference {
    devices: usize,
    limit: Option<usize>,
    ledger: Mutex<Ledger>,
}

#[derive(Default)]
struct Ledger {
    blocks: HashMap<usize, (usize, usize)>,
    bytes: usize,
}

impl Default for Reference {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Reference {
    #[inline]
    pub fn new() -> Self {
        Self::with_devices(1)
    }

    pub fn with_devices(devices: usize) -> Self {
        assert!(devices > 0 && devices <= u16::MAX as usize);
        Self {
            devices,
            limit: None,
            ledger: Default::default(),
        }
    }

    /// 限制同时存活的字节数，超过时分配失败。
    #[inline]
    pub fn with_limit(self, bytes: usize) -> Self {
        Self {
            limit: Some(bytes),
            ..self
        }
    }

    #[inline]
    pub fn live_bytes(&self) -> usize {
        self.ledger().bytes
    }

    #[inline]
    pub fn live_allocations(&self) -> usize {
        self.ledger().blocks.len()
    }

    /// `device` 上存活的字节数。
    pub fn live_bytes_on(&self, device: usize) -> usize {
        self.ledger()
            .blocks
            .values()
            .filter(|(d, _)| *d == device)
            .map(|(_, size)| size)
            .sum()
    }

    #[inline]
    fn ledger(&self) -> MutexGuard<Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_device(&self, device: usize) -> Result<(), Error> {
        if device < self.devices {
            Ok(())
        } else {
            Err(bad_parameter(format!(
                "reference device {device} out of {}",
                self.devices
            )))
        }
    }
}

impl Backend for Reference {
    #[inline]
    fn device_type(&self) -> DeviceType {
        DeviceType::Reference
    }

    #[inline]
    fn device_count(&self) -> usize {
        self.devices
    }

    fn malloc(&self, device: usize, size: usize) -> Result<RawMem, Error> {
        self.check_device(device)?;
        let mut ledger = self.ledger();
        if let Some(limit) = self.limit {
            if ledger.bytes.saturating_add(size) > limit {
                return Err(alloc_failed(format!(
                    "{size} bytes requested, {} of {limit} in use",
                    ledger.bytes
                )));
            }
        }
        let mut blob =
            Blob::new(size).ok_or_else(|| alloc_failed(format!("malloc {size} bytes failed")))?;
        blob.fill(0);
        ledger.blocks.insert(blob.as_mut_ptr() as usize, (device, size));
        ledger.bytes += size;
        Ok(RawMem::Host(blob))
    }

    #[allow(unreachable_patterns)]
    fn free(&self, mem: RawMem) -> Result<(), Error> {
        let blob = match mem {
            RawMem::Host(blob) => blob,
            _ => return Err(free_failed("memory not allocated on host")),
        };
        let mut ledger = self.ledger();
        match ledger.blocks.remove(&(blob.as_mut_ptr() as usize)) {
            Some((_, size)) => {
                ledger.bytes -= size;
                Ok(())
            }
            None => Err(free_failed(format!(
                "{:p} is not allocated by reference backend",
                blob.as_mut_ptr()
            ))),
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
        self.check_device(device)?;
        host_copy(dst, src.as_ptr(), src.len());
        Ok(())
    }

    fn copy_to_host(&self, device: usize, dst: &mut [u8], src: *const u8) -> Result<(), Error> {
        self.check_device(device)?;
        host_copy(dst.as_mut_ptr(), src, dst.len());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_ledger() {
        let backend = Reference::with_devices(2);
        let a = backend.malloc(0, 100).unwrap();
        let b = backend.malloc(1, 28).unwrap();
        assert_eq!(backend.live_bytes(), 128);
        assert_eq!(backend.live_allocations(), 2);
        assert_eq!(backend.live_bytes_on(1), 28);

        let mut bytes = [0xffu8; 100];
        backend.copy_to_host(0, &mut bytes, backend.address(&a)).unwrap();
        assert!(bytes.iter().all(|&b| b == 0));

        backend.free(a).unwrap();
        assert_eq!(backend.live_bytes(), 28);
        backend.free(b).unwrap();
        assert_eq!(backend.live_allocations(), 0);
    }

    #[test]
    fn test_foreign() {
        let backend = Reference::new();
        let foreign = RawMem::Host(Blob::new(8).unwrap());
        let e = backend.free(foreign).unwrap_err();
        assert_eq!(e.kind, ErrorKind::FreeFailed);
        assert_eq!(backend.malloc(1, 8).err().map(|e| e.kind), Some(ErrorKind::BadParameter));
    }

    #[test]
    fn test_limit() {
        let backend = Reference::new().with_limit(100);
        let a = backend.malloc(0, 60).unwrap();
        let e = backend.malloc(0, 41).err().unwrap();
        assert_eq!(e.kind, ErrorKind::AllocFailed);
        let b = backend.malloc(0, 40).unwrap();
        backend.free(a).unwrap();
        backend.free(b).unwrap();
    }
}
