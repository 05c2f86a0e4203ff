use crate::{
    backend::{Backend, RawMem},
    bad_parameter, invalid_handle,
    registry::{Create, Registry},
    view_of_view, view_out_of_range, Error, Object, ObjectKind,
};
use std::{
    fmt,
    mem::{replace, take},
    ptr::null_mut,
    process::abort,
    sync::{Arc, Weak},
};

/// 存储描述符。
///
/// 持有一块设备存储，或者是另一块存储的无所有权视图。
/// 视图不延长所有者的生命周期，所有者必须比它的视图活得更久。
pub struct MemoryDesc {
    device: Option<usize>,
    size: usize,
    offset: usize,
    ptr: *mut u8,
    storage: Storage,
}

enum Storage {
    Empty,
    Owned {
        mem: RawMem,
        backend: Arc<dyn Backend>,
        token: Arc<()>,
    },
    View {
        backend: Arc<dyn Backend>,
        owner: Weak<()>,
    },
}

/// 描述符的所有权状态。
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Ownership {
    Empty,
    Owned,
    View,
}

/// 在设备上分配存储。
#[derive(Clone, Copy, Debug)]
pub struct Alloc {
    pub device: usize,
    pub size: usize,
}

/// 在有所有权的存储上建立视图。
#[derive(Clone, Copy)]
pub struct View<'a> {
    pub owner: &'a MemoryDesc,
    pub size: usize,
    pub offset: usize,
}

unsafe impl Send for MemoryDesc {}
unsafe impl Sync for MemoryDesc {}

impl MemoryDesc {
    pub const EMPTY: Self = Self {
        device: None,
        size: 0,
        offset: 0,
        ptr: null_mut(),
        storage: Storage::Empty,
    };

    /// 在 `device` 上分配 `size` 字节。`size` 为 0 时只记录设备，不持有存储。
    pub fn alloc(
        &mut self,
        backend: &Arc<dyn Backend>,
        device: usize,
        size: usize,
    ) -> Result<(), Error> {
        if device >= backend.device_count() {
            return Err(bad_parameter(format!(
                "{:?} device {device} out of {}",
                backend.device_type(),
                backend.device_count()
            )));
        }
        self.destroy()?;
        if size == 0 {
            self.device = Some(device);
            return Ok(());
        }

        let mem = backend.malloc(device, size)?;
        let ptr = backend.address(&mem);
        log::debug!(
            "malloc {size} bytes on {:?} device {device}",
            backend.device_type()
        );
        *self = Self {
            device: Some(device),
            size,
            offset: 0,
            ptr,
            storage: Storage::Owned {
                mem,
                backend: backend.clone(),
                token: Arc::new(()),
            },
        };
        Ok(())
    }

    /// 建立 `owner` 上 `[offset, offset + size)` 的视图。
    ///
    /// 偏移在这里叠加到地址上，之后不再参与地址计算。
    pub fn view(&mut self, owner: &MemoryDesc, size: usize, offset: usize) -> Result<(), Error> {
        let (backend, token) = match &owner.storage {
            Storage::Owned { backend, token, .. } => (backend, token),
            Storage::View { .. } => return Err(view_of_view("can't build a view on a view")),
            Storage::Empty => return Err(bad_parameter("can't build a view on empty memory")),
        };
        match offset.checked_add(size) {
            Some(end) if end <= owner.size => {}
            _ => {
                return Err(view_out_of_range(format!(
                    "[{offset}, {offset} + {size}) exceeds {} bytes",
                    owner.size
                )))
            }
        }

        self.destroy()?;
        *self = Self {
            device: owner.device,
            size,
            offset,
            ptr: owner.ptr.wrapping_add(offset),
            storage: Storage::View {
                backend: backend.clone(),
                owner: Arc::downgrade(token),
            },
        };
        Ok(())
    }

    /// 移出描述符，原处留下空描述符。
    #[inline]
    pub fn take(&mut self) -> Self {
        take(self)
    }

    #[inline]
    pub fn device(&self) -> Option<usize> {
        self.device
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn ownership(&self) -> Ownership {
        match self.storage {
            Storage::Empty => Ownership::Empty,
            Storage::Owned { .. } => Ownership::Owned,
            Storage::View { .. } => Ownership::View,
        }
    }

    #[inline]
    pub fn is_owning(&self) -> bool {
        matches!(self.storage, Storage::Owned { .. })
    }

    #[inline]
    pub fn is_view(&self) -> bool {
        matches!(self.storage, Storage::View { .. })
    }

    /// 存储的起始地址，视图的偏移已经包含在内。
    #[inline]
    pub fn data<T>(&self) -> *mut T {
        self.ptr.cast()
    }

    /// 从主机拷贝到 `[offset, offset + src.len())`。
    pub fn write(&self, offset: usize, src: &[u8]) -> Result<(), Error> {
        let Some((backend, device)) = self.accessible(offset, src.len())? else {
            return Ok(());
        };
        backend.copy_from_host(device, self.ptr.wrapping_add(offset), src)
    }

    /// 从 `[offset, offset + dst.len())` 拷贝到主机。
    pub fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), Error> {
        let Some((backend, device)) = self.accessible(offset, dst.len())? else {
            return Ok(());
        };
        backend.copy_to_host(device, dst, self.ptr.wrapping_add(offset))
    }

    fn accessible(&self, offset: usize, len: usize) -> Result<Option<(&dyn Backend, usize)>, Error> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => {}
            _ => {
                return Err(bad_parameter(format!(
                    "[{offset}, {offset} + {len}) exceeds {} bytes",
                    self.size
                )))
            }
        }
        if len == 0 {
            return Ok(None);
        }
        let backend = match &self.storage {
            Storage::Owned { backend, .. } => backend,
            Storage::View { backend, owner } if owner.strong_count() > 0 => backend,
            Storage::View { .. } => {
                return Err(invalid_handle("owner of the view has been destroyed"))
            }
            Storage::Empty => return Err(bad_parameter("memory is empty")),
        };
        Ok(Some((&**backend, self.device.unwrap_or(0))))
    }
}

impl Object for MemoryDesc {
    const KIND: ObjectKind = ObjectKind::Memory;

    #[inline]
    fn null() -> &'static Self {
        static NULL: MemoryDesc = MemoryDesc::EMPTY;
        &NULL
    }

    #[inline]
    fn device(&self) -> usize {
        self.device.unwrap_or(0)
    }

    fn destroy(&mut self) -> Result<(), Error> {
        let storage = replace(&mut self.storage, Storage::Empty);
        self.device = None;
        self.size = 0;
        self.offset = 0;
        self.ptr = null_mut();
        match storage {
            Storage::Owned { mem, backend, .. } => {
                log::debug!("free {} bytes on {:?}", mem.len(), backend.device_type());
                backend.free(mem)
            }
            Storage::View { .. } | Storage::Empty => Ok(()),
        }
    }
}

impl Default for MemoryDesc {
    #[inline]
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Drop for MemoryDesc {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("failed to release memory: {e}");
            abort()
        }
    }
}

impl Create<Alloc> for MemoryDesc {
    #[inline]
    fn create(&mut self, registry: &Registry, Alloc { device, size }: Alloc) -> Result<(), Error> {
        self.alloc(registry.backend(), device, size)
    }
}

impl<'a> Create<View<'a>> for MemoryDesc {
    #[inline]
    fn create(
        &mut self,
        _: &Registry,
        View {
            owner,
            size,
            offset,
        }: View<'a>,
    ) -> Result<(), Error> {
        self.view(owner, size, offset)
    }
}

impl fmt::Debug for MemoryDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryDesc")
            .field("device", &self.device)
            .field("size", &self.size)
            .field("offset", &self.offset)
            .field("ownership", &self.ownership())
            .field("ptr", &self.ptr)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{backend::Reference, ErrorKind};

    fn backend() -> (Arc<Reference>, Arc<dyn Backend>) {
        let reference = Arc::new(Reference::new());
        let backend: Arc<dyn Backend> = reference.clone();
        (reference, backend)
    }

    fn owner(backend: &Arc<dyn Backend>, size: usize) -> MemoryDesc {
        let mut mem = MemoryDesc::default();
        mem.alloc(backend, 0, size).unwrap();
        mem
    }

    #[test]
    fn test_alloc() {
        let (reference, backend) = backend();
        let mem = owner(&backend, 1024);
        assert_eq!(mem.device(), Some(0));
        assert_eq!(mem.size(), 1024);
        assert_eq!(mem.offset(), 0);
        assert_eq!(mem.ownership(), Ownership::Owned);
        assert!(!mem.data::<u8>().is_null());
        assert_eq!(reference.live_bytes(), 1024);

        mem.write(10, &[1, 2, 3]).unwrap();
        let mut back = [0; 5];
        mem.read(9, &mut back).unwrap();
        assert_eq!(back, [0, 1, 2, 3, 0]);
        assert_eq!(
            mem.write(1023, &[1, 2]).err().map(|e| e.kind),
            Some(ErrorKind::BadParameter)
        );

        drop(mem);
        assert_eq!(reference.live_bytes(), 0);
    }

    #[test]
    fn test_zero_size() {
        let (reference, backend) = backend();
        let mem = owner(&backend, 0);
        assert_eq!(mem.device(), Some(0));
        assert_eq!(mem.ownership(), Ownership::Empty);
        assert!(mem.data::<f32>().is_null());
        assert_eq!(reference.live_allocations(), 0);
        mem.write(0, &[]).unwrap();

        let mut view = MemoryDesc::default();
        assert_eq!(
            view.view(&mem, 0, 0).err().map(|e| e.kind),
            Some(ErrorKind::BadParameter)
        );
    }

    #[test]
    fn test_bad_alloc() {
        let reference = Arc::new(Reference::new().with_limit(100));
        let backend: Arc<dyn Backend> = reference.clone();
        let mut mem = MemoryDesc::default();
        assert_eq!(
            mem.alloc(&backend, 1, 8).err().map(|e| e.kind),
            Some(ErrorKind::BadParameter)
        );
        assert_eq!(
            mem.alloc(&backend, 0, 101).err().map(|e| e.kind),
            Some(ErrorKind::AllocFailed)
        );
        assert_eq!(mem.ownership(), Ownership::Empty);
        assert_eq!(mem.device(), None);
    }

    #[test]
    fn test_view() {
        let (reference, backend) = backend();
        let owner = owner(&backend, 1024);
        let mut view = MemoryDesc::default();
        view.view(&owner, 256, 512).unwrap();
        assert_eq!(view.ownership(), Ownership::View);
        assert_eq!(view.size(), 256);
        assert_eq!(view.offset(), 512);
        assert_eq!(view.device(), owner.device());
        // 偏移只计算一次
        assert_eq!(view.data::<u8>(), owner.data::<u8>().wrapping_add(512));

        view.write(0, &[0xab; 256]).unwrap();
        let mut back = [0; 1024];
        owner.read(0, &mut back).unwrap();
        assert!(back[..512].iter().all(|&b| b == 0));
        assert!(back[512..768].iter().all(|&b| b == 0xab));
        assert!(back[768..].iter().all(|&b| b == 0));

        let mut edge = MemoryDesc::default();
        edge.view(&owner, 0, 1024).unwrap();
        edge.view(&owner, 1024, 0).unwrap();

        drop(view);
        assert_eq!(reference.live_bytes(), 1024);
    }

    #[test]
    fn test_bad_view() {
        let (_reference, backend) = backend();
        let owner = owner(&backend, 1024);
        let mut view = MemoryDesc::default();
        view.view(&owner, 256, 0).unwrap();

        let mut bad = MemoryDesc::default();
        assert_eq!(
            bad.view(&view, 16, 0).err().map(|e| e.kind),
            Some(ErrorKind::ViewOfView)
        );
        assert_eq!(
            bad.view(&owner, 513, 512).err().map(|e| e.kind),
            Some(ErrorKind::ViewOutOfRange)
        );
        assert_eq!(
            bad.view(&owner, usize::MAX, 1).err().map(|e| e.kind),
            Some(ErrorKind::ViewOutOfRange)
        );
        assert_eq!(bad.ownership(), Ownership::Empty);
    }

    #[test]
    fn test_view_outlived() {
        let (reference, backend) = backend();
        let mut owner = owner(&backend, 64);
        let mut view = MemoryDesc::default();
        view.view(&owner, 32, 16).unwrap();

        owner.destroy().unwrap();
        assert_eq!(reference.live_bytes(), 0);
        assert_eq!(
            view.read(0, &mut [0; 4]).err().map(|e| e.kind),
            Some(ErrorKind::InvalidHandle)
        );
        view.destroy().unwrap();
    }

    #[test]
    fn test_destroy() {
        let (reference, backend) = backend();
        let mut mem = owner(&backend, 64);
        mem.destroy().unwrap();
        assert_eq!(mem.ownership(), Ownership::Empty);
        assert_eq!(mem.device(), None);
        assert_eq!(mem.size(), 0);
        mem.destroy().unwrap();
        assert_eq!(reference.live_allocations(), 0);
    }

    #[test]
    fn test_move() {
        let (reference, backend) = backend();
        let mut mem = owner(&backend, 64);
        let ptr = mem.data::<u8>();
        let moved = mem.take();
        assert_eq!(mem.ownership(), Ownership::Empty);
        assert!(mem.data::<u8>().is_null());
        assert_eq!(moved.data::<u8>(), ptr);
        drop(mem);
        assert_eq!(reference.live_bytes(), 64);
        drop(moved);
        assert_eq!(reference.live_bytes(), 0);
    }

    #[test]
    fn test_realloc() {
        let (reference, backend) = backend();
        let mut mem = owner(&backend, 64);
        mem.alloc(&backend, 0, 32).unwrap();
        assert_eq!(reference.live_bytes(), 32);
        assert_eq!(mem.size(), 32);
    }
}
