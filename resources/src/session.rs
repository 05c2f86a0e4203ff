use crate::{bad_parameter, ContextDesc, Error, Handle, ObjectKind, ObjectPool, Ref, Registry};
use std::{cell::OnceCell, marker::PhantomData};

/// 线程会话。
///
/// 每个线程持有自己的默认上下文，每个设备一个，占用上下文序号 `0..device_count`。
/// 资源表的共享上下文池保留了这些序号，因此默认上下文只靠序号就能识别。
pub struct Session<'r> {
    registry: &'r Registry,
    defaults: OnceCell<ObjectPool<ContextDesc>>,
    _not_send: PhantomData<*const ()>,
}

impl<'r> Session<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            defaults: OnceCell::new(),
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// 设备的默认上下文句柄。
    pub fn default_context(&self, device: usize) -> Result<Handle, Error> {
        let count = self.registry.device_count();
        if device >= count {
            return Err(bad_parameter(format!("device {device} out of {count}")));
        }
        self.defaults()?;
        Ok(Handle::encode(
            self.registry.device_type() as _,
            device as _,
            ObjectKind::Context as _,
            device as _,
        ))
    }

    /// 句柄是否指向某个默认上下文。不会触发默认上下文的创建。
    pub fn is_default(&self, handle: Handle) -> bool {
        handle.device_type_bits() == self.registry.device_type() as u8
            && handle.kind_bits() == ObjectKind::Context as u8
            && (handle.slot() as usize) < self.registry.device_count()
    }

    /// 先查找本线程的默认上下文，再查找共享上下文。
    pub fn get_context(&self, handle: Handle) -> Result<Ref<ContextDesc>, Error> {
        if self.is_default(handle) {
            self.defaults()?.get(handle)
        } else {
            self.registry.get_context(handle)
        }
    }

    /// 上下文工作空间的地址和大小。
    pub fn workspace(&self, handle: Handle) -> Result<(*mut u8, usize), Error> {
        let ctx = self.get_context(handle)?;
        let ws = ctx.workspace()?;
        Ok((ws.data(), ws.size()))
    }

    fn defaults(&self) -> Result<&ObjectPool<ContextDesc>, Error> {
        if let Some(pool) = self.defaults.get() {
            return Ok(pool);
        }

        let registry = self.registry;
        let config = registry.config();
        let pool = ObjectPool::new(registry.device_type());
        for device in 0..registry.device_count() {
            pool.create(|ctx: &mut ContextDesc| {
                ctx.init(
                    registry.backend(),
                    device,
                    config.default_stream,
                    config.workspace_size,
                )
            })?;
        }
        log::debug!(
            "session on {:?} with {} default context(s)",
            registry.device_type(),
            pool.live_count()
        );
        Ok(self.defaults.get_or_init(|| pool))
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let Some(pool) = self.defaults.take() else {
            return;
        };
        for handle in pool.handles() {
            if let Err(e) = pool.destroy(handle) {
                log::warn!("failed to release default context {handle:?}: {e}")
            }
        }
        log::debug!("session released {} default context(s)", pool.len());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{backend::Reference, registry::Config, ErrorKind};
    use std::{
        collections::HashSet,
        sync::{Arc, Barrier},
    };

    fn registry(devices: usize) -> (Arc<Reference>, Registry) {
        let reference = Arc::new(Reference::with_devices(devices));
        let registry = Registry::with_backend(
            reference.clone(),
            Config {
                workspace_size: 1024,
                default_stream: true,
            },
        );
        (reference, registry)
    }

    #[test]
    fn test_defaults() {
        let (reference, registry) = registry(3);
        let session = Session::new(&registry);
        let h = session.default_context(2).unwrap();
        assert_eq!(h.slot(), 2);
        assert_eq!(h.device(), 2);
        assert!(session.is_default(h));
        assert_eq!(session.get_context(h).unwrap().device(), Some(2));
        assert_eq!(
            session.default_context(3).err().map(|e| e.kind),
            Some(ErrorKind::BadParameter)
        );
        // 默认上下文不在共享池中
        assert!(registry.get_context(h).is_err());

        let (ptr, size) = session.workspace(h).unwrap();
        assert_eq!(size, 1024);
        assert_eq!(session.workspace(h).unwrap().0, ptr);
        assert_eq!(reference.live_bytes_on(2), 1024);

        drop(session);
        assert_eq!(reference.live_bytes(), 0);
    }

    #[test]
    fn test_shared() {
        let (_reference, registry) = registry(2);
        let session = Session::new(&registry);
        let shared = registry.create_context(1, true).unwrap();
        assert!(!session.is_default(shared));
        assert_eq!(session.get_context(shared).unwrap().device(), Some(1));

        let memory = registry.create_memory(0, 8).unwrap();
        assert!(!session.is_default(memory));
        assert_eq!(
            session.get_context(memory).err().map(|e| e.kind),
            Some(ErrorKind::InvalidHandle)
        );
        assert!(session.get_context(Handle::NULL).unwrap().is_null());
    }

    #[test]
    fn test_lazy() {
        let (reference, registry) = registry(2);
        let session = Session::new(&registry);
        let h = Handle::encode(registry.device_type() as _, 0, ObjectKind::Context as _, 0);
        assert!(session.is_default(h));
        assert!(session.defaults.get().is_none());
        session.get_context(h).unwrap();
        assert_eq!(session.defaults.get().map(ObjectPool::live_count), Some(2));
        // 工作空间在第一次使用时才分配
        assert_eq!(reference.live_allocations(), 0);
    }

    #[test]
    fn test_threads() {
        let (reference, registry) = registry(1);
        let barrier = Barrier::new(4);
        let ptrs = std::thread::scope(|s| {
            let workers = (0..4)
                .map(|_| {
                    let registry = &registry;
                    let barrier = &barrier;
                    s.spawn(move || {
                        let session = Session::new(registry);
                        let h = session.default_context(0).unwrap();
                        let ptr = session.workspace(h).unwrap().0 as usize;
                        // 所有线程的会话同时存活
                        barrier.wait();
                        ptr
                    })
                })
                .collect::<Vec<_>>();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .collect::<Vec<_>>()
        });
        // 每个线程有自己的默认上下文和工作空间
        assert_eq!(ptrs.iter().collect::<HashSet<_>>().len(), 4);
        assert_eq!(reference.live_allocations(), 0);
    }
}
