use crate::{
    backend::{self, Backend},
    config::{ConvDesc, DropoutDesc, OptimizerDesc, PoolingDesc},
    internal,
    memory::{Alloc, View},
    tensor::Shape,
    ContextDesc, DeviceType, Error, Handle, MemoryDesc, Object, ObjectPool, Ref, RefMut, Status,
    TensorDesc,
};
use digit_layout::DigitLayout;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    ptr::null_mut,
    sync::Arc,
};

/// 资源表配置。
#[derive(Clone, Debug)]
pub struct Config {
    /// 每个上下文工作空间的固定大小。
    pub workspace_size: usize,
    /// 线程默认上下文是否使用设备默认队列。
    pub default_stream: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace_size: 8 << 20,
            default_stream: true,
        }
    }
}

/// 可以用参数 `A` 构造的对象。
pub trait Create<A>: Object {
    fn create(&mut self, registry: &Registry, args: A) -> Result<(), Error>;
}

/// 在 [Registry] 中有对象池的对象。
pub trait Pooled: Object {
    fn pool(registry: &Registry) -> &ObjectPool<Self>;
}

/// 进程级资源表。
///
/// 持有后端和每种对象的池，所有句柄都由它发放。
pub struct Registry {
    backend: Arc<dyn Backend>,
    config: Config,
    memory: ObjectPool<MemoryDesc>,
    context: ObjectPool<ContextDesc>,
    tensor: ObjectPool<TensorDesc>,
    convolution: ObjectPool<ConvDesc>,
    pooling: ObjectPool<PoolingDesc>,
    optimizer: ObjectPool<OptimizerDesc>,
    dropout: ObjectPool<DropoutDesc>,
}

macro_rules! pooled {
    ($($ty:ty: $field:ident)+) => {
        $(
            impl Pooled for $ty {
                #[inline]
                fn pool(registry: &Registry) -> &ObjectPool<Self> {
                    &registry.$field
                }
            }
        )+
    };
}

pooled! {
    MemoryDesc   : memory
    ContextDesc  : context
    TensorDesc   : tensor
    ConvDesc     : convolution
    PoolingDesc  : pooling
    OptimizerDesc: optimizer
    DropoutDesc  : dropout
}

impl Registry {
    /// 使用构建时选择的后端。
    #[inline]
    pub fn new(config: Config) -> Self {
        Self::with_backend(backend::select(), config)
    }

    pub fn with_backend(backend: Arc<dyn Backend>, config: Config) -> Self {
        let ty = backend.device_type();
        let devices = backend.device_count();
        log::debug!("registry on {ty:?} with {devices} device(s), {config:?}");
        Self {
            memory: ObjectPool::new(ty),
            // 前 `devices` 个上下文序号留给线程默认上下文
            context: ObjectPool::with_reserved(ty, devices as _),
            tensor: ObjectPool::new(ty),
            convolution: ObjectPool::new(ty),
            pooling: ObjectPool::new(ty),
            optimizer: ObjectPool::new(ty),
            dropout: ObjectPool::new(ty),
            backend,
            config,
        }
    }

    #[inline]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn device_type(&self) -> DeviceType {
        self.backend.device_type()
    }

    #[inline]
    pub fn device_count(&self) -> usize {
        self.backend.device_count()
    }

    pub fn insert<T: Create<A> + Pooled, A>(&self, args: A) -> Result<Handle, Error> {
        T::pool(self).create(|obj| obj.create(self, args))
    }

    #[inline]
    pub fn remove<T: Pooled>(&self, handle: Handle) -> Result<(), Error> {
        T::pool(self).destroy(handle)
    }

    #[inline]
    pub fn get<T: Pooled>(&self, handle: Handle) -> Result<Ref<T>, Error> {
        T::pool(self).get(handle)
    }

    #[inline]
    pub fn get_mut<T: Pooled>(&self, handle: Handle) -> Result<RefMut<T>, Error> {
        T::pool(self).get_mut(handle)
    }

    #[inline]
    pub fn is_valid<T: Pooled>(&self, handle: Handle) -> bool {
        T::pool(self).is_valid(handle)
    }

    /// 构造对象并写出句柄。失败时句柄不变。
    pub fn create<T: Create<A> + Pooled, A>(&self, handle: &mut Handle, args: A) -> Status {
        let ans = catch_unwind(AssertUnwindSafe(|| self.insert::<T, A>(args)))
            .unwrap_or_else(|_| Err(internal(format!("panicked creating {:?}", T::KIND))));
        match ans {
            Ok(h) => {
                *handle = h;
                Status::Success
            }
            Err(e) => {
                log::warn!("create {:?} failed: {e}", T::KIND);
                e.kind.into()
            }
        }
    }

    pub fn destroy<T: Pooled>(&self, handle: Handle) -> Status {
        let ans = catch_unwind(AssertUnwindSafe(|| self.remove::<T>(handle)))
            .unwrap_or_else(|_| Err(internal(format!("panicked destroying {handle:?}"))));
        if let Err(e) = &ans {
            log::warn!("destroy {:?} failed: {e}", T::KIND)
        }
        Status::from(&ans)
    }

    /// 存储句柄 -> 地址，句柄无效时返回空指针。
    pub fn get_pointer<T>(&self, handle: Handle) -> *mut T {
        self.memory
            .get(handle)
            .map_or(null_mut(), |mem| mem.data())
    }

    #[inline]
    pub fn create_memory(&self, device: usize, size: usize) -> Result<Handle, Error> {
        self.insert::<MemoryDesc, _>(Alloc { device, size })
    }

    pub fn create_view(&self, owner: Handle, size: usize, offset: usize) -> Result<Handle, Error> {
        let owner = self.memory.get(owner)?;
        self.insert::<MemoryDesc, _>(View {
            owner: &owner,
            size,
            offset,
        })
    }

    #[inline]
    pub fn create_context(&self, device: usize, use_default_stream: bool) -> Result<Handle, Error> {
        self.insert::<ContextDesc, _>((device, use_default_stream))
    }

    #[inline]
    pub fn create_tensor(&self, dt: DigitLayout, dims: &[usize]) -> Result<Handle, Error> {
        self.insert::<TensorDesc, _>(Shape { dt, dims })
    }

    #[inline]
    pub fn write_memory(&self, handle: Handle, offset: usize, src: &[u8]) -> Result<(), Error> {
        self.memory.get(handle)?.write(offset, src)
    }

    #[inline]
    pub fn read_memory(&self, handle: Handle, offset: usize, dst: &mut [u8]) -> Result<(), Error> {
        self.memory.get(handle)?.read(offset, dst)
    }
}

macro_rules! accessors {
    ($($ty:ty: $get:ident $get_mut:ident)+) => {
        impl Registry {
            $(
                #[inline]
                pub fn $get(&self, handle: Handle) -> Result<Ref<$ty>, Error> {
                    self.get(handle)
                }

                #[inline]
                pub fn $get_mut(&self, handle: Handle) -> Result<RefMut<$ty>, Error> {
                    self.get_mut(handle)
                }
            )+
        }
    };
}

accessors! {
    MemoryDesc   : get_memory      get_memory_mut
    ContextDesc  : get_context     get_context_mut
    TensorDesc   : get_tensor      get_tensor_mut
    ConvDesc     : get_convolution get_convolution_mut
    PoolingDesc  : get_pooling     get_pooling_mut
    OptimizerDesc: get_optimizer   get_optimizer_mut
    DropoutDesc  : get_dropout     get_dropout_mut
}

impl Drop for Registry {
    fn drop(&mut self) {
        fn report<T: Object>(pool: &ObjectPool<T>) {
            let n = pool.live_count();
            if n > 0 {
                log::warn!("{n} {:?} object(s) still alive", T::KIND)
            }
        }

        report(&self.memory);
        report(&self.context);
        report(&self.tensor);
        report(&self.convolution);
        report(&self.pooling);
        report(&self.optimizer);
        report(&self.dropout);
        log::debug!("registry on {:?} dropped", self.backend.device_type());
    }
}
