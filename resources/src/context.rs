use crate::{
    backend::{Backend, RawQueue},
    bad_parameter, invalid_handle,
    registry::{Create, Registry},
    Error, MemoryDesc, Object, ObjectKind,
};
use std::{
    fmt,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

/// 执行上下文。
///
/// 绑定一个设备和一个执行队列，第一次使用时分配固定大小的工作空间。
pub struct ContextDesc {
    device: Option<usize>,
    queue: Option<RawQueue>,
    backend: Option<Arc<dyn Backend>>,
    capacity: usize,
    workspace: OnceLock<MemoryDesc>,
    init: Mutex<()>,
}

// 队列只通过后端在持有描述符引用时访问
unsafe impl Send for ContextDesc {}
unsafe impl Sync for ContextDesc {}

impl ContextDesc {
    pub const EMPTY: Self = Self {
        device: None,
        queue: None,
        backend: None,
        capacity: 0,
        workspace: OnceLock::new(),
        init: Mutex::new(()),
    };

    /// 在 `device` 上建立上下文，工作空间大小固定为 `workspace_size`。
    pub fn init(
        &mut self,
        backend: &Arc<dyn Backend>,
        device: usize,
        use_default_stream: bool,
        workspace_size: usize,
    ) -> Result<(), Error> {
        if device >= backend.device_count() {
            return Err(bad_parameter(format!(
                "{:?} device {device} out of {}",
                backend.device_type(),
                backend.device_count()
            )));
        }
        self.destroy()?;
        self.queue = backend.create_queue(device, use_default_stream)?;
        self.device = Some(device);
        self.backend = Some(backend.clone());
        self.capacity = workspace_size;
        Ok(())
    }

    #[inline]
    pub fn device(&self) -> Option<usize> {
        self.device
    }

    #[inline]
    pub fn queue(&self) -> Option<&RawQueue> {
        self.queue.as_ref()
    }

    /// 已分配的工作空间大小，第一次使用前为 0。
    #[inline]
    pub fn workspace_size(&self) -> usize {
        self.workspace.get().map_or(0, MemoryDesc::size)
    }

    /// 取得工作空间，第一次调用时分配。之后总是返回同一个描述符，不会扩容。
    pub fn workspace(&self) -> Result<&MemoryDesc, Error> {
        if let Some(ws) = self.workspace.get() {
            return Ok(ws);
        }
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(ws) = self.workspace.get() {
            return Ok(ws);
        }
        let (Some(device), Some(backend)) = (self.device, &self.backend) else {
            return Err(invalid_handle("context is not initialized"));
        };
        let mut ws = MemoryDesc::default();
        ws.alloc(backend, device, self.capacity)?;
        log::debug!("workspace of {} bytes on device {device}", self.capacity);
        Ok(self.workspace.get_or_init(|| ws))
    }

    /// 等待队列上的任务完成。
    pub fn synchronize(&self) -> Result<(), Error> {
        match &self.backend {
            Some(backend) => backend.synchronize(self.queue.as_ref()),
            None => Err(invalid_handle("context is not initialized")),
        }
    }
}

impl Object for ContextDesc {
    const KIND: ObjectKind = ObjectKind::Context;

    #[inline]
    fn null() -> &'static Self {
        static NULL: ContextDesc = ContextDesc::EMPTY;
        &NULL
    }

    #[inline]
    fn device(&self) -> usize {
        self.device.unwrap_or(0)
    }

    fn destroy(&mut self) -> Result<(), Error> {
        let Some(backend) = self.backend.take() else {
            return Ok(());
        };
        self.device = None;
        self.capacity = 0;
        let mut ans = backend.synchronize(self.queue.as_ref());
        if let Some(queue) = self.queue.take() {
            ans = ans.and(backend.destroy_queue(queue));
        }
        if let Some(mut ws) = self.workspace.take() {
            ans = ans.and(ws.destroy());
        }
        ans
    }
}

impl Default for ContextDesc {
    #[inline]
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Drop for ContextDesc {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            log::error!("failed to release context: {e}");
            std::process::abort()
        }
    }
}

impl fmt::Debug for ContextDesc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ContextDesc")
            .field("device", &self.device)
            .field("queue", &self.queue.is_some())
            .field("workspace", &self.workspace_size())
            .finish()
    }
}

/// 在指定设备上创建上下文，`true` 表示使用设备默认队列。
impl Create<(usize, bool)> for ContextDesc {
    fn create(&mut self, registry: &Registry, (device, default): (usize, bool)) -> Result<(), Error> {
        self.init(
            registry.backend(),
            device,
            default,
            registry.config().workspace_size,
        )
    }
}

/// 在 0 号设备上创建使用默认队列的上下文。
impl Create<()> for ContextDesc {
    #[inline]
    fn create(&mut self, registry: &Registry, (): ()) -> Result<(), Error> {
        Create::<(usize, bool)>::create(self, registry, (0, true))
    }
}
