//! 跨设备资源句柄层。
//!
//! 存储块、执行上下文、张量描述和算子配置都通过 64 位句柄引用，
//! 对象的存储和生命周期由 [Registry] 中的对象池管理，硬件差异收敛在 [backend::Backend] 中。

mod context;
mod error;
mod handle;
mod memory;
mod pool;
mod registry;
mod session;
mod tensor;

pub mod backend;
pub mod config;

pub use context::ContextDesc;
pub use error::{functions::*, Error, ErrorKind, Status};
pub use handle::{DeviceType, Handle, ObjectKind};
pub use memory::{Alloc, MemoryDesc, Ownership, View};
pub use pool::{Object, ObjectPool, Ref, RefMut, CAPACITY};
pub use registry::{Config, Create, Pooled, Registry};
pub use session::Session;
pub use tensor::{Shape, TensorDesc, MAX_RANK};

#[cfg(use_cl)]
pub extern crate clrt;
#[cfg(use_cuda)]
pub extern crate cuda;
#[cfg(use_cuda)]
pub extern crate cublas;
