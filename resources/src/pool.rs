use crate::{alloc_failed, bad_parameter, invalid_handle, DeviceType, Error, Handle, ObjectKind};
use std::{
    array::from_fn,
    ops::{Deref, DerefMut},
    sync::{
        atomic::{
            AtomicBool, AtomicU32,
            Ordering::{Acquire, Relaxed, Release},
        },
        Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};

/// 可池化的后端对象。
///
/// 对象的默认值即空状态，池中未使用的槽位保存空对象。
pub trait Object: Default + Send + Sync + 'static {
    /// 写入句柄的对象种类。
    const KIND: ObjectKind;

    /// 空句柄解析到的静态空对象。
    fn null() -> &'static Self;

    /// 对象所在的设备序号。
    #[inline]
    fn device(&self) -> usize {
        0
    }

    /// 释放对象持有的资源，回到空状态。重复调用无副作用。
    fn destroy(&mut self) -> Result<(), Error>;
}

const BASE: usize = 64;
const SEGMENTS: usize = 26;

/// 单个池能容纳的槽位数。
pub const CAPACITY: usize = BASE * ((1 << SEGMENTS) - 1);

/// 对象池。
///
/// 槽位存放在容量倍增的分段中，一旦创建就不会移动，因此读取不需要池锁。
/// 创建和销毁在池锁下进行，回收的槽位按后进先出复用。
pub struct ObjectPool<T: Object> {
    device_type: DeviceType,
    reserved: u32,
    len: AtomicU32,
    segments: [OnceLock<Box<[Slot<T>]>>; SEGMENTS],
    free: Mutex<Vec<u32>>,
}

struct Slot<T> {
    live: AtomicBool,
    value: RwLock<T>,
}

impl<T: Default> Default for Slot<T> {
    #[inline]
    fn default() -> Self {
        Self {
            live: AtomicBool::new(false),
            value: RwLock::new(T::default()),
        }
    }
}

/// 对象的共享引用。
pub enum Ref<'a, T: 'static> {
    Null(&'static T),
    Live(RwLockReadGuard<'a, T>),
}

/// 对象的独占引用。
pub struct RefMut<'a, T>(RwLockWriteGuard<'a, T>);

impl<T: Object> ObjectPool<T> {
    #[inline]
    pub fn new(device_type: DeviceType) -> Self {
        Self::with_reserved(device_type, 0)
    }

    /// 前 `reserved` 个槽位序号保留给其他池，这个池不会分配它们。
    pub fn with_reserved(device_type: DeviceType, reserved: u32) -> Self {
        assert!(reserved as usize <= CAPACITY);
        Self {
            device_type,
            reserved,
            len: AtomicU32::new(reserved),
            segments: from_fn(|_| OnceLock::new()),
            free: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    #[inline]
    pub fn reserved(&self) -> u32 {
        self.reserved
    }

    /// 曾经使用过的槽位数，包括保留槽位。只增不减。
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Acquire) as _
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == self.reserved as usize
    }

    /// 占用一个槽位并用 `init` 构造对象。
    ///
    /// `init` 失败时对象复位，槽位不会被标记为存活。
    pub fn create(&self, init: impl FnOnce(&mut T) -> Result<(), Error>) -> Result<Handle, Error> {
        let mut free = self.lock();
        let (idx, fresh) = match free.pop() {
            Some(idx) => (idx, false),
            None => (self.len.load(Relaxed), true),
        };
        if idx as usize >= CAPACITY {
            return Err(alloc_failed(format!("{:?} pool exhausted", T::KIND)));
        }

        let slot = self.grow(idx as _);
        let device = {
            let mut obj = write(&slot.value);
            let ans = init(&mut *obj).and_then(|()| {
                let device = obj.device();
                u16::try_from(device)
                    .map_err(|_| bad_parameter(format!("device {device} can't be encoded")))
            });
            match ans {
                Ok(device) => device,
                Err(e) => {
                    *obj = T::default();
                    if !fresh {
                        free.push(idx)
                    }
                    return Err(e);
                }
            }
        };
        slot.live.store(true, Release);
        if fresh {
            self.len.store(idx + 1, Release)
        }

        let handle = self.encode(device, idx);
        log::trace!("create {handle:?}");
        Ok(handle)
    }

    /// 销毁对象并回收槽位。句柄无效时不改变任何状态。
    pub fn destroy(&self, handle: Handle) -> Result<(), Error> {
        if handle.is_null() {
            return Ok(());
        }
        let (idx, slot) = self.check(handle)?;
        // 先锁对象再锁池，持有其他对象引用的线程仍可以创建对象
        let mut obj = write(&slot.value);
        // 存活标记只在持有对象写锁时清除，存活的槽位不在空闲栈中
        if !slot.live.load(Acquire) {
            return Err(invalid_handle(format!("{handle:?} is released")));
        }
        let mut free = self.lock();
        slot.live.store(false, Release);
        let ans = obj.destroy();
        free.push(idx);
        log::trace!("destroy {handle:?}");
        ans
    }

    /// 解引用句柄，不获取池锁。
    ///
    /// 空句柄解析为静态空对象。同一个句柄不应同时被销毁，并发销毁会等待读者释放引用。
    pub fn get(&self, handle: Handle) -> Result<Ref<T>, Error> {
        if handle.is_null() {
            return Ok(Ref::Null(T::null()));
        }
        let (_, slot) = self.check(handle)?;
        let guard = read(&slot.value);
        if slot.live.load(Acquire) {
            Ok(Ref::Live(guard))
        } else {
            Err(invalid_handle(format!("{handle:?} destroyed concurrently")))
        }
    }

    pub fn get_mut(&self, handle: Handle) -> Result<RefMut<T>, Error> {
        if handle.is_null() {
            return Err(bad_parameter(format!(
                "null {:?} object is immutable",
                T::KIND
            )));
        }
        let (_, slot) = self.check(handle)?;
        let guard = write(&slot.value);
        if slot.live.load(Acquire) {
            Ok(RefMut(guard))
        } else {
            Err(invalid_handle(format!("{handle:?} destroyed concurrently")))
        }
    }

    #[inline]
    pub fn is_valid(&self, handle: Handle) -> bool {
        self.check(handle).is_ok()
    }

    /// 存活对象数。
    pub fn live_count(&self) -> usize {
        (self.reserved..self.len.load(Acquire))
            .filter_map(|idx| self.slot(idx))
            .filter(|slot| slot.live.load(Acquire))
            .count()
    }

    /// 按槽位顺序列出存活对象的句柄。
    pub fn handles(&self) -> Vec<Handle> {
        (self.reserved..self.len.load(Acquire))
            .filter_map(|idx| {
                let slot = self.slot(idx)?;
                let obj = read(&slot.value);
                slot.live
                    .load(Acquire)
                    .then(|| self.encode(obj.device() as _, idx))
            })
            .collect()
    }

    #[inline]
    fn encode(&self, device: u16, idx: u32) -> Handle {
        Handle::encode(self.device_type as _, device, T::KIND as _, idx)
    }

    fn check(&self, handle: Handle) -> Result<(u32, &Slot<T>), Error> {
        if handle.device_type_bits() != self.device_type as u8 {
            return Err(invalid_handle(format!(
                "{handle:?} is not a {:?} handle",
                self.device_type
            )));
        }
        if handle.kind_bits() != T::KIND as u8 {
            return Err(invalid_handle(format!(
                "{handle:?} is not a {:?} handle",
                T::KIND
            )));
        }
        let idx = handle.slot();
        if idx < self.reserved {
            return Err(invalid_handle(format!("{handle:?} refers to a reserved slot")));
        }
        if idx >= self.len.load(Acquire) {
            return Err(invalid_handle(format!(
                "{handle:?} out of range {}",
                self.len()
            )));
        }
        match self.slot(idx) {
            Some(slot) if slot.live.load(Acquire) => Ok((idx, slot)),
            _ => Err(invalid_handle(format!("{handle:?} is released"))),
        }
    }

    #[inline]
    fn slot(&self, idx: u32) -> Option<&Slot<T>> {
        let (seg, off) = locate(idx as _);
        self.segments[seg].get().map(|slots| &slots[off])
    }

    /// 只在池锁下调用。
    fn grow(&self, idx: usize) -> &Slot<T> {
        let (seg, off) = locate(idx);
        let slots = self.segments[seg].get_or_init(|| {
            log::trace!("{:?} pool grows segment {seg}", T::KIND);
            (0..BASE << seg).map(|_| Slot::default()).collect()
        });
        &slots[off]
    }

    #[inline]
    fn lock(&self) -> MutexGuard<Vec<u32>> {
        self.free.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 槽位序号 -> (分段, 段内偏移)
#[inline(always)]
const fn locate(idx: usize) -> (usize, usize) {
    let j = idx / BASE + 1;
    let seg = (usize::BITS - 1 - j.leading_zeros()) as usize;
    (seg, idx - BASE * ((1 << seg) - 1))
}

#[inline]
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl<T: 'static> Ref<'_, T> {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null(_))
    }
}

impl<T: 'static> Deref for Ref<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        match self {
            Self::Null(obj) => obj,
            Self::Live(guard) => guard,
        }
    }
}

impl<T> Deref for RefMut<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for RefMut<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
