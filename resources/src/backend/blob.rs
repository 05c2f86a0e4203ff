use std::{
    alloc::{alloc, dealloc, Layout},
    ops::{Deref, DerefMut},
    ptr::NonNull,
    slice::{from_raw_parts, from_raw_parts_mut},
};

/// 主机端分配的对齐。
pub const ALIGNMENT: usize = 256;

/// 主机内存块，释放时自动归还。
pub struct Blob {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for Blob {}
unsafe impl Sync for Blob {}

impl Blob {
    /// 分配 `size` 字节，分配器失败时返回 [None]。
    #[inline]
    pub fn new(size: usize) -> Option<Self> {
        if size == 0 {
            return None;
        }
        let layout = layout(size)?;
        let ptr = NonNull::new(unsafe { alloc(layout) })?;
        Some(Self { ptr, len: size })
    }

    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for Blob {
    #[inline]
    fn drop(&mut self) {
        let &mut Blob { ptr, len } = self;
        // 构造时已验证过布局
        if let Some(layout) = layout(len) {
            unsafe { dealloc(ptr.as_ptr(), layout) }
        }
    }
}

#[inline(always)]
fn layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, ALIGNMENT).ok()
}

impl Deref for Blob {
    type Target = [u8];
    #[inline]
    fn deref(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for Blob {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[test]
fn test_blob() {
    assert!(Blob::new(0).is_none());
    assert!(Blob::new(usize::MAX).is_none());

    let mut blob = Blob::new(1000).unwrap();
    assert_eq!(blob.len(), 1000);
    assert_eq!(blob.as_mut_ptr() as usize % ALIGNMENT, 0);
    blob.fill(7);
    assert!(blob.iter().all(|&b| b == 7));
}
