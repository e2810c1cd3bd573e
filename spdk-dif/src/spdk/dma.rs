//! DMA-capable transfer buffers.

use std::ptr::NonNull;

use spdk_dif_sys::{spdk_dma_free, spdk_dma_zmalloc};

use crate::error::{Error, Result};

/// Buffers are aligned to a page, which covers every LBA format.
const DMA_ALIGN: usize = 0x1000;

/// Zeroed, pinned memory from `spdk_dma_zmalloc()`.
///
/// `Send` but not `Sync`: it can be handed to another thread, never shared.
pub struct DmaBuf {
    ptr: NonNull<u8>,
    len: usize,
}

unsafe impl Send for DmaBuf {}

impl DmaBuf {
    /// Allocate `len` zeroed bytes.
    ///
    /// # Errors
    ///
    /// [`Error::MemoryAlloc`] when `len` is 0 or the DMA pool is exhausted.
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::MemoryAlloc(len));
        }

        let ptr = unsafe { spdk_dma_zmalloc(len, DMA_ALIGN, std::ptr::null_mut()) };

        NonNull::new(ptr as *mut u8)
            .map(|ptr| Self { ptr, len })
            .ok_or(Error::MemoryAlloc(len))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; empty buffers cannot be allocated.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl Drop for DmaBuf {
    fn drop(&mut self) {
        unsafe {
            spdk_dma_free(self.ptr.as_ptr() as *mut std::ffi::c_void);
        }
    }
}

impl std::fmt::Debug for DmaBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaBuf")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

impl AsRef<[u8]> for DmaBuf {
    fn as_ref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl AsMut<[u8]> for DmaBuf {
    fn as_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
