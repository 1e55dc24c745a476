//! Aligned buffer for unbuffered I/O
//!
//! `O_DIRECT` and `FILE_FLAG_NO_BUFFERING` reject buffers that are not
//! aligned to the device sector size, so the buffer comes straight from the
//! global allocator with an explicit alignment instead of from a `Vec`.

use crate::{is_aligned, PlatformError, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Page alignment, a multiple of every common sector size
pub const DEFAULT_ALIGNMENT: usize = 4096;

/// Owned, zero-initialised, aligned heap buffer. Freed on drop.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: AlignedBuffer uniquely owns its allocation, like Vec<u8>.
#[allow(unsafe_code)]
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `size` bytes aligned to `alignment`.
    ///
    /// `alignment` must be a power of two and `size` a non-zero multiple of it.
    pub fn new(size: usize, alignment: usize) -> Result<Self> {
        if size == 0 {
            return Err(PlatformError::AlignmentError(
                "Buffer size must be non-zero".to_string(),
            ));
        }
        if !alignment.is_power_of_two() {
            return Err(PlatformError::AlignmentError(format!(
                "Alignment {} is not a power of two",
                alignment
            )));
        }
        if !is_aligned(size, alignment) {
            return Err(PlatformError::AlignmentError(format!(
                "Buffer size {} is not a multiple of {}",
                size, alignment
            )));
        }

        let layout = Layout::from_size_align(size, alignment)
            .map_err(|e| PlatformError::AlignmentError(e.to_string()))?;

        // SAFETY: layout has a non-zero size, checked above.
        #[allow(unsafe_code)]
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(PlatformError::AllocationFailed(size))?;

        tracing::trace!("Allocated {} byte buffer aligned to {}", size, alignment);

        Ok(Self { ptr, layout })
    }

    /// Buffer length in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false; zero-sized buffers are rejected at construction
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Alignment of the buffer's start address
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// View the whole buffer
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is valid for layout.size() initialised bytes for the
        // lifetime of self.
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size())
        }
    }

    /// Mutable view of the whole buffer
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        #[allow(unsafe_code)]
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size())
        }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout.
        #[allow(unsafe_code)]
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("alignment", &self.alignment())
            .finish()
    }
}
