//! Byte regions handed across the foreign boundary.
//!
//! A [`ValueBuffer`] is a sized window onto memory. It either owns a
//! zeroed, 16-byte aligned allocation, borrows a window of another buffer
//! (a view), or wraps foreign memory it knows nothing about. Views hold a
//! reference to their parent region, so owned storage is freed exactly
//! once, after the last view into it is gone.

use super::marshal::ForeignValue;
use super::types::TypeDesc;
use crate::error::{FfiError, FfiResult};
use std::alloc::{self, Layout};
use std::fmt;
use std::mem::size_of;
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Alignment of every owned allocation; the strictest scalar alignment
/// on supported targets (`long double` on x86-64 and AArch64).
pub const BUFFER_ALIGN: usize = 16;

/// Identifies who owns the memory behind a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOwner {
    /// Allocated here and freed when the last handle drops
    Owned,
    /// A window into another buffer, which it keeps alive
    Borrowed,
    /// Foreign memory; never freed here
    Foreign,
}

/// A zeroed heap allocation aligned to [`BUFFER_ALIGN`].
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl AlignedBuffer {
    pub fn zeroed(len: usize) -> FfiResult<Self> {
        // Zero-sized requests still get a real allocation so every buffer
        // has a distinct, dereferenceable address to hand to libffi.
        let layout = Self::layout(len)
            .ok_or_else(|| FfiError::allocation_failed(len, "exceeds the address space"))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| FfiError::allocation_failed(len, "out of memory"))?;
        Ok(AlignedBuffer { ptr, len })
    }

    fn layout(len: usize) -> Option<Layout> {
        Layout::from_size_align(len.max(1), BUFFER_ALIGN).ok()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr is a live allocation of at least len bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // zeroed() only succeeds when the layout exists.
        if let Some(layout) = Self::layout(self.len) {
            // SAFETY: allocated in zeroed() with the same layout.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

// SAFETY: AlignedBuffer uniquely owns its allocation.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

enum Backing {
    Owned(AlignedBuffer),
    View(Arc<Region>),
    Foreign,
}

struct Region {
    ptr: *mut u8,
    len: usize,
    backing: Backing,
}

// SAFETY: a region is plain bytes. Like C memory, concurrent writes
// through clones of the same buffer are the caller's responsibility.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

/// A sized byte region, owned, borrowed from a parent, or foreign.
///
/// Cloning a `ValueBuffer` shares the region; it does not copy bytes.
#[derive(Clone)]
pub struct ValueBuffer {
    region: Arc<Region>,
}

impl ValueBuffer {
    fn from_region(ptr: *mut u8, len: usize, backing: Backing) -> Self {
        ValueBuffer {
            region: Arc::new(Region { ptr, len, backing }),
        }
    }

    /// Allocate `size` zeroed bytes owned by the new buffer.
    pub fn allocate(size: usize) -> FfiResult<Self> {
        Ok(Self::from_aligned(AlignedBuffer::zeroed(size)?))
    }

    /// Take ownership of an already filled allocation.
    pub fn from_aligned(storage: AlignedBuffer) -> Self {
        let (ptr, len) = (storage.as_ptr(), storage.len());
        Self::from_region(ptr, len, Backing::Owned(storage))
    }

    /// Owned copy of externally supplied bytes.
    pub fn from_foreign_bytes(bytes: &[u8]) -> FfiResult<Self> {
        let mut storage = AlignedBuffer::zeroed(bytes.len())?;
        storage.as_mut_slice().copy_from_slice(bytes);
        Ok(Self::from_aligned(storage))
    }

    /// Owned buffer holding `value` marshaled as `desc`.
    pub fn from_value(desc: &TypeDesc, value: &ForeignValue) -> FfiResult<Self> {
        value.to_buffer(desc)
    }

    /// The null pointer: address 0, length 0.
    pub fn null() -> Self {
        Self::from_region(ptr::null_mut(), 0, Backing::Foreign)
    }

    /// A zero-length handle for a bare address. Nothing can be read
    /// through it without [`dereference`](Self::dereference) or
    /// [`from_address`](Self::from_address).
    pub fn pointer_to(address: usize) -> Self {
        Self::from_region(address as *mut u8, 0, Backing::Foreign)
    }

    /// Wrap foreign memory without owning it.
    ///
    /// # Safety
    /// `address` must be valid for reads and writes of `len` bytes for as
    /// long as this buffer, or anything derived from it, is used.
    pub unsafe fn from_address(address: usize, len: usize) -> Self {
        Self::from_region(address as *mut u8, len, Backing::Foreign)
    }

    pub fn len(&self) -> usize {
        self.region.len
    }

    pub fn is_empty(&self) -> bool {
        self.region.len == 0
    }

    /// Start address of the region.
    pub fn address(&self) -> usize {
        self.region.ptr as usize
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.region.ptr
    }

    pub fn is_null(&self) -> bool {
        self.region.ptr.is_null()
    }

    /// Whether this buffer frees its storage when dropped.
    pub fn is_owned(&self) -> bool {
        matches!(self.region.backing, Backing::Owned(_))
    }

    pub fn owner(&self) -> MemoryOwner {
        match self.region.backing {
            Backing::Owned(_) => MemoryOwner::Owned,
            Backing::View(_) => MemoryOwner::Borrowed,
            Backing::Foreign => MemoryOwner::Foreign,
        }
    }

    /// The buffer this view was sliced from.
    pub fn parent(&self) -> Option<ValueBuffer> {
        match &self.region.backing {
            Backing::View(parent) => Some(ValueBuffer {
                region: Arc::clone(parent),
            }),
            _ => None,
        }
    }

    /// Whether two handles share the same region.
    pub fn ptr_eq(&self, other: &ValueBuffer) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }

    fn check_range(&self, offset: usize, size: usize, what: &str) -> FfiResult<()> {
        let end = offset.checked_add(size);
        if end.map_or(true, |end| end > self.len()) {
            return Err(FfiError::out_of_bounds(
                format!("{} out of bounds", what),
                offset,
                size,
                self.len(),
            ));
        }
        if size > 0 && self.is_null() {
            return Err(FfiError::out_of_bounds(
                format!("{} through a null pointer", what),
                offset,
                size,
                self.len(),
            ));
        }
        Ok(())
    }

    /// Borrow the whole region.
    pub fn as_bytes(&self) -> &[u8] {
        if self.region.len == 0 || self.region.ptr.is_null() {
            return &[];
        }
        // SAFETY: owned and view regions are in bounds of a live allocation
        // kept alive by self; foreign regions were vouched for by the
        // caller of from_address.
        unsafe { std::slice::from_raw_parts(self.region.ptr, self.region.len) }
    }

    /// Copy the contents out for the host.
    pub fn to_foreign_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Overwrite `bytes.len()` bytes starting at `offset`.
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> FfiResult<()> {
        self.check_range(offset, bytes.len(), "writing")?;
        if bytes.is_empty() {
            return Ok(());
        }
        // SAFETY: range checked above; src is a distinct Rust slice.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.region.ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    /// A non-owning view of `[begin, end)`. `end == len` is allowed;
    /// `begin > end` yields an empty view at `begin`.
    pub fn slice(&self, begin: usize, end: usize) -> FfiResult<ValueBuffer> {
        if begin > self.len() {
            return Err(FfiError::out_of_bounds(
                "begin index out of bounds",
                begin,
                0,
                self.len(),
            ));
        }
        if end > self.len() {
            return Err(FfiError::out_of_bounds(
                "end index out of bounds",
                end,
                0,
                self.len(),
            ));
        }
        let size = end.saturating_sub(begin);
        let ptr = if self.is_null() {
            ptr::null_mut()
        } else {
            // SAFETY: begin <= len, so the result is in bounds or one past the end.
            unsafe { self.region.ptr.add(begin) }
        };
        Ok(Self::from_region(
            ptr,
            size,
            Backing::View(Arc::clone(&self.region)),
        ))
    }

    /// Follow the pointer stored at `offset` and view `size` bytes there.
    ///
    /// Only the pointer slot itself is bounds-checked; the target is not.
    ///
    /// # Safety
    /// The stored address must be valid for `size` bytes for as long as
    /// the returned buffer is used.
    pub unsafe fn dereference(&self, offset: usize, size: usize) -> FfiResult<ValueBuffer> {
        self.check_range(offset, size_of::<usize>(), "dereferencing")?;
        let address = ptr::read_unaligned(self.region.ptr.add(offset) as *const usize);
        Ok(Self::from_address(address, size))
    }

    /// Read a value of type `desc` at `offset`.
    pub fn read_typed(&self, desc: &TypeDesc, offset: usize) -> FfiResult<ForeignValue> {
        let size = desc.size();
        self.check_range(offset, size, "reading")?;
        ForeignValue::from_bytes(desc, &self.as_bytes()[offset..offset + size])
    }

    /// Marshal `value` as `desc` into the buffer at `offset`.
    pub fn write_typed(&self, desc: &TypeDesc, offset: usize, value: &ForeignValue) -> FfiResult<()> {
        self.check_range(offset, desc.size(), "writing")?;
        let staging = value.to_bytes(desc)?;
        self.write_bytes(offset, &staging)
    }
}

impl fmt::Debug for ValueBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueBuffer")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len())
            .field("owner", &self.owner())
            .finish()
    }
}
