// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Guest page access.
//!
//! Guest-visible pages are read concurrently by the guest while the
//! emulator updates them, so all access goes through per-byte atomics.
//! Ordering between fields is provided by the callers' sequence-lock
//! protocols, not by these primitives.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ops::Deref;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use xendef::XEN_PAGE_SIZE_USIZE;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

/// A fault accessing guest memory.
#[derive(Debug, Error)]
pub enum GuestMemoryError {
    /// No memory is mapped at the guest page number.
    #[error("no memory at guest page {gpn:#x}")]
    InvalidGpn {
        /// The faulting guest page number.
        gpn: u64,
    },
    /// The guest virtual address is not mapped.
    #[error("guest virtual address {gva:#x} is unmapped")]
    UnmappedGva {
        /// The faulting guest virtual address.
        gva: u64,
    },
    /// The object does not fit within one page.
    #[error("object at {gpa:#x} crosses a page boundary")]
    Straddle {
        /// The guest physical address of the object.
        gpa: u64,
    },
}

/// A 4 KiB page of guest memory, accessed bytewise.
pub struct GuestPage {
    bytes: [AtomicU8; XEN_PAGE_SIZE_USIZE],
}

impl GuestPage {
    /// Returns a new zero-filled page.
    pub fn new() -> Self {
        Self {
            bytes: std::array::from_fn(|_| AtomicU8::new(0)),
        }
    }

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        let len = buf.len();
        for (b, a) in buf.iter_mut().zip(&self.bytes[offset..offset + len]) {
            *b = a.load(Ordering::Relaxed);
        }
    }

    /// Copies `buf` into the page starting at `offset`.
    pub fn write(&self, offset: usize, buf: &[u8]) {
        for (b, a) in buf.iter().zip(&self.bytes[offset..offset + buf.len()]) {
            a.store(*b, Ordering::Relaxed);
        }
    }

    /// Fills the whole page with `byte`.
    pub fn fill(&self, byte: u8) {
        for a in &self.bytes {
            a.store(byte, Ordering::Relaxed);
        }
    }

    /// Reads a `T` at `offset`.
    pub fn read_obj<T: FromBytes + IntoBytes>(&self, offset: usize) -> T {
        let mut value = T::new_zeroed();
        self.read(offset, value.as_mut_bytes());
        value
    }

    /// Writes a `T` at `offset`.
    pub fn write_obj<T: IntoBytes + Immutable + ?Sized>(&self, offset: usize, value: &T) {
        self.write(offset, value.as_bytes());
    }
}

impl Default for GuestPage {
    fn default() -> Self {
        Self::new()
    }
}

/// Backing storage resolving guest page numbers to pages.
pub trait GuestPages: Send + Sync {
    /// Returns the page at guest page number `gpn`.
    fn page(&self, gpn: u64) -> Result<Arc<GuestPage>, GuestMemoryError>;
}

/// A handle to guest memory.
#[derive(Clone)]
pub struct GuestMemory {
    backing: Arc<dyn GuestPages>,
}

impl GuestMemory {
    /// Returns a handle backed by `backing`.
    pub fn new(backing: Arc<dyn GuestPages>) -> Self {
        Self { backing }
    }

    /// Returns a handle to `page_count` pages of zeroed RAM starting at
    /// guest page 0. Used by tests and standalone harnesses.
    pub fn allocate(page_count: usize) -> Self {
        struct Ram(Vec<Arc<GuestPage>>);

        impl GuestPages for Ram {
            fn page(&self, gpn: u64) -> Result<Arc<GuestPage>, GuestMemoryError> {
                self.0
                    .get(gpn as usize)
                    .cloned()
                    .ok_or(GuestMemoryError::InvalidGpn { gpn })
            }
        }

        Self::new(Arc::new(Ram(
            (0..page_count).map(|_| Arc::new(GuestPage::new())).collect(),
        )))
    }

    /// Locks the page at `gpn` for the lifetime of the returned handle.
    pub fn lock_gpn(&self, gpn: u64) -> Result<LockedPage, GuestMemoryError> {
        let page = match self.backing.page(gpn) {
            Ok(it) => it,
            Err(err) => {
                tracing::warn!(gpn, error = &err as &dyn std::error::Error, "failed to lock page");
                return Err(err);
            }
        };
        Ok(LockedPage { page })
    }
}

/// A locked reference to one guest page.
pub struct LockedPage {
    page: Arc<GuestPage>,
}

impl Deref for LockedPage {
    type Target = GuestPage;

    fn deref(&self) -> &Self::Target {
        &self.page
    }
}

/// A typed view of a `T` in guest memory. The object must not cross a page
/// boundary.
pub struct MappedArea<T> {
    page: LockedPage,
    offset: usize,
    _phantom: PhantomData<T>,
}

impl<T: FromBytes + IntoBytes + Immutable> MappedArea<T> {
    /// Maps a `T` at guest physical address `gpa`.
    pub fn new(memory: &GuestMemory, gpa: u64) -> Result<Self, GuestMemoryError> {
        let offset = (gpa & (XEN_PAGE_SIZE_USIZE as u64 - 1)) as usize;
        if offset + size_of::<T>() > XEN_PAGE_SIZE_USIZE {
            return Err(GuestMemoryError::Straddle { gpa });
        }
        Ok(Self {
            page: memory.lock_gpn(gpa >> 12)?,
            offset,
            _phantom: PhantomData,
        })
    }

    /// Reads the whole object.
    pub fn read(&self) -> T {
        self.page.read_obj(self.offset)
    }

    /// Writes the whole object.
    pub fn write(&self, value: &T) {
        self.page.write_obj(self.offset, value)
    }

    /// Reads a field of the object at `field_offset` bytes from its start.
    pub fn read_at<F: FromBytes + IntoBytes>(&self, field_offset: usize) -> F {
        assert!(field_offset + size_of::<F>() <= size_of::<T>());
        self.page.read_obj(self.offset + field_offset)
    }

    /// Writes a field of the object at `field_offset` bytes from its start.
    pub fn write_at<F: IntoBytes + Immutable>(&self, field_offset: usize, value: &F) {
        assert!(field_offset + size_of::<F>() <= size_of::<T>());
        self.page.write_obj(self.offset + field_offset, value)
    }

    /// The underlying page.
    pub(crate) fn page(&self) -> &GuestPage {
        &self.page
    }

    /// The object's offset within the page.
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }
}
