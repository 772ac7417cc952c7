// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw view over shared memory with atomic accessors.
//!
//! `AtomicBuffer` is a `(pointer, length)` pair over memory that may be
//! concurrently accessed by another process. It does not own the memory: the
//! owner (a [`MappedFile`](crate::mapped::MappedFile) or an [`AlignedBuffer`])
//! must outlive every view created from it.
//!
//! All integer accessors operate on naturally aligned offsets and go through
//! `AtomicI32`/`AtomicI64` so that cross-process reads never tear. The "plain"
//! accessors use `Relaxed` ordering, `_volatile` loads use `Acquire` and
//! `_ordered` stores use `Release`.
//!
//! Multi-byte values are stored in native byte order, which for every
//! supported target is little-endian.

use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// Unowned view over a region of (possibly shared) memory.
#[derive(Clone, Copy, Debug)]
pub struct AtomicBuffer {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: AtomicBuffer points into shared memory that is designed for
// concurrent access. Integer fields are accessed through atomics; byte ranges
// are only copied in regions whose ownership is arbitrated by the ring and
// broadcast protocols.
unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    /// Wrap a raw memory region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes, aligned to at
    /// least 8 bytes, and must stay valid for as long as the returned view
    /// (or any copy of it) is used.
    #[must_use]
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Self {
        debug_assert!(ptr as usize % 8 == 0, "AtomicBuffer requires 8-byte alignment");
        Self { ptr, len }
    }

    /// Length of the view in bytes.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Base pointer of the view.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Sub-view of `len` bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range lies outside this view.
    #[must_use]
    pub fn view(&self, offset: usize, len: usize) -> Self {
        self.bounds_check(offset, len);
        // SAFETY: the range was bounds checked against a valid region and
        // offsets used for views are multiples of 8 in every layout.
        unsafe { Self::new(self.ptr.add(offset), len) }
    }

    #[inline]
    fn bounds_check(&self, index: usize, size: usize) {
        assert!(
            index.checked_add(size).is_some_and(|end| end <= self.len),
            "index={index} size={size} out of bounds for capacity={}",
            self.len
        );
    }

    #[inline]
    fn atomic_i64(&self, index: usize) -> &AtomicI64 {
        self.bounds_check(index, 8);
        debug_assert!(index % 8 == 0, "unaligned i64 access at {index}");
        // SAFETY:
        // - index + 8 <= len was checked above
        // - the base pointer is 8-byte aligned and index is a multiple of 8
        // - AtomicI64 has the same layout as i64
        // - the reference does not outlive &self, and the memory outlives self
        unsafe { &*(self.ptr.add(index) as *const AtomicI64) }
    }

    #[inline]
    fn atomic_i32(&self, index: usize) -> &AtomicI32 {
        self.bounds_check(index, 4);
        debug_assert!(index % 4 == 0, "unaligned i32 access at {index}");
        // SAFETY: same reasoning as atomic_i64 with 4-byte alignment.
        unsafe { &*(self.ptr.add(index) as *const AtomicI32) }
    }

    #[inline]
    #[must_use]
    pub fn get_i64(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Relaxed)
    }

    #[inline]
    pub fn put_i64(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn get_i64_volatile(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Acquire)
    }

    #[inline]
    pub fn put_i64_ordered(&self, index: usize, value: i64) {
        self.atomic_i64(index).store(value, Ordering::Release);
    }

    /// Compare-and-set; returns `true` if the swap happened.
    #[inline]
    pub fn compare_and_set_i64(&self, index: usize, expected: i64, update: i64) -> bool {
        self.atomic_i64(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add and return the previous value.
    #[inline]
    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        self.atomic_i64(index).fetch_add(delta, Ordering::AcqRel)
    }

    #[inline]
    #[must_use]
    pub fn get_i32(&self, index: usize) -> i32 {
        self.atomic_i32(index).load(Ordering::Relaxed)
    }

    #[inline]
    pub fn put_i32(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value, Ordering::Relaxed);
    }

    #[inline]
    #[must_use]
    pub fn get_i32_volatile(&self, index: usize) -> i32 {
        self.atomic_i32(index).load(Ordering::Acquire)
    }

    #[inline]
    pub fn put_i32_ordered(&self, index: usize, value: i32) {
        self.atomic_i32(index).store(value, Ordering::Release);
    }

    /// Copy `dst.len()` bytes starting at `index` into `dst`.
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        self.bounds_check(index, dst.len());
        // SAFETY:
        // - source range was bounds checked
        // - dst is a caller-owned slice, so the ranges cannot overlap
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.add(index), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Copy `src` into the view starting at `index`.
    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        self.bounds_check(index, src.len());
        // SAFETY:
        // - destination range was bounds checked
        // - src is a caller-owned slice, so the ranges cannot overlap
        // - exclusive write access to the range is guaranteed by the claiming
        //   protocol of the ring/broadcast buffer using this view
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(index), src.len());
        }
    }

    /// Fill `len` bytes starting at `index` with `value`.
    pub fn set_memory(&self, index: usize, len: usize, value: u8) {
        self.bounds_check(index, len);
        // SAFETY: range was bounds checked; see put_bytes for exclusivity.
        unsafe {
            ptr::write_bytes(self.ptr.add(index), value, len);
        }
    }
}

/// Heap allocation with 8-byte alignment, usable as an in-process stand-in for
/// a shared memory region.
#[derive(Debug)]
pub struct AlignedBuffer {
    storage: Box<[AtomicI64]>,
    len: usize,
}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes (rounded up to a multiple of 8).
    #[must_use]
    pub fn new(len: usize) -> Self {
        let words = len.div_ceil(8);
        let storage: Box<[AtomicI64]> = (0..words).map(|_| AtomicI64::new(0)).collect();
        Self { storage, len }
    }

    /// View over the whole allocation.
    #[must_use]
    pub fn atomic_buffer(&self) -> AtomicBuffer {
        // SAFETY:
        // - storage holds at least `len` bytes of 8-byte aligned memory
        // - AtomicI64 provides interior mutability, so handing out a mutable
        //   pointer does not violate aliasing rules
        // - callers keep the AlignedBuffer alive (typically in an Arc) while
        //   views are in use
        unsafe { AtomicBuffer::new(self.storage.as_ptr() as *mut u8, self.len) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_accessors() {
        let backing = AlignedBuffer::new(64);
        let buf = backing.atomic_buffer();

        buf.put_i64(0, -7);
        buf.put_i32(8, 42);
        buf.put_i64_ordered(16, 1 << 40);
        buf.put_i32_ordered(24, -1);

        assert_eq!(buf.get_i64(0), -7);
        assert_eq!(buf.get_i32(8), 42);
        assert_eq!(buf.get_i64_volatile(16), 1 << 40);
        assert_eq!(buf.get_i32_volatile(24), -1);
    }

    #[test]
    fn test_cas_and_add() {
        let backing = AlignedBuffer::new(16);
        let buf = backing.atomic_buffer();

        assert!(buf.compare_and_set_i64(0, 0, 10));
        assert!(!buf.compare_and_set_i64(0, 0, 20));
        assert_eq!(buf.get_and_add_i64(0, 5), 10);
        assert_eq!(buf.get_i64(0), 15);
    }

    #[test]
    fn test_bytes_and_views() {
        let backing = AlignedBuffer::new(32);
        let buf = backing.atomic_buffer();
        let view = buf.view(8, 16);

        view.put_bytes(0, b"hello");
        let mut out = [0u8; 5];
        buf.get_bytes(8, &mut out);
        assert_eq!(&out, b"hello");

        view.set_memory(0, 16, 0);
        buf.get_bytes(8, &mut out);
        assert_eq!(out, [0u8; 5]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_panics() {
        let backing = AlignedBuffer::new(16);
        let _ = backing.atomic_buffer().get_i64(16);
    }

    #[test]
    fn test_aligned_buffer_rounds_up() {
        let backing = AlignedBuffer::new(13);
        assert_eq!(backing.len(), 13);
        assert_eq!(backing.atomic_buffer().capacity(), 13);
    }
}
