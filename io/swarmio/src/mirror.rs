//! Double-mapped memory regions.
//!
//! A region's pages are mapped twice, back to back, into virtual memory,
//! so index `i` and index `i + capacity` address the same element. Ring
//! consumers can therefore read or write any contiguous run of up to
//! `capacity` elements starting anywhere in the first mapping with no
//! wrap check and no modulo on the hot path.

use std::io;
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::error::Error;

/// A fixed region of `capacity` elements backed by an anonymous
/// memory-resident file whose pages appear twice in the address space.
pub(crate) struct MirrorRegion<T> {
    base: NonNull<T>,
    capacity: usize,
    bytes: usize,
    _marker: PhantomData<T>,
}

impl<T> MirrorRegion<T> {
    /// Allocate a region of at least `hint` elements.
    ///
    /// The capacity is rounded up to the smallest element count whose
    /// byte size is a whole number of pages; the second mapping must
    /// start on a page boundary for the aliasing to hold.
    pub fn alloc(hint: usize) -> Result<Self, Error> {
        if hint == 0 {
            return Err(Error::InvalidCapacity);
        }
        let page = page_size();
        let granule = page / gcd(page, size_of::<T>());
        let capacity = hint.div_ceil(granule) * granule;
        let bytes = capacity * size_of::<T>();

        // Anonymous in-memory file sized to one copy of the region.
        let fd = unsafe { libc::memfd_create(c"swarmio-ring".as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(Error::Allocation(io::Error::last_os_error()));
        }
        if unsafe { libc::ftruncate(fd, bytes as libc::off_t) } != 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Allocation(err));
        }

        // Reserve twice the span, then map the file over each half so the
        // two halves alias the same pages.
        let span = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                bytes * 2,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if span == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(Error::Allocation(err));
        }

        let prot = libc::PROT_READ | libc::PROT_WRITE;
        let flags = libc::MAP_SHARED | libc::MAP_FIXED;
        let lo = unsafe { libc::mmap(span, bytes, prot, flags, fd, 0) };
        let hi = unsafe { libc::mmap(span.byte_add(bytes), bytes, prot, flags, fd, 0) };
        let map_err = if lo == libc::MAP_FAILED || hi == libc::MAP_FAILED {
            Some(io::Error::last_os_error())
        } else {
            None
        };

        // The file stays alive through the mappings; the fd is not needed
        // past this point, so a failure below leaks nothing.
        unsafe { libc::close(fd) };

        if let Some(err) = map_err {
            unsafe { libc::munmap(span, bytes * 2) };
            return Err(Error::Allocation(err));
        }

        Ok(MirrorRegion {
            base: NonNull::new(span as *mut T).expect("mmap returned null"),
            capacity,
            bytes,
            _marker: PhantomData,
        })
    }

    /// Number of distinct elements in the region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pointer to element `index`, which may range over `[0, 2 * capacity)`;
    /// the upper half aliases the lower.
    ///
    /// # Safety
    ///
    /// `index` must be below `2 * capacity`, and the caller is responsible
    /// for synchronising access to the element.
    pub unsafe fn at(&self, index: usize) -> *mut T {
        debug_assert!(index < self.capacity * 2);
        unsafe { self.base.as_ptr().add(index) }
    }
}

impl<T> Drop for MirrorRegion<T> {
    fn drop(&mut self) {
        // One munmap covers both halves of the reservation.
        unsafe {
            let result = libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.bytes * 2);
            debug_assert_eq!(result, 0, "munmap failed");
        }
    }
}

// Safety: the region is plain memory; per-element access discipline is the
// caller's responsibility.
unsafe impl<T: Send> Send for MirrorRegion<T> {}
unsafe impl<T: Sync> Sync for MirrorRegion<T> {}

pub(crate) fn page_size() -> usize {
    // Safety: sysconf has no memory effects.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn halves_alias() {
        let region = MirrorRegion::<u64>::alloc(1).unwrap();
        let cap = region.capacity();
        unsafe {
            for i in 0..cap {
                *region.at(i) = i as u64;
            }
            for i in 0..cap {
                assert_eq!(*region.at(i + cap), i as u64);
            }
            // A write through the upper half lands in the lower half.
            *region.at(cap + 3) = 99;
            assert_eq!(*region.at(3), 99);
        }
    }

    #[test]
    fn capacity_is_page_aligned() {
        let page = page_size();
        let granule = page / gcd(page, size_of::<u64>());
        assert_eq!(MirrorRegion::<u64>::alloc(1).unwrap().capacity(), granule);
        assert_eq!(
            MirrorRegion::<u64>::alloc(granule + 1).unwrap().capacity(),
            granule * 2
        );
    }

    #[test]
    fn odd_sized_elements_stay_aligned() {
        struct Odd([u8; 12]);
        let region = MirrorRegion::<Odd>::alloc(1).unwrap();
        assert_eq!(region.capacity() * size_of::<Odd>() % page_size(), 0);
    }

    #[test]
    fn zero_hint_is_rejected() {
        assert!(MirrorRegion::<u64>::alloc(0).is_err());
    }
}
