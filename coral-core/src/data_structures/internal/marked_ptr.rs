// Marked pointer operations for index `right` links.
//
// Bit layout:
//   Bit 0: FROZEN_MARK - the index node owning this link is being unlinked
//                        (or its whole level was detached from the head)
//
// Once a `right` link carries the mark it never changes again. Any CAS that
// expects the unmarked successor fails, so nothing can be linked behind an
// index node that is on its way out.
//
const FROZEN_MARK: usize = 0b1;

/// A pointer that uses the least significant bit as a freeze flag.
#[derive(Copy, Clone)]
pub(crate) struct MarkedPtr<T> {
    ptr: *mut T,
}

impl<T> MarkedPtr<T> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Wrap a (possibly marked) pointer.
    #[inline]
    pub(crate) fn new(ptr: *mut T) -> Self {
        MarkedPtr { ptr }
    }

    /// Strip the mark bit from a raw pointer without building a MarkedPtr.
    #[inline]
    pub(crate) fn unmask(ptr: *mut T) -> *mut T {
        (ptr as usize & !FROZEN_MARK) as *mut T
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// Clean pointer, safe to dereference when non-null.
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut T {
        Self::unmask(self.ptr)
    }

    /// Raw pointer with the mark intact (for CAS operations).
    #[inline]
    pub(crate) fn as_raw(&self) -> *mut T {
        self.ptr
    }

    #[inline]
    pub(crate) fn is_frozen(&self) -> bool {
        (self.ptr as usize & FROZEN_MARK) != 0
    }

    /// Frozen version of this pointer.
    #[inline]
    pub(crate) fn frozen(&self) -> Self {
        MarkedPtr {
            ptr: (self.ptr as usize | FROZEN_MARK) as *mut T,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_freeze_keeps_address() {
        let mut slot = 0u64;
        let raw: *mut u64 = &mut slot;

        let marked = MarkedPtr::new(raw);
        assert!(!marked.is_frozen());

        let frozen = marked.frozen();
        assert!(frozen.is_frozen());
        assert_eq!(frozen.as_ptr(), raw);
        assert_ne!(frozen.as_raw(), raw);
        assert_eq!(MarkedPtr::unmask(frozen.as_raw()), raw);
    }

    #[test]
    fn test_null_can_be_frozen() {
        let frozen = MarkedPtr::<u64>::new(std::ptr::null_mut()).frozen();
        assert!(frozen.is_frozen());
        assert!(frozen.as_ptr().is_null());
    }
}
