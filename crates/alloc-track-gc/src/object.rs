//! GC object layout

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Header flag bits.
///
/// The low nibble is owned by the heap, the high nibble is reserved for
/// embedders (the equivalent of per-object user flags in other runtimes).
/// Every user bit has a matching user word in the header.
pub mod flags {
    /// Object has been handed to the sweeper
    pub const RECLAIMED: u8 = 1 << 0;
    /// First reserved user bit
    pub const USER0: u8 = 1 << 4;
    /// Second reserved user bit
    pub const USER1: u8 = 1 << 5;
    /// Third reserved user bit
    pub const USER2: u8 = 1 << 6;
    /// Fourth reserved user bit
    pub const USER3: u8 = 1 << 7;

    /// Mask of all embedder-owned bits
    pub const USER_MASK: u8 = USER0 | USER1 | USER2 | USER3;

    /// User word slot paired with a single user bit
    pub const fn user_slot(bit: u8) -> Option<usize> {
        if bit.count_ones() != 1 || bit & !USER_MASK != 0 {
            return None;
        }
        Some(bit.trailing_zeros() as usize - 4)
    }
}

/// GC object header
#[repr(C)]
pub struct GcHeader {
    /// Heap and user flag bits
    flags: AtomicU8,
    /// Object type tag
    tag: u8,
    /// Embedder-owned words, one per user bit
    user: [AtomicU32; 4],
}

impl GcHeader {
    /// Create new header
    pub const fn new(tag: u8) -> Self {
        Self {
            flags: AtomicU8::new(0),
            tag,
            user: [const { AtomicU32::new(0) }; 4],
        }
    }

    /// Get object tag
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Raw flag byte
    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Acquire)
    }

    /// Set the given flag bits
    #[inline]
    pub fn set_flag(&self, bits: u8) {
        self.flags.fetch_or(bits, Ordering::AcqRel);
    }

    /// Clear the given flag bits
    #[inline]
    pub fn clear_flag(&self, bits: u8) {
        self.flags.fetch_and(!bits, Ordering::AcqRel);
    }

    /// Returns true if all of the given bits are set
    #[inline]
    pub fn has_flag(&self, bits: u8) -> bool {
        self.flags.load(Ordering::Acquire) & bits == bits
    }

    /// User word in `slot` (see [`flags::user_slot`])
    #[inline]
    pub fn user_word(&self, slot: usize) -> u32 {
        self.user[slot].load(Ordering::Acquire)
    }

    /// Store a user word
    #[inline]
    pub fn set_user_word(&self, slot: usize, word: u32) {
        self.user[slot].store(word, Ordering::Release);
    }
}

impl Clone for GcHeader {
    fn clone(&self) -> Self {
        // A cloned header belongs to a fresh object: user state does not carry over
        Self::new(self.tag)
    }
}

impl fmt::Debug for GcHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcHeader")
            .field("flags", &format_args!("{:#010b}", self.flags()))
            .field("tag", &self.tag)
            .finish()
    }
}

/// A header followed by its value, as stored by the heap.
pub struct GcBox<T: ?Sized> {
    pub(crate) header: GcHeader,
    pub(crate) value: T,
}

impl<T: ?Sized> GcBox<T> {
    /// The object header
    pub fn header(&self) -> &GcHeader {
        &self.header
    }
}

/// Type-erased heap slot
pub(crate) type ErasedBox = Rc<GcBox<dyn Any>>;

/// Handle to a GC-managed object.
///
/// The object stays reachable while at least one handle exists; once the
/// last handle is dropped the object is garbage and is reclaimed by the
/// next collection on its heap.
pub struct Gc<T: 'static> {
    ptr: Rc<GcBox<T>>,
}

impl<T: 'static> Gc<T> {
    pub(crate) fn new(ptr: Rc<GcBox<T>>) -> Self {
        Self { ptr }
    }

    /// The object header
    pub fn header(&self) -> &GcHeader {
        &self.ptr.header
    }

    /// Returns true if both handles refer to the same object
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.ptr, &b.ptr)
    }
}

impl<T: 'static> Clone for Gc<T> {
    fn clone(&self) -> Self {
        Self {
            ptr: Rc::clone(&self.ptr),
        }
    }
}

impl<T: 'static> Deref for Gc<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.ptr.value
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.ptr.value, f)
    }
}

/// Object type tags
pub mod tags {
    /// Plain object
    pub const OBJECT: u8 = 3;
    /// String object
    pub const STRING: u8 = 1;
    /// Array object
    pub const ARRAY: u8 = 2;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_flags() {
        let header = GcHeader::new(tags::OBJECT);
        assert_eq!(header.flags(), 0);
        assert!(!header.has_flag(flags::USER0));

        header.set_flag(flags::USER0);
        assert!(header.has_flag(flags::USER0));
        assert!(!header.has_flag(flags::USER1));

        header.set_flag(flags::USER1);
        header.clear_flag(flags::USER0);
        assert!(!header.has_flag(flags::USER0));
        assert!(header.has_flag(flags::USER1));
    }

    #[test]
    fn test_clone_drops_user_bits() {
        let header = GcHeader::new(tags::STRING);
        header.set_flag(flags::USER2);
        let copy = header.clone();
        assert_eq!(copy.tag(), tags::STRING);
        assert_eq!(copy.flags() & flags::USER_MASK, 0);
    }

    #[test]
    fn test_user_words() {
        assert_eq!(flags::user_slot(flags::USER0), Some(0));
        assert_eq!(flags::user_slot(flags::USER3), Some(3));
        assert_eq!(flags::user_slot(flags::RECLAIMED), None);
        assert_eq!(flags::user_slot(flags::USER0 | flags::USER1), None);

        let header = GcHeader::new(tags::OBJECT);
        header.set_user_word(1, 42);
        assert_eq!(header.user_word(1), 42);
        assert_eq!(header.user_word(0), 0);
        assert_eq!(header.clone().user_word(1), 0);
    }
}
