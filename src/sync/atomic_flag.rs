//! Atomic compare-and-swap cell over a small enumerated value.
//!
//! [`AtomicFlag`] is the sole mutation path for worker activity state: no
//! separate lock may guard the same state. The cell carries an explicit
//! "unset" value distinct from every enumerated value; two unset flags
//! compare equal, an unset flag never equals a set flag, and equal flags
//! produce equal hash codes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU8, Ordering};

/// A small enumerated domain storable inside an [`AtomicFlag`].
///
/// Implementations map each variant to a raw byte. The encoding must be
/// injective and must never produce [`AtomicFlag::UNSET_RAW`], which is
/// reserved for the unset state.
pub trait FlagValue: Copy + Eq + Hash + fmt::Debug {
    /// Encodes the value into its raw byte.
    fn into_raw(self) -> u8;

    /// Decodes a raw byte back into the value.
    ///
    /// Returns `None` for bytes outside the enumerated domain.
    fn from_raw(raw: u8) -> Option<Self>;
}

/// An atomic cell holding either a [`FlagValue`] or the unset state.
///
/// All reads and writes are atomic; [`AtomicFlag::try_set`] is the only
/// conditional transition and never panics, including when the expectation
/// is the unset state.
pub struct AtomicFlag<T: FlagValue> {
    cell: AtomicU8,
    _marker: PhantomData<T>,
}

impl<T: FlagValue> AtomicFlag<T> {
    /// Raw byte reserved for the unset state.
    pub const UNSET_RAW: u8 = u8::MAX;

    /// Creates a flag holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        let raw = value.into_raw();
        debug_assert_ne!(raw, Self::UNSET_RAW, "encoding collides with the unset sentinel");
        Self {
            cell: AtomicU8::new(raw),
            _marker: PhantomData,
        }
    }

    /// Creates a flag in the unset state.
    #[must_use]
    pub fn unset() -> Self {
        Self {
            cell: AtomicU8::new(Self::UNSET_RAW),
            _marker: PhantomData,
        }
    }

    /// Atomically reads the current value; `None` means unset.
    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<T> {
        Self::decode(self.cell.load(Ordering::SeqCst))
    }

    /// Atomically overwrites the current value unconditionally.
    ///
    /// Intended for construction and reset only, never under contention;
    /// contended transitions go through [`AtomicFlag::try_set`].
    #[inline]
    pub fn set(&self, value: T) {
        self.cell.store(value.into_raw(), Ordering::SeqCst);
    }

    /// Atomically returns the flag to the unset state.
    #[inline]
    pub fn reset(&self) {
        self.cell.store(Self::UNSET_RAW, Ordering::SeqCst);
    }

    /// Atomic compare-and-swap.
    ///
    /// Succeeds iff the current value equals `expected` at the atomic
    /// instant, in which case the current value becomes `new`. Returns the
    /// success flag together with the pre-swap value observed at that
    /// instant, regardless of outcome. Never panics; failure is signaled
    /// solely by the boolean.
    #[inline]
    pub fn try_set(&self, new: T, expected: Option<T>) -> (bool, Option<T>) {
        let expected_raw = expected.map_or(Self::UNSET_RAW, FlagValue::into_raw);
        match self.cell.compare_exchange(
            expected_raw,
            new.into_raw(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(prev) => (true, Self::decode(prev)),
            Err(prev) => (false, Self::decode(prev)),
        }
    }

    #[inline]
    fn decode(raw: u8) -> Option<T> {
        if raw == Self::UNSET_RAW {
            None
        } else {
            T::from_raw(raw)
        }
    }
}

impl<T: FlagValue> Default for AtomicFlag<T> {
    fn default() -> Self {
        Self::unset()
    }
}

impl<T: FlagValue> fmt::Debug for AtomicFlag<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicFlag").field(&self.get()).finish()
    }
}

/// Two flags compare equal iff their wrapped values compare equal; the
/// unset state is a distinct comparable value.
impl<T: FlagValue> PartialEq for AtomicFlag<T> {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl<T: FlagValue> Eq for AtomicFlag<T> {}

/// Read-as-value comparison: a flag compares against a plain enumerated
/// value without an explicit [`AtomicFlag::get`] at the call site. An
/// unset flag never equals any set value.
impl<T: FlagValue> PartialEq<T> for AtomicFlag<T> {
    fn eq(&self, other: &T) -> bool {
        self.get() == Some(*other)
    }
}

/// Equal flags produce equal hash codes, including the unset state.
impl<T: FlagValue> Hash for AtomicFlag<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.get().hash(state);
    }
}
