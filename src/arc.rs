//! `CountedArc` is the atomically reference-counted alternative to `CountedRc`, safe to share
//! across threads.

use core::{
    borrow,
    cmp,
    convert,
    fmt,
    hash,
    marker::{self, PhantomData},
    mem,
    ops,
    ptr::{self, NonNull},
    sync::atomic::{self, AtomicUsize},
};

use alloc::boxed::Box;

//  A count past this bound indicates runaway forgotten clones; panic before it can wrap.
const MAX_COUNT: usize = isize::MAX as usize;

//  Heap cell shared by every handle of one ownership group.
struct AtomicCell<T> {
    count: AtomicUsize,
    value: T,
}

/// An atomically reference-counted pointer.
///
/// `CountedArc` mirrors the API of [`CountedRc`](super::CountedRc), with the count maintained by
/// atomic operations: the type is `Send` and `Sync` whenever `T` is `Send + Sync`, and clones may
/// be released from any thread. Unless handles actually cross threads, `CountedRc` is the cheaper
/// choice.
///
/// The inherent methods are all associated functions to avoid conflicts with the methods of the
/// inner type `T` which are brought into scope by the `Deref` implementation.
pub struct CountedArc<T> {
    inner: Option<NonNull<AtomicCell<T>>>,
    _marker: PhantomData<AtomicCell<T>>,
}

//  Safety:
//  -   Sending a handle may drop the value on the receiving thread, hence `T: Send`.
//  -   A handle gives shared access to the value from its thread, hence `T: Sync`.
unsafe impl<T: Send + Sync> Send for CountedArc<T> {}

//  Safety:
//  -   `&CountedArc` allows cloning, hence sending a share, hence the same bounds as `Send`.
unsafe impl<T: Send + Sync> Sync for CountedArc<T> {}

impl<T> CountedArc<T> {
    /// Constructs a new `CountedArc<T>` owning `value`, with a count of 1.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedArc;
    ///
    /// let arc = CountedArc::new(42);
    ///
    /// assert_eq!(42, *arc);
    /// assert_eq!(1, CountedArc::use_count(&arc));
    /// ```
    #[inline(always)]
    pub fn new(value: T) -> Self {
        let cell = AtomicCell { count: AtomicUsize::new(1), value };
        let pointer = NonNull::from(Box::leak(Box::new(cell)));

        Self { inner: Some(pointer), _marker: PhantomData }
    }

    /// Constructs an emptied `CountedArc<T>`, holding neither value nor count.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedArc;
    ///
    /// let arc = CountedArc::<i32>::empty();
    ///
    /// assert!(CountedArc::is_empty(&arc));
    /// assert_eq!(0, CountedArc::use_count(&arc));
    /// ```
    #[inline(always)]
    pub fn empty() -> Self { Self { inner: None, _marker: PhantomData } }

    /// Returns the number of handles in the instance's ownership group, or 0 if emptied.
    ///
    /// The count is a momentary snapshot: another thread may change it before the caller acts on
    /// the returned value, except when it is 1, which only the caller can change.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedArc;
    ///
    /// let arc = CountedArc::new(42);
    /// let other = arc.clone();
    ///
    /// assert_eq!(2, CountedArc::use_count(&arc));
    /// # drop(other);
    /// ```
    #[inline(always)]
    pub fn use_count(this: &Self) -> usize {
        Self::cell(this).map_or(0, |cell| cell.count.load(atomic::Ordering::Acquire))
    }

    /// Returns whether the instance is emptied.
    #[inline(always)]
    pub fn is_empty(this: &Self) -> bool { this.inner.is_none() }

    /// Moves the instance's ownership share into a new handle, leaving the instance emptied.
    ///
    /// The count is unchanged: the new handle replaces the old one within the ownership group.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedArc;
    ///
    /// let mut arc = CountedArc::new(42);
    /// let taken = CountedArc::take(&mut arc);
    ///
    /// assert_eq!(1, CountedArc::use_count(&taken));
    /// assert_eq!(0, CountedArc::use_count(&arc));
    /// ```
    #[inline(always)]
    pub fn take(this: &mut Self) -> Self { mem::replace(this, Self::empty()) }

    /// Provides a reference to the value, or `None` if the instance is emptied.
    #[inline(always)]
    pub fn get(this: &Self) -> Option<&T> {
        Self::cell(this).map(|cell| &cell.value)
    }

    /// Provides a mutable reference to the value, if the instance is the sole member of its
    /// ownership group.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedArc;
    ///
    /// let mut arc = CountedArc::new(42);
    /// *CountedArc::get_mut(&mut arc).unwrap() = 33;
    ///
    /// assert_eq!(33, *arc);
    /// ```
    #[inline(always)]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let pointer = this.inner?;

        //  Acquire pairs with the Release decrements of former group members, so their accesses
        //  to the value happened-before the exclusive access granted here.
        //
        //  Safety:
        //  -   The cell is valid for as long as any group member lives, and `this` lives.
        if unsafe { pointer.as_ref() }.count.load(atomic::Ordering::Acquire) != 1 {
            return None;
        }

        //  Safety:
        //  -   Count = 1, hence `this` is the sole owner, and it is mutably borrowed.
        Some(unsafe { &mut (*pointer.as_ptr()).value })
    }

    /// Returns the inner value, if the instance is the sole member of its ownership group.
    ///
    /// Otherwise the instance is returned intact, its count unchanged.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedArc;
    ///
    /// let arc = CountedArc::new(42);
    ///
    /// assert_eq!(Ok(42), CountedArc::try_unwrap(arc));
    /// ```
    #[inline(always)]
    pub fn try_unwrap(mut this: Self) -> Result<T, Self> {
        let Some(pointer) = this.inner else { return Err(this) };

        //  Claiming the count down to 0 makes `this` the unique owner; a concurrent clone of
        //  another handle can no longer exist once the exchange succeeds.
        //
        //  Safety:
        //  -   The cell is valid for as long as any group member lives, and `this` lives.
        let claimed = unsafe { pointer.as_ref() }
            .count
            .compare_exchange(1, 0, atomic::Ordering::Relaxed, atomic::Ordering::Relaxed);

        if claimed.is_err() {
            return Err(this);
        }

        atomic::fence(atomic::Ordering::Acquire);

        //  Emptying `inner` makes the drop of `this` a no-op.
        this.inner = None;

        //  Safety:
        //  -   The exchange succeeded, hence sole ownership.
        //  -   `pointer` was allocated by Box in `new`.
        let cell = unsafe { Box::from_raw(pointer.as_ptr()) };

        Ok(cell.value)
    }

    /// Returns true if the two `CountedArc` belong to the same ownership group.
    ///
    /// Emptied handles belong to no group; `ptr_eq` involving one is always false.
    #[inline(always)]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (this.inner, other.inner) {
            (Some(left), Some(right)) => ptr::eq(left.as_ptr(), right.as_ptr()),
            _ => false,
        }
    }

    #[inline(always)]
    fn cell(this: &Self) -> Option<&AtomicCell<T>> {
        //  Safety:
        //  -   The cell is valid for as long as any group member lives, and `this` lives.
        this.inner.map(|pointer| unsafe { &*pointer.as_ptr() })
    }
}

impl<T> Clone for CountedArc<T> {
    /// Joins the instance's ownership group, incrementing its count by 1.
    ///
    /// The value is not copied, it is shared. Cloning an emptied handle yields another emptied
    /// handle.
    ///
    /// #   Panics
    ///
    /// If the count exceeds `isize::MAX`.
    #[inline(always)]
    fn clone(&self) -> Self {
        if let Some(cell) = Self::cell(self) {
            //  Relaxed suffices: the clone is ordered by the `&self` borrow, which proves a live
            //  handle, hence a count of at least 1.
            let count = cell.count.fetch_add(1, atomic::Ordering::Relaxed);
            assert!(count <= MAX_COUNT, "count overflow");
        }

        Self { inner: self.inner, _marker: PhantomData }
    }
}

impl<T> Drop for CountedArc<T> {
    #[inline(always)]
    fn drop(&mut self) {
        let Some(pointer) = self.inner else { return };

        //  Release publishes this handle's accesses to the value to whichever group member
        //  performs the final decrement.
        //
        //  Safety:
        //  -   The cell is valid for as long as any group member lives, and `self` still does.
        if unsafe { pointer.as_ref() }.count.fetch_sub(1, atomic::Ordering::Release) != 1 {
            return;
        }

        //  Acquire pairs with the Release decrements above, so every other member's accesses
        //  happened-before the deallocation.
        atomic::fence(atomic::Ordering::Acquire);

        //  Safety:
        //  -   Count transitioned 1 -> 0, hence `self` was the last group member.
        //  -   `pointer` was allocated by Box in `new`.
        let _ = unsafe { Box::from_raw(pointer.as_ptr()) };
    }
}

impl<T> convert::AsRef<T> for CountedArc<T> {
    /// #   Panics
    ///
    /// If the instance is emptied.
    #[inline(always)]
    fn as_ref(&self) -> &T { &**self }
}

impl<T> borrow::Borrow<T> for CountedArc<T> {
    /// #   Panics
    ///
    /// If the instance is emptied.
    #[inline(always)]
    fn borrow(&self) -> &T { &**self }
}

impl<T: fmt::Debug> fmt::Debug for CountedArc<T> {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("<emptied>"),
        }
    }
}

impl<T> Default for CountedArc<T> {
    /// Returns an emptied handle, so that `mem::take` empties its argument.
    #[inline(always)]
    fn default() -> Self { Self::empty() }
}

impl<T> ops::Deref for CountedArc<T> {
    type Target = T;

    /// #   Panics
    ///
    /// If the instance is emptied; use [`CountedArc::get`] for a checked access.
    #[inline(always)]
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an emptied CountedArc"),
        }
    }
}

impl<T: fmt::Display> fmt::Display for CountedArc<T> {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("<emptied>"),
        }
    }
}

impl<T: cmp::Eq> cmp::Eq for CountedArc<T> {}

impl<T> From<T> for CountedArc<T> {
    #[inline(always)]
    fn from(value: T) -> Self { Self::new(value) }
}

impl<T> From<Box<T>> for CountedArc<T> {
    #[inline(always)]
    fn from(value: Box<T>) -> Self { Self::new(*value) }
}

impl<T: hash::Hash> hash::Hash for CountedArc<T> {
    #[inline(always)]
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        //  An owning handle hashes exactly as its value, as the `Borrow` impl requires.
        match Self::get(self) {
            Some(value) => value.hash(state),
            None => state.write_u8(0),
        }
    }
}

impl<T: cmp::Ord> cmp::Ord for CountedArc<T> {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        if Self::ptr_eq(self, other) {
            return cmp::Ordering::Equal;
        }

        match (Self::get(self), Self::get(other)) {
            (Some(left), Some(right)) => left.cmp(right),
            (None, None) => cmp::Ordering::Equal,
            (None, Some(_)) => cmp::Ordering::Less,
            (Some(_), None) => cmp::Ordering::Greater,
        }
    }
}

impl<T: cmp::PartialEq> cmp::PartialEq for CountedArc<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        match (Self::get(self), Self::get(other)) {
            (Some(left), Some(right)) => left.eq(right),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: cmp::PartialOrd> cmp::PartialOrd for CountedArc<T> {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        match (Self::get(self), Self::get(other)) {
            (Some(left), Some(right)) => left.partial_cmp(right),
            (None, None) => Some(cmp::Ordering::Equal),
            (None, Some(_)) => Some(cmp::Ordering::Less),
            (Some(_), None) => Some(cmp::Ordering::Greater),
        }
    }
}

impl<T> fmt::Pointer for CountedArc<T> {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pointer = Self::get(self).map_or(ptr::null(), |value| value as *const T);
        fmt::Pointer::fmt(&pointer, f)
    }
}

impl<T> marker::Unpin for CountedArc<T> {}

#[cfg(test)]
mod tests {

use super::*;

use std::sync::Arc;
use std::thread;

//  Payload bumping a shared counter when dropped, to observe release across threads.
struct DropCounter(Arc<AtomicUsize>);

impl Drop for DropCounter {
    fn drop(&mut self) { self.0.fetch_add(1, atomic::Ordering::SeqCst); }
}

#[test]
fn arc_new_counts_one() {
    let arc = CountedArc::new(42);

    assert_eq!(1, CountedArc::use_count(&arc));
    assert!(!CountedArc::is_empty(&arc));
    assert_eq!(42, *arc);
}

#[test]
fn arc_clone_shares_value() {
    let arc = CountedArc::new(42);

    {
        let other = arc.clone();

        assert_eq!(2, CountedArc::use_count(&arc));
        assert!(CountedArc::ptr_eq(&arc, &other));
        assert_eq!(42, *other);
    }

    assert_eq!(1, CountedArc::use_count(&arc));
}

#[test]
fn arc_clone_emptied_is_emptied() {
    let arc = CountedArc::<i32>::empty();
    let other = arc.clone();

    assert!(CountedArc::is_empty(&other));
    assert_eq!(0, CountedArc::use_count(&other));
}

#[test]
fn arc_last_drop_releases_value_once() {
    let drops = Arc::new(AtomicUsize::new(0));

    {
        let arc = CountedArc::new(DropCounter(drops.clone()));
        let other = arc.clone();

        drop(arc);

        assert_eq!(0, drops.load(atomic::Ordering::SeqCst));
        assert_eq!(1, CountedArc::use_count(&other));
    }

    assert_eq!(1, drops.load(atomic::Ordering::SeqCst));
}

#[test]
fn arc_reassignment_releases_previous_group() {
    let drops = Arc::new(AtomicUsize::new(0));
    let replaced = Arc::new(AtomicUsize::new(0));

    let arc = CountedArc::new(DropCounter(drops.clone()));
    let mut other = CountedArc::new(DropCounter(replaced.clone()));
    assert_eq!(1, CountedArc::use_count(&other));

    other = arc.clone();

    assert_eq!(1, replaced.load(atomic::Ordering::SeqCst));
    assert_eq!(0, drops.load(atomic::Ordering::SeqCst));
    assert_eq!(2, CountedArc::use_count(&arc));
    assert!(CountedArc::ptr_eq(&arc, &other));
}

#[test]
fn arc_self_assignment_is_noop() {
    let mut arc = CountedArc::new(42);

    #[allow(clippy::redundant_clone)]
    {
        arc = arc.clone();
    }

    assert_eq!(1, CountedArc::use_count(&arc));
    assert_eq!(42, *arc);
}

#[test]
fn arc_hash_agrees_with_borrowed_value() {
    use std::collections::HashMap;

    let mut map = HashMap::new();
    map.insert(CountedArc::new("key".to_string()), 7);

    assert_eq!(Some(&7), map.get(&"key".to_string()));
    assert_eq!(None, map.get(&"other".to_string()));
}

#[test]
fn arc_take_transfers_share() {
    let mut arc = CountedArc::new(42);
    let taken = CountedArc::take(&mut arc);

    assert_eq!(1, CountedArc::use_count(&taken));
    assert!(CountedArc::is_empty(&arc));
    assert_eq!(0, CountedArc::use_count(&arc));
}

#[test]
#[should_panic(expected = "dereferenced an emptied CountedArc")]
fn arc_deref_emptied_panics() {
    let mut arc = CountedArc::new(42);
    let _taken = CountedArc::take(&mut arc);

    let _ = *arc;
}

#[test]
fn arc_get_mut_requires_sole_ownership() {
    let mut arc = CountedArc::new(42);

    *CountedArc::get_mut(&mut arc).unwrap() = 33;
    assert_eq!(33, *arc);

    let other = arc.clone();
    assert!(CountedArc::get_mut(&mut arc).is_none());

    drop(other);
    assert!(CountedArc::get_mut(&mut arc).is_some());
}

#[test]
fn arc_try_unwrap_requires_sole_ownership() {
    let arc = CountedArc::new(42);
    let other = arc.clone();

    let arc = CountedArc::try_unwrap(arc).unwrap_err();
    assert_eq!(2, CountedArc::use_count(&arc));

    drop(other);
    assert_eq!(Ok(42), CountedArc::try_unwrap(arc));
}

#[test]
fn arc_releases_value_once_across_threads() {
    let drops = Arc::new(AtomicUsize::new(0));
    let arc = CountedArc::new(DropCounter(drops.clone()));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let shared = arc.clone();

            thread::spawn(move || {
                assert!(CountedArc::use_count(&shared) >= 1);
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(1, CountedArc::use_count(&arc));
    assert_eq!(0, drops.load(atomic::Ordering::SeqCst));

    drop(arc);
    assert_eq!(1, drops.load(atomic::Ordering::SeqCst));
}

#[test]
fn arc_last_drop_may_come_from_another_thread() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut arc = CountedArc::new(DropCounter(drops.clone()));

    let taken = CountedArc::take(&mut arc);
    let worker = thread::spawn(move || drop(taken));

    worker.join().unwrap();

    assert!(CountedArc::is_empty(&arc));
    assert_eq!(1, drops.load(atomic::Ordering::SeqCst));
}

} // mod tests
