//! `CountedRc` is a run-time reference-counted heap-allocated pointer with an explicit emptied state.

use core::{
    borrow,
    cell::Cell,
    cmp,
    convert,
    fmt,
    hash,
    marker::{self, PhantomData},
    mem,
    ops,
    ptr::{self, NonNull},
};

use alloc::boxed::Box;

//  Heap cell shared by every handle of one ownership group. The count tracks the number of live
//  handles; the cell and its payload are freed when the count drops to 0.
struct CountedCell<T> {
    count: Cell<usize>,
    value: T,
}

/// A run-time reference-counted pointer.
///
/// The inherent methods of `CountedRc` are all associated functions to avoid conflicts with the
/// methods of the inner type `T` which are brought into scope by the `Deref` implementation.
///
/// A `CountedRc` is in one of two states:
///
/// -   **Owning**: the handle belongs to an ownership group of one or more handles sharing a single
///     heap-allocated value and a single count; the count always equals the number of live owning
///     handles of the group.
/// -   **Emptied**: the handle holds neither value nor count, either because it was created so by
///     [`CountedRc::empty`] or because its contents were moved out by [`CountedRc::take`].
///
/// The count is an ordinary non-atomic integer: `CountedRc` is neither `Send` nor `Sync`, and the
/// compiler enforces single-threaded use. See [`CountedArc`](super::CountedArc) for the
/// atomic-count alternative.
pub struct CountedRc<T> {
    inner: Option<NonNull<CountedCell<T>>>,
    _marker: PhantomData<CountedCell<T>>,
}

impl<T> CountedRc<T> {
    /// Constructs a new `CountedRc<T>` owning `value`, with a count of 1.
    ///
    /// This uses `Box` under the hood; allocation failure aborts, as per `Box::new`.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let rc = CountedRc::new(42);
    ///
    /// assert_eq!(42, *rc);
    /// assert_eq!(1, CountedRc::use_count(&rc));
    /// ```
    #[inline(always)]
    pub fn new(value: T) -> Self {
        let cell = CountedCell { count: Cell::new(1), value };
        let pointer = NonNull::from(Box::leak(Box::new(cell)));

        Self { inner: Some(pointer), _marker: PhantomData }
    }

    /// Constructs an emptied `CountedRc<T>`, holding neither value nor count.
    ///
    /// No allocation is performed.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let rc = CountedRc::<i32>::empty();
    ///
    /// assert!(CountedRc::is_empty(&rc));
    /// assert_eq!(0, CountedRc::use_count(&rc));
    /// ```
    #[inline(always)]
    pub fn empty() -> Self { Self { inner: None, _marker: PhantomData } }

    /// Returns the number of handles in the instance's ownership group, or 0 if emptied.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let rc = CountedRc::new(42);
    /// assert_eq!(1, CountedRc::use_count(&rc));
    ///
    /// let other = rc.clone();
    /// assert_eq!(2, CountedRc::use_count(&rc));
    /// assert_eq!(2, CountedRc::use_count(&other));
    /// ```
    #[inline(always)]
    pub fn use_count(this: &Self) -> usize {
        Self::cell(this).map_or(0, |cell| cell.count.get())
    }

    /// Returns whether the instance is emptied.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let mut rc = CountedRc::new(42);
    /// assert!(!CountedRc::is_empty(&rc));
    ///
    /// let taken = CountedRc::take(&mut rc);
    /// assert!(CountedRc::is_empty(&rc));
    /// assert!(!CountedRc::is_empty(&taken));
    /// ```
    #[inline(always)]
    pub fn is_empty(this: &Self) -> bool { this.inner.is_none() }

    /// Moves the instance's ownership share into a new handle, leaving the instance emptied.
    ///
    /// The count is unchanged: the new handle replaces the old one within the ownership group.
    /// Taking from an emptied instance returns another emptied handle.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let mut rc = CountedRc::new(42);
    /// let taken = CountedRc::take(&mut rc);
    ///
    /// assert_eq!(42, *taken);
    /// assert_eq!(1, CountedRc::use_count(&taken));
    /// assert_eq!(0, CountedRc::use_count(&rc));
    /// ```
    #[inline(always)]
    pub fn take(this: &mut Self) -> Self { mem::replace(this, Self::empty()) }

    /// Provides a reference to the value, or `None` if the instance is emptied.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let rc = CountedRc::new(42);
    /// assert_eq!(Some(&42), CountedRc::get(&rc));
    ///
    /// let empty = CountedRc::<i32>::empty();
    /// assert_eq!(None, CountedRc::get(&empty));
    /// ```
    #[inline(always)]
    pub fn get(this: &Self) -> Option<&T> {
        Self::cell(this).map(|cell| &cell.value)
    }

    /// Provides a mutable reference to the value, if the instance is the sole member of its
    /// ownership group.
    ///
    /// Returns `None` if the instance is emptied, or if its group counts other members: handing
    /// out a mutable reference to a shared value would alias.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let mut rc = CountedRc::new(42);
    /// *CountedRc::get_mut(&mut rc).unwrap() = 33;
    /// assert_eq!(33, *rc);
    ///
    /// let other = rc.clone();
    /// assert!(CountedRc::get_mut(&mut rc).is_none());
    /// # drop(other);
    /// ```
    #[inline(always)]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let pointer = this.inner?;

        //  Safety:
        //  -   The cell is valid for as long as any group member lives, and `this` lives.
        if unsafe { pointer.as_ref() }.count.get() != 1 {
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
    /// use counted_rc::CountedRc;
    ///
    /// let rc = CountedRc::new(42);
    /// assert_eq!(Ok(42), CountedRc::try_unwrap(rc));
    ///
    /// let rc = CountedRc::new(42);
    /// let other = rc.clone();
    /// assert!(CountedRc::try_unwrap(rc).is_err());
    /// # drop(other);
    /// ```
    #[inline(always)]
    pub fn try_unwrap(mut this: Self) -> Result<T, Self> {
        if Self::use_count(&this) != 1 {
            return Err(this);
        }

        //  Count = 1, hence `inner` is `Some`; emptying it makes the drop of `this` a no-op.
        let Some(pointer) = this.inner.take() else { return Err(this) };

        //  Safety:
        //  -   Count = 1, hence sole ownership.
        //  -   `pointer` was allocated by Box in `new`.
        let cell = unsafe { Box::from_raw(pointer.as_ptr()) };

        Ok(cell.value)
    }

    /// Returns true if the two `CountedRc` belong to the same ownership group.
    ///
    /// Emptied handles belong to no group; `ptr_eq` involving one is always false.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let rc = CountedRc::new(42);
    /// let other = rc.clone();
    /// assert!(CountedRc::ptr_eq(&rc, &other));
    ///
    /// let separate = CountedRc::new(42);
    /// assert!(!CountedRc::ptr_eq(&rc, &separate));
    /// ```
    #[inline(always)]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (this.inner, other.inner) {
            (Some(left), Some(right)) => ptr::eq(left.as_ptr(), right.as_ptr()),
            _ => false,
        }
    }

    #[inline(always)]
    fn cell(this: &Self) -> Option<&CountedCell<T>> {
        //  Safety:
        //  -   The cell is valid for as long as any group member lives, and `this` lives.
        this.inner.map(|pointer| unsafe { &*pointer.as_ptr() })
    }
}

impl<T> Clone for CountedRc<T> {
    /// Joins the instance's ownership group, incrementing its count by 1.
    ///
    /// The value is not copied, it is shared. Cloning an emptied handle yields another emptied
    /// handle.
    ///
    /// #   Panics
    ///
    /// If the count overflows `usize`.
    ///
    /// #   Example
    ///
    /// ```rust
    /// use counted_rc::CountedRc;
    ///
    /// let rc = CountedRc::new(42);
    /// let other = rc.clone();
    ///
    /// assert_eq!(2, CountedRc::use_count(&rc));
    /// assert!(CountedRc::ptr_eq(&rc, &other));
    /// ```
    #[inline(always)]
    fn clone(&self) -> Self {
        if let Some(cell) = Self::cell(self) {
            let count = cell.count.get();
            assert!(count < usize::MAX, "count overflow");

            cell.count.set(count + 1);
        }

        Self { inner: self.inner, _marker: PhantomData }
    }
}

impl<T> Drop for CountedRc<T> {
    #[inline(always)]
    fn drop(&mut self) {
        let Some(pointer) = self.inner else { return };

        //  Safety:
        //  -   The cell is valid for as long as any group member lives, and `self` still does.
        let count = unsafe { pointer.as_ref() }.count.get();

        if count == 1 {
            //  Safety:
            //  -   Count transitions 1 -> 0, hence `self` is the last group member.
            //  -   `pointer` was allocated by Box in `new`.
            let _ = unsafe { Box::from_raw(pointer.as_ptr()) };
        } else {
            //  Safety:
            //  -   As above, the cell outlives `self`.
            unsafe { pointer.as_ref() }.count.set(count - 1);
        }
    }
}

impl<T> convert::AsRef<T> for CountedRc<T> {
    /// #   Panics
    ///
    /// If the instance is emptied.
    #[inline(always)]
    fn as_ref(&self) -> &T { &**self }
}

impl<T> borrow::Borrow<T> for CountedRc<T> {
    /// #   Panics
    ///
    /// If the instance is emptied.
    #[inline(always)]
    fn borrow(&self) -> &T { &**self }
}

impl<T: fmt::Debug> fmt::Debug for CountedRc<T> {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("<emptied>"),
        }
    }
}

impl<T> Default for CountedRc<T> {
    /// Returns an emptied handle, so that `mem::take` empties its argument.
    #[inline(always)]
    fn default() -> Self { Self::empty() }
}

impl<T> ops::Deref for CountedRc<T> {
    type Target = T;

    /// #   Panics
    ///
    /// If the instance is emptied; use [`CountedRc::get`] for a checked access.
    #[inline(always)]
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an emptied CountedRc"),
        }
    }
}

impl<T: fmt::Display> fmt::Display for CountedRc<T> {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("<emptied>"),
        }
    }
}

impl<T: cmp::Eq> cmp::Eq for CountedRc<T> {}

impl<T> From<T> for CountedRc<T> {
    #[inline(always)]
    fn from(value: T) -> Self { Self::new(value) }
}

impl<T> From<Box<T>> for CountedRc<T> {
    #[inline(always)]
    fn from(value: Box<T>) -> Self { Self::new(*value) }
}

impl<T: hash::Hash> hash::Hash for CountedRc<T> {
    #[inline(always)]
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        //  An owning handle hashes exactly as its value, as the `Borrow` impl requires; only an
        //  emptied handle hashes a sentinel of its own.
        match Self::get(self) {
            Some(value) => value.hash(state),
            None => state.write_u8(0),
        }
    }
}

impl<T: cmp::Ord> cmp::Ord for CountedRc<T> {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        if Self::ptr_eq(self, other) {
            return cmp::Ordering::Equal;
        }

        //  An emptied handle orders before any owning handle.
        match (Self::get(self), Self::get(other)) {
            (Some(left), Some(right)) => left.cmp(right),
            (None, None) => cmp::Ordering::Equal,
            (None, Some(_)) => cmp::Ordering::Less,
            (Some(_), None) => cmp::Ordering::Greater,
        }
    }
}

impl<T: cmp::PartialEq> cmp::PartialEq for CountedRc<T> {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        match (Self::get(self), Self::get(other)) {
            (Some(left), Some(right)) => left.eq(right),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: cmp::PartialOrd> cmp::PartialOrd for CountedRc<T> {
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

impl<T> fmt::Pointer for CountedRc<T> {
    #[inline(always)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pointer = Self::get(self).map_or(ptr::null(), |value| value as *const T);
        fmt::Pointer::fmt(&pointer, f)
    }
}

impl<T> marker::Unpin for CountedRc<T> {}

#[doc(hidden)]
pub mod compile_tests {

/// ```compile_fail,E0277
/// let rc = counted_rc::CountedRc::new(42);
///
/// std::thread::spawn(move || drop(rc)); // This should fail to compile: not `Send`.
/// ```
pub fn rc_not_send() {}

/// ```compile_fail,E0277
/// fn assert_sync<T: Sync>() {}
///
/// assert_sync::<counted_rc::CountedRc<i32>>(); // This should fail to compile: not `Sync`.
/// ```
pub fn rc_not_sync() {}

} // mod compile_tests

#[cfg(test)]
mod tests {

use super::*;

//  Payload bumping a caller-owned counter when dropped, to observe release.
struct DropCounter<'a>(&'a Cell<usize>);

impl Drop for DropCounter<'_> {
    fn drop(&mut self) { self.0.set(self.0.get() + 1); }
}

#[test]
fn rc_new_counts_one() {
    let rc = CountedRc::new(42);

    assert_eq!(1, CountedRc::use_count(&rc));
    assert!(!CountedRc::is_empty(&rc));
    assert_eq!(42, *rc);
}

#[test]
fn rc_clone_shares_value() {
    let rc = CountedRc::new(42);

    {
        let other = rc.clone();

        assert_eq!(2, CountedRc::use_count(&rc));
        assert_eq!(2, CountedRc::use_count(&other));
        assert!(CountedRc::ptr_eq(&rc, &other));
        assert_eq!(42, *other);
    }

    assert_eq!(1, CountedRc::use_count(&rc));
}

#[test]
fn rc_last_drop_releases_value_once() {
    let drops = Cell::new(0);

    {
        let rc = CountedRc::new(DropCounter(&drops));
        let other = rc.clone();

        drop(rc);

        assert_eq!(0, drops.get());
        assert_eq!(1, CountedRc::use_count(&other));
    }

    assert_eq!(1, drops.get());
}

#[test]
fn rc_reassignment_releases_previous_group() {
    let drops = Cell::new(0);
    let replaced = Cell::new(0);

    let rc = CountedRc::new(DropCounter(&drops));
    let mut other = CountedRc::new(DropCounter(&replaced));
    assert_eq!(1, CountedRc::use_count(&other));

    other = rc.clone();

    assert_eq!(1, replaced.get());
    assert_eq!(0, drops.get());
    assert_eq!(2, CountedRc::use_count(&rc));
    assert!(CountedRc::ptr_eq(&rc, &other));
}

#[test]
fn rc_self_assignment_is_noop() {
    let mut rc = CountedRc::new(42);

    #[allow(clippy::redundant_clone)]
    {
        rc = rc.clone();
    }

    assert_eq!(1, CountedRc::use_count(&rc));
    assert_eq!(42, *rc);
}

#[test]
fn rc_take_transfers_share() {
    let mut rc = CountedRc::new(42);
    let taken = CountedRc::take(&mut rc);

    assert_eq!(1, CountedRc::use_count(&taken));
    assert_eq!(42, *taken);

    assert!(CountedRc::is_empty(&rc));
    assert_eq!(0, CountedRc::use_count(&rc));
}

#[test]
fn rc_take_does_not_release() {
    let drops = Cell::new(0);

    let mut rc = CountedRc::new(DropCounter(&drops));
    let taken = CountedRc::take(&mut rc);

    drop(rc);
    assert_eq!(0, drops.get());

    drop(taken);
    assert_eq!(1, drops.get());
}

#[test]
fn rc_take_emptied_stays_emptied() {
    let mut rc = CountedRc::<i32>::empty();
    let taken = CountedRc::take(&mut rc);

    assert!(CountedRc::is_empty(&rc));
    assert!(CountedRc::is_empty(&taken));
}

#[test]
fn rc_mem_take_empties() {
    let mut rc = CountedRc::new(42);
    let taken = mem::take(&mut rc);

    assert!(CountedRc::is_empty(&rc));
    assert_eq!(1, CountedRc::use_count(&taken));
}

#[test]
fn rc_clone_emptied_is_emptied() {
    let rc = CountedRc::<i32>::empty();
    let other = rc.clone();

    assert!(CountedRc::is_empty(&other));
    assert_eq!(0, CountedRc::use_count(&other));
}

#[test]
#[should_panic(expected = "dereferenced an emptied CountedRc")]
fn rc_deref_emptied_panics() {
    let mut rc = CountedRc::new(42);
    let _taken = CountedRc::take(&mut rc);

    let _ = *rc;
}

#[test]
fn rc_get_mut_requires_sole_ownership() {
    let mut rc = CountedRc::new(42);

    *CountedRc::get_mut(&mut rc).unwrap() = 33;
    assert_eq!(33, *rc);

    let other = rc.clone();
    assert!(CountedRc::get_mut(&mut rc).is_none());

    drop(other);
    assert!(CountedRc::get_mut(&mut rc).is_some());
}

#[test]
fn rc_try_unwrap_requires_sole_ownership() {
    let rc = CountedRc::new(42);
    let other = rc.clone();

    let rc = CountedRc::try_unwrap(rc).unwrap_err();
    assert_eq!(2, CountedRc::use_count(&rc));

    drop(other);
    assert_eq!(Ok(42), CountedRc::try_unwrap(rc));
}

#[test]
fn rc_ptr_eq_distinguishes_groups() {
    let rc = CountedRc::new(42);
    let separate = CountedRc::new(42);
    let emptied = CountedRc::<i32>::empty();

    assert!(!CountedRc::ptr_eq(&rc, &separate));
    assert!(!CountedRc::ptr_eq(&rc, &emptied));
    assert!(!CountedRc::ptr_eq(&emptied, &emptied));
}

#[test]
fn rc_hash_agrees_with_borrowed_value() {
    use std::collections::HashMap;

    let mut map = HashMap::new();
    map.insert(CountedRc::new("key".to_string()), 7);

    assert_eq!(Some(&7), map.get(&"key".to_string()));
    assert_eq!(None, map.get(&"other".to_string()));
}

#[test]
fn rc_equality_follows_value() {
    let rc = CountedRc::new(42);
    let separate = CountedRc::new(42);
    let emptied = CountedRc::<i32>::empty();

    assert_eq!(rc, separate);
    assert_ne!(rc, emptied);
    assert_eq!(emptied, CountedRc::empty());
}

} // mod tests
