//! `CountedRc`, resp. `CountedArc`, is a run-time reference-counted handle to a heap-allocated
//! value: cloning a handle shares the value, taking a handle transfers the share and leaves an
//! explicit emptied handle behind, and dropping the last handle of an ownership group releases
//! the value, exactly once.
//!
//! `CountedRc` maintains its count with a plain integer and is confined to a single thread by the
//! type system; `CountedArc` is the atomic-count alternative for values shared across threads.
//!
//! #   Example of usage.
//!
//! ```
//! use counted_rc::CountedRc;
//!
//! let mut first = CountedRc::new("Hello, world!".to_string());
//!
//! assert_eq!("Hello, world!", *first);
//! assert_eq!(1, CountedRc::use_count(&first));
//!
//! {
//!     //  Cloning shares the value, it does not copy it.
//!     let second = first.clone();
//!
//!     assert_eq!(2, CountedRc::use_count(&first));
//!     assert_eq!(2, CountedRc::use_count(&second));
//!     assert!(CountedRc::ptr_eq(&first, &second));
//!
//!     //  `second` leaves the ownership group here, without releasing the value.
//! }
//!
//! assert_eq!(1, CountedRc::use_count(&first));
//!
//! //  Taking moves the share into a new handle, leaving `first` emptied.
//! let third = CountedRc::take(&mut first);
//!
//! assert_eq!(1, CountedRc::use_count(&third));
//! assert_eq!(0, CountedRc::use_count(&first));
//! assert!(CountedRc::is_empty(&first));
//!
//! //  Finally, the value is released when `third` is dropped.
//! ```
//!
//! #   Options
//!
//! The crate is defined for `no_std` environment and only relies on `core` and `alloc` by default.
//!
//! The `alloc` crate can be opted out of, though this disables both handle types.

//  Regular features
#![cfg_attr(not(test), no_std)]

//  Lints
#![deny(missing_docs)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
mod arc;
#[cfg(feature = "alloc")]
mod rc;

#[cfg(feature = "alloc")]
pub use self::arc::CountedArc;
#[cfg(feature = "alloc")]
pub use self::rc::CountedRc;
