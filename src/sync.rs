//! Locking primitives used throughout the kernel.
//!
//! A single alias so the rest of the crate doesn't care whether the lock
//! comes from `std` or `parking_lot`; swapping the implementation is a
//! one-line change here.

pub(crate) type Mutex<T> = parking_lot::Mutex<T>;
pub(crate) type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
