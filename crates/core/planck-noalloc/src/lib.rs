//! Stack-allocated counterparts for common `alloc` types.
//!
//! Everything in this crate has a fixed, compile-time capacity and never
//! touches a heap, so it can be used before an allocator is initialized or
//! on targets that have none.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod ringbuf;
pub mod vec;
