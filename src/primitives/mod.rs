//! Low-level primitives shared across the coordination core.

/// Big-endian wire encoding helpers and a fallible slice reader.
pub mod bytes;

/// Per-key read-write locks with on-demand, refcounted slots.
pub mod keylock;
