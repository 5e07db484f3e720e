//! Low-level primitives the record store is built on.

/// Header field accessors and order-preserving key encoders.
pub mod bytes;

/// Positional I/O over the flat address space backing each data file.
pub mod io;
