//! Architecture support. This kernel targets x86_64 only.

pub mod x86_64;

pub use x86_64::*;
