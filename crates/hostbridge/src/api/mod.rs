//! Remote operations grouped by capability.
//!
//! Each function shapes one request over the [`Invoke`](crate::invoke::Invoke)
//! seam and picks the useful part out of the result. What the host does with
//! the request is outside this crate.

pub mod group;
pub mod media;
pub mod message;
pub mod system;
