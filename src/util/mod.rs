//! Utility types and functions.
//!
//! This module contains fundamental types used throughout the library:
//! - [`ElementType`] - Storage types of dataset cells and attributes
//! - [`Shape`] / [`Dim`] - Dataset extents, fixed or resizable
//! - [`Error`] / [`Result`] - Error handling

mod element;
mod error;
mod shape;
pub(crate) mod codec;

pub use element::*;
pub use error::*;
pub use shape::*;
pub(crate) use element::strip_padding;
