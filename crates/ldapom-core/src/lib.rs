//! # ldapom-core
//!
//! Network-free building blocks for mapping directory entries to objects.
//!
//! ## Modules
//!
//! - [`attributes`] - Change-tracking attribute container and change records
//! - [`error`] - Error kinds shared by every ldapom crate

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attributes;
pub mod error;

// Re-export commonly used types
pub use attributes::{AttributeSet, AttributeValue, Change};
pub use error::{Error, Result};
