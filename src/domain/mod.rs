//! Domain layer - Label derivation.
//!
//! Pure functions and constants shared by the server and client
//! adapters. No I/O happens here.

pub mod labels;

pub use labels::StatusLabel;
