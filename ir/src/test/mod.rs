//! In-crate test suites.

pub mod unit;
