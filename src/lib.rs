//! Ngaro image machine library.
//!
//! Provides the two-stack virtual machine, its host I/O plumbing, and the
//! configuration and logging used by the `ngaro` driver.

/// Builds a `Vec<Cell>` boot image from opcodes and raw cells.
#[cfg(test)]
macro_rules! cells {
    ($($c:expr),* $(,)?) => {
        vec![$($crate::virtual_machine::Cell::from($c)),*]
    };
}

pub mod config;
pub mod host;
pub mod utils;
pub mod virtual_machine;
