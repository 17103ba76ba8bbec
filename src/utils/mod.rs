//! Filesystem helpers used by the persistence layer

pub mod atomic;

pub use atomic::{atomic_write_with, atomic_write_with_backup, cleanup_temp_files};
