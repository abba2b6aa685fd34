//! Shared utilities across archoffline modules.

pub mod files;

pub use files::{
    copy_dir_merge, copy_recursive, make_executable, move_file, write_file_mode,
    write_file_with_dirs,
};
