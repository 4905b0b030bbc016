//! Miscellaneous helpers shared by the worker crates.

pub mod sys_info;
