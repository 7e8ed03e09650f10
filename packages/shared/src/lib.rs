//! Utilities shared by the debugport binaries.

pub mod logger;
