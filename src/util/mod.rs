// Shared helpers for the finish steps

pub mod cmd;
pub mod fs;
pub mod macros;
