//! Platform access: the command/file/glob seam sensors and actions go through.

pub mod system;
