//! CLI commands.

pub mod convert;
pub mod download;
pub mod init;
pub mod inspect;
pub mod validate;
pub mod verify;
