//! Subcommand implementations that need more than a few lines in `main`

pub mod init;
