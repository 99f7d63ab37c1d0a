//! Shell front end for `fatvfs` images
//!
//! The binary only parses arguments, installs the logger and hands stdin and
//! stdout to [`shell::Shell::run`].

pub mod shell;

pub use shell::{Command, Flow, ParseError, Shell, PROMPT};
