//! Command Shell
//!
//! Parses one line at a time into a [`Command`] and runs it against a
//! [`FileSystem`]. Failures are reported on the output as a single
//! `ERROR(<command>: <reason>)` line and never end the session.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use fatvfs::{FileSystem, FsResult, Storage};
use log::debug;
use thiserror::Error;

/// Interactive prompt
pub const PROMPT: &str = "vfs$ ";

/// Name, operands and description of every command, in `help` order
const COMMANDS: &[(&str, &str, &str)] = &[
    ("ls", "", "list the current directory"),
    ("mkdir", "<name>", "create a directory"),
    ("cd", "<name>", "change the current directory"),
    ("pwd", "", "print the current directory"),
    ("rmdir", "<name>", "remove an empty directory"),
    ("get", "<host_src> <dest_name>", "import a host file"),
    ("put", "<src_name> <host_dest>", "export a file to the host"),
    ("cat", "<name>", "print a file"),
    ("cp", "<src> <dst>", "copy a file"),
    ("mv", "<src> <dst>", "move or rename a file"),
    ("rm", "<name>", "remove a file"),
    ("df", "", "show block usage"),
    ("fsck", "", "check image consistency"),
    ("help", "", "show this list"),
    ("exit", "", "leave the shell"),
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Ls,
    Mkdir(String),
    Cd(String),
    Pwd,
    Rmdir(String),
    Get(PathBuf, String),
    Put(String, PathBuf),
    Cat(String),
    Cp(String, String),
    Mv(String, String),
    Rm(String),
    Df,
    Fsck,
    Help,
    Exit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("command not found")]
    Unknown(String),

    #[error("usage: {0} {1}")]
    Usage(&'static str, &'static str),
}

impl Command {
    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, ParseError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = words.collect();

        let (name, operands) = COMMANDS
            .iter()
            .find(|(n, _, _)| *n == name)
            .map(|&(n, ops, _)| (n, ops))
            .ok_or_else(|| ParseError::Unknown(name.to_string()))?;
        let expected = operands.split_whitespace().count();
        if args.len() != expected {
            return Err(ParseError::Usage(name, operands));
        }

        let arg = |i: usize| args[i].to_string();
        let command = match name {
            "ls" => Self::Ls,
            "mkdir" => Self::Mkdir(arg(0)),
            "cd" => Self::Cd(arg(0)),
            "pwd" => Self::Pwd,
            "rmdir" => Self::Rmdir(arg(0)),
            "get" => Self::Get(PathBuf::from(args[0]), arg(1)),
            "put" => Self::Put(arg(0), PathBuf::from(args[1])),
            "cat" => Self::Cat(arg(0)),
            "cp" => Self::Cp(arg(0), arg(1)),
            "mv" => Self::Mv(arg(0), arg(1)),
            "rm" => Self::Rm(arg(0)),
            "df" => Self::Df,
            "fsck" => Self::Fsck,
            "help" => Self::Help,
            _ => Self::Exit,
        };
        Ok(Some(command))
    }

    /// Command word, used to tag error lines
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ls => "ls",
            Self::Mkdir(_) => "mkdir",
            Self::Cd(_) => "cd",
            Self::Pwd => "pwd",
            Self::Rmdir(_) => "rmdir",
            Self::Get(..) => "get",
            Self::Put(..) => "put",
            Self::Cat(_) => "cat",
            Self::Cp(..) => "cp",
            Self::Mv(..) => "mv",
            Self::Rm(_) => "rm",
            Self::Df => "df",
            Self::Fsck => "fsck",
            Self::Help => "help",
            Self::Exit => "exit",
        }
    }
}

/// Whether the session goes on after a command
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Shell<S> {
    fs: FileSystem<S>,
}

impl<S: Storage> Shell<S> {
    pub fn new(fs: FileSystem<S>) -> Self {
        Self { fs }
    }

    pub fn fs(&self) -> &FileSystem<S> {
        &self.fs
    }

    pub fn into_fs(self) -> FileSystem<S> {
        self.fs
    }

    /// Read commands from `input` until `exit` or end of input.
    pub fn run<R: BufRead, W: Write>(&mut self, input: &mut R, out: &mut W) -> io::Result<()> {
        let mut line = String::new();
        loop {
            out.write_all(PROMPT.as_bytes())?;
            out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                // End of input counts as `exit`
                writeln!(out)?;
                break;
            }
            if self.execute_line(&line, out)? == Flow::Exit {
                break;
            }
        }
        out.flush()?;
        self.fs.flush().map_err(into_io)
    }

    /// Parse and run one line, reporting any failure on `out`.
    pub fn execute_line<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<Flow> {
        let command = match Command::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(Flow::Continue),
            Err(err) => {
                debug!("rejected input {:?}: {:?}", line.trim_end(), err);
                writeln!(out, "ERROR(input: {})", err)?;
                return Ok(Flow::Continue);
            }
        };

        match self.execute(&command, out) {
            Ok(flow) => Ok(flow),
            Err(err) => {
                writeln!(out, "ERROR({}: {})", command.name(), err)?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Run one parsed command.
    pub fn execute<W: Write>(&mut self, command: &Command, out: &mut W) -> FsResult<Flow> {
        debug!("executing {:?}", command);
        match command {
            Command::Ls => {
                for entry in self.fs.ls()? {
                    writeln!(out, "{}", entry)?;
                }
            }
            Command::Mkdir(name) => self.fs.mkdir(name)?,
            Command::Cd(name) => self.fs.cd(name)?,
            Command::Pwd => writeln!(out, "{}", self.fs.pwd()?)?,
            Command::Rmdir(name) => self.fs.rmdir(name)?,
            Command::Get(source, name) => self.fs.get(source, name)?,
            Command::Put(name, dest) => self.fs.put(name, dest)?,
            Command::Cat(name) => self.fs.cat(name, out)?,
            Command::Cp(src, dst) => self.fs.cp(src, dst)?,
            Command::Mv(src, dst) => self.fs.mv(src, dst)?,
            Command::Rm(name) => self.fs.rm(name)?,
            Command::Df => writeln!(out, "{}", self.fs.df()?)?,
            Command::Fsck => writeln!(out, "{}", self.fs.check()?)?,
            Command::Help => {
                for (name, operands, about) in COMMANDS {
                    let usage = format!("{} {}", name, operands);
                    writeln!(out, "  {:<32}{}", usage.trim_end(), about)?;
                }
            }
            Command::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }
}

fn into_io(err: fatvfs::FsError) -> io::Error {
    match err {
        fatvfs::FsError::HostIo(err) => err,
        other => io::Error::other(other.to_string()),
    }
}
