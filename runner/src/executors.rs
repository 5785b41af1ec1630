pub mod local;

pub use local::LocalExecutor;

use std::ffi::OsString;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Cannot execute an empty command")]
    EmptyCommand,
    #[error("Failed to spawn {program:?}")]
    Spawn {
        program: OsString,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to wait for a child proccess")]
    Wait(#[source] std::io::Error),
    #[error("Failed to collect output of a child process")]
    Pipe(#[source] std::io::Error),
    #[error("Output reader thread panicked")]
    ReaderPanicked,
}

#[derive(Debug, Clone, Default)]
/// container for everything observed while running a single command
pub struct RunOutput {
    // None if the child was terminated by a signal, e.g. after a timeout
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.status == Some(0)
    }
}

/// Runs one command to completion, feeding `stdin` to it
///
/// The query runner only depends on this, tests replace the local executor with scripted ones.
pub trait Executor {
    fn execute(&mut self, command: &[OsString], stdin: &str) -> Result<RunOutput, ExecutorError>;
}

impl<E: Executor + ?Sized> Executor for &mut E {
    fn execute(&mut self, command: &[OsString], stdin: &str) -> Result<RunOutput, ExecutorError> {
        (**self).execute(command, stdin)
    }
}
