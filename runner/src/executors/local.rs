use super::{Executor, ExecutorError, RunOutput};
use itertools::Itertools;
use nix::{
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    ffi::OsString,
    io::{self, Read, Write},
    os::unix::process::CommandExt,
    process::{Child, Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, trace};
use wait_timeout::ChildExt;

/// Executor that spawns the command as a child of this process
#[derive(Debug, Clone, Default)]
pub struct LocalExecutor {
    timeout: Option<Duration>,
}

impl LocalExecutor {
    /// create a new LocalExecutor, `timeout` bounds every single execution
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

// drain a pipe on its own thread, otherwise a chatty child blocks on a full pipe buffer
fn read_pipe<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<io::Result<String>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;

        Ok(String::from_utf8_lossy(&buffer).into_owned())
    })
}

// the profiler forks the engine, killing only the direct child leaves the engine holding our pipes
fn kill_group(child: &mut Child) -> Result<(), ExecutorError> {
    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(errno) => {
            debug!(pid = child.id(), errno = ?errno, "Failed to kill process group, killing the child only");
            child.kill().map_err(ExecutorError::Wait)
        }
    }
}

fn join_pipe(handle: Option<JoinHandle<io::Result<String>>>) -> Result<String, ExecutorError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| ExecutorError::ReaderPanicked)?
            .map_err(ExecutorError::Pipe),
        None => Ok(String::new()),
    }
}

impl Executor for LocalExecutor {
    #[tracing::instrument(level = "debug", skip(self, stdin))]
    fn execute(&mut self, command: &[OsString], stdin: &str) -> Result<RunOutput, ExecutorError> {
        let (program, args) = command.split_first().ok_or(ExecutorError::EmptyCommand)?;

        debug!(
            "Executing {}",
            command.iter().map(|arg| arg.to_string_lossy()).join(" ")
        );

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // own process group, a timeout takes down everything the command started
            .process_group(0)
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let writer = child.stdin.take().map(|mut pipe| {
            let input = stdin.to_owned();

            // Dropping stdin at the end of the thread closes the pipe, the engine sees the end of
            // its input
            thread::spawn(move || pipe.write_all(input.as_bytes()))
        });
        let stdout = child.stdout.take().map(read_pipe);
        let stderr = child.stderr.take().map(read_pipe);

        let (status, timed_out) = match self.timeout {
            Some(timeout) => match child.wait_timeout(timeout).map_err(ExecutorError::Wait)? {
                Some(status) => (status, false),
                None => {
                    debug!(pid = child.id(), "Child ran into timeout, killing its process group");
                    kill_group(&mut child)?;

                    (child.wait().map_err(ExecutorError::Wait)?, true)
                }
            },
            None => (child.wait().map_err(ExecutorError::Wait)?, false),
        };

        if let Some(writer) = writer {
            match writer.join() {
                Ok(Ok(())) => {}
                // the child is allowed to exit without reading all of its input
                Ok(Err(error)) => debug!(error = ?error, "Failed to write stdin of child"),
                Err(_) => return Err(ExecutorError::ReaderPanicked),
            }
        }

        let output = RunOutput {
            status: status.code(),
            stdout: join_pipe(stdout)?,
            stderr: join_pipe(stderr)?,
            timed_out,
        };

        trace!(stdout = %output.stdout, stderr = %output.stderr, "Output");

        Ok(output)
    }
}
