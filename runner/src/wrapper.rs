use crate::config::ProfilerConfig;
use std::{ffi::OsString, path::PathBuf};
use tracing::{debug, warn};

/// Prefixes engine invocations with a memory profiler (GNU time) if one is installed
#[derive(Debug, Clone)]
pub struct ProcessWrapper {
    candidates: Vec<PathBuf>,
    args: Vec<OsString>,
    warned: bool,
}

impl ProcessWrapper {
    pub fn new(candidates: Vec<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            candidates,
            args,
            warned: false,
        }
    }

    pub fn load(config: &ProfilerConfig) -> Self {
        Self::new(
            config.candidates.clone(),
            config.args.iter().map(OsString::from).collect(),
        )
    }

    /// Wrap `base` with the first available profiler
    ///
    /// The flag tells if the profiler diagnostics will carry the peak memory. Without a profiler
    /// the command is returned as is and a warning is logged for the first call only.
    pub fn wrap(&mut self, base: Vec<OsString>) -> (Vec<OsString>, bool) {
        match self.candidates.iter().find(|candidate| candidate.exists()) {
            Some(profiler) => {
                debug!(profiler = ?profiler, "Measuring memory");

                let mut command = Vec::with_capacity(base.len() + self.args.len() + 1);
                command.push(profiler.clone().into_os_string());
                command.extend(self.args.iter().cloned());
                command.extend(base);

                (command, true)
            }
            None => {
                if !self.warned {
                    warn!("GNU time not found, memory will not be measured");
                    self.warned = true;
                }

                (base, false)
            }
        }
    }

    pub fn has_warned(&self) -> bool {
        self.warned
    }
}
