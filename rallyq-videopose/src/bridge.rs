use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};

use crate::{load_frame, PoseRecord, Result, VideoPose, VideoPoseError};
use rallyq_common::CaptureData;

/// Live camera through an external process running the pose model.
/// The process writes one record per line on its standard output.
#[derive(Debug)]
pub struct BridgeSource {
    command: Vec<String>,
    /// Directory against which relative frame paths are resolved
    working_dir: Option<PathBuf>,
    child: Option<Child>,
    output: Option<BufReader<ChildStdout>>,
    position: usize,
    line: usize,
}

impl BridgeSource {
    /// `command` is the program followed by its arguments
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            working_dir: None,
            child: None,
            output: None,
            position: 0,
            line: 0,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    fn resolve(&self, frame: PathBuf) -> PathBuf {
        match &self.working_dir {
            Some(dir) if frame.is_relative() => dir.join(frame),
            _ => frame,
        }
    }
}

impl VideoPose for BridgeSource {
    #[tracing::instrument(skip_all, fields(command = ?self.command))]
    fn inference_start(&mut self) -> Result<()> {
        if self.child.is_some() {
            return Ok(());
        }
        let (program, args) = self.command.split_first().ok_or(VideoPoseError::EmptyCommand)?;

        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped()).stdin(Stdio::null());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let mut child = command.spawn().map_err(|source| VideoPoseError::Spawn {
            command: self.command.join(" "),
            source,
        })?;

        self.output = child.stdout.take().map(BufReader::new);
        self.child = Some(child);
        self.position = 0;
        self.line = 0;
        tracing::info!("pose bridge started");
        Ok(())
    }

    fn inference_step(&mut self) -> Result<Option<CaptureData>> {
        let output = self.output.as_mut().ok_or(VideoPoseError::NotRunning)?;

        let mut line = String::new();
        loop {
            line.clear();
            let read = output.read_line(&mut line).map_err(|source| VideoPoseError::Bridge {
                command: self.command.join(" "),
                source,
            })?;
            if read == 0 {
                tracing::info!("pose bridge closed its output");
                return Ok(None);
            }
            self.line += 1;
            if !line.trim().is_empty() {
                break;
            }
        }

        let record = PoseRecord::parse(line.trim(), self.line)?;
        let path = self.resolve(record.frame);
        let data = load_frame(self.position, &path, record.landmarks)?;
        self.position += 1;
        Ok(Some(data))
    }

    fn inference_stop(&mut self) {
        self.output = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!("pose bridge already exited: {}", e);
            }
            match child.wait() {
                Ok(status) => tracing::info!("pose bridge stopped, {}", status),
                Err(e) => tracing::debug!("unable to wait for the pose bridge: {}", e),
            }
        }
    }

    fn position(&self) -> usize {
        self.position
    }
}

impl Drop for BridgeSource {
    fn drop(&mut self) {
        self.inference_stop();
    }
}
