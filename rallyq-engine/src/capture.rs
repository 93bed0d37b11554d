use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};

use rallyq_common::CaptureData;
use rallyq_videopose::{VideoPose, VideoPoseError};

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("capture task stopped")]
    Stopped,
    #[error(transparent)]
    Source(#[from] VideoPoseError),
}

/// Content of the most recent frame slot
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    /// No source is open
    Idle,
    Frame(Arc<CaptureData>),
    /// The source ran out of frames or failed to read one
    Ended,
}

pub enum Command {
    Open {
        source: Box<dyn VideoPose>,
        /// Minimum time between two frames, None for live sources
        pace: Option<Duration>,
        /// Number of frames of the source
        respond_to: oneshot::Sender<Result<Option<usize>, VideoPoseError>>,
    },
    Seek(usize),
    Close,
}

#[derive(Clone, Debug)]
pub struct CaptureProxy {
    commands: mpsc::Sender<Command>,
}

impl CaptureProxy {
    /// Replace the current source and start reading from it
    pub async fn open(&self, source: Box<dyn VideoPose>, pace: Option<Duration>) -> Result<Option<usize>, CaptureError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Open {
                source,
                pace,
                respond_to: tx,
            })
            .await
            .map_err(|_| CaptureError::Stopped)?;
        Ok(rx.await.map_err(|_| CaptureError::Stopped)??)
    }

    pub async fn seek(&self, index: usize) {
        if self.commands.send(Command::Seek(index)).await.is_err() {
            tracing::warn!("seek on a stopped capture");
        }
    }

    pub async fn close(&self) {
        if self.commands.send(Command::Close).await.is_err() {
            tracing::warn!("close on a stopped capture");
        }
    }
}

/// Reads frames from the open source into the frame slot
struct Capture {
    cmd_receiver: mpsc::Receiver<Command>,
    frame_sender: watch::Sender<CaptureEvent>,
    source: Option<Box<dyn VideoPose>>,
    pace: Option<Duration>,
    next_frame: Instant,
    is_running: bool,
}

impl Capture {
    #[tracing::instrument]
    pub fn instantiate() -> (Self, CaptureProxy, watch::Receiver<CaptureEvent>) {
        // Channel for commands
        let (cmd_sender, cmd_receiver) = mpsc::channel(100);
        // Slot for data output
        let (frame_sender, frame_receiver) = watch::channel(CaptureEvent::Idle);

        (
            Capture {
                cmd_receiver,
                frame_sender,
                source: None,
                pace: None,
                next_frame: Instant::now(),
                is_running: false,
            },
            CaptureProxy {
                commands: cmd_sender,
            },
            frame_receiver,
        )
    }

    #[tracing::instrument(skip_all)]
    fn handle_message(&mut self, msg: Command) {
        match msg {
            Command::Open {
                mut source,
                pace,
                respond_to,
            } => {
                self.close();
                let opened = source.inference_start().map(|_| source.len());
                if opened.is_ok() {
                    tracing::info!("capture started");
                    self.source = Some(source);
                    self.pace = pace;
                    self.next_frame = Instant::now();
                    self.is_running = true;
                }
                let _ = respond_to.send(opened);
            }
            Command::Seek(index) => {
                let Some(source) = self.source.as_mut() else {
                    tracing::warn!("seek without a source");
                    return;
                };
                match source.seek(index) {
                    Ok(()) => {
                        tracing::debug!("seek to frame {}", index);
                        self.next_frame = Instant::now();
                        self.is_running = true;
                    }
                    Err(e) => tracing::warn!("unable to seek: {}", e),
                }
            }
            Command::Close => self.close(),
        }
    }

    fn close(&mut self) {
        self.is_running = false;
        if let Some(mut source) = self.source.take() {
            source.inference_stop();
            self.frame_sender.send_replace(CaptureEvent::Idle);
            tracing::info!("capture ended");
        }
    }

    /// Read one frame, pacing recordings to their frame rate
    fn step(&mut self) {
        let Some(source) = self.source.as_mut() else {
            self.is_running = false;
            return;
        };

        if let Some(pace) = self.pace {
            let now = Instant::now();
            if self.next_frame > now {
                std::thread::sleep(self.next_frame - now);
            }
            self.next_frame = self.next_frame.max(now) + pace;
        }

        match source.inference_step() {
            Ok(Some(data)) => {
                tracing::trace!("frame {}", data.index);
                self.frame_sender.send_replace(CaptureEvent::Frame(Arc::new(data)));
            }
            Ok(None) => {
                tracing::info!("end of stream");
                self.is_running = false;
                self.frame_sender.send_replace(CaptureEvent::Ended);
            }
            Err(e) => {
                tracing::error!("frame read failed: {}", e);
                self.is_running = false;
                self.frame_sender.send_replace(CaptureEvent::Ended);
            }
        }
    }

    /// Handle pending commands, false once every proxy is gone
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.cmd_receiver.try_recv() {
                Ok(msg) => self.handle_message(msg),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn run_capture(mut self) {
        tokio::task::block_in_place(move || {
            loop {
                if self.is_running {
                    self.step();
                    if !self.drain_commands() {
                        break;
                    }
                } else {
                    match self.cmd_receiver.blocking_recv() {
                        Some(msg) => self.handle_message(msg),
                        None => break,
                    }
                }
            }
            self.close();
        })
    }
}

pub fn run_capture() -> (CaptureProxy, watch::Receiver<CaptureEvent>) {
    let (capture, proxy, frames) = Capture::instantiate();
    tokio::spawn(capture.run_capture());
    (proxy, frames)
}
