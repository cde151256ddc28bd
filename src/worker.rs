/*
   Export pipeline for Publish My Pictures: validate, render and archive.
   Copyright (C) 2022 Matheus Xavier <mxavier@neonimp.com>

   This program is free software: you can redistribute it and/or modify
   it under the terms of the GNU Lesser General Public License as published by
   the Free Software Foundation, either version 3 of the License, or
   (at your option) any later version.

   This program is distributed in the hope that it will be useful,
   but WITHOUT ANY WARRANTY; without even the implied warranty of
   MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
   GNU General Public License for more details.

   You should have received a copy of the GNU Lesser General Public License
   along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! Background export runs.
//!
//! ```text
//! start(job)
//!     │ Validating: validator::validate
//!     ▼
//! Running: for each source
//!     1. check the cancel flag
//!     2. Preprocessor::prepare
//!     3. check the cancel flag again
//!     4. ArchiveWriter::append / append_bytes
//!     5. send ExportEvent::Progress
//!     │
//!     ▼
//! Completed | Failed | Cancelled  ──  ExportEvent::Finished (mpsc)
//! ```

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::job::ExportJob;
use crate::render::{Passthrough, Payload, Preprocessor, RenderError};
use crate::validator::{self, ValidationError};
use crate::writer::{ArchiveError, ArchiveWriter};

/// Why a run ended in [`WorkerState::Failed`].
#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("export thread panicked")]
    Aborted,
}

impl ExportError {
    /// Starting again with [`ExportJob::without_watermark`] can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExportError::Validation(e) if e.is_recoverable())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("an export is already running")]
    AlreadyRunning,
    #[error("cannot spawn the export thread: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Clone, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Validating,
    Running,
    Completed,
    Failed(Arc<ExportError>),
    Cancelled,
}

impl WorkerState {
    pub fn is_busy(&self) -> bool {
        matches!(self, WorkerState::Validating | WorkerState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::Failed(_) | WorkerState::Cancelled
        )
    }
}

/// Sent after every source file, whether it made it into the archive or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportProgress {
    pub completed: usize,
    pub total: usize,
    pub current_file: String,
}

#[derive(Debug, Clone)]
pub enum ExportEvent {
    Progress(ExportProgress),
    /// Soft validation finding, the run goes on.
    Warning(ValidationError),
    /// Terminal state of the run, always the last event of a run.
    Finished(WorkerState),
}

/// Requests cancellation of the current run without waiting for it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock(state: &Mutex<WorkerState>) -> MutexGuard<'_, WorkerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs one [`ExportJob`] at a time on a background thread.
pub struct ExportWorker {
    state: Arc<Mutex<WorkerState>>,
    cancel: CancelToken,
    events: Sender<ExportEvent>,
    preprocessor: Arc<dyn Preprocessor>,
    writer: ArchiveWriter,
    handle: Option<JoinHandle<()>>,
}

impl ExportWorker {
    /// A new idle worker and the receiving end of its events.
    pub fn new() -> (Self, Receiver<ExportEvent>) {
        let (events, rx) = mpsc::channel();
        let worker = ExportWorker {
            state: Arc::new(Mutex::new(WorkerState::Idle)),
            cancel: CancelToken::default(),
            events,
            preprocessor: Arc::new(Passthrough),
            writer: ArchiveWriter::default(),
            handle: None,
        };
        (worker, rx)
    }

    pub fn with_preprocessor(mut self, preprocessor: impl Preprocessor + 'static) -> Self {
        self.preprocessor = Arc::new(preprocessor);
        self
    }

    pub fn with_archive_writer(mut self, writer: ArchiveWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn state(&self) -> WorkerState {
        lock(&self.state).clone()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start exporting `job`. Refused without blocking while another run is
    /// validating or running.
    pub fn start(&mut self, job: ExportJob) -> Result<(), WorkerError> {
        {
            let mut state = lock(&self.state);
            if state.is_busy() {
                return Err(WorkerError::AlreadyRunning);
            }
            *state = WorkerState::Validating;
        }
        // The previous run already published its terminal state.
        if let Some(previous) = self.handle.take() {
            let _ = previous.join();
        }
        self.cancel.reset();

        let run = Run {
            state: self.state.clone(),
            cancel: self.cancel.clone(),
            events: self.events.clone(),
            preprocessor: self.preprocessor.clone(),
            writer: self.writer.clone(),
        };
        let spawned = thread::Builder::new()
            .name("pump-export".to_owned())
            .spawn(move || run.execute(job));

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                *lock(&self.state) = WorkerState::Idle;
                Err(WorkerError::Spawn(e))
            }
        }
    }

    /// Cancel the current run and wait for it to exit. No file is started
    /// after this returns; files already appended stay in the archive.
    pub fn stop(&mut self) -> WorkerState {
        self.cancel.cancel();
        self.wait()
    }

    /// Wait for the current run to finish on its own.
    pub fn wait(&mut self) -> WorkerState {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("export thread panicked");
            }
        }
        self.state()
    }
}

impl Drop for ExportWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}

/// Everything the background thread shares with its worker.
struct Run {
    state: Arc<Mutex<WorkerState>>,
    cancel: CancelToken,
    events: Sender<ExportEvent>,
    preprocessor: Arc<dyn Preprocessor>,
    writer: ArchiveWriter,
}

impl Run {
    fn execute(self, job: ExportJob) {
        let _guard = PanicGuard { run: &self };
        let outcome = self.export(&job);
        match &outcome {
            WorkerState::Completed => info!(archive = %job.destination().display(), "export completed"),
            WorkerState::Cancelled => info!(archive = %job.destination().display(), "export cancelled"),
            WorkerState::Failed(e) => error!(archive = %job.destination().display(), "export failed: {e}"),
            _ => {}
        }
        self.finish(outcome);
    }

    fn export(&self, job: &ExportJob) -> WorkerState {
        info!(
            files = job.sources().len(),
            archive = %job.destination().display(),
            "validating export"
        );
        let report = match validator::validate(job) {
            Ok(report) => report,
            Err(e) => return WorkerState::Failed(Arc::new(e.into())),
        };
        for warning in report.warnings {
            warn!("{warning}");
            self.send(ExportEvent::Warning(warning));
        }

        self.set_state(WorkerState::Running);
        let total = job.sources().len();
        let mut completed = 0;

        for source in job.sources() {
            if self.cancel.is_cancelled() {
                return self.cancelled(job, completed);
            }
            debug!(source = %source.display(), "exporting");

            let prepared = self.preprocessor.prepare(source, job);
            if self.cancel.is_cancelled() {
                return self.cancelled(job, completed);
            }
            let appended = prepared
                .map_err(ExportError::from)
                .and_then(|payload| self.append(payload, job.destination()).map_err(ExportError::from));

            if appended.is_ok() {
                completed += 1;
            }
            self.send(ExportEvent::Progress(ExportProgress {
                completed,
                total,
                current_file: display_name(source),
            }));
            if let Err(e) = appended {
                return WorkerState::Failed(Arc::new(e));
            }
        }

        WorkerState::Completed
    }

    fn append(&self, payload: Payload, archive: &Path) -> Result<(), ArchiveError> {
        match payload {
            Payload::File(path) => self.writer.append(&path, archive),
            Payload::Encoded { name, bytes } => self.writer.append_bytes(&name, &bytes, archive),
        }
    }

    fn cancelled(&self, job: &ExportJob, completed: usize) -> WorkerState {
        debug!(completed, "cancellation observed");
        if completed == 0 {
            if let Err(e) = self.writer.ensure_exists(job.destination()) {
                return WorkerState::Failed(Arc::new(e.into()));
            }
        }
        WorkerState::Cancelled
    }

    fn set_state(&self, state: WorkerState) {
        *lock(&self.state) = state;
    }

    /// Publish the terminal state; holding the lock keeps `state()` and the
    /// event stream in agreement.
    fn finish(&self, outcome: WorkerState) {
        let mut state = lock(&self.state);
        *state = outcome.clone();
        self.send(ExportEvent::Finished(outcome));
    }

    fn send(&self, event: ExportEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

/// Leaves the worker in `Failed(Aborted)` if the run unwinds.
struct PanicGuard<'a> {
    run: &'a Run,
}

impl Drop for PanicGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.run.finish(WorkerState::Failed(Arc::new(ExportError::Aborted)));
        }
    }
}

fn display_name(source: &Path) -> String {
    source
        .file_name()
        .unwrap_or(source.as_os_str())
        .to_string_lossy()
        .into_owned()
}
