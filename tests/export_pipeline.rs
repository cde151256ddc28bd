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

use pump_export::reader::ZipReader;
use pump_export::render::{Payload, Preprocessor, RenderError};
use pump_export::{
    ArchiveError, ExportError, ExportEvent, ExportJob, ExportProgress, ExportWorker, ValidationError,
    WorkerError, WorkerState,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use std::thread;
use tempfile::{tempdir, TempDir};

/// Passes files through, but stops at the start of every file until released.
struct Gate {
    reached: Mutex<Sender<PathBuf>>,
    release: Mutex<Receiver<()>>,
}

struct GateControl {
    reached: Receiver<PathBuf>,
    release: Sender<()>,
}

impl GateControl {
    fn reach(&self) -> PathBuf {
        self.reached.recv().unwrap()
    }

    fn open(&self) {
        self.release.send(()).unwrap();
    }
}

fn gate() -> (Gate, GateControl) {
    let (reached_tx, reached_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    (
        Gate {
            reached: Mutex::new(reached_tx),
            release: Mutex::new(release_rx),
        },
        GateControl {
            reached: reached_rx,
            release: release_tx,
        },
    )
}

impl Preprocessor for Gate {
    fn prepare(&self, source: &Path, _job: &ExportJob) -> Result<Payload, RenderError> {
        let _ = self.reached.lock().unwrap().send(source.to_path_buf());
        let _ = self.release.lock().unwrap().recv();
        Ok(Payload::File(source.to_path_buf()))
    }
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn fixture(names: &[(&str, usize)]) -> (TempDir, Vec<PathBuf>) {
    let dir = tempdir().unwrap();
    let sources = names
        .iter()
        .enumerate()
        .map(|(i, (name, len))| {
            let path = dir.path().join(name);
            fs::write(&path, pattern(*len, i as u8)).unwrap();
            path
        })
        .collect();
    (dir, sources)
}

fn entry_names(archive: &Path) -> Vec<String> {
    let reader = ZipReader::open(archive).unwrap();
    reader.index().names().map(str::to_owned).collect()
}

fn progress(rx: &Receiver<ExportEvent>) -> Vec<ExportProgress> {
    rx.try_iter()
        .filter_map(|event| match event {
            ExportEvent::Progress(p) => Some(p),
            _ => None,
        })
        .collect()
}

#[test]
fn exported_archive_round_trips() {
    let (dir, sources) = fixture(&[("a.png", 100), ("b.png", 200)]);
    let archive = dir.path().join("out.zip");
    let (mut worker, rx) = ExportWorker::new();

    worker.start(ExportJob::builder(&sources, &archive).build()).unwrap();
    assert!(matches!(worker.wait(), WorkerState::Completed));

    let mut reader = ZipReader::open(&archive).unwrap();
    assert_eq!(reader.index().len(), 2);
    assert_eq!(entry_names(&archive), ["a.png", "b.png"]);
    assert_eq!(reader.extract_file("a.png").unwrap(), pattern(100, 0));
    assert_eq!(reader.extract_file("b.png").unwrap(), pattern(200, 1));

    let events: Vec<_> = rx.try_iter().collect();
    assert!(matches!(events.last(), Some(ExportEvent::Finished(WorkerState::Completed))));
}

#[test]
fn progress_is_reported_once_per_file_in_order() {
    let (dir, sources) = fixture(&[("1.jpg", 10), ("2.jpg", 0), ("3.jpg", 70_000), ("4.jpg", 5)]);
    let archive = dir.path().join("out.zip");
    let (mut worker, rx) = ExportWorker::new();

    worker.start(ExportJob::builder(&sources, &archive).build()).unwrap();
    worker.wait();

    let updates = progress(&rx);
    assert_eq!(updates.len(), sources.len());
    for (i, update) in updates.iter().enumerate() {
        assert_eq!(update.completed, i + 1);
        assert_eq!(update.total, 4);
        assert_eq!(update.current_file, format!("{}.jpg", i + 1));
    }
    assert_eq!(entry_names(&archive), ["1.jpg", "2.jpg", "3.jpg", "4.jpg"]);
}

#[test]
fn empty_job_fails_validation_without_touching_disk() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("out.zip");
    let (mut worker, rx) = ExportWorker::new();

    worker.start(ExportJob::builder(Vec::<PathBuf>::new(), &archive).build()).unwrap();
    let state = worker.wait();

    assert!(matches!(
        &state,
        WorkerState::Failed(e) if matches!(**e, ExportError::Validation(ValidationError::NoFiles))
    ));
    assert!(progress(&rx).is_empty());
    assert!(!archive.exists());
}

#[test]
fn existing_destination_is_left_alone() {
    let (dir, sources) = fixture(&[("a.png", 10)]);
    let archive = dir.path().join("out.zip");
    fs::write(&archive, b"precious").unwrap();
    let (mut worker, _rx) = ExportWorker::new();

    worker.start(ExportJob::builder(&sources, &archive).build()).unwrap();
    let state = worker.wait();

    assert!(matches!(
        &state,
        WorkerState::Failed(e)
            if matches!(&**e, ExportError::Validation(ValidationError::DestinationExists(p)) if *p == archive)
    ));
    assert_eq!(fs::read(&archive).unwrap(), b"precious");
}

#[test]
fn missing_watermark_can_be_skipped() {
    let (dir, sources) = fixture(&[("a.png", 30)]);
    let archive = dir.path().join("out.zip");
    let job = ExportJob::builder(&sources, &archive)
        .watermark(dir.path().join("missing.png"))
        .build();
    let (mut worker, _rx) = ExportWorker::new();

    worker.start(job.clone()).unwrap();
    let state = worker.wait();
    let WorkerState::Failed(error) = state else {
        panic!("expected a validation failure, got {state:?}");
    };
    assert!(error.is_recoverable());
    assert!(!archive.exists());

    worker.start(job.without_watermark()).unwrap();
    assert!(matches!(worker.wait(), WorkerState::Completed));
    assert_eq!(entry_names(&archive), ["a.png"]);
}

fn cancel_after(appended: usize) {
    let (dir, sources) = fixture(&[("a.png", 100), ("b.png", 200), ("c.png", 300), ("d.png", 400)]);
    let archive = dir.path().join("out.zip");
    let (gate, control) = gate();
    let (worker, rx) = ExportWorker::new();
    let mut worker = worker.with_preprocessor(gate);

    worker.start(ExportJob::builder(&sources, &archive).build()).unwrap();
    for source in &sources[..appended] {
        assert_eq!(&control.reach(), source);
        control.open();
    }
    assert_eq!(control.reach(), sources[appended]);
    worker.cancel_token().cancel();
    control.open();

    assert!(matches!(worker.stop(), WorkerState::Cancelled));
    let expected: Vec<_> = ["a.png", "b.png", "c.png", "d.png"][..appended].to_vec();
    assert_eq!(entry_names(&archive), expected);
    assert_eq!(progress(&rx).len(), appended);
}

#[test]
fn cancelling_keeps_the_files_already_appended() {
    cancel_after(2);
}

#[test]
fn cancelling_before_the_first_append_leaves_an_empty_archive() {
    cancel_after(0);
}

#[test]
fn second_start_is_refused_while_running() {
    let (dir, sources) = fixture(&[("a.png", 10), ("b.png", 10)]);
    let (gate, control) = gate();
    let (worker, _rx) = ExportWorker::new();
    let mut worker = worker.with_preprocessor(gate);

    worker
        .start(ExportJob::builder(&sources, dir.path().join("one.zip")).build())
        .unwrap();
    control.reach();
    assert!(worker.state().is_busy());

    let refused = worker.start(ExportJob::builder(&sources, dir.path().join("two.zip")).build());
    assert!(matches!(refused, Err(WorkerError::AlreadyRunning)));

    drop(control);
    assert!(matches!(worker.wait(), WorkerState::Completed));
    assert!(!dir.path().join("two.zip").exists());
    assert_eq!(entry_names(&dir.path().join("one.zip")), ["a.png", "b.png"]);
}

#[test]
fn dropping_the_worker_stops_the_run() {
    let (dir, sources) = fixture(&[("a.png", 10), ("b.png", 10), ("c.png", 10)]);
    let archive = dir.path().join("out.zip");
    let (gate, control) = gate();
    let (worker, rx) = ExportWorker::new();
    let mut worker = worker.with_preprocessor(gate);

    worker.start(ExportJob::builder(&sources, &archive).build()).unwrap();
    control.reach();
    control.open();
    control.reach();

    let token = worker.cancel_token();
    let dropper = thread::spawn(move || drop(worker));
    while !token.is_cancelled() {
        thread::yield_now();
    }
    control.open();
    dropper.join().unwrap();

    assert!(matches!(
        rx.try_iter().last(),
        Some(ExportEvent::Finished(WorkerState::Cancelled))
    ));
    assert_eq!(entry_names(&archive), ["a.png"]);
}

#[test]
fn unwritable_destination_is_a_warning_and_the_run_goes_on() {
    let (dir, sources) = fixture(&[("a.png", 10)]);
    let missing_dir = dir.path().join("no-such-dir");
    let archive = missing_dir.join("out.zip");
    let (mut worker, rx) = ExportWorker::new();

    worker.start(ExportJob::builder(&sources, &archive).build()).unwrap();
    let state = worker.wait();

    let events: Vec<_> = rx.try_iter().collect();
    assert!(matches!(
        &events[0],
        ExportEvent::Warning(ValidationError::DestinationNotWritable(p)) if *p == missing_dir
    ));
    // The archive step was reached, and failed on the missing directory.
    assert!(matches!(
        &events[1],
        ExportEvent::Progress(ExportProgress { completed: 0, total: 1, .. })
    ));
    assert!(matches!(
        &state,
        WorkerState::Failed(e)
            if matches!(&**e, ExportError::Archive(ArchiveError::OpenFailed { path, .. }) if *path == archive)
    ));
    assert!(matches!(events.last(), Some(ExportEvent::Finished(WorkerState::Failed(_)))));
}
