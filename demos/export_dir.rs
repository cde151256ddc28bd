use argh::FromArgs;
use indicatif::ProgressBar;
use pump_export::render::ImageRenderer;
use pump_export::settings::ExportSettings;
use pump_export::{CanvasSize, ExportEvent, ExportWorker, WorkerState};
use std::path::PathBuf;
use std::{fs, process::exit};

/// Export every file of a directory into a new zip archive
#[derive(FromArgs)]
struct Args {
    /// directory holding the pictures
    #[argh(positional)]
    directory: PathBuf,
    /// archive to create
    #[argh(positional)]
    archive: PathBuf,
    /// watermark picture stamped on every export
    #[argh(option, short = 'w')]
    watermark: Option<PathBuf>,
    /// scale the watermark to this width, keeping its aspect ratio
    #[argh(option)]
    watermark_width: Option<u32>,
    /// output format extension, e.g. jpg or png
    #[argh(option, short = 'f')]
    format: Option<String>,
    /// resize, watermark and re-encode instead of storing files as they are
    #[argh(switch, short = 'r')]
    render: bool,
    /// go on without the watermark when it cannot be read
    #[argh(switch)]
    skip_missing_watermark: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args: Args = argh::from_env();

    let mut sources = fs::read_dir(&args.directory)
        .unwrap_or_else(|e| {
            println!("Error: cannot list {}: {}", args.directory.display(), e);
            exit(1);
        })
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    sources.sort();

    let mut settings = ExportSettings::load();
    if let Some(watermark) = args.watermark {
        settings.watermark = Some(watermark);
    }
    if let (Some(width), Some(mark)) = (args.watermark_width, &settings.watermark) {
        match image::image_dimensions(mark) {
            Ok((w, h)) => {
                settings.watermark_size = Some(CanvasSize::new(w, h).with_width_keeping_aspect(width));
            }
            Err(e) => println!("Warning: cannot size watermark {}: {}", mark.display(), e),
        }
    }
    if let Some(format) = args.format {
        settings.output_format = format;
    }
    let mut job = settings.job_for(&sources, &args.archive);

    let (worker, rx) = ExportWorker::new();
    let mut worker = if args.render {
        worker.with_preprocessor(ImageRenderer)
    } else {
        worker
    };

    loop {
        worker.start(job.clone()).unwrap_or_else(|e| {
            println!("Error: {}", e);
            exit(1);
        });

        let pb = ProgressBar::new(sources.len() as u64);
        let state = loop {
            match rx.recv() {
                Ok(ExportEvent::Progress(p)) => {
                    pb.set_position(p.completed as u64);
                    pb.set_message(p.current_file);
                }
                Ok(ExportEvent::Warning(w)) => pb.println(format!("Warning: {}", w)),
                Ok(ExportEvent::Finished(state)) => break state,
                Err(_) => break worker.wait(),
            }
        };
        pb.finish();
        worker.wait();

        match state {
            WorkerState::Completed => {
                println!("Wrote {} files to {}", sources.len(), args.archive.display());
                settings.remember(&job);
                if let Err(e) = settings.save() {
                    println!("Warning: settings not saved: {}", e);
                }
                return;
            }
            WorkerState::Failed(e) if e.is_recoverable() && args.skip_missing_watermark => {
                println!("Warning: {}, exporting without it", e);
                job = job.without_watermark();
            }
            WorkerState::Failed(e) => {
                println!("Error: {}", e);
                exit(1);
            }
            other => {
                println!("Export ended as {:?}", other);
                exit(1);
            }
        }
    }
}
