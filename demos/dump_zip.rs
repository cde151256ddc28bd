use argh::FromArgs;
use indicatif::ProgressBar;
use pump_export::reader::ZipReader;
use std::fs::{self, File};
use std::path::PathBuf;
use std::process::exit;

/// List or extract the contents of a zip file
#[derive(FromArgs)]
struct Args {
    /// the zip file to read
    #[argh(positional)]
    filename: PathBuf,
    /// list the files in the zip file
    #[argh(switch, short = 'l')]
    list_files: bool,
    /// dump the files without decompressing them to the given directory
    #[argh(option, short = 'd')]
    dump_to: Option<PathBuf>,
    /// extract the files to the given directory
    #[argh(option, short = 'x')]
    extract_to: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args: Args = argh::from_env();

    let mut zip = ZipReader::open(&args.filename).unwrap_or_else(|e| {
        println!("Error: {}", e);
        exit(1);
    });

    if args.list_files {
        list_files(&zip);
    }

    if let Some(where_to) = args.dump_to {
        dump_files(&mut zip, where_to);
    }

    if let Some(where_to) = args.extract_to {
        if let Err(e) = zip.extract_all_files(&where_to) {
            println!("Error: {}", e);
            exit(1);
        }
    }
}

fn list_files(zip: &ZipReader<File>) {
    for entry in zip.index() {
        if entry.is_directory() {
            println!("directory: {:?}", entry.filename);
        } else {
            let ratio = match entry.uncompressed_size {
                0 => 1.0,
                n => entry.compressed_size as f64 / n as f64,
            };
            println!(
                "file: {:?}, size: {}, comp.size: {}, comp.method: {}, crc: {:08x}, ratio: {:.2}",
                entry.filename,
                entry.uncompressed_size,
                entry.compressed_size,
                entry.compression,
                entry.crc32,
                ratio
            );
        }
    }
}

fn dump_files(zip: &mut ZipReader<File>, where_to: PathBuf) {
    let names = zip.index().files().map(|cd| cd.filename.clone()).collect::<Vec<_>>();
    if let Err(e) = fs::create_dir_all(&where_to) {
        println!("Error: {}", e);
        exit(1);
    }

    let pb = ProgressBar::new(names.len() as u64);
    for name in names {
        let raw = zip.dump_file(&name).unwrap_or_else(|e| {
            println!("Error: {}", e);
            exit(1);
        });
        if let Err(e) = fs::write(where_to.join(format!("{}.raw", name.replace('/', "_"))), raw) {
            println!("Error: {}", e);
            exit(1);
        }
        pb.inc(1);
    }
    pb.finish();
}
