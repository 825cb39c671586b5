use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use export_logging::{export_debug, export_info};
use thiserror::Error;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::persist::{ensure_output_dir, PersistError};
use crate::progress::ProgressSink;
use crate::{ArchivePhase, ArchiveProgress, ArchiveSummary};

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 9;
const ZIP32_LIMIT: u64 = u32::MAX as u64;

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub source_dir: PathBuf,
    pub output_path: PathBuf,
    /// 0 stores entries uncompressed; 1-9 deflate.
    pub compression_level: u32,
}

impl ArchiveOptions {
    pub fn new(source_dir: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_path: output_path.into(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive source {0:?} is not a directory")]
    SourceMissing(PathBuf),
    #[error("failed to scan source directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    OutputDir(#[from] PersistError),
}

struct SourceFile {
    path: PathBuf,
    entry_name: String,
    size: u64,
}

/// Pack every regular file under `source_dir` into one zip at `output_path`.
///
/// Phases are reported in order `Preparing`, `Archiving` (once per entry),
/// `Finalizing`, `Complete`. Entry names are relative to `source_dir` with `/`
/// separators. Any IO failure aborts the build and may leave a partial archive
/// behind; the source tree is never modified.
pub fn build_archive(
    options: &ArchiveOptions,
    sink: &dyn ProgressSink<ArchiveProgress>,
) -> Result<ArchiveSummary, ArchiveError> {
    if !options.source_dir.is_dir() {
        return Err(ArchiveError::SourceMissing(options.source_dir.clone()));
    }
    if let Some(parent) = options.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_output_dir(parent)?;
    }

    let files = scan_source(&options.source_dir, &options.output_path)?;
    let total_files = files.len();
    let total_bytes: u64 = files.iter().map(|f| f.size).sum();

    export_info!(
        "Preparing archive {:?}: {} files, {} bytes",
        options.output_path,
        total_files,
        total_bytes
    );
    let mut state = ArchiveProgress {
        phase: ArchivePhase::Preparing,
        files_processed: 0,
        total_files,
        bytes_processed: 0,
        total_bytes: Some(total_bytes),
        archive_size: None,
        message: "Preparing archive...".to_string(),
    };
    sink.emit(state.clone());

    let mut writer = ZipWriter::new(BufWriter::new(File::create(&options.output_path)?));
    state.phase = ArchivePhase::Archiving;
    for file in &files {
        writer.start_file(file.entry_name.as_str(), entry_options(options.compression_level, file.size))?;
        let mut source = File::open(&file.path)?;
        let copied = io::copy(&mut source, &mut writer)?;

        state.files_processed += 1;
        state.bytes_processed += copied;
        state.message = format!("Archiving {}", file.entry_name);
        export_debug!("Archived {} ({} bytes)", file.entry_name, copied);
        sink.emit(state.clone());
    }
    if files.is_empty() {
        state.message = "No files to archive".to_string();
        sink.emit(state.clone());
    }

    state.phase = ArchivePhase::Finalizing;
    state.message = "Finalizing archive...".to_string();
    export_info!("Finalizing archive {:?}", options.output_path);
    sink.emit(state.clone());

    let mut output = writer.finish()?;
    output.flush()?;
    let file = output.into_inner().map_err(|err| err.into_error())?;
    file.sync_all()?;
    drop(file);

    let size = fs::metadata(&options.output_path)?.len();
    state.phase = ArchivePhase::Complete;
    state.archive_size = Some(size);
    state.message = "Archive complete".to_string();
    export_info!(
        "Archive {:?} complete: {} files, {} bytes",
        options.output_path,
        total_files,
        size
    );
    sink.emit(state);

    Ok(ArchiveSummary {
        output_path: options.output_path.clone(),
        size,
        file_count: total_files,
    })
}

/// Every regular file under `root` in a stable order, skipping the archive
/// itself when it is being written inside the tree it packs.
fn scan_source(root: &Path, output_path: &Path) -> Result<Vec<SourceFile>, ArchiveError> {
    let root = root.canonicalize()?;
    let excluded = output_path
        .parent()
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
        .and_then(|p| p.canonicalize().ok())
        .zip(output_path.file_name())
        .map(|(dir, name)| dir.join(name));

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || Some(entry.path()) == excluded.as_deref() {
            continue;
        }
        let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        files.push(SourceFile {
            entry_name: entry_name(relative),
            size: entry.metadata()?.len(),
            path: entry.into_path(),
        });
    }
    Ok(files)
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn entry_options(level: u32, size: u64) -> SimpleFileOptions {
    let options = SimpleFileOptions::default().large_file(size >= ZIP32_LIMIT);
    if level == 0 {
        options.compression_method(CompressionMethod::Stored)
    } else {
        options
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(i64::from(level.min(9))))
    }
}
