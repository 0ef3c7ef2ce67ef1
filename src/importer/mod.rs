// # Importer Module
//
// Moves completed downloads into the library and flips books available:
//
// - **Importer**: Scan, pick the best-format file, place it, record it
// - **merge**: Lossless concatenation of multi-part releases
//
// A download with several files of the winning extension is never imported
// blindly; it surfaces as `ImportError::MultiFile` and `import_with_merge`
// concatenates the parts before trying again.

mod merge;

// Public API exports
pub use merge::{merge_directory, MergeError};

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::activity::ActivityLog;
use crate::db::{ActivityKind, BookState, Database, DbBook, DbBookFile, DbFormat};

const MAX_RECURSION_DEPTH: usize = 10;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("download {0} not found")]
    DownloadNotFound(String),
    #[error("book {0} not found")]
    BookNotFound(String),
    #[error("download has no output path to import from")]
    MissingOutputPath,
    /// Multi-part release; merge the parts and re-import
    #[error("found {count} .{extension} files; merge before importing")]
    MultiFile { extension: String, count: usize },
    /// Terminal: retrying without new files cannot succeed
    #[error("no files matched the configured formats")]
    NoMatchingFiles,
    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportOutcome {
    pub imported_path: PathBuf,
    pub format_name: String,
}

#[derive(Clone)]
pub struct Importer {
    database: Database,
    activity: ActivityLog,
    library_root: PathBuf,
}

impl Importer {
    pub fn new(database: Database, activity: ActivityLog, library_root: PathBuf) -> Self {
        Self {
            database,
            activity,
            library_root,
        }
    }

    /// Import a completed download's files into the library
    pub async fn import_download(&self, download_id: &str) -> Result<ImportOutcome, ImportError> {
        let download = self
            .database
            .get_download(download_id)
            .await?
            .ok_or_else(|| ImportError::DownloadNotFound(download_id.to_string()))?;
        let book = self
            .database
            .get_book(&download.book_id)
            .await?
            .ok_or_else(|| ImportError::BookNotFound(download.book_id.clone()))?;
        let output_path = download.output_path.ok_or(ImportError::MissingOutputPath)?;
        let formats = self.database.get_enabled_formats().await?;

        self.import_files(&book, Path::new(&output_path), &formats)
            .await
    }

    /// Same as [`import_download`](Self::import_download), but a multi-part
    /// release is merged into one file and imported again
    pub async fn import_with_merge(&self, download_id: &str) -> Result<ImportOutcome, ImportError> {
        match self.import_download(download_id).await {
            Err(ImportError::MultiFile { extension, count }) => {
                let download = self
                    .database
                    .get_download(download_id)
                    .await?
                    .ok_or_else(|| ImportError::DownloadNotFound(download_id.to_string()))?;
                let output_path = download.output_path.ok_or(ImportError::MissingOutputPath)?;

                info!(
                    "Importer: merging {} .{} part(s) under {}",
                    count, extension, output_path
                );
                merge_directory(Path::new(&output_path), &extension)?;

                self.import_download(download_id).await
            }
            outcome => outcome,
        }
    }

    /// Find the best file under `download_path` and place it in the library.
    ///
    /// Formats are tried in priority order; the first with any match wins.
    /// One match imports, two or more raise [`ImportError::MultiFile`].
    pub async fn import_files(
        &self,
        book: &DbBook,
        download_path: &Path,
        formats: &[DbFormat],
    ) -> Result<ImportOutcome, ImportError> {
        let files = collect_files(download_path)?;
        info!(
            "Importer: scanning {} ({} file(s)) for '{}'",
            download_path.display(),
            files.len(),
            book.title
        );

        for format in formats.iter().filter(|f| f.enabled) {
            let matching: Vec<&PathBuf> = files
                .iter()
                .filter(|p| file_extension(p).as_deref() == Some(format.extension.as_str()))
                .collect();

            match matching.len() {
                0 => continue,
                1 => return self.place_file(book, matching[0], format).await,
                count => {
                    return Err(ImportError::MultiFile {
                        extension: format.extension.clone(),
                        count,
                    })
                }
            }
        }

        // No configured format matched. A dominant extension with several
        // files is still a multi-part release, not a missing-format case.
        if let Some((extension, count)) = dominant_extension(&files) {
            if count >= 2 {
                return Err(ImportError::MultiFile { extension, count });
            }
        }

        warn!(
            "Importer: no files under {} match any configured format",
            download_path.display()
        );
        Err(ImportError::NoMatchingFiles)
    }

    async fn place_file(
        &self,
        book: &DbBook,
        source: &Path,
        format: &DbFormat,
    ) -> Result<ImportOutcome, ImportError> {
        let authors = book.authors().unwrap_or_default();
        let author = authors
            .first()
            .map(String::as_str)
            .unwrap_or("Unknown Author");

        let target_dir = self
            .library_root
            .join(&format.media_kind)
            .join(sanitize_component(author))
            .join(sanitize_component(&book.title));
        fs::create_dir_all(&target_dir)?;

        let file_name = source
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "import".into());
        let destination = target_dir.join(file_name);

        move_file(source, &destination)?;
        let size = fs::metadata(&destination)?.len() as i64;

        self.database
            .add_book_file(&DbBookFile::new(
                &book.id,
                &destination.to_string_lossy(),
                size,
            ))
            .await?;
        self.database
            .set_book_state(&book.id, BookState::Available)
            .await?;

        self.activity
            .record(
                ActivityKind::ImportCompleted,
                Some(&book.id),
                &format!(
                    "Imported '{}' as {} ({} bytes)",
                    book.title, format.name, size
                ),
            )
            .await;
        self.activity
            .record(
                ActivityKind::BookAvailable,
                Some(&book.id),
                &format!("'{}' is now available", book.title),
            )
            .await;

        info!(
            "Importer: placed {} for '{}'",
            destination.display(),
            book.title
        );
        Ok(ImportOutcome {
            imported_path: destination,
            format_name: format.name.clone(),
        })
    }
}

/// Every file under `root`, recursively, in sorted order
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();
    collect_files_recursive(root, 0, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files_recursive(
    dir: &Path,
    depth: usize,
    files: &mut Vec<PathBuf>,
) -> Result<(), std::io::Error> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("directory nesting exceeds {} levels", MAX_RECURSION_DEPTH),
        ));
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files_recursive(&path, depth + 1, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Most frequent extension and its count; count ties break alphabetically
fn dominant_extension(files: &[PathBuf]) -> Option<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for file in files {
        if let Some(ext) = file_extension(file) {
            *counts.entry(ext).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
}

/// Strip filesystem-hostile characters from a path segment
fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "Unknown".to_string()
    } else {
        collapsed
    }
}

/// Rename, falling back to copy-and-delete across filesystems
fn move_file(source: &Path, destination: &Path) -> Result<(), std::io::Error> {
    match fs::rename(source, destination) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(source, destination)?;
            fs::remove_file(source)?;
            Ok(())
        }
    }
}
