//! Lossless merge for multi-part downloads.
//!
//! Per-chapter releases arrive as many small files of one extension. They
//! are concatenated byte-for-byte in sorted path order into a single file
//! named after the containing directory, and the parts are removed so a
//! re-import sees exactly one file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use super::{collect_files, file_extension};

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("no .{0} files found to merge")]
    NoParts(String),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

/// Concatenate every `extension` file under `dir` into
/// `<dir>/<dir-name>.<extension>` and delete the parts.
///
/// Parts are ordered by full path, so chapter files need the zero-padded
/// names release tooling produces anyway. The write goes through a
/// temporary file, which keeps a part named like the output from being
/// clobbered before it is read.
pub fn merge_directory(dir: &Path, extension: &str) -> Result<PathBuf, MergeError> {
    let parts: Vec<PathBuf> = collect_files(dir)?
        .into_iter()
        .filter(|p| file_extension(p).as_deref() == Some(extension))
        .collect();
    if parts.is_empty() {
        return Err(MergeError::NoParts(extension.to_string()));
    }

    let stem = dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("merged");
    let output = dir.join(format!("{}.{}", stem, extension));
    let scratch = dir.join(format!(".{}.{}.merging", stem, extension));

    let mut writer = BufWriter::new(File::create(&scratch)?);
    for part in &parts {
        debug!("Merge: appending {}", part.display());
        let mut reader = File::open(part)?;
        std::io::copy(&mut reader, &mut writer)?;
    }
    writer.flush()?;
    drop(writer);

    for part in &parts {
        fs::remove_file(part)?;
    }
    fs::rename(&scratch, &output)?;

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &[u8]) {
        fs::write(dir.join(name), content).expect("write file");
    }

    #[test]
    fn test_merge_concatenates_in_sorted_order() {
        let temp = TempDir::new().expect("temp dir");
        write_file(temp.path(), "02 - chapter.mp3", b"WORLD");
        write_file(temp.path(), "01 - chapter.mp3", b"HELLO ");

        let output = merge_directory(temp.path(), "mp3").expect("merge");
        assert_eq!(fs::read(&output).expect("read"), b"HELLO WORLD");
    }

    #[test]
    fn test_merge_output_named_after_directory() {
        let temp = TempDir::new().expect("temp dir");
        let book_dir = temp.path().join("Dune - Frank Herbert");
        fs::create_dir(&book_dir).expect("mkdir");
        write_file(&book_dir, "a.m4b", b"a");
        write_file(&book_dir, "b.m4b", b"b");

        let output = merge_directory(&book_dir, "m4b").expect("merge");
        assert_eq!(
            output.file_name().and_then(|n| n.to_str()),
            Some("Dune - Frank Herbert.m4b")
        );
    }

    #[test]
    fn test_merge_removes_parts() {
        let temp = TempDir::new().expect("temp dir");
        write_file(temp.path(), "01.mp3", b"x");
        write_file(temp.path(), "02.mp3", b"y");
        write_file(temp.path(), "cover.jpg", b"not a part");

        let output = merge_directory(temp.path(), "mp3").expect("merge");

        let remaining: Vec<String> = fs::read_dir(temp.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&"cover.jpg".to_string()));
        assert!(remaining.contains(
            &output
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .expect("name")
        ));
    }

    #[test]
    fn test_merge_gathers_parts_from_subdirectories() {
        let temp = TempDir::new().expect("temp dir");
        let disc1 = temp.path().join("CD1");
        let disc2 = temp.path().join("CD2");
        fs::create_dir(&disc1).expect("mkdir");
        fs::create_dir(&disc2).expect("mkdir");
        write_file(&disc1, "01.mp3", b"one");
        write_file(&disc2, "01.mp3", b"two");

        let output = merge_directory(temp.path(), "mp3").expect("merge");
        // CD1 sorts before CD2
        assert_eq!(fs::read(&output).expect("read"), b"onetwo");
    }

    #[test]
    fn test_merge_without_parts_is_an_error() {
        let temp = TempDir::new().expect("temp dir");
        write_file(temp.path(), "readme.txt", b"hi");

        let err = merge_directory(temp.path(), "mp3").expect_err("should fail");
        assert!(matches!(err, MergeError::NoParts(ext) if ext == "mp3"));
    }
}
