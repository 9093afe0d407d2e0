//!
//! File output split across sequentially numbered files by message count.
//!
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::ClientError;
use crate::sink::MessageSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationState {
    pub current_file_index: usize,
    pub messages_written_to_current_file: usize,
    pub threshold: usize,
}

/// Writes messages to `<base>.<ext>`, or to `<base>.0.<ext>`, `<base>.1.<ext>`, ... once the
/// stream may outgrow one file. Files are opened on their first message.
pub struct RotatingFileSink {
    dir: PathBuf,
    stem: String,
    extension: Option<String>,
    rotating: bool,
    state: RotationState,
    current: Option<BufWriter<File>>,
    delimiter: Option<Vec<u8>>,
    files: Vec<PathBuf>,
}

impl RotatingFileSink {
    /// `expected` is the total message count when known. A stream known to fit in one file
    /// is written to `path` as is.
    pub fn new(
        path: impl AsRef<Path>,
        threshold: usize,
        expected: Option<usize>,
        delimiter: Option<Vec<u8>>,
    ) -> Result<Self, ClientError> {
        if threshold == 0 {
            return Err(ClientError::Config(
                "messages per file must be at least 1".to_owned(),
            ));
        }
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ClientError::Config(format!("invalid output path `{}`", path.display()))
            })?;
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned());
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let rotating = !matches!(expected, Some(n) if n <= threshold);

        Ok(RotatingFileSink {
            dir,
            stem,
            extension,
            rotating,
            state: RotationState {
                current_file_index: 0,
                messages_written_to_current_file: 0,
                threshold,
            },
            current: None,
            delimiter,
            files: Vec::new(),
        })
    }

    pub fn is_rotating(&self) -> bool {
        self.rotating
    }

    pub fn state(&self) -> RotationState {
        self.state
    }

    /// Files opened so far, in order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn file_path(&self, index: usize) -> PathBuf {
        let name = match (&self.extension, self.rotating) {
            (Some(ext), true) => format!("{}.{}.{}", self.stem, index, ext),
            (None, true) => format!("{}.{}", self.stem, index),
            (Some(ext), false) => format!("{}.{}", self.stem, ext),
            (None, false) => self.stem.clone(),
        };
        self.dir.join(name)
    }

    fn open_current(&mut self) -> io::Result<()> {
        if self.current.is_none() {
            let path = self.file_path(self.state.current_file_index);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            tracing::debug!(path = %path.display(), "opened output file");
            if self.files.last() != Some(&path) {
                self.files.push(path);
            }
            self.current = Some(BufWriter::new(file));
        }
        Ok(())
    }
}

impl MessageSink for RotatingFileSink {
    fn write_message(&mut self, formatted: &[u8]) -> io::Result<()> {
        let mut record = Vec::with_capacity(formatted.len() + 8);
        if self.state.messages_written_to_current_file > 0 {
            if let Some(delimiter) = &self.delimiter {
                record.extend_from_slice(delimiter);
            }
        }
        record.extend_from_slice(formatted);

        self.open_current()?;
        let writer = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "output file not open"))?;
        if let Err(e) = writer.write_all(&record).and_then(|_| writer.flush()) {
            // Drop unflushed bytes so a retry does not repeat them; reopened on the next message.
            if let Some(failed) = self.current.take() {
                let _ = failed.into_parts();
            }
            tracing::warn!(
                path = %self.file_path(self.state.current_file_index).display(),
                error = %e,
                "failed to write message"
            );
            return Err(e);
        }

        self.state.messages_written_to_current_file += 1;
        if self.rotating
            && self.state.messages_written_to_current_file == self.state.threshold
        {
            self.state.messages_written_to_current_file = 0;
            self.state.current_file_index += 1;
            if let Some(mut done) = self.current.take() {
                done.flush()?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path) -> String {
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_single_file_mode() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut sink =
            RotatingFileSink::new(dir.path().join("out.txt"), 5, Some(3), Some(b"\n".to_vec()))?;
        assert!(!sink.is_rotating());
        for i in 0..3 {
            sink.write_message(format!("m{}\n", i).as_bytes())?;
        }
        sink.flush()?;
        assert_eq!(sink.files(), &[dir.path().join("out.txt")]);
        assert_eq!(read(&dir.path().join("out.txt")), "m0\n\nm1\n\nm2\n");
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_write_leaves_state_untouched() -> Result<(), Box<dyn std::error::Error>> {
        let mut sink = RotatingFileSink::new("/dev/full", 10, Some(2), Some(b"--".to_vec()))?;
        assert!(sink.write_message(b"first").is_err());
        assert!(sink.write_message(b"second").is_err());
        assert_eq!(sink.state().messages_written_to_current_file, 0);
        assert_eq!(sink.files(), &[PathBuf::from("/dev/full")]);
        Ok(())
    }

    #[test]
    fn test_rotation_boundary() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let threshold = 3;
        let total = 8;
        let mut sink = RotatingFileSink::new(dir.path().join("msgs.json"), threshold, None, None)?;
        assert!(sink.is_rotating());
        for i in 0..total {
            sink.write_message(format!("{{\"n\":{}}}\n", i).as_bytes())?;
        }
        sink.flush()?;

        let expected_files = (total + threshold - 1) / threshold;
        assert_eq!(sink.files().len(), expected_files);
        for (index, path) in sink.files().iter().enumerate() {
            assert_eq!(path, &dir.path().join(format!("msgs.{}.json", index)));
            let lines = read(path).lines().count();
            assert!(lines >= 1 && lines <= threshold);
        }
        assert_eq!(read(&dir.path().join("msgs.0.json")).lines().count(), 3);
        assert_eq!(read(&dir.path().join("msgs.2.json")), "{\"n\":6}\n{\"n\":7}\n");
        assert_eq!(
            sink.state(),
            RotationState {
                current_file_index: 2,
                messages_written_to_current_file: 2,
                threshold: 3,
            }
        );
        Ok(())
    }

    #[test]
    fn test_no_empty_trailing_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut sink = RotatingFileSink::new(dir.path().join("out.txt"), 2, Some(10), None)?;
        for _ in 0..4 {
            sink.write_message(b"x\n")?;
        }
        assert_eq!(sink.files().len(), 2);
        assert_eq!(sink.state().current_file_index, 2);
        assert!(!dir.path().join("out.2.txt").exists());
        Ok(())
    }

    #[test]
    fn test_delimiter_not_after_rotation() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let mut sink =
            RotatingFileSink::new(dir.path().join("out.txt"), 2, None, Some(b"---\n".to_vec()))?;
        for i in 0..3 {
            sink.write_message(format!("m{}\n", i).as_bytes())?;
        }
        sink.flush()?;
        assert_eq!(read(&dir.path().join("out.0.txt")), "m0\n---\nm1\n");
        assert_eq!(read(&dir.path().join("out.1.txt")), "m2\n");
        Ok(())
    }

    #[test]
    fn test_path_without_extension() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sink = RotatingFileSink::new(dir.path().join("dump"), 1, None, None)?;
        assert_eq!(sink.file_path(4), dir.path().join("dump.4"));
        Ok(())
    }

    #[test]
    fn test_zero_threshold_rejected() {
        assert!(matches!(
            RotatingFileSink::new("out.txt", 0, None, None),
            Err(ClientError::Config(_))
        ));
    }
}
