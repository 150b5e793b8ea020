//! Line-delimited JSON log of extracted chunks.
//!
//! Extraction writes the log once; embedding streams it back. Every line is an
//! independent `{file, start, end, code}` record.
use super::extractor::Chunk;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LogError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A line that is not a valid chunk record.
    #[error("line {line}: invalid chunk record: {message}")]
    Schema { line: usize, message: String },

    #[error("failed to encode chunk: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Location of the log for one codebase and language.
pub fn log_path(chunks_dir: &Path, codebase: &str, language: &str) -> PathBuf {
    chunks_dir
        .join(codebase)
        .join(format!("{language}_functions.jsonl"))
}

/// Writes chunks to `<path>.partial` and moves the file into place on
/// [`ChunkLogWriter::finish`]. An unfinished log never replaces a good one.
pub struct ChunkLogWriter {
    path: PathBuf,
    partial: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl ChunkLogWriter {
    pub fn create(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| LogError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);

        let file = File::create(&partial).map_err(|source| LogError::Io {
            path: partial.clone(),
            source,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            partial,
            writer: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn write(&mut self, chunk: &Chunk) -> Result<(), LogError> {
        let line = serde_json::to_string(chunk)?;
        writeln!(self.writer, "{line}").map_err(|source| LogError::Io {
            path: self.partial.clone(),
            source,
        })?;
        self.written += 1;
        Ok(())
    }

    /// Flush, sync and atomically publish the log. Returns the record count.
    pub fn finish(mut self) -> Result<usize, LogError> {
        self.writer.flush().map_err(io_error(&self.partial))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(io_error(&self.partial))?;
        fs::rename(&self.partial, &self.path).map_err(io_error(&self.path))?;

        debug!("published {} records to {}", self.written, self.path.display());
        Ok(self.written)
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LogError {
    let path = path.to_path_buf();
    move |source| LogError::Io { path, source }
}

/// Streams chunk records back out of a log.
pub struct ChunkLogReader<R> {
    lines: io::Lines<R>,
    line_no: usize,
}

impl ChunkLogReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let file = File::open(path).map_err(|source| LogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ChunkLogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

impl<R: BufRead> Iterator for ChunkLogReader<R> {
    type Item = Result<Chunk, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(LogError::Schema {
                        line: self.line_no,
                        message: e.to_string(),
                    }));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_record(&line, self.line_no));
        }
    }
}

fn parse_record(line: &str, line_no: usize) -> Result<Chunk, LogError> {
    let chunk: Chunk = serde_json::from_str(line).map_err(|e| LogError::Schema {
        line: line_no,
        message: e.to_string(),
    })?;

    if chunk.start_line == 0 || chunk.end_line < chunk.start_line {
        return Err(LogError::Schema {
            line: line_no,
            message: format!("invalid span {}..{}", chunk.start_line, chunk.end_line),
        });
    }
    Ok(chunk)
}
