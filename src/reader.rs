use crate::detect::{detect_timestamp_format, DetectionResult, FileDates};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const SMALL_FILE_BYTES: u64 = 1_000_000;
const HEAD_BYTES: u64 = 64 * 1024;
const READ_BUFFER: usize = 1 << 20;
const WINDOW_BUFFER: usize = 8 * 1024;

pub fn file_dates(path: &Path) -> Result<FileDates> {
    let meta = std::fs::metadata(path).map_err(|e| Error::file(path, "stat", e))?;
    let modified = meta.modified().map_err(|e| Error::file(path, "stat", e))?;
    // Not every filesystem records birth time.
    let created = meta.created().unwrap_or(modified);
    Ok(FileDates {
        created_at: DateTime::<Utc>::from(created),
        modified_at: DateTime::<Utc>::from(modified),
    })
}

/// One line of a file with its zero-based number and starting byte offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub number: usize,
    pub byte: u64,
    pub text: String,
}

/// Forward-only line reader that tracks line numbers and exact byte offsets.
/// Offsets account for the real terminator (`\n` or `\r\n`); the yielded text
/// never includes it.
pub struct LineCursor<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    byte: u64,
}

impl<R: BufRead> LineCursor<R> {
    pub fn new(reader: R, first_line: usize, first_byte: u64) -> Self {
        Self { reader, buf: Vec::with_capacity(256), line: first_line, byte: first_byte }
    }

    /// Line number and byte offset of the next line to be read.
    pub fn position(&self) -> (usize, u64) {
        (self.line, self.byte)
    }
}

impl<R: BufRead> Iterator for LineCursor<R> {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        let n = match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) => return Some(Err(e)),
        };
        let mut end = self.buf.len();
        if end > 0 && self.buf[end - 1] == b'\n' {
            end -= 1;
            if end > 0 && self.buf[end - 1] == b'\r' {
                end -= 1;
            }
        }
        let raw = RawLine {
            number: self.line,
            byte: self.byte,
            text: String::from_utf8_lossy(&self.buf[..end]).into_owned(),
        };
        self.line += 1;
        self.byte += n as u64;
        Some(Ok(raw))
    }
}

/// Open `path` positioned at `byte`, numbering lines from `line`. Sized for
/// whole-file scans.
pub fn open_at(path: &Path, line: usize, byte: u64) -> Result<LineCursor<BufReader<File>>> {
    open_with_capacity(path, line, byte, READ_BUFFER)
}

/// Like [`open_at`], with a small buffer for short reads of a few lines.
pub fn open_window(path: &Path, line: usize, byte: u64) -> Result<LineCursor<BufReader<File>>> {
    open_with_capacity(path, line, byte, WINDOW_BUFFER)
}

fn open_with_capacity(path: &Path, line: usize, byte: u64, capacity: usize) -> Result<LineCursor<BufReader<File>>> {
    let mut file = File::open(path).map_err(|e| Error::file(path, "open", e))?;
    if byte > 0 {
        file.seek(SeekFrom::Start(byte)).map_err(|e| Error::file(path, "seek", e))?;
    }
    Ok(LineCursor::new(BufReader::with_capacity(capacity, file), line, byte))
}

/// Read up to `max_sample` evenly spaced lines without loading large files.
pub fn read_sample_lines(path: &Path, max_sample: usize) -> Result<Vec<String>> {
    let max_sample = max_sample.max(1);
    let size = std::fs::metadata(path).map_err(|e| Error::file(path, "stat", e))?.len();

    if size < SMALL_FILE_BYTES {
        let bytes = std::fs::read(path).map_err(|e| Error::file(path, "read", e))?;
        let all: Vec<String> = String::from_utf8_lossy(&bytes)
            .split('\n')
            .map(|l| l.trim_end_matches('\r').to_string())
            .collect();
        if all.len() <= max_sample {
            return Ok(all);
        }
        let step = all.len() / max_sample;
        return Ok(all.into_iter().step_by(step).take(max_sample).collect());
    }

    let mut file = File::open(path).map_err(|e| Error::file(path, "open", e))?;
    let head = read_chunk(&mut file, 0, HEAD_BYTES.min(size) as usize).map_err(|e| Error::file(path, "read", e))?;
    let head_lines = String::from_utf8_lossy(&head).split('\n').count().max(1);
    let avg_line_len = (head.len() as f64 / head_lines as f64).max(1.0);
    let estimated_lines = ((size as f64 / avg_line_len) as usize).max(1);

    let sample_count = max_sample.min(estimated_lines);
    let byte_step = size / sample_count as u64;
    let chunk_size = ((avg_line_len * 3.0).ceil() as usize).clamp(512, 4096);

    let mut lines = Vec::with_capacity(sample_count);
    for i in 0..sample_count as u64 {
        let offset = i * byte_step;
        let chunk = read_chunk(&mut file, offset, chunk_size).map_err(|e| Error::file(path, "read", e))?;
        if chunk.is_empty() {
            continue;
        }
        let text = String::from_utf8_lossy(&chunk);
        // Skip the partial line the offset landed in.
        let rest = if offset == 0 {
            &text[..]
        } else {
            match text.find('\n') {
                Some(pos) => &text[pos + 1..],
                None => continue,
            }
        };
        let line = rest.split('\n').next().unwrap_or("").trim_end_matches('\r');
        if !line.trim().is_empty() {
            lines.push(line.to_string());
        }
    }
    tracing::debug!(path = %path.display(), size, sampled = lines.len(), "sampled large file");
    Ok(lines)
}

fn read_chunk(file: &mut File, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len);
    file.by_ref().take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Sample `path` and detect its timestamp format.
pub fn detect_from_path(path: &Path, max_sample: usize) -> Result<(DetectionResult, FileDates)> {
    let dates = file_dates(path)?;
    let lines = read_sample_lines(path, max_sample)?;
    Ok((detect_timestamp_format(&lines, &dates, max_sample), dates))
}
