use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use super::{parse_lenient, TranscriptLine};
use crate::config::TAIL_BYTES;
use crate::error::TranscriptError;

/// Read and parse the tail of a transcript, newest line last.
///
/// Reads at most [`TAIL_BYTES`] from the end of the file. Malformed lines are
/// dropped; only an unreadable file is an error.
pub fn read_tail(path: &Path) -> Result<Vec<TranscriptLine>, TranscriptError> {
    read_tail_with_budget(path, TAIL_BYTES)
}

pub fn read_tail_with_budget(
    path: &Path,
    budget: u64,
) -> Result<Vec<TranscriptLine>, TranscriptError> {
    let mut file = File::open(path).map_err(|e| TranscriptError::io(path, e))?;
    let file_len = file
        .metadata()
        .map_err(|e| TranscriptError::io(path, e))?
        .len();

    if file_len == 0 {
        return Ok(Vec::new());
    }

    let read_len = file_len.min(budget);
    let start = file_len - read_len;

    file.seek(SeekFrom::Start(start))
        .map_err(|e| TranscriptError::io(path, e))?;
    let mut buf = vec![0u8; read_len as usize];
    file.read_exact(&mut buf)
        .map_err(|e| TranscriptError::io(path, e))?;

    let text = String::from_utf8_lossy(&buf);

    // A window that starts mid-file almost certainly begins inside a line.
    let skip = usize::from(start > 0);

    Ok(text
        .split('\n')
        .skip(skip)
        .filter_map(parse_lenient::<TranscriptLine>)
        .collect())
}

/// Read up to `limit` bytes from the start of a transcript as text.
///
/// The final line may be cut short; callers parse line by line and skip it.
pub fn read_prefix(path: &Path, limit: usize) -> Result<String, TranscriptError> {
    let file = File::open(path).map_err(|e| TranscriptError::io(path, e))?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64)
        .read_to_end(&mut buf)
        .map_err(|e| TranscriptError::io(path, e))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
