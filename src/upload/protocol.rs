//! Resumable upload wire details: chunk windows and range headers.

use std::ops::Range;

/// Chunks must be a multiple of this many bytes (except the last one).
pub const CHUNK_GRANULARITY: u64 = 256 * 1024;

/// "Resume Incomplete" – the server has some, but not all, of the bytes.
pub const RESUME_INCOMPLETE: u16 = 308;

/// Header carrying the session URI in the initiation response.
pub const LOCATION: &str = "location";

/// Next byte window to send: `[offset, min(offset + chunk_size, total))`.
pub fn chunk_window(offset: u64, chunk_size: u64, total: u64) -> Range<u64> {
    let end = offset.saturating_add(chunk_size).min(total);
    offset.min(total)..end
}

/// `Content-Range` for a chunk: `bytes {start}-{end_inclusive}/{total}`.
pub fn content_range(window: &Range<u64>, total: u64) -> String {
    format!("bytes {}-{}/{}", window.start, window.end - 1, total)
}

/// `Content-Range` for a status probe: `bytes */{total}`.
pub fn probe_content_range(total: u64) -> String {
    format!("bytes */{}", total)
}

/// Parse the `Range` header of a 308 response into the number of bytes the
/// server has committed. `bytes=0-1048575` means 1048576 bytes. A missing
/// header means nothing has been committed yet.
pub fn committed_from_range(header: Option<&str>) -> Option<u64> {
    let Some(raw) = header else {
        return Some(0);
    };
    let spec = raw.trim().strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    if start.trim() != "0" {
        return None;
    }
    end.trim().parse::<u64>().ok()?.checked_add(1)
}

/// Retryable statuses per the resumable-upload guidance.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}
