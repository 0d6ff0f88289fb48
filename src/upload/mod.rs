// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Resilient resumable uploads.

pub mod progress;
pub mod protocol;
pub mod retry;
pub mod session;
pub mod source;
pub mod transmitter;

pub use progress::{FnProgress, NoopProgress, ProgressReporter, WatchProgress};
pub use retry::RetryPolicy;
pub use session::{AbortHandle, UploadSession, Uploader};
pub use source::{FileSource, MediaSource, MemorySource};
pub use transmitter::{ChunkAck, ChunkTransmitter, ProbeResult, TransmitError};
