//! Decoding of the daemon's streaming wire formats.
//!
//! - [`demux`]: splits a multiplexed attach/log byte stream into stdout and
//!   stderr channels
//! - [`progress`]: folds pull/push/build progress messages into a redrawable
//!   multi-line view

pub mod demux;
pub mod progress;

pub use demux::{Channel, Demuxed, Frame, FrameDecoder, OutputChannel, demux, encode_frame};
pub use progress::{
    ErrorDetail, LineRewriter, ProgressEvent, ProgressView, render_build, render_progress,
};

/// Errors raised while decoding a multiplexed stream.
///
/// Cloned into both output channels, so it carries owned strings only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Stream ended in the middle of a frame
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes declared by the frame header (header included)
        expected: usize,
        /// Bytes available when the stream ended
        actual: usize,
    },

    /// Header selected a channel other than stdin/stdout/stderr
    #[error("unknown stream channel: {0}")]
    UnknownChannel(u8),

    /// Upstream read failed
    #[error("stream transport error: {0}")]
    Transport(String),
}
