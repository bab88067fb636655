//! Multiplexed attach/log stream decoding.
//!
//! The daemon interleaves a container's stdout and stderr on one connection.
//! Every frame carries an 8-byte header followed by its payload:
//!
//! ```text
//! [channel, 0, 0, 0, len (u32 big-endian)] [payload; len]
//! ```
//!
//! `channel` is 0 (stdin), 1 (stdout) or 2 (stderr). Stdin frames only show up
//! on attached TTY-less sessions and are routed to stdout.
//!
//! [`demux`] runs the decoder on a background task and hands back two
//! independent [`OutputChannel`]s. Each channel buffers at most one payload, so
//! a slow consumer stalls the upstream read instead of growing memory. Closing
//! or dropping either channel cancels the shared token and drops the upstream,
//! releasing the connection.

use super::StreamError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Size of a frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Logical output channel selected by a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Primary output (also receives stdin echo frames)
    Stdout,
    /// Secondary output
    Stderr,
}

impl Channel {
    fn from_selector(selector: u8) -> Result<Self, StreamError> {
        match selector {
            0 | 1 => Ok(Channel::Stdout),
            2 => Ok(Channel::Stderr),
            other => Err(StreamError::UnknownChannel(other)),
        }
    }

    /// Header byte used for this channel on the wire.
    pub fn selector(self) -> u8 {
        match self {
            Channel::Stdout => 1,
            Channel::Stderr => 2,
        }
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel the payload belongs to
    pub channel: Channel,
    /// Frame payload
    pub payload: Bytes,
}

/// Encode a payload as a single wire frame.
pub fn encode_frame(channel: Channel, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_u8(channel.selector());
    buf.put_bytes(0, 3);
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Incremental frame decoder.
///
/// Bytes are pushed in whatever chunks the transport delivers; frames come out
/// only once header and payload are both complete.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes read from the transport.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of bytes buffered but not yet emitted as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn declared_len(&self) -> Option<usize> {
        if self.buf.len() < HEADER_LEN {
            return None;
        }
        let len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        Some(len as usize)
    }

    /// Pop the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownChannel`] when a header names an
    /// unsupported channel.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, StreamError> {
        let Some(len) = self.declared_len() else {
            return Ok(None);
        };
        let channel = Channel::from_selector(self.buf[0])?;
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        self.buf.advance(HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        Ok(Some(Frame { channel, payload }))
    }

    /// Check that the stream ended on a frame boundary.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Truncated`] if a partial frame is still buffered.
    pub fn finish(&self) -> Result<(), StreamError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let expected = HEADER_LEN + self.declared_len().unwrap_or(0);
        Err(StreamError::Truncated {
            expected,
            actual: self.buf.len(),
        })
    }
}

/// One side of a demultiplexed stream.
///
/// Yields payloads in the order they were framed. Dropping it, or calling
/// [`OutputChannel::close`], terminates the whole demuxer.
pub struct OutputChannel {
    rx: mpsc::Receiver<Result<Bytes, StreamError>>,
    cancel: CancellationToken,
}

impl OutputChannel {
    /// Stop reading and release the upstream connection.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    /// Read the channel to its end and return everything it carried.
    ///
    /// # Errors
    ///
    /// Returns the stream error that terminated the channel, if any.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for OutputChannel {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for OutputChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputChannel")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Both outputs of a demultiplexed stream.
#[derive(Debug)]
pub struct Demuxed {
    /// Primary output
    pub stdout: OutputChannel,
    /// Secondary output
    pub stderr: OutputChannel,
}

/// Split a multiplexed byte stream into stdout and stderr channels.
///
/// Must be called from within a tokio runtime.
pub fn demux<S>(upstream: S) -> Demuxed
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let cancel = CancellationToken::new();
    let (stdout_tx, stdout_rx) = mpsc::channel(1);
    let (stderr_tx, stderr_rx) = mpsc::channel(1);

    tokio::spawn(pump(
        Box::pin(upstream),
        stdout_tx,
        stderr_tx,
        cancel.clone(),
    ));

    Demuxed {
        stdout: OutputChannel {
            rx: stdout_rx,
            cancel: cancel.clone(),
        },
        stderr: OutputChannel {
            rx: stderr_rx,
            cancel,
        },
    }
}

type Sender = mpsc::Sender<Result<Bytes, StreamError>>;

async fn pump<S>(mut upstream: Pin<Box<S>>, stdout: Sender, stderr: Sender, cancel: CancellationToken)
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut decoder = FrameDecoder::new();
    let mut frames = 0u64;

    let outcome = 'read: loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Demux cancelled by consumer after {} frames", frames);
                return;
            }
            chunk = upstream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                decoder.push(&bytes);
                loop {
                    let frame = match decoder.next_frame() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(e) => break 'read Err(e),
                    };
                    frames += 1;
                    if frame.payload.is_empty() {
                        continue;
                    }
                    let tx = match frame.channel {
                        Channel::Stdout => &stdout,
                        Channel::Stderr => &stderr,
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            debug!("Demux cancelled by consumer after {} frames", frames);
                            return;
                        }
                        sent = tx.send(Ok(frame.payload)) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
            Some(Err(e)) => break Err(StreamError::Transport(e.to_string())),
            None => break decoder.finish(),
        }
    };

    match outcome {
        Ok(()) => debug!("Demux completed after {} frames", frames),
        Err(e) => {
            debug!("Demux failed after {} frames: {}", frames, e);
            let _ = tokio::join!(stdout.send(Err(e.clone())), stderr.send(Err(e)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    fn chunked(wire: &[u8], size: usize) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let chunks: Vec<io::Result<Bytes>> = wire
            .chunks(size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        stream::iter(chunks)
    }

    async fn drain(channel: OutputChannel) -> (Vec<u8>, Option<StreamError>) {
        let mut channel = channel;
        let mut out = Vec::new();
        while let Some(item) = channel.next().await {
            match item {
                Ok(bytes) => out.extend_from_slice(&bytes),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    fn alternating_wire() -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let mut wire = Vec::new();
        let mut expected_out = Vec::new();
        let mut expected_err = Vec::new();
        for i in 0..20 {
            let out = format!("out line {}\n", i);
            let err = format!("err {}\n", i);
            wire.extend_from_slice(&encode_frame(Channel::Stdout, out.as_bytes()));
            wire.extend_from_slice(&encode_frame(Channel::Stderr, err.as_bytes()));
            expected_out.extend_from_slice(out.as_bytes());
            expected_err.extend_from_slice(err.as_bytes());
        }
        (wire, expected_out, expected_err)
    }

    #[test]
    fn test_decoder_waits_for_complete_frame() {
        let wire = encode_frame(Channel::Stderr, b"hello");
        let mut decoder = FrameDecoder::new();

        decoder.push(&wire[..3]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&wire[3..10]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&wire[10..]);

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.channel, Channel::Stderr);
        assert_eq!(&frame.payload[..], b"hello");
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_decoder_routes_stdin_to_stdout() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[0, 0, 0, 0, 0, 0, 0, 2, b'h', b'i']);
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.channel, Channel::Stdout);
    }

    #[test]
    fn test_decoder_rejects_unknown_channel() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[7, 0, 0, 0, 0, 0, 0, 1, b'x']);
        assert_eq!(
            decoder.next_frame(),
            Err(StreamError::UnknownChannel(7))
        );
    }

    #[test]
    fn test_decoder_reports_truncation() {
        let wire = encode_frame(Channel::Stdout, b"abcdef");
        let mut decoder = FrameDecoder::new();
        decoder.push(&wire[..wire.len() - 2]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        assert_eq!(
            decoder.finish(),
            Err(StreamError::Truncated {
                expected: HEADER_LEN + 6,
                actual: HEADER_LEN + 4,
            })
        );
    }

    #[tokio::test]
    async fn test_demux_independent_of_chunking() {
        let (wire, expected_out, expected_err) = alternating_wire();

        for size in [1, 3, 7, 8, 9, 64, wire.len()] {
            let Demuxed { stdout, stderr } = demux(chunked(&wire, size));
            let ((out, out_err), (err, err_err)) = tokio::join!(drain(stdout), drain(stderr));

            assert_eq!(out, expected_out, "stdout mismatch for chunk size {}", size);
            assert_eq!(err, expected_err, "stderr mismatch for chunk size {}", size);
            assert!(out_err.is_none());
            assert!(err_err.is_none());
        }
    }

    #[tokio::test]
    async fn test_demux_truncated_final_frame_fails_both() {
        let mut wire = encode_frame(Channel::Stdout, b"complete\n").to_vec();
        let partial = encode_frame(Channel::Stderr, b"never finished");
        wire.extend_from_slice(&partial[..HEADER_LEN + 3]);

        let Demuxed { stdout, stderr } = demux(chunked(&wire, 5));
        let ((out, out_err), (err, err_err)) = tokio::join!(drain(stdout), drain(stderr));

        assert_eq!(out, b"complete\n");
        assert!(err.is_empty());
        assert!(matches!(out_err, Some(StreamError::Truncated { .. })));
        assert_eq!(out_err, err_err);
    }

    #[tokio::test]
    async fn test_demux_transport_error_fails_both() {
        let upstream = stream::iter(vec![
            Ok(encode_frame(Channel::Stdout, b"a")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ]);

        let Demuxed { stdout, stderr } = demux(upstream);
        let ((_, out_err), (_, err_err)) = tokio::join!(drain(stdout), drain(stderr));

        assert!(matches!(out_err, Some(StreamError::Transport(_))));
        assert!(matches!(err_err, Some(StreamError::Transport(_))));
    }

    #[tokio::test]
    async fn test_closing_one_channel_releases_upstream() {
        let (guard_tx, guard_rx) = tokio::sync::oneshot::channel::<()>();
        let upstream = stream::iter(vec![Ok(encode_frame(Channel::Stdout, b"first"))])
            .chain(stream::pending())
            .map(move |item| {
                let _guard = &guard_tx;
                item
            });

        let Demuxed { mut stdout, stderr } = demux(upstream);
        let first = stdout.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"first");

        stdout.close();

        // The upstream (and the guard it owns) must be dropped by the task.
        let released = tokio::time::timeout(Duration::from_secs(5), guard_rx).await;
        assert!(matches!(released, Ok(Err(_))));

        let (rest, err) = tokio::time::timeout(Duration::from_secs(5), drain(stderr))
            .await
            .unwrap();
        assert!(rest.is_empty());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_slow_consumer_applies_backpressure() {
        let (wire, _, _) = alternating_wire();
        let polled = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = polled.clone();
        let upstream = chunked(&wire, 8).map(move |item| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            item
        });

        let Demuxed { stdout, stderr } = demux(upstream);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Nobody is reading: only a couple of frames may be in flight.
        let reads = polled.load(std::sync::atomic::Ordering::SeqCst);
        assert!(reads < 16, "upstream read {} chunks without a consumer", reads);

        drop((stdout, stderr));
    }
}
