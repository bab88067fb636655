//! Progress aggregation for pull, push and build output.
//!
//! Layer downloads and extractions run concurrently inside the daemon and
//! report out of order, keyed by layer id. [`ProgressView`] keeps one line per
//! id in first-seen order and re-renders the whole block on every event, so a
//! terminal can redraw it in place with [`LineRewriter`].

use crate::container::{ContainerError, Result};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// One JSON message from a pull, push or build response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Layer or step id the message refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Human-readable status, e.g. `Downloading`
    #[serde(default)]
    pub status: String,
    /// Pre-rendered progress bar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    /// Failure reported by the daemon; aborts the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured form of `error`; some daemons send only this
    #[serde(
        default,
        rename = "errorDetail",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_detail: Option<ErrorDetail>,
    /// Raw build output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
}

/// `errorDetail` object of a daemon message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressEvent {
    /// Create a status message without an id.
    pub fn status<S: Into<String>>(status: S) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    /// Create a status message for a layer id.
    pub fn layer<I: Into<String>, S: Into<String>>(id: I, status: S) -> Self {
        Self {
            id: Some(id.into()),
            status: status.into(),
            ..Default::default()
        }
    }

    /// Create an error message.
    pub fn failure<S: Into<String>>(error: S) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Create a build output message.
    pub fn output<S: Into<String>>(stream: S) -> Self {
        Self {
            stream: Some(stream.into()),
            ..Default::default()
        }
    }

    /// Attach a progress bar.
    pub fn with_progress<S: Into<String>>(mut self, progress: S) -> Self {
        self.progress = Some(progress.into());
        self
    }

    fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    fn failure_message(&self) -> Option<&str> {
        self.error
            .as_deref()
            .filter(|e| !e.is_empty())
            .or_else(|| {
                self.error_detail
                    .as_ref()
                    .and_then(|d| d.message.as_deref())
                    .filter(|m| !m.is_empty())
            })
    }

    fn line(&self) -> String {
        let prefix = self.id().map(|id| format!("{} ", id)).unwrap_or_default();
        format!(
            "{}{} {}",
            prefix,
            self.status,
            self.progress.as_deref().unwrap_or("")
        )
    }
}

#[derive(Debug, Clone)]
struct Slot {
    id: Option<String>,
    text: String,
}

/// Ordered, in-place updated set of progress lines.
#[derive(Debug, Clone, Default)]
pub struct ProgressView {
    slots: Vec<Slot>,
}

impl ProgressView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of lines in the view.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no event has been applied yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fold one event into the view and return the full rendering.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::Protocol`] when the event carries an error.
    pub fn apply(&mut self, event: &ProgressEvent) -> Result<String> {
        if let Some(error) = event.failure_message() {
            return Err(ContainerError::Protocol(error.trim().to_string()));
        }

        let text = event.line();
        // Anonymous events always get a fresh line.
        let found = event
            .id()
            .and_then(|id| self.slots.iter().rposition(|s| s.id.as_deref() == Some(id)));

        let index = match found {
            Some(i) => i,
            None => {
                self.slots.push(Slot {
                    id: event.id().map(str::to_string),
                    text: String::new(),
                });
                self.slots.len() - 1
            }
        };
        self.slots[index].text = text;

        Ok(self.render())
    }

    /// Render every line, newline-terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for slot in &self.slots {
            out.push_str(&slot.text);
            out.push('\n');
        }
        out
    }
}

/// Turn a stream of progress events into a stream of rendered views.
///
/// The stream ends after the first error.
pub fn render_progress<S>(events: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = Result<ProgressEvent>> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut events = Box::pin(events);
        let mut view = ProgressView::new();
        while let Some(event) = events.next().await {
            let event = event?;
            yield view.apply(&event)?;
        }
    })
}

/// Turn a stream of build messages into the build's text output.
///
/// The stream ends after the first error.
pub fn render_build<S>(events: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = Result<ProgressEvent>> + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut events = Box::pin(events);
        while let Some(event) = events.next().await {
            let event = event?;
            if let Some(error) = event.failure_message() {
                Err(ContainerError::Protocol(error.trim().to_string()))?;
            }
            if let Some(text) = event.stream {
                yield text;
            }
        }
    })
}

/// Redraws a multi-line block in place on a terminal.
///
/// Each [`LineRewriter::draw`] moves the cursor back over the previously drawn
/// block and overwrites it line by line.
pub struct LineRewriter<W: Write> {
    out: W,
    lines: usize,
}

impl<W: Write> LineRewriter<W> {
    /// Wrap a writer.
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    /// Replace the previously drawn block with `block`.
    ///
    /// # Errors
    ///
    /// Returns any error from the underlying writer.
    pub fn draw(&mut self, block: &str) -> io::Result<()> {
        if self.lines > 0 {
            write!(self.out, "\x1b[{}A", self.lines)?;
        }
        let mut lines = 0;
        for line in block.lines() {
            writeln!(self.out, "\x1b[2K{}", line)?;
            lines += 1;
        }
        self.lines = lines;
        self.out.flush()
    }

    /// Return the wrapped writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_lines_keep_first_seen_order() {
        let mut view = ProgressView::new();
        view.apply(&ProgressEvent::layer("a", "Downloading").with_progress("10%"))
            .unwrap();
        view.apply(&ProgressEvent::layer("b", "Downloading").with_progress("5%"))
            .unwrap();
        let rendered = view
            .apply(&ProgressEvent::layer("a", "Downloading").with_progress("50%"))
            .unwrap();

        assert_eq!(rendered, "a Downloading 50%\nb Downloading 5%\n");
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn test_events_without_id_get_their_own_line() {
        let mut view = ProgressView::new();
        view.apply(&ProgressEvent::status("Pulling from library/alpine"))
            .unwrap();
        view.apply(&ProgressEvent::layer("f1", "Pull complete")).unwrap();
        let rendered = view
            .apply(&ProgressEvent::status("Digest: sha256:abc"))
            .unwrap();

        assert_eq!(
            rendered,
            "Pulling from library/alpine \nf1 Pull complete \nDigest: sha256:abc \n"
        );
    }

    #[test]
    fn test_empty_id_is_treated_as_absent() {
        let mut view = ProgressView::new();
        view.apply(&ProgressEvent::layer("", "one")).unwrap();
        view.apply(&ProgressEvent::layer("", "two")).unwrap();
        assert_eq!(view.render(), "one \ntwo \n");
    }

    #[test]
    fn test_error_aborts_with_trimmed_message() {
        let mut view = ProgressView::new();
        view.apply(&ProgressEvent::layer("a", "Waiting")).unwrap();
        let err = view
            .apply(&ProgressEvent::failure("  manifest unknown\n"))
            .unwrap_err();

        match err {
            ContainerError::Protocol(msg) => assert_eq!(msg, "manifest unknown"),
            other => panic!("unexpected error: {:?}", other),
        }
        // The view is untouched by the failing event.
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn test_empty_error_field_is_ignored() {
        let mut view = ProgressView::new();
        let mut event = ProgressEvent::layer("a", "Extracting");
        event.error = Some(String::new());
        assert!(view.apply(&event).is_ok());
    }

    #[test]
    fn test_error_detail_alone_aborts() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"errorDetail":{"message":"unauthorized: authentication required"}}"#,
        )
        .unwrap();

        let mut view = ProgressView::new();
        let err = view.apply(&event).unwrap_err();
        assert!(
            matches!(err, ContainerError::Protocol(msg) if msg == "unauthorized: authentication required")
        );
    }

    #[test]
    fn test_anonymous_events_never_share_a_line() {
        let mut view = ProgressView::new();
        view.apply(&ProgressEvent::status("Preparing")).unwrap();
        view.apply(&ProgressEvent::status("Preparing")).unwrap();
        view.apply(&ProgressEvent::layer("a", "Waiting")).unwrap();
        view.apply(&ProgressEvent::layer("a", "Pushed")).unwrap();
        assert_eq!(view.render(), "Preparing \nPreparing \na Pushed \n");
    }

    #[test]
    fn test_event_deserializes_from_daemon_json() {
        let event: ProgressEvent = serde_json::from_str(
            r#"{"status":"Downloading","progressDetail":{"current":1,"total":2},"progress":"[=>  ]","id":"8a1e"}"#,
        )
        .unwrap();
        assert_eq!(event.id.as_deref(), Some("8a1e"));
        assert_eq!(event.status, "Downloading");
        assert_eq!(event.progress.as_deref(), Some("[=>  ]"));
    }

    #[tokio::test]
    async fn test_render_progress_stops_at_error() {
        let events = stream::iter(vec![
            Ok(ProgressEvent::layer("a", "Pushing")),
            Ok(ProgressEvent::failure("denied: requested access is refused")),
            Ok(ProgressEvent::layer("a", "Pushed")),
        ]);

        let out: Vec<Result<String>> = render_progress(events).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "a Pushing \n");
        assert!(matches!(
            &out[1],
            Err(ContainerError::Protocol(msg)) if msg == "denied: requested access is refused"
        ));
    }

    #[tokio::test]
    async fn test_render_build_yields_stream_text() {
        let events = stream::iter(vec![
            Ok(ProgressEvent::output("Step 1/2 : FROM alpine\n")),
            Ok(ProgressEvent::status("ignored without stream text")),
            Ok(ProgressEvent::output("Successfully built 1234\n")),
        ]);

        let out: Vec<String> = render_build(events)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(
            out,
            vec!["Step 1/2 : FROM alpine\n", "Successfully built 1234\n"]
        );
    }

    #[tokio::test]
    async fn test_render_build_fails_on_error() {
        let events = stream::iter(vec![
            Ok(ProgressEvent::output("Step 1/2 : FROM nope\n")),
            Ok(ProgressEvent::failure("pull access denied\n")),
        ]);

        let out: Vec<Result<String>> = render_build(events).collect().await;
        assert_eq!(out.len(), 2);
        assert!(matches!(&out[1], Err(ContainerError::Protocol(msg)) if msg == "pull access denied"));
    }

    #[test]
    fn test_line_rewriter_moves_cursor_over_previous_block() {
        let mut rewriter = LineRewriter::new(Vec::new());
        rewriter.draw("a 1\n").unwrap();
        rewriter.draw("a 2\nb 1\n").unwrap();

        let written = String::from_utf8(rewriter.into_inner()).unwrap();
        assert_eq!(written, "\x1b[2Ka 1\n\x1b[1A\x1b[2Ka 2\n\x1b[2Kb 1\n");
    }
}
