use std::collections::VecDeque;

use futures::{Stream, StreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{FramePayload, StreamEvent};

/// Prefix that marks a line as a protocol frame.
pub const FRAME_PREFIX: &str = "data:";

/// Incremental line-oriented frame decoder.
///
/// Chunks may split lines (and UTF-8 code points) anywhere; bytes are
/// buffered until a `\n` completes the line. After a `Done` or `Error`
/// event the parser is finished and ignores further input.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
    finished: bool,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Bytes held back waiting for the end of a line.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Feed one chunk and return the events completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        self.buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = &self.buf[start..end];
            start = end + 1;

            if let Some(event) = parse_line(line) {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    self.finished = true;
                    break;
                }
            }
        }

        if self.finished {
            self.buf.clear();
        } else {
            self.buf.drain(..start);
        }
        events
    }

    /// Called when the transport closes. An unterminated last line is
    /// dropped, never parsed.
    pub fn finish(&mut self) {
        if !self.buf.is_empty() && !self.finished {
            debug!(
                bytes = self.buf.len(),
                "discarding unterminated frame at end of stream"
            );
        }
        self.buf.clear();
        self.finished = true;
    }
}

/// Decode one complete line. Returns `None` for non-frame lines and for
/// malformed payloads, which are logged and skipped.
fn parse_line(line: &[u8]) -> Option<StreamEvent> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let line = match std::str::from_utf8(line) {
        Ok(line) => line,
        Err(e) => {
            warn!("skipping frame with invalid UTF-8: {}", e);
            return None;
        }
    };

    let payload = line.strip_prefix(FRAME_PREFIX)?;
    let payload = payload.strip_prefix(' ').unwrap_or(payload);

    match serde_json::from_str::<FramePayload>(payload) {
        Ok(parsed) => {
            let event = parsed.into_event();
            if event.is_none() {
                debug!(payload, "ignoring frame with unrecognized shape");
            }
            event
        }
        Err(e) => {
            warn!(payload, "skipping malformed frame: {}", e);
            None
        }
    }
}

/// Turn a byte stream into a lazy stream of events.
///
/// Ends after a terminal event, when the body ends, or as soon as `cancel`
/// fires (without yielding an error). Events already decoded from a chunk
/// are not delivered once `cancel` has fired. A transport error is yielded once and
/// then the stream ends.
pub fn decode_stream<S, B, E>(
    body: S,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
{
    struct State<S> {
        body: S,
        parser: FrameParser,
        pending: VecDeque<StreamEvent>,
        cancel: CancellationToken,
    }

    let state = State {
        body,
        parser: FrameParser::new(),
        pending: VecDeque::new(),
        cancel,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if st.cancel.is_cancelled() {
                debug!(dropped = st.pending.len(), "stream read cancelled");
                return None;
            }
            if let Some(event) = st.pending.pop_front() {
                return Some((Ok(event), st));
            }
            if st.parser.is_finished() {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = st.cancel.cancelled() => {
                    debug!("stream read cancelled");
                    return None;
                }
                next = st.body.next() => next,
            };

            match next {
                Some(Ok(chunk)) => {
                    let events = st.parser.push(chunk.as_ref());
                    st.pending.extend(events);
                }
                Some(Err(e)) => {
                    st.parser.finish();
                    return Some((Err(e), st));
                }
                None => {
                    st.parser.finish();
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        ": keep-alive\n",
        "data: {\"content\":\"Hel\"}\n",
        "event: message\n",
        "\n",
        "data: {\"content\":\"lo, \"}\r\n",
        "data: not json at all\n",
        "data: {\"content\":\"wörld\"}\n",
        "data: {\"done\":true,\"service_used\":\"svc\"}\n",
        "data: {\"content\":\"after done\"}\n",
    );

    fn expected() -> Vec<StreamEvent> {
        vec![
            StreamEvent::Content("Hel".to_string()),
            StreamEvent::Content("lo, ".to_string()),
            StreamEvent::Content("wörld".to_string()),
            StreamEvent::Done(Some("svc".to_string())),
        ]
    }

    fn parse_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<StreamEvent> {
        let mut parser = FrameParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.push(chunk));
        }
        events
    }

    #[test]
    fn test_whole_stream_in_one_chunk() {
        assert_eq!(parse_chunks([STREAM.as_bytes()]), expected());
    }

    #[test]
    fn test_chunking_invariance_single_split() {
        let bytes = STREAM.as_bytes();
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(parse_chunks([a, b]), expected(), "split at {}", split);
        }
    }

    #[test]
    fn test_chunking_invariance_byte_at_a_time() {
        let bytes = STREAM.as_bytes();
        assert_eq!(parse_chunks(bytes.chunks(1)), expected());
        assert_eq!(parse_chunks(bytes.chunks(3)), expected());
        assert_eq!(parse_chunks(bytes.chunks(7)), expected());
    }

    #[test]
    fn test_no_premature_emission() {
        let line = b"data: {\"content\":\"Hello\"}\n";
        for split in 1..line.len() {
            let mut parser = FrameParser::new();
            let (a, b) = line.split_at(split);
            assert!(parser.push(a).is_empty(), "emitted early at {}", split);
            assert_eq!(parser.pending_len(), a.len());
            assert_eq!(
                parser.push(b),
                vec![StreamEvent::Content("Hello".to_string())]
            );
        }
    }

    #[test]
    fn test_hello_split_across_chunks() {
        let events = parse_chunks([
            &b"data: {\"content\":\"Hel"[..],
            &b"lo\"}\n"[..],
            &b"data: {\"done\":true,\"service_used\":\"svc\"}\n"[..],
        ]);
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("Hello".to_string()),
                StreamEvent::Done(Some("svc".to_string())),
            ]
        );
    }

    #[test]
    fn test_error_frame_stops_parsing() {
        let mut parser = FrameParser::new();
        let events = parser.push(b"data: {\"content\":\"a\"}\ndata: {\"error\":\"boom\"}\ndata: {\"content\":\"b\"}\n");
        assert_eq!(
            events,
            vec![
                StreamEvent::Content("a".to_string()),
                StreamEvent::Error("boom".to_string()),
            ]
        );
        assert!(parser.is_finished());
        assert!(parser.push(b"data: {\"content\":\"c\"}\n").is_empty());
    }

    #[test]
    fn test_prefix_without_space() {
        assert_eq!(
            parse_chunks([&b"data:{\"content\":\"x\"}\n"[..]]),
            vec![StreamEvent::Content("x".to_string())]
        );
    }

    #[test]
    fn test_unterminated_line_is_dropped_on_finish() {
        let mut parser = FrameParser::new();
        assert!(parser.push(b"data: {\"content\":\"tail\"}").is_empty());
        parser.finish();
        assert!(parser.is_finished());
        assert_eq!(parser.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_decode_stream_yields_events_in_order() {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = STREAM
            .as_bytes()
            .chunks(5)
            .map(|c| Ok(c.to_vec()))
            .collect();
        let events: Vec<StreamEvent> = decode_stream(stream::iter(chunks), CancellationToken::new())
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(events, expected());
    }

    #[tokio::test]
    async fn test_decode_stream_surfaces_transport_error_once() {
        let chunks: Vec<Result<&[u8], std::io::Error>> = vec![
            Ok(&b"data: {\"content\":\"a\"}\n"[..]),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(&b"data: {\"content\":\"b\"}\n"[..]),
        ];
        let results: Vec<_> = decode_stream(stream::iter(chunks), CancellationToken::new())
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].as_ref().unwrap(),
            &StreamEvent::Content("a".to_string())
        );
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn test_decode_stream_stops_on_cancel() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let chunks: Vec<Result<&[u8], std::io::Error>> = vec![Ok(&b"data: {\"content\":\"a\"}\n"[..])];
        let results: Vec<_> = decode_stream(stream::iter(chunks), cancel).collect().await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_drops_events_already_decoded() {
        let cancel = CancellationToken::new();
        let chunks: Vec<Result<&[u8], std::io::Error>> = vec![Ok(
            &b"data: {\"content\":\"a\"}\ndata: {\"content\":\"b\"}\n"[..],
        )];
        let mut events = std::pin::pin!(decode_stream(stream::iter(chunks), cancel.clone()));
        assert_eq!(
            events.next().await.unwrap().unwrap(),
            StreamEvent::Content("a".to_string())
        );
        cancel.cancel();
        assert!(events.next().await.is_none());
    }
}
