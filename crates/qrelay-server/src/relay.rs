//! Line-oriented relay for event streams.
//!
//! Upstream chunks are re-split on `\n` so that every complete line reaches
//! the caller as its own body frame as soon as it arrives.

use axum::body::Bytes;
use futures::{Stream, StreamExt};

/// Longest line buffered before it is passed through unsplit.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Re-frame `upstream` into one item per line.
///
/// With `dedupe` set, a line byte-identical to the line just before it is
/// dropped. Blank lines always pass. A line that grows past [`MAX_LINE_LEN`]
/// without a newline is flushed as-is. Bytes left over after the last newline
/// are flushed when the upstream ends. An upstream error ends the stream after
/// it is yielded.
pub fn relay_lines<S, E>(upstream: S, dedupe: bool) -> impl Stream<Item = Result<Bytes, E>>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    async_stream::stream! {
        let mut upstream = std::pin::pin!(upstream);
        let mut pending: Vec<u8> = Vec::new();
        // Bytes of `pending` already known to hold no newline.
        let mut scanned = 0;
        let mut previous: Option<Bytes> = None;
        let mut suppressed: u64 = 0;

        while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            pending.extend_from_slice(&chunk);

            while let Some(offset) = pending[scanned..].iter().position(|b| *b == b'\n') {
                let end = scanned + offset;
                let line = Bytes::from(pending.drain(..=end).collect::<Vec<u8>>());
                scanned = 0;

                if dedupe && !is_blank(&line) && previous.as_ref() == Some(&line) {
                    suppressed += 1;
                    tracing::debug!(line = %String::from_utf8_lossy(&line).trim_end(), "Suppressed repeated stream line");
                    continue;
                }

                previous = Some(line.clone());
                yield Ok(line);
            }
            scanned = pending.len();

            if pending.len() >= MAX_LINE_LEN {
                tracing::debug!(len = pending.len(), "Flushing overlong stream line");
                scanned = 0;
                previous = None;
                yield Ok(Bytes::from(std::mem::take(&mut pending)));
            }
        }

        if !pending.is_empty() {
            yield Ok(Bytes::from(pending));
        }
        if suppressed > 0 {
            tracing::debug!(suppressed, "Stream relay finished");
        }
    }
}

/// An SSE event terminator: `\n` or `\r\n`.
fn is_blank(line: &[u8]) -> bool {
    matches!(line, b"\n" | b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::channel::mpsc;
    use futures::stream;

    async fn collect(chunks: Vec<&'static [u8]>, dedupe: bool) -> Vec<Bytes> {
        let upstream = stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c))),
        );
        relay_lines(upstream, dedupe)
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_adjacent_duplicate_suppressed() {
        let frames = collect(vec![b"L1\nL1\nL2\nL3\n"], true).await;
        assert_eq!(frames, vec!["L1\n", "L2\n", "L3\n"]);
    }

    #[tokio::test]
    async fn test_dedupe_disabled_keeps_everything() {
        let frames = collect(vec![b"L1\nL1\nL2\n"], false).await;
        assert_eq!(frames, vec!["L1\n", "L1\n", "L2\n"]);
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let frames = collect(vec![b"data: {\"a\"", b":1}\n\nda", b"ta: [DONE]\n\n"], true).await;
        assert_eq!(
            frames,
            vec!["data: {\"a\":1}\n", "\n", "data: [DONE]\n", "\n"]
        );
    }

    #[tokio::test]
    async fn test_blank_lines_never_suppressed() {
        let frames = collect(vec![b"a\n\n\n\r\n\r\n"], true).await;
        assert_eq!(frames, vec!["a\n", "\n", "\n", "\r\n", "\r\n"]);
    }

    #[tokio::test]
    async fn test_non_adjacent_repeat_kept() {
        let frames = collect(vec![b"x\ny\nx\n"], true).await;
        assert_eq!(frames, vec!["x\n", "y\n", "x\n"]);
    }

    #[tokio::test]
    async fn test_trailing_partial_line_flushed() {
        let frames = collect(vec![b"one\ntw", b"o"], true).await;
        assert_eq!(frames, vec!["one\n", "two"]);
    }

    #[tokio::test]
    async fn test_empty_upstream() {
        let frames = collect(vec![], true).await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn test_error_ends_stream() {
        let upstream = stream::iter(vec![
            Ok(Bytes::from_static(b"a\n")),
            Err(std::io::Error::other("reset")),
            Ok(Bytes::from_static(b"b\n")),
        ]);
        let items: Vec<_> = relay_lines(upstream, true).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_each_line_delivered_before_next_chunk() {
        let (tx, rx) = mpsc::unbounded::<Result<Bytes, std::io::Error>>();
        let mut relay = Box::pin(relay_lines(rx, true));

        tx.unbounded_send(Ok(Bytes::from_static(b"data: 1\n\nda")))
            .unwrap();
        let first = tokio::time::timeout(Duration::from_secs(1), relay.next())
            .await
            .expect("first line should not wait for more upstream data");
        assert_eq!(first.unwrap().unwrap(), "data: 1\n");
        assert_eq!(relay.next().await.unwrap().unwrap(), "\n");

        // The partial line is held until its newline arrives.
        assert!(
            tokio::time::timeout(Duration::from_millis(50), relay.next())
                .await
                .is_err()
        );

        tx.unbounded_send(Ok(Bytes::from_static(b"ta: 2\n"))).unwrap();
        assert_eq!(relay.next().await.unwrap().unwrap(), "data: 2\n");

        drop(tx);
        assert!(relay.next().await.is_none());
    }

    #[tokio::test]
    async fn test_dropping_relay_closes_upstream() {
        let (tx, rx) = mpsc::unbounded::<Result<Bytes, std::io::Error>>();
        let mut relay = Box::pin(relay_lines(rx, true));

        tx.unbounded_send(Ok(Bytes::from_static(b"a\n"))).unwrap();
        assert_eq!(relay.next().await.unwrap().unwrap(), "a\n");
        assert!(!tx.is_closed());

        drop(relay);
        assert!(tx.is_closed());
        assert!(tx.unbounded_send(Ok(Bytes::from_static(b"b\n"))).is_err());
    }

    #[tokio::test]
    async fn test_overlong_line_flushed_unsplit() {
        let long = Bytes::from(vec![b'x'; MAX_LINE_LEN + 10]);
        let upstream = stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"head\n")),
            Ok(long.clone()),
            Ok(Bytes::from_static(b"tail\n")),
        ]);
        let frames: Vec<Bytes> = relay_lines(upstream, true)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], "head\n");
        assert_eq!(frames[1], long);
        assert_eq!(frames[2], "tail\n");
    }

    #[tokio::test]
    async fn test_line_split_across_many_chunks() {
        let upstream = stream::iter(
            b"data: abcdef\n"
                .iter()
                .map(|b| Ok::<_, std::io::Error>(Bytes::copy_from_slice(&[*b]))),
        );
        let frames: Vec<Bytes> = relay_lines(upstream, true)
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(frames, vec!["data: abcdef\n"]);
    }
}
