//! Server-sent-event framing, independent of any provider.
//!
//! Line endings (`\r\n`, `\r`) are normalised to `\n` as bytes arrive, so a
//! frame boundary may fall anywhere inside a chunk, including between a `\r`
//! and its `\n`.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};

pub const DEFAULT_EVENT: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Single-pass reader: feed chunks with [`SseFrameReader::push`] and flush the
/// trailing partial frame with [`SseFrameReader::finish`].
#[derive(Debug, Default)]
pub struct SseFrameReader {
    buffer: Vec<u8>,
    scanned: usize,
    pending_cr: bool,
}

impl SseFrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.pending_cr = true;
                }
                b'\n' if self.pending_cr => self.pending_cr = false,
                _ => {
                    self.buffer.push(byte);
                    self.pending_cr = false;
                }
            }
        }

        self.drain_complete_frames()
    }

    /// `push` drains every complete frame, so only the unterminated tail is left here.
    pub fn finish(self) -> Option<SseFrame> {
        parse_frame(&self.buffer)
    }

    fn drain_complete_frames(&mut self) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        while let Some(offset) = find_boundary(&self.buffer[self.scanned..]) {
            let end = self.scanned + offset;
            let raw = self.buffer[..end].to_vec();
            self.buffer.drain(..end + 2);
            self.scanned = 0;
            frames.extend(parse_frame(&raw));
        }

        self.scanned = self.buffer.len().saturating_sub(1);
        frames
    }
}

fn find_boundary(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|pair| pair == b"\n\n")
}

fn parse_frame(raw: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(raw);
    let mut event: Option<&str> = None;
    let mut data_lines = Vec::new();

    for line in text.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event = Some(value),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if event.is_none() && data_lines.is_empty() {
        return None;
    }

    Some(SseFrame {
        event: event
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_EVENT)
            .to_string(),
        data: data_lines.join("\n"),
    })
}

/// Adapts a body byte stream into a lazy stream of frames. A body error is
/// yielded once and ends the stream.
pub fn frame_stream<S, E>(body: S) -> impl Stream<Item = Result<SseFrame, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    let initial = (body, Some(SseFrameReader::new()), VecDeque::new());

    stream::unfold(initial, |(mut body, mut reader, mut pending)| async move {
        loop {
            if let Some(frame) = pending.pop_front() {
                return Some((Ok(frame), (body, reader, pending)));
            }

            let active = reader.as_mut()?;
            match body.next().await {
                Some(Ok(chunk)) => pending.extend(active.push(&chunk)),
                Some(Err(err)) => return Some((Err(err), (body, None, pending))),
                None => pending.extend(reader.take().and_then(SseFrameReader::finish)),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use bytes::Bytes;
    use futures_util::{StreamExt, stream};

    use super::{SseFrame, SseFrameReader, frame_stream};

    const SAMPLE: &[u8] = b": keep-alive\r\n\r\nevent: content_block_delta\r\ndata: {\"delta\":{\"text\":\"Du \"}}\r\n\r\ndata: first\ndata:second\n\nid: 7\nretry: 1000\n\nevent: message_stop\ndata: {}\r\rdata: [DONE]";

    fn frame(event: &str, data: &str) -> SseFrame {
        SseFrame {
            event: event.to_string(),
            data: data.to_string(),
        }
    }

    fn expected() -> Vec<SseFrame> {
        vec![
            frame("content_block_delta", "{\"delta\":{\"text\":\"Du \"}}"),
            frame("message", "first\nsecond"),
            frame("message_stop", "{}"),
            frame("message", "[DONE]"),
        ]
    }

    fn read_all(chunks: &[&[u8]]) -> Vec<SseFrame> {
        let mut reader = SseFrameReader::new();
        let mut frames = Vec::new();
        for chunk in chunks {
            frames.extend(reader.push(chunk));
        }
        frames.extend(reader.finish());
        frames
    }

    #[test]
    fn parses_events_comments_and_multiline_data() {
        assert_eq!(read_all(&[SAMPLE]), expected());
    }

    #[test]
    fn frame_list_is_identical_for_every_two_way_split() {
        for split in 0..=SAMPLE.len() {
            let (head, tail) = SAMPLE.split_at(split);
            assert_eq!(read_all(&[head, tail]), expected(), "split at byte {split}");
        }
    }

    #[test]
    fn frame_list_is_identical_when_fed_byte_by_byte() {
        let chunks = SAMPLE.chunks(1).collect::<Vec<_>>();
        assert_eq!(read_all(&chunks), expected());
    }

    #[test]
    fn frame_list_is_identical_for_three_way_splits() {
        for first in (0..SAMPLE.len()).step_by(7) {
            for second in (first..=SAMPLE.len()).step_by(5) {
                let chunks = [&SAMPLE[..first], &SAMPLE[first..second], &SAMPLE[second..]];
                assert_eq!(read_all(&chunks), expected(), "splits at {first}/{second}");
            }
        }
    }

    #[test]
    fn flushes_partial_frame_at_end_of_stream() {
        let mut reader = SseFrameReader::new();
        assert!(reader.push(b"data: tail without blank line").is_empty());
        assert_eq!(reader.finish(), Some(frame("message", "tail without blank line")));
    }

    #[test]
    fn empty_stream_yields_no_frames() {
        assert!(read_all(&[b"", b"\n\n\n", b": only a comment\n\n"]).is_empty());
    }

    #[test]
    fn multibyte_text_split_across_chunks_survives() {
        let payload = "data: Schülerinnen üben\n\n".as_bytes();
        let umlaut = payload
            .iter()
            .position(|byte| *byte == 0xc3)
            .expect("payload should contain a two-byte character");
        let frames = read_all(&[&payload[..umlaut + 1], &payload[umlaut + 1..]]);
        assert_eq!(frames, vec![frame("message", "Schülerinnen üben")]);
    }

    #[tokio::test]
    async fn frame_stream_reads_chunked_body() {
        let chunks = SAMPLE
            .chunks(11)
            .map(|chunk| Ok::<_, Infallible>(Bytes::copy_from_slice(chunk)))
            .collect::<Vec<_>>();

        let frames = frame_stream(stream::iter(chunks))
            .map(|item| item.expect("infallible body"))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(frames, expected());
    }

    #[tokio::test]
    async fn frame_stream_stops_after_body_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"data: one\n\n")),
            Err("connection reset"),
            Ok(Bytes::from_static(b"data: two\n\n")),
        ];

        let items = frame_stream(stream::iter(chunks)).collect::<Vec<_>>().await;

        assert_eq!(items, vec![Ok(frame("message", "one")), Err("connection reset")]);
    }
}
