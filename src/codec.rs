//! Content-Length framing over an async byte stream.
//!
//! An async, generic-over-`AsyncRead` streaming parser: a two-state machine (seeking
//! header, reading body) that survives arbitrary fragmentation and coalescing of the
//! underlying reads.

use tokio::io::{AsyncRead, AsyncReadExt};

const HEADER_SEPARATOR: &[u8] = b"\r\n\r\n";

/// One parsed unit off the wire.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A header/body pair that decoded as JSON.
    Message(serde_json::Value),
    /// A header/body pair whose body failed to decode as JSON. The stream is not
    /// poisoned — parsing resumes at the next header.
    ParseError(String),
}

/// Streaming Content-Length decoder. Feed it bytes; it yields fully-framed messages.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, buf: Vec::new() }
    }

    /// Reads and parses the next frame, pulling more bytes from the underlying stream
    /// as needed. Returns `Ok(None)` on clean EOF with no partial frame pending.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.try_parse() {
                return Ok(Some(frame));
            }
            let mut chunk = [0u8; 8192];
            let n = self.inner.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Attempts to pull one frame out of the already-buffered bytes. May loop
    /// internally past malformed headers without needing more I/O.
    fn try_parse(&mut self) -> Option<Frame> {
        loop {
            let header_end = find_subslice(&self.buf, HEADER_SEPARATOR)?;
            let header_bytes = &self.buf[..header_end];
            let content_length = parse_content_length(header_bytes);

            let Some(len) = content_length else {
                self.buf.drain(..header_end + HEADER_SEPARATOR.len());
                continue;
            };

            let body_start = header_end + HEADER_SEPARATOR.len();
            let body_end = body_start + len;
            if self.buf.len() < body_end {
                return None;
            }

            let body = self.buf[body_start..body_end].to_vec();
            self.buf.drain(..body_end);

            return Some(match serde_json::from_slice(&body) {
                Ok(value) => Frame::Message(value),
                Err(err) => Frame::ParseError(err.to_string()),
            });
        }
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_content_length(header_bytes: &[u8]) -> Option<usize> {
    let header_text = std::str::from_utf8(header_bytes).ok()?;
    header_text.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse::<usize>().ok()
        } else {
            None
        }
    })
}

/// Encodes a single DAP message as a Content-Length frame.
pub fn encode_frame(value: &impl serde::Serialize) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(value)?;
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn parses_one_frame() {
        let (mut writer, reader) = duplex(1024);
        let mut frames = FrameReader::new(reader);
        let body = serde_json::json!({"seq": 1, "type": "event", "event": "initialized"});
        writer.write_all(&encode_frame(&body).unwrap()).await.unwrap();

        let frame = frames.next_frame().await.unwrap().unwrap();
        match frame {
            Frame::Message(value) => assert_eq!(value, body),
            Frame::ParseError(e) => panic!("unexpected parse error: {e}"),
        }
        let _ = writer.shutdown().await;
    }

    #[tokio::test]
    async fn handles_fragmented_reads() {
        let (mut writer, reader) = duplex(16);
        let mut frames = FrameReader::new(reader);
        let raw = b"Content-Length: 37\r\n\r\n{\"seq\":1,\"type\":\"response\",\"request_seq\":1,\"success\":true,\"command\":\"initialize\",\"body\":{}}";
        assert_eq!(raw.len() - "Content-Length: 37\r\n\r\n".len(), 37);

        let writer_task = tokio::spawn(async move {
            for chunk in raw.chunks(5) {
                writer.write_all(chunk).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let frame = frames.next_frame().await.unwrap().unwrap();
        match frame {
            Frame::Message(value) => {
                assert_eq!(value["command"], "initialize");
                assert_eq!(value["request_seq"], 1);
                assert_eq!(value["success"], true);
            }
            Frame::ParseError(e) => panic!("unexpected parse error: {e}"),
        }
        writer_task.await.unwrap();
    }

    #[tokio::test]
    async fn handles_coalesced_messages() {
        let (mut writer, reader) = duplex(4096);
        let mut frames = FrameReader::new(reader);
        let a = serde_json::json!({"seq":1,"type":"response","request_seq":1,"success":true,"command":"initialize","body":{}});
        let b = serde_json::json!({"seq":2,"type":"response","request_seq":2,"success":true,"command":"launch","body":{}});
        let mut combined = encode_frame(&a).unwrap();
        combined.extend(encode_frame(&b).unwrap());

        writer.write_all(&combined).await.unwrap();

        let first = frames.next_frame().await.unwrap().unwrap();
        let second = frames.next_frame().await.unwrap().unwrap();
        match (first, second) {
            (Frame::Message(v1), Frame::Message(v2)) => {
                assert_eq!(v1["command"], "initialize");
                assert_eq!(v2["command"], "launch");
            }
            _ => panic!("expected two messages"),
        }
    }

    #[tokio::test]
    async fn malformed_header_does_not_poison_stream() {
        let (mut writer, reader) = duplex(4096);
        let mut frames = FrameReader::new(reader);
        let good = serde_json::json!({"seq":1,"type":"event","event":"output","body":{"output":"hi"}});
        let mut combined = b"Content-Length: bogus\r\n\r\n".to_vec();
        combined.extend(encode_frame(&good).unwrap());

        writer.write_all(&combined).await.unwrap();

        let frame = frames.next_frame().await.unwrap().unwrap();
        match frame {
            Frame::Message(value) => assert_eq!(value["event"], "output"),
            Frame::ParseError(e) => panic!("unexpected parse error: {e}"),
        }
    }

    #[tokio::test]
    async fn decode_failure_emits_parse_error_and_continues() {
        let (mut writer, reader) = duplex(4096);
        let mut frames = FrameReader::new(reader);
        let bad_body = b"not json";
        let mut combined = format!("Content-Length: {}\r\n\r\n", bad_body.len()).into_bytes();
        combined.extend_from_slice(bad_body);
        let good = serde_json::json!({"seq":1,"type":"event","event":"initialized"});
        combined.extend(encode_frame(&good).unwrap());

        writer.write_all(&combined).await.unwrap();

        let first = frames.next_frame().await.unwrap().unwrap();
        assert!(matches!(first, Frame::ParseError(_)));
        let second = frames.next_frame().await.unwrap().unwrap();
        assert!(matches!(second, Frame::Message(_)));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::{duplex, AsyncWriteExt};

    proptest! {
        /// A message encoded and decoded equals the original, property order aside.
        #[test]
        fn round_trip_preserves_value(seq in 0i64..10_000, command in "[a-zA-Z]{1,12}") {
            let value = serde_json::json!({"seq": seq, "type": "request", "command": command});
            let encoded = encode_frame(&value).unwrap();
            let header_end = find_subslice(&encoded, HEADER_SEPARATOR).unwrap();
            let decoded: serde_json::Value = serde_json::from_slice(&encoded[header_end + HEADER_SEPARATOR.len()..]).unwrap();
            prop_assert_eq!(decoded, value);
        }

        /// Splitting an encoded message sequence at any byte offset and writing it in
        /// two chunks yields the same parsed message count as writing it whole.
        #[test]
        fn arbitrary_split_point_does_not_change_parsed_messages(
            seqs in proptest::collection::vec(0i64..1000, 1..6),
            split_ratio in 0.0f64..1.0,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async move {
                let mut combined = Vec::new();
                for seq in &seqs {
                    let value = serde_json::json!({"seq": seq, "type": "event", "event": "output"});
                    combined.extend(encode_frame(&value).unwrap());
                }
                let split_at = ((combined.len() as f64) * split_ratio) as usize;
                let (mut writer, reader) = duplex(combined.len() + 1024);
                writer.write_all(&combined[..split_at]).await.unwrap();
                tokio::task::yield_now().await;
                writer.write_all(&combined[split_at..]).await.unwrap();
                drop(writer);

                let mut frames = FrameReader::new(reader);
                let mut count = 0;
                while let Some(frame) = frames.next_frame().await.unwrap() {
                    if matches!(frame, Frame::Message(_)) {
                        count += 1;
                    }
                }
                assert_eq!(count, seqs.len());
            });
        }
    }
}
