//! Framed byte exchange with the server process.
//!
//! The wire format is `Content-Length: N\r\n\r\n{json}` over the child's
//! standard streams. [`FrameReader`] and [`FrameWriter`] work over any
//! async stream pair so tests can run against in-memory pipes.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body (8 MiB). Workspace-wide symbol
/// results can get large; anything beyond this is a broken peer.
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

/// Reads framed JSON-RPC messages from an async reader.
pub struct FrameReader<R> {
    input: BufReader<R>,
    line: String,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
            line: String::new(),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the stream ended cleanly between frames. EOF in
    /// the middle of a frame, a missing or unparseable `Content-Length`,
    /// an oversized body, or invalid JSON are all errors.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(length) = self.read_content_length().await? else {
            return Ok(None);
        };

        if length > MAX_FRAME_BYTES {
            bail!("frame of {length} bytes exceeds the {MAX_FRAME_BYTES} byte limit");
        }

        let mut body = vec![0u8; length];
        self.input
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        serde_json::from_slice(&body)
            .context("parsing frame body as JSON")
            .map(Some)
    }

    /// Scan the header block. Returns `None` on clean EOF before any
    /// header byte; unknown headers are skipped.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut length = None;
        let mut started = false;

        loop {
            self.line.clear();
            let n = self
                .input
                .read_line(&mut self.line)
                .await
                .context("reading frame header")?;
            if n == 0 {
                if started {
                    bail!("stream closed inside a frame header block");
                }
                return Ok(None);
            }
            started = true;

            let header = self.line.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Length")
            {
                length = Some(
                    value
                        .trim()
                        .parse::<usize>()
                        .with_context(|| format!("invalid Content-Length {:?}", value.trim()))?,
                );
            }
        }

        match length {
            Some(length) => Ok(Some(length)),
            None => bail!("frame header block had no Content-Length"),
        }
    }
}

/// Writes framed JSON-RPC messages to an async writer.
pub struct FrameWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Serialize `message` and write it with its `Content-Length` header.
    /// The length counts bytes, not characters.
    pub async fn write_frame(&mut self, message: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(message).context("serializing frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.output
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.output
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.output.flush().await.context("flushing frame")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(bytes: &[u8]) -> Vec<serde_json::Value> {
        let mut reader = FrameReader::new(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = reader.read_frame().await.unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn roundtrip_preserves_message() {
        let message = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "workspace/symbol",
            "params": { "query": "" }
        });

        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&message).await.unwrap();

        assert_eq!(read_all(&buf).await, vec![message]);
    }

    #[tokio::test]
    async fn consecutive_frames_arrive_in_order() {
        let first = serde_json::json!({"jsonrpc": "2.0", "id": 1});
        let second = serde_json::json!({"jsonrpc": "2.0", "id": 2});

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&first).await.unwrap();
        writer.write_frame(&second).await.unwrap();

        assert_eq!(read_all(&buf).await, vec![first, second]);
    }

    #[tokio::test]
    async fn empty_stream_is_clean_eof() {
        let mut reader = FrameReader::new(&b""[..]);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_headers_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 10\r\n"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn eof_inside_body_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 100\r\n\r\n{\"id\""[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn missing_content_length_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Type: application/json\r\n\r\n{}"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn header_name_is_case_insensitive() {
        let body = br#"{"id":1}"#;
        let framed = format!("content-length: {}\r\n\r\n", body.len());
        let mut input = framed.into_bytes();
        input.extend_from_slice(body);

        let frames = read_all(&input).await;
        assert_eq!(frames[0]["id"], 1);
    }

    #[tokio::test]
    async fn extra_headers_are_skipped() {
        let body = br#"{"id":2}"#;
        let framed = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let mut input = framed.into_bytes();
        input.extend_from_slice(body);

        let frames = read_all(&input).await;
        assert_eq!(frames[0]["id"], 2);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let framed = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(framed.as_bytes());
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn non_numeric_content_length_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: many\r\n\r\n"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn invalid_json_body_is_an_error() {
        let mut reader = FrameReader::new(&b"Content-Length: 4\r\n\r\nnope"[..]);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn content_length_counts_bytes_not_chars() {
        // "ü" is two bytes in UTF-8.
        let message = serde_json::json!({"s": "ü"});
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&message).await.unwrap();

        let body = serde_json::to_vec(&message).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        assert_eq!(read_all(&buf).await[0]["s"], "ü");
    }
}
