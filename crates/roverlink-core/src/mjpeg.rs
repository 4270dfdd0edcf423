// ── MJPEG multipart frame splitter ──
//
// The gateway's camera emits `multipart/x-mixed-replace` parts, one JPEG
// per part. This splitter turns an arbitrary chunking of that byte flow
// into complete frame payloads. Parts carrying Content-Length take the
// fast path; otherwise the payload runs to the next boundary marker.

use bytes::{Buf, Bytes, BytesMut};

/// Cap on buffered bytes while hunting for a frame. A well-formed
/// upstream never gets near this; it guards against a non-multipart
/// endpoint flooding the buffer.
const MAX_PENDING: usize = 4 * 1024 * 1024;

pub struct FrameSplitter {
    buf: BytesMut,
    /// Boundary marker including the leading dashes, e.g. `--frame`.
    boundary: Vec<u8>,
}

impl FrameSplitter {
    pub fn new(boundary: &str) -> Self {
        Self {
            buf: BytesMut::new(),
            boundary: format!("--{boundary}").into_bytes(),
        }
    }

    /// Build a splitter from the upstream `Content-Type` header,
    /// falling back to the conventional `frame` boundary.
    pub fn for_content_type(content_type: &str) -> Self {
        let boundary = content_type
            .split(';')
            .find_map(|part| part.trim().strip_prefix("boundary="))
            .map(|b| b.trim_matches('"'))
            .unwrap_or("frame");
        Self::new(boundary)
    }

    /// Feed one chunk of upstream bytes, returning every frame payload
    /// completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find(&self.buf, &self.boundary) else {
                break;
            };
            let after_boundary = start + self.boundary.len();

            let Some(headers_end) = find(&self.buf[after_boundary..], b"\r\n\r\n") else {
                break;
            };
            let body_start = after_boundary + headers_end + 4;
            let headers = &self.buf[after_boundary..after_boundary + headers_end];

            if let Some(length) = parse_content_length(headers) {
                if self.buf.len() < body_start + length {
                    break;
                }
                frames.push(Bytes::copy_from_slice(
                    &self.buf[body_start..body_start + length],
                ));
                self.buf.advance(body_start + length);
            } else {
                let Some(next) = find(&self.buf[body_start..], &self.boundary) else {
                    break;
                };
                let mut end = body_start + next;
                while end > body_start && matches!(self.buf[end - 1], b'\r' | b'\n') {
                    end -= 1;
                }
                frames.push(Bytes::copy_from_slice(&self.buf[body_start..end]));
                self.buf.advance(body_start + next);
            }
        }

        if self.buf.len() > MAX_PENDING {
            let tail = self.buf.split_off(self.buf.len() - self.boundary.len());
            self.buf = tail;
        }

        frames
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_content_length(headers: &[u8]) -> Option<usize> {
    for line in headers.split(|&b| b == b'\n') {
        let Some((key, value)) = std::str::from_utf8(line).ok().and_then(|l| l.split_once(':'))
        else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("content-length") {
            return value.trim().parse().ok();
        }
    }
    None
}
