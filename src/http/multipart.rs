use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::net::RingBuffer;

use super::request::{find_subsequence, parse_part_headers, PartInfo};

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum MultipartState {
    SeekBound,
    Headers,
    Data,
    SavePart,
    Complete,
    Error,
}

#[derive(Debug, Clone)]
pub struct UploadedPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub saved_path: Option<PathBuf>,
}

/// State machine over a shared body ring; writes file parts straight to
/// disk as they stream in rather than buffering a whole part in memory.
///
/// Scratch window sizing follows the `max(PAGE, |boundary| * 2)` rule
/// from the design notes so `seek_bound` always has enough lookahead to
/// find a boundary that may straddle two reactor reads.
pub struct MultipartParser {
    pub state: MultipartState,
    boundary: Vec<u8>,
    upload_dir: PathBuf,
    scratch_cap: usize,
    current_part: PartInfo,
    current_file: Option<File>,
    pub parts: Vec<UploadedPart>,
}

const PAGE: usize = 4096;

impl MultipartParser {
    pub fn new(boundary: &str, upload_dir: impl AsRef<Path>) -> Self {
        let boundary = boundary.as_bytes().to_vec();
        let scratch_cap = PAGE.max(boundary.len() * 2);
        Self {
            state: MultipartState::SeekBound,
            boundary,
            upload_dir: upload_dir.as_ref().to_path_buf(),
            scratch_cap,
            current_part: PartInfo::default(),
            current_file: None,
            parts: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state == MultipartState::Complete
    }

    /// Drains whatever is available in `body` into the part state machine.
    /// Runs until the ring can't make further progress (a full pass per
    /// `while (state_changed) { run_step }`, replacing the original's
    /// goto-driven re-entry).
    pub fn feed(&mut self, body: &mut RingBuffer) -> std::io::Result<()> {
        loop {
            let before = self.state;
            match self.state {
                MultipartState::SeekBound => self.seek_bound(body)?,
                MultipartState::Headers => self.parse_headers(body)?,
                MultipartState::Data => self.parse_data(body)?,
                MultipartState::SavePart => self.save_part(),
                MultipartState::Complete | MultipartState::Error => return Ok(()),
            }
            if self.state == before {
                return Ok(());
            }
        }
    }

    fn peek_window(&self, body: &RingBuffer) -> Vec<u8> {
        let n = body.size().min(self.scratch_cap);
        let mut buf = vec![0u8; n];
        body.peek(&mut buf);
        buf
    }

    fn seek_bound(&mut self, body: &mut RingBuffer) -> std::io::Result<()> {
        let window = self.peek_window(body);
        let mut marker = vec![b'-', b'-'];
        marker.extend_from_slice(&self.boundary);

        let Some(pos) = find_subsequence(&window, &marker) else {
            // no boundary yet; if the window is already full this is a
            // genuine parse failure, otherwise wait for more data
            if window.len() >= self.scratch_cap {
                self.state = MultipartState::Error;
            }
            return Ok(());
        };

        let after = pos + marker.len();
        if window.len() < after + 2 {
            return Ok(()); // need to see what follows the boundary
        }

        body.advance_read(after);
        if &window[after..after + 2] == b"--" {
            body.advance_read(2);
            self.state = MultipartState::Complete;
        } else if &window[after..after + 2] == b"\r\n" {
            body.advance_read(2);
            self.state = MultipartState::Headers;
        }
        // otherwise: malformed trailing bytes after the boundary; stay put
        // and let more data arrive (mirrors the original's tolerant retry)
        Ok(())
    }

    fn parse_headers(&mut self, body: &mut RingBuffer) -> std::io::Result<()> {
        let window = self.peek_window(body);
        let Some(pos) = find_subsequence(&window, b"\r\n\r\n") else {
            if window.len() >= self.scratch_cap {
                self.state = MultipartState::Error;
            }
            return Ok(());
        };

        let header_text = String::from_utf8_lossy(&window[..pos]).to_string();
        let info = parse_part_headers(&header_text);
        if info.name.is_empty() {
            self.state = MultipartState::Error;
            return Ok(());
        }

        if let Some(filename) = &info.filename {
            let sanitized = sanitize_filename(filename);
            let path = unique_path(&self.upload_dir, &sanitized);
            match File::create(&path) {
                Ok(f) => {
                    self.current_file = Some(f);
                    self.current_part.filename = Some(
                        path.file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or(sanitized),
                    );
                }
                Err(_) => {
                    self.state = MultipartState::Error;
                    return Ok(());
                }
            }
        }
        self.current_part.name = info.name;
        self.current_part.content_type = info.content_type;

        body.advance_read(pos + 4);
        self.state = MultipartState::Data;
        Ok(())
    }

    fn parse_data(&mut self, body: &mut RingBuffer) -> std::io::Result<()> {
        let window = self.peek_window(body);
        let mut marker = vec![b'-', b'-'];
        marker.extend_from_slice(&self.boundary);

        match find_subsequence(&window, &marker) {
            Some(pos) => {
                // boundary found: data ends 2 bytes earlier (trailing CRLF)
                let data_len = pos.saturating_sub(2);
                self.flush(&window[..data_len])?;
                body.advance_read(pos);
                self.state = MultipartState::SavePart;
            }
            None => {
                // flush everything except a safety margin equal to the
                // boundary length, so a boundary split across two peeks
                // is never missed
                let margin = self.boundary.len() + 2;
                if window.len() > margin {
                    let flushable = window.len() - margin;
                    self.flush(&window[..flushable])?;
                    body.advance_read(flushable);
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self, data: &[u8]) -> std::io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if let Some(file) = &mut self.current_file {
            file.write_all(data)?;
        }
        Ok(())
    }

    fn save_part(&mut self) {
        let file = self.current_file.take();
        drop(file);
        let part = std::mem::take(&mut self.current_part);
        self.parts.push(UploadedPart {
            name: part.name,
            saved_path: part.filename.as_ref().map(|f| self.upload_dir.join(f)),
            filename: part.filename,
            content_type: part.content_type,
        });
        self.state = MultipartState::SeekBound;
    }
}

fn sanitize_filename(name: &str) -> String {
    let base: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' { c } else { '_' })
        .collect();
    let base = base.trim_start_matches('.');
    if base.is_empty() {
        "upload".to_string()
    } else {
        base.to_string()
    }
}

fn unique_path(dir: &Path, filename: &str) -> PathBuf {
    let mut candidate = dir.join(filename);
    let mut counter = 1;
    while candidate.exists() {
        let (stem, ext) = match filename.rsplit_once('.') {
            Some((s, e)) => (s.to_string(), format!(".{}", e)),
            None => (filename.to_string(), String::new()),
        };
        candidate = dir.join(format!("{}_{}{}", stem, counter, ext));
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut MultipartParser, ring: &mut RingBuffer, data: &[u8]) {
        ring.write_strict(data);
        parser.feed(ring).unwrap();
    }

    #[test]
    fn parses_text_part() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X\r\nContent-Disposition: form-data; name=\"bio\"\r\n\r\nhi\r\n--X--\r\n";
        let mut ring = RingBuffer::new(4096);
        let mut parser = MultipartParser::new("X", dir.path());
        feed_all(&mut parser, &mut ring, body);
        assert!(parser.is_complete());
        assert_eq!(parser.parts.len(), 1);
        assert_eq!(parser.parts[0].name, "bio");
    }

    #[test]
    fn saves_file_part_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X\r\nContent-Disposition: form-data; name=\"file\"; filename=\"p.bin\"\r\n\r\n[BIN]\r\n--X--\r\n";
        let mut ring = RingBuffer::new(4096);
        let mut parser = MultipartParser::new("X", dir.path());
        feed_all(&mut parser, &mut ring, body);
        assert!(parser.is_complete());
        let saved = parser.parts[0].saved_path.clone().unwrap();
        assert_eq!(std::fs::read(saved).unwrap(), b"[BIN]");
    }

    #[test]
    fn two_parts_one_file_one_text() {
        let dir = tempfile::tempdir().unwrap();
        let body = b"--X\r\nContent-Disposition: form-data; name=\"bio\"\r\n\r\nhi\r\n--X\r\nContent-Disposition: form-data; name=\"file\"; filename=\"p.bin\"\r\n\r\n[BIN]\r\n--X--\r\n";
        let mut ring = RingBuffer::new(4096);
        let mut parser = MultipartParser::new("X", dir.path());
        feed_all(&mut parser, &mut ring, body);
        assert!(parser.is_complete());
        assert_eq!(parser.parts.len(), 2);
    }
}
