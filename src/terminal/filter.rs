use super::types::OutputStream;

pub(crate) const CLEAR_SCROLLBACK_HOME: &str = "\u{1b}[2J\u{1b}[3J\u{1b}[H";
pub(crate) const CLEAR_HOME: &str = "\u{1b}[2J\u{1b}[H";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FilterConfig {
    pub(crate) clear_threshold: usize,
    pub(crate) novelty_min_chars: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            clear_threshold: 2,
            novelty_min_chars: 50,
        }
    }
}

/// Per-session transform applied to every output chunk before it reaches the display.
///
/// Collapses the clear-screen triple to a plain clear+home while a redraw loop looks
/// healthy, drops it once the same screen keeps getting cleared, and turns bare LF
/// into CR LF for a raw line discipline. The clear counter is shared by both
/// streams; decoding state is kept per stream.
#[derive(Debug)]
pub(crate) struct OutputFilter {
    config: FilterConfig,
    clear_count: usize,
    last_content: String,
    streams: [StreamDecoder; 2],
}

#[derive(Debug, Default)]
struct StreamDecoder {
    utf8_tail: Vec<u8>,
    // A chunk ending partway through the clear triple.
    clear_tail: String,
    last_was_cr: bool,
}

fn slot(stream: OutputStream) -> usize {
    match stream {
        OutputStream::Stdout => 0,
        OutputStream::Stderr => 1,
    }
}

impl OutputFilter {
    pub(crate) fn new(config: FilterConfig) -> Self {
        Self {
            config,
            clear_count: 0,
            last_content: String::new(),
            streams: Default::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn clear_count(&self) -> usize {
        self.clear_count
    }

    pub(crate) fn process(&mut self, stream: OutputStream, chunk: &[u8]) -> Vec<u8> {
        let decoder = &mut self.streams[slot(stream)];
        let mut text = std::mem::take(&mut decoder.clear_tail);
        text.push_str(&decoder.decode(chunk));
        let held = partial_clear_len(&text);
        decoder.clear_tail = text.split_off(text.len() - held);
        if text.is_empty() {
            return Vec::new();
        }

        let filtered = self.collapse_clears(&text);
        self.streams[slot(stream)]
            .normalize_line_endings(&filtered)
            .into_bytes()
    }

    /// Releases whatever a closed stream still holds back.
    pub(crate) fn flush(&mut self, stream: OutputStream) -> Vec<u8> {
        let decoder = &mut self.streams[slot(stream)];
        let mut text = std::mem::take(&mut decoder.clear_tail);
        let tail = std::mem::take(&mut decoder.utf8_tail);
        text.push_str(&String::from_utf8_lossy(&tail));
        decoder.normalize_line_endings(&text).into_bytes()
    }

    fn collapse_clears(&mut self, text: &str) -> String {
        let mut filtered = String::with_capacity(text.len());
        let mut segments = text.split(CLEAR_SCROLLBACK_HOME).peekable();
        while let Some(segment) = segments.next() {
            self.observe_content(segment);
            filtered.push_str(segment);
            if segments.peek().is_none() {
                break;
            }
            self.clear_count += 1;
            if self.clear_count <= self.config.clear_threshold {
                filtered.push_str(CLEAR_HOME);
            }
        }
        filtered
    }

    fn observe_content(&mut self, segment: &str) {
        let stripped = strip_ansi(segment);
        if stripped.chars().count() >= self.config.novelty_min_chars
            && stripped != self.last_content
        {
            self.clear_count = 0;
            self.last_content = stripped;
        }
    }
}

impl StreamDecoder {
    fn normalize_line_endings(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 8);
        for ch in text.chars() {
            if ch == '\n' && !self.last_was_cr {
                out.push('\r');
            }
            out.push(ch);
            self.last_was_cr = ch == '\r';
        }
        out
    }

    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.utf8_tail);
        bytes.extend_from_slice(chunk);
        match std::str::from_utf8(&bytes) {
            Ok(text) => text.to_string(),
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                self.utf8_tail = bytes[valid..].to_vec();
                String::from_utf8_lossy(&bytes[..valid]).into_owned()
            }
            Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
        }
    }
}

/// Length of the longest proper prefix of the clear triple that ends `text`.
fn partial_clear_len(text: &str) -> usize {
    (1..CLEAR_SCROLLBACK_HOME.len())
        .rev()
        .find(|&n| text.ends_with(&CLEAR_SCROLLBACK_HOME[..n]))
        .unwrap_or(0)
}

/// Removes CSI, OSC and two-byte escape sequences, keeping the printable text.
pub(crate) fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_escape = false;
    let mut in_csi = false;
    let mut in_osc = false;
    let mut osc_saw_esc = false;

    for ch in text.chars() {
        if in_osc {
            // OSC ends at BEL or ST (ESC \).
            if ch == '\u{7}' || (osc_saw_esc && ch == '\\') {
                in_osc = false;
                osc_saw_esc = false;
            } else {
                osc_saw_esc = ch == '\u{1b}';
            }
            continue;
        }
        if in_escape {
            if in_csi {
                if ('@'..='~').contains(&ch) {
                    in_escape = false;
                    in_csi = false;
                }
                continue;
            }
            match ch {
                '[' => in_csi = true,
                ']' => {
                    in_escape = false;
                    in_osc = true;
                }
                // Intermediate bytes, e.g. the `(` in a charset designation.
                ' '..='/' => {}
                _ => in_escape = false,
            }
            continue;
        }

        if ch == '\u{1b}' {
            in_escape = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut OutputFilter, text: &str) -> String {
        String::from_utf8(filter.process(OutputStream::Stdout, text.as_bytes()))
            .expect("utf8 output")
    }

    #[test]
    fn third_identical_clear_is_suppressed() {
        let mut filter = OutputFilter::new(FilterConfig::default());

        assert_eq!(run(&mut filter, CLEAR_SCROLLBACK_HOME), CLEAR_HOME);
        assert_eq!(run(&mut filter, CLEAR_SCROLLBACK_HOME), CLEAR_HOME);
        assert_eq!(run(&mut filter, CLEAR_SCROLLBACK_HOME), "");
        assert_eq!(filter.clear_count(), 3);
    }

    #[test]
    fn new_content_resets_suppression() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        for _ in 0..3 {
            run(&mut filter, CLEAR_SCROLLBACK_HOME);
        }

        let fresh = "a brand new screen of output that is clearly longer than fifty chars";
        let out = run(&mut filter, &format!("{fresh}{CLEAR_SCROLLBACK_HOME}"));

        assert_eq!(out, format!("{fresh}{CLEAR_HOME}"));
        assert_eq!(filter.clear_count(), 1);
    }

    #[test]
    fn repeated_identical_redraw_does_not_reset() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        let screen = format!(
            "\u{1b}[1m{}\u{1b}[0m",
            "the very same spinner frame drawn over and over again"
        );

        let mut outputs = Vec::new();
        for _ in 0..5 {
            outputs.push(run(&mut filter, &format!("{CLEAR_SCROLLBACK_HOME}{screen}")));
        }

        // The first frame is novel content, so counting starts after it.
        assert!(outputs[0].starts_with(CLEAR_HOME));
        assert!(outputs[1].starts_with(CLEAR_HOME));
        assert!(outputs[2].starts_with(CLEAR_HOME));
        assert_eq!(outputs[3], screen);
        assert_eq!(outputs[4], screen);
    }

    #[test]
    fn short_novel_content_does_not_reset() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        for _ in 0..3 {
            run(&mut filter, CLEAR_SCROLLBACK_HOME);
        }
        let out = run(&mut filter, &format!("short{CLEAR_SCROLLBACK_HOME}"));
        assert_eq!(out, "short");
    }

    #[test]
    fn bare_line_feeds_become_crlf() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        assert_eq!(run(&mut filter, "hello\n"), "hello\r\n");
        assert_eq!(run(&mut filter, "a\r\nb\n\n"), "a\r\nb\r\n\r\n");
    }

    #[test]
    fn crlf_split_across_chunks_is_not_doubled() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        assert_eq!(run(&mut filter, "line\r"), "line\r");
        assert_eq!(run(&mut filter, "\nnext"), "\nnext");
    }

    #[test]
    fn utf8_split_across_chunks_is_carried() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        let bytes = "héllo".as_bytes();
        let first = filter.process(OutputStream::Stdout, &bytes[..2]);
        let second = filter.process(OutputStream::Stdout, &bytes[2..]);
        assert_eq!(first, b"h");
        assert_eq!(String::from_utf8(second).expect("utf8"), "éllo");
    }

    #[test]
    fn clear_split_across_chunks_is_still_collapsed() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        let (head, tail) = CLEAR_SCROLLBACK_HOME.split_at(5);

        assert_eq!(run(&mut filter, &format!("frame{head}")), "frame");
        assert_eq!(run(&mut filter, tail), CLEAR_HOME);
        assert_eq!(filter.clear_count(), 1);
    }

    #[test]
    fn held_back_prefix_is_released_on_flush() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        assert_eq!(run(&mut filter, "done\u{1b}[2J"), "done");
        assert_eq!(filter.flush(OutputStream::Stdout), b"\x1b[2J");
        assert!(filter.flush(OutputStream::Stdout).is_empty());
    }

    #[test]
    fn streams_decode_independently() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        let euro = "€".as_bytes();

        assert!(filter.process(OutputStream::Stdout, &euro[..2]).is_empty());
        assert_eq!(filter.process(OutputStream::Stderr, b"E\n"), b"E\r\n");
        assert_eq!(filter.process(OutputStream::Stdout, &euro[2..]), "€".as_bytes());
    }

    #[test]
    fn carriage_return_state_is_per_stream() {
        let mut filter = OutputFilter::new(FilterConfig::default());
        assert_eq!(filter.process(OutputStream::Stdout, b"a\r"), b"a\r");
        assert_eq!(filter.process(OutputStream::Stderr, b"\nb"), b"\r\nb");
    }

    #[test]
    fn strip_ansi_removes_csi_and_osc() {
        let text = "\u{1b}]0;title\u{7}\u{1b}[31mred\u{1b}[0m \u{1b}(Bplain";
        assert_eq!(strip_ansi(text), "red plain");
    }
}
