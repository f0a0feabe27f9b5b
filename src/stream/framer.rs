//! Line framing for the streamed reply body
//!
//! The reply service delivers the assistant reply as newline-delimited
//! protocol lines inside arbitrarily-chunked response bodies. A chunk
//! boundary can land anywhere, including in the middle of a line, so the
//! framer retains the partial tail between [`LineFramer::feed`] calls and
//! only ever hands out complete, terminator-free lines.

/// Incremental line extractor over a chunked text stream.
///
/// Feed raw chunk text with [`feed`](Self::feed), then pull complete lines
/// with [`next_line`](Self::next_line) until it returns `None`. Any trailing
/// partial line stays buffered for the next feed. A line that decoded as
/// incomplete (payload truncated despite a terminator being present) can be
/// pushed back with [`restore`](Self::restore) so it is re-attempted once
/// more bytes arrive.
///
/// At stream end, whatever remains buffered is a malformed trailing fragment
/// and is discarded by the caller, never decoded.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: String,
}

impl LineFramer {
    /// Create an empty framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk to the retained buffer.
    ///
    /// Zero-length chunks are accepted and change nothing.
    pub fn feed(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Extract the next complete line, stripping the terminator.
    ///
    /// A carriage return immediately before the terminator is stripped as
    /// well. Returns `None` when the buffer holds no complete line; the
    /// partial tail remains buffered.
    pub fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.find('\n')?;
        let mut line: String = self.buffer.drain(..=newline).collect();
        line.pop(); // the '\n'
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    /// Push a line (with its terminator) back to the front of the buffer.
    ///
    /// Used when a `data:` line parsed as truncated: the line is restored so
    /// a later [`feed`](Self::feed) can complete it. The caller must stop
    /// extracting lines until more bytes arrive, or it will pull the same
    /// line straight back out.
    pub fn restore(&mut self, line: &str) {
        self.buffer.insert(0, '\n');
        self.buffer.insert_str(0, line);
    }

    /// Drain and return whatever partial text remains buffered.
    ///
    /// Called at stream end; the residual is not a decodable event and the
    /// orchestrator drops it.
    pub fn take_residual(&mut self) -> String {
        std::mem::take(&mut self.buffer)
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
