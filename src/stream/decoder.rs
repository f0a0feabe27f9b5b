//! Event decoding for the streamed reply protocol
//!
//! Each framed line is one of: an ignorable comment or blank, a `data:`
//! payload carrying a JSON delta record, or the explicit `[DONE]`
//! terminator. Decoding is total -- every line maps to exactly one
//! [`Decoded`] outcome -- and a structurally unparseable payload is
//! reported as [`Decoded::Incomplete`] rather than dropped, so the caller
//! can restore it to the framer and re-attempt once more bytes arrive.

use serde::Deserialize;

/// Prefix marking a payload-bearing line.
const DATA_PREFIX: &str = "data: ";

/// Explicit end-of-reply sentinel, distinct from the stream's physical end.
const TERMINATOR: &str = "[DONE]";

/// Outcome of decoding one framed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// An incremental content fragment to append to the in-flight reply.
    Fragment(String),
    /// The logical end of the reply; stop consuming further chunks.
    Done,
    /// A line carrying nothing for the transcript (comment, blank,
    /// unrecognized shape, or a delta with no content).
    Skip,
    /// A `data:` payload that failed structural parsing -- most likely a
    /// chunk boundary split the payload despite a terminator being present.
    /// The caller restores the line to the framer; if it never completes by
    /// stream end it is silently dropped.
    Incomplete,
}

/// Delta record carried by a `data:` payload.
///
/// Lenient on purpose: absent fields decode to defaults so that unrelated
/// record shapes classify as [`Decoded::Skip`], not parse failures. Only
/// JSON that fails to parse at all is treated as incomplete.
#[derive(Debug, Default, Deserialize)]
struct DeltaRecord {
    #[serde(default)]
    choices: Vec<DeltaChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct DeltaChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Decode one framed line into a [`Decoded`] outcome.
///
/// Rules, in order:
///
/// 1. Empty lines and `:`-prefixed comments are skipped.
/// 2. Lines without the `data: ` prefix are skipped.
/// 3. A payload equal to `[DONE]` terminates the reply.
/// 4. Otherwise the payload must parse as a delta record; the fragment is
///    read from `choices[0].delta.content`. Parse failure reports
///    [`Decoded::Incomplete`].
/// 5. A record without a non-empty fragment is skipped.
pub fn decode_line(line: &str) -> Decoded {
    if line.starts_with(':') || line.trim().is_empty() {
        return Decoded::Skip;
    }

    let Some(rest) = line.strip_prefix(DATA_PREFIX) else {
        return Decoded::Skip;
    };

    let payload = rest.trim();
    if payload == TERMINATOR {
        return Decoded::Done;
    }

    // Parseability of the JSON text decides incomplete vs. skip: a payload
    // truncated by a chunk boundary fails here, while a well-formed record
    // of an unrelated shape falls through to the skip arm below.
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("delta payload not yet parseable ({}); re-buffering", e);
            return Decoded::Incomplete;
        }
    };

    let record = DeltaRecord::deserialize(value).unwrap_or_default();

    match record
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => Decoded::Fragment(content),
        _ => Decoded::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_line_is_skipped() {
        assert_eq!(decode_line(""), Decoded::Skip);
        assert_eq!(decode_line("   "), Decoded::Skip);
    }

    #[test]
    fn test_comment_line_is_skipped() {
        assert_eq!(decode_line(": keep-alive"), Decoded::Skip);
        assert_eq!(decode_line(":"), Decoded::Skip);
    }

    #[test]
    fn test_non_data_line_is_skipped() {
        assert_eq!(decode_line("event: message"), Decoded::Skip);
        assert_eq!(decode_line("id: 42"), Decoded::Skip);
        assert_eq!(decode_line("retry: 1000"), Decoded::Skip);
    }

    #[test]
    fn test_terminator() {
        assert_eq!(decode_line("data: [DONE]"), Decoded::Done);
        // Payload is trimmed before comparison.
        assert_eq!(decode_line("data:  [DONE] "), Decoded::Done);
    }

    #[test]
    fn test_fragment_extracted_from_first_choice() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        assert_eq!(decode_line(line), Decoded::Fragment("Hi".to_string()));
    }

    #[test]
    fn test_fragment_preserves_leading_whitespace() {
        let line = r#"data: {"choices":[{"delta":{"content":" there!"}}]}"#;
        assert_eq!(decode_line(line), Decoded::Fragment(" there!".to_string()));
    }

    #[test]
    fn test_record_without_content_is_skipped() {
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{}}]}"#),
            Decoded::Skip
        );
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            Decoded::Skip
        );
        assert_eq!(decode_line(r#"data: {"choices":[]}"#), Decoded::Skip);
        assert_eq!(decode_line(r#"data: {"id":"cmpl-1"}"#), Decoded::Skip);
    }

    #[test]
    fn test_truncated_payload_reports_incomplete() {
        assert_eq!(decode_line(r#"data: {"choices""#), Decoded::Incomplete);
        assert_eq!(
            decode_line(r#"data: {"choices":[{"delta":{"content":"X"#),
            Decoded::Incomplete
        );
    }

    #[test]
    fn test_restored_line_decodes_once_completed() {
        // Simulates the re-buffer cycle: the truncated line fails, then the
        // completed line decodes to exactly one fragment.
        let truncated = r#"data: {"choices""#;
        assert_eq!(decode_line(truncated), Decoded::Incomplete);

        let completed = r#"data: {"choices":[{"delta":{"content":"X"}}]}"#;
        assert_eq!(decode_line(completed), Decoded::Fragment("X".to_string()));
    }

    /// Well-formed JSON of an unrelated shape is skipped, never re-buffered.
    #[test]
    fn test_non_record_json_is_skipped() {
        assert_eq!(decode_line("data: null"), Decoded::Skip);
        assert_eq!(decode_line("data: 17"), Decoded::Skip);
        assert_eq!(decode_line("data: \"text\""), Decoded::Skip);
        assert_eq!(decode_line("data: [1,2]"), Decoded::Skip);
    }

    /// Decode is total: every line maps to exactly one outcome.
    #[test]
    fn test_decode_is_total_over_odd_inputs() {
        for line in ["data:", "data: ", "DATA: {\"choices\":[]}", "\u{0}"] {
            // No panic; outcome is one of the enum variants.
            let _ = decode_line(line);
        }
        // An empty payload is not parseable JSON yet: re-buffered.
        assert_eq!(decode_line("data: "), Decoded::Incomplete);
    }
}
