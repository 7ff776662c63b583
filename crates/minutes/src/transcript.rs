//! Transcript text helpers: WebVTT flattening and input bounding.

/// Flatten a WebVTT transcript into `Speaker: text` lines.
///
/// Header, NOTE and STYLE blocks and cue timings are dropped; consecutive cues
/// from the same speaker are joined into one line. Input that is not WebVTT
/// (no cue timings at all) is returned trimmed and otherwise untouched.
pub fn vtt_to_text(vtt: &str) -> String {
    let normalized = vtt.replace("\r\n", "\n");
    let mut lines: Vec<(Option<String>, String)> = Vec::new();
    let mut saw_cue = false;

    for block in normalized.split("\n\n") {
        let mut block_lines = block.lines();
        if !block_lines.any(|l| l.contains("-->")) {
            continue;
        }
        saw_cue = true;

        // Everything after the timing line is payload.
        for raw in block_lines {
            let (speaker, text) = parse_cue_text(raw);
            if text.is_empty() {
                continue;
            }
            match lines.last_mut() {
                Some((last_speaker, last_text)) if *last_speaker == speaker => {
                    last_text.push(' ');
                    last_text.push_str(&text);
                }
                _ => lines.push((speaker, text)),
            }
        }
    }

    if !saw_cue {
        return vtt.trim().to_string();
    }

    lines
        .into_iter()
        .map(|(speaker, text)| match speaker {
            Some(s) => format!("{s}: {text}"),
            None => text,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_cue_text(raw: &str) -> (Option<String>, String) {
    let line = raw.trim();
    let speaker = line
        .strip_prefix("<v ")
        .and_then(|rest| rest.split_once('>'))
        .map(|(name, _)| name.trim().to_string())
        .filter(|name| !name.is_empty());

    (speaker, strip_tags(line).trim().to_string())
}

fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// Bound `text` to at most `max_chars` characters (not bytes).
///
/// Returns the bounded slice and whether anything was cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = "WEBVTT\n\nNOTE recorded by the meeting service\n\n\
        0f1c/12-0\n00:00:01.000 --> 00:00:03.000\n<v Alice Smith>Morning all.</v>\n\n\
        0f1c/13-0\n00:00:03.500 --> 00:00:06.000\n<v Alice Smith>Let's start with the release.</v>\n\n\
        0f1c/14-0\n00:00:06.500 --> 00:00:09.000\n<v Bob>It ships Friday.</v>\n";

    #[test]
    fn flattens_cues_and_merges_speakers() {
        let text = vtt_to_text(SAMPLE);
        assert_eq!(
            text,
            "Alice Smith: Morning all. Let's start with the release.\nBob: It ships Friday."
        );
    }

    #[test]
    fn non_vtt_input_passes_through() {
        assert_eq!(vtt_to_text("  plain notes \n"), "plain notes");
    }

    #[test]
    fn cue_without_voice_tag_has_no_speaker() {
        let text = vtt_to_text("WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nhello <b>there</b>\n");
        assert_eq!(text, "hello there");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let (cut, truncated) = truncate_chars("héllo wörld", 4);
        assert_eq!(cut, "héll");
        assert!(truncated);

        let (whole, truncated) = truncate_chars("short", 100);
        assert_eq!(whole, "short");
        assert!(!truncated);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// The cut is always a prefix of at most `max` chars, and flagged
        /// exactly when something was dropped.
        #[test]
        fn truncation_is_a_bounded_prefix(text in "\\PC{0,200}", max in 0usize..250) {
            let (cut, truncated) = truncate_chars(&text, max);
            let total = text.chars().count();
            prop_assert!(text.starts_with(cut));
            prop_assert_eq!(cut.chars().count(), total.min(max));
            prop_assert_eq!(truncated, total > max);
        }
    }
}
