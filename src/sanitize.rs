//! Cleans model output into text that reads well aloud.
//!
//! Every pass only deletes characters, so running the passes until nothing
//! changes terminates and makes [`sanitize`] idempotent.

use std::sync::LazyLock;

use regex::Regex;

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]\n]*)\]\((?:[^()\n]|\([^()\n]*\))*\)").unwrap());
static EMPHASIS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*+|_{2,}").unwrap());
static HEADING_LEAD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#+[ \t]*").unwrap());
static HASH_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#{2,}").unwrap());
static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-+*•·][ \t]+").unwrap());
static NUMBERED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\d+(?:[.)）][ \t]+|、[ \t]*)").unwrap());
static STAGE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:（[^（）\n]*）|\([^()\n]*\)|\[[^\[\]\n]*\]|【[^【】\n]*】)[ \t]*$")
        .unwrap()
});
static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").unwrap());

/// Longest line prefix treated as a speaker label.
const MAX_LABEL_CHARS: usize = 12;

pub fn sanitize(raw: &str) -> String {
    let mut current = raw.to_string();
    loop {
        let next = sanitize_pass(&current);
        if next == current {
            return next;
        }
        current = next;
    }
}

fn sanitize_pass(text: &str) -> String {
    let text = text.replace("\r\n", "\n");
    let text = LINK_RE.replace_all(&text, "$1");
    // bullets before emphasis, or "* item" would lose only its star
    let text = BULLET_RE.replace_all(&text, "");
    let text = NUMBERED_RE.replace_all(&text, "");
    let text = EMPHASIS_RE.replace_all(&text, "");
    let text = HEADING_LEAD_RE.replace_all(&text, "");
    let text = HASH_RUN_RE.replace_all(&text, "");
    let text = STAGE_LINE_RE.replace_all(&text, "");
    let text = text
        .split('\n')
        .map(strip_label)
        .collect::<Vec<_>>()
        .join("\n");
    let text = BLANK_RUN_RE.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Drop a leading `label:` / `label：` such as "主持人：" or "Host:".
///
/// Clock times ("8:30") and URLs ("https://") are left alone. Leading
/// indentation is always dropped.
fn strip_label(line: &str) -> &str {
    let trimmed = line.trim_start();
    let Some((idx, colon)) = trimmed
        .char_indices()
        .take(MAX_LABEL_CHARS + 1)
        .find(|(_, c)| *c == ':' || *c == '：')
    else {
        return trimmed;
    };

    let label = &trimmed[..idx];
    let rest = &trimmed[idx + colon.len_utf8()..];

    if label.trim().is_empty()
        || label.trim().chars().all(|c| c.is_ascii_digit())
        || rest.starts_with("//")
    {
        return trimmed;
    }

    rest.trim_start()
}
