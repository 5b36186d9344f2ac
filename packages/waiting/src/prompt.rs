//! ANSI stripping and high-confidence prompt matching.
//!
//! Only signatures that reliably mean "the program is asking the user
//! something" are matched. Bare trailing `:`, `>` or `?` are not: they show up
//! in timestamps, `file:line` references, progress counters and REPL echoes.

use once_cell::sync::Lazy;
use regex::Regex;

/// CSI (with `?`, `>`, `=`, `<` private-mode prefixes), OSC terminated by BEL
/// or ST, charset selection, then any remaining two-byte escape.
///
/// Alternation is leftmost-first, so the bare-escape branch only sees what the
/// longer forms did not claim.
static ANSI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"\x1b\[[?>=<]?[0-9;:]*[ -/]*[@-~]",
        r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
        r"|\x1b[()*+][0-9A-Za-z]",
        r"|\x1b[0-~]",
    ))
    .expect("ANSI pattern is valid")
});

static PROMPT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?i)",
        // [Y/n], [y/N], (y/n), [yes/no], (yes/no)
        r"[\[(]\s*(?:y|yes)\s*/\s*(?:n|no)\s*[\])]",
        // password prompts: "Password:", "Enter password"
        r"|\bpassword\s*:?\s*$",
        // interactive menus: selector arrow in front of an option, radio/checkbox glyphs
        r"|^[❯›▸▶]\s*\S",
        r"|[◯◉◎☐☑☒]",
        // explicit confirmation phrasing
        r"|\bdo you want to\b",
        r"|\bwould you like\b",
        r"|\b(?:press|hit)\s+(?:enter|return)\b",
        r"|\b(?:confirm|approve|proceed|continue|overwrite)\s*\?",
        // default-value prompts: "Name (default: foo):"
        r"|[(\[]default\b[^)\]]*[)\]]\s*[:?]?\s*$",
        // bare shell prompt
        r"|^[$#>]$",
    ))
    .expect("prompt pattern is valid")
});

/// Remove escape sequences, leaving only the visible text.
pub fn strip_ansi(text: &str) -> String {
    ANSI_PATTERN.replace_all(text, "").into_owned()
}

/// Whether `line` looks like a program waiting for an answer.
pub fn matches_prompt(line: &str) -> bool {
    let cleaned = strip_ansi(line);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return false;
    }
    PROMPT_PATTERN.is_match(cleaned)
}
