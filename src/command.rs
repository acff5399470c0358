//! Merge-request comment interpretation.
//!
//! Grammar: `sparrow <apply|diff> [-f <selector>]...`. Keywords match
//! case-insensitively; selectors keep their case since they name paths.
//! Anything that fails to parse is scored against known commands and common
//! mistakes; close enough matches become a "did you mean" suggestion, the rest
//! is ignored.

use thiserror::Error;
use tracing::debug;

use crate::event::Command;

const PREFIX: &str = "sparrow";

/// Minimum similarity (0-100) for a suggestion to be posted.
pub const SUGGESTION_THRESHOLD: u32 = 70;

const VALID_COMMANDS: [&str; 2] = ["sparrow apply", "sparrow diff"];

/// Phrasings operators reach for out of habit, with their canonical command.
const COMMAND_MISTAKES: [(&str, &str); 4] = [
    ("sparrow upgrade", "sparrow apply"),
    ("sparrow plan", "sparrow diff"),
    ("helm diff", "sparrow diff"),
    ("helm upgrade", "sparrow apply"),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("command must start with `sparrow`")]
    MissingPrefix,

    #[error("unbalanced quoting in command")]
    Tokenize,

    #[error("missing subcommand (expected `apply` or `diff`)")]
    MissingSubcommand,

    #[error("unknown subcommand `{0}` (expected `apply` or `diff`)")]
    UnknownSubcommand(String),

    #[error("option `{0}` expects a value")]
    MissingValue(String),

    #[error("unrecognized argument `{0}`")]
    UnexpectedArgument(String),
}

/// Turn raw comment text into a `Command`. Never fails: unparseable text is
/// either a suggestion or `Command::None`.
pub fn interpret(text: &str) -> Command {
    let trimmed = text.trim();

    match parse(trimmed) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, "comment is not a sparrow command");
            match suggest(&trimmed.to_lowercase()) {
                Some(text) => Command::Suggestion { text },
                None => Command::None,
            }
        }
    }
}

/// Strict parse of trimmed comment text.
pub fn parse(text: &str) -> Result<Command, CommandParseError> {
    if !text.to_lowercase().starts_with(PREFIX) {
        return Err(CommandParseError::MissingPrefix);
    }

    let tokens = shlex::split(text).ok_or(CommandParseError::Tokenize)?;
    let mut tokens = tokens.into_iter();

    match tokens.next() {
        Some(first) if first.eq_ignore_ascii_case(PREFIX) => {}
        _ => return Err(CommandParseError::MissingPrefix),
    }

    let subcommand = tokens
        .next()
        .ok_or(CommandParseError::MissingSubcommand)?
        .to_lowercase();

    let mut targets = Vec::new();
    while let Some(token) = tokens.next() {
        if token == "-f" || token.eq_ignore_ascii_case("--file") {
            let value = tokens
                .next()
                .ok_or_else(|| CommandParseError::MissingValue(token.clone()))?;
            targets.push(value);
        } else if let Some(value) = token
            .get(..7)
            .filter(|flag| flag.eq_ignore_ascii_case("--file="))
            .map(|_| &token[7..])
        {
            if value.is_empty() {
                return Err(CommandParseError::MissingValue("--file".to_string()));
            }
            targets.push(value.to_string());
        } else if let Some(value) = token.strip_prefix("-f").filter(|v| !v.is_empty()) {
            targets.push(value.to_string());
        } else {
            return Err(CommandParseError::UnexpectedArgument(token));
        }
    }

    match subcommand.as_str() {
        "apply" => Ok(Command::Apply { targets }),
        "diff" => Ok(Command::Diff { targets }),
        other => Err(CommandParseError::UnknownSubcommand(other.to_string())),
    }
}

/// Closest known command for `text`, rendered as a "did you mean" message.
pub fn suggest(text: &str) -> Option<String> {
    let candidates = VALID_COMMANDS
        .iter()
        .copied()
        .chain(COMMAND_MISTAKES.iter().map(|(mistake, _)| *mistake));

    let mut best: Option<(&str, u32)> = None;
    for candidate in candidates {
        let score = similarity(text, candidate);
        // Strict comparison keeps the first candidate on ties.
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }

    let (closest, score) = best?;
    debug!(input = text, closest, score, "closest command suggestion");
    if score < SUGGESTION_THRESHOLD {
        return None;
    }

    let canonical = COMMAND_MISTAKES
        .iter()
        .find(|(mistake, _)| *mistake == closest)
        .map_or(closest, |(_, canonical)| *canonical);

    Some(format!(
        "`{text}` is not a recognized command. Did you mean `{canonical}`?"
    ))
}

/// Indel similarity in `0..=100`: twice the longest common subsequence over
/// the combined length, so extra trailing words cost less than edits do.
pub fn similarity(a: &str, b: &str) -> u32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100;
    }
    let lcs = longest_common_subsequence(&a, &b);
    ((200 * lcs) as f64 / total as f64).round() as u32
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    let mut previous = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            current[j + 1] = if x == y {
                previous[j] + 1
            } else {
                current[j].max(previous[j + 1])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_with_single_target() {
        assert_eq!(
            interpret("sparrow apply -f chartA"),
            Command::Apply {
                targets: vec!["chartA".to_string()]
            }
        );
    }

    #[test]
    fn apply_keeps_target_order() {
        let cmd = interpret("  Sparrow APPLY -f charts/api@dev --file=charts/web -fcharts/db  ");
        assert_eq!(
            cmd,
            Command::Apply {
                targets: vec![
                    "charts/api@dev".to_string(),
                    "charts/web".to_string(),
                    "charts/db".to_string(),
                ]
            }
        );
    }

    #[test]
    fn diff_without_targets() {
        assert_eq!(interpret("sparrow diff"), Command::Diff { targets: vec![] });
    }

    #[test]
    fn plan_suggests_diff() {
        match interpret("sparrow plan") {
            Command::Suggestion { text } => {
                assert!(text.contains("`sparrow plan`"));
                assert!(text.contains("Did you mean `sparrow diff`?"));
            }
            other => panic!("expected suggestion, got {other:?}"),
        }
    }

    #[test]
    fn helm_upgrade_suggests_apply() {
        match interpret("helm upgrade") {
            Command::Suggestion { text } => assert!(text.ends_with("`sparrow apply`?")),
            other => panic!("expected suggestion, got {other:?}"),
        }
    }

    #[test]
    fn typo_suggests_closest_valid_command() {
        match interpret("sparow apply") {
            Command::Suggestion { text } => assert!(text.ends_with("`sparrow apply`?")),
            other => panic!("expected suggestion, got {other:?}"),
        }
    }

    #[test]
    fn unrelated_prose_is_ignored() {
        assert_eq!(interpret("looks like rain today"), Command::None);
        assert_eq!(interpret("LGTM, thanks!"), Command::None);
    }

    #[test]
    fn parse_rejects_missing_value() {
        assert_eq!(
            parse("sparrow apply -f"),
            Err(CommandParseError::MissingValue("-f".to_string()))
        );
    }

    #[test]
    fn parse_rejects_unbalanced_quotes() {
        assert_eq!(
            parse("sparrow apply -f \"charts/api"),
            Err(CommandParseError::Tokenize)
        );
    }

    #[test]
    fn parse_rejects_unknown_flag() {
        assert_eq!(
            parse("sparrow diff --all"),
            Err(CommandParseError::UnexpectedArgument("--all".to_string()))
        );
    }

    #[test]
    fn parse_requires_prefix() {
        assert_eq!(parse("please sparrow diff"), Err(CommandParseError::MissingPrefix));
        assert_eq!(parse("sparrowdiff"), Err(CommandParseError::MissingPrefix));
    }

    #[test]
    fn trailing_words_still_get_a_suggestion() {
        assert_eq!(similarity("sparrow apply charts/api", "sparrow apply"), 70);
        assert_eq!(similarity("sparrow apply please", "sparrow apply"), 79);

        for text in ["sparrow apply charts/api", "sparrow apply please"] {
            match interpret(text) {
                Command::Suggestion { text } => assert!(text.ends_with("`sparrow apply`?")),
                other => panic!("expected suggestion for {text:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn similarity_is_symmetric_indel_ratio() {
        assert_eq!(similarity("", ""), 100);
        assert_eq!(similarity("abc", ""), 0);
        assert_eq!(similarity("sparrow diff", "sparow diff"), similarity("sparow diff", "sparrow diff"));
        assert_eq!(similarity("sparrow diff", "sparow diff"), 96);
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(similarity("sparrow diff", "sparrow diff"), 100);
        assert!(similarity("looks like rain today", "sparrow diff") < SUGGESTION_THRESHOLD);
    }
}
