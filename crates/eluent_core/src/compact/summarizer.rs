//! Tiered description and comment summarization.
//!
//! # Responsibility
//! - Produce tier-1/tier-2 description summaries with fixed targets.
//! - Digest a comment thread into one synthetic summary body.
//!
//! # Invariants
//! - Tier 1 output is at most 500 chars; tier 2 at most 100.
//! - Summaries are derived purely from historical content; no clock reads.

use crate::model::comment::Comment;
use std::collections::BTreeSet;

/// Tier-1 description target.
pub const TIER1_DESCRIPTION_LIMIT: usize = 500;
/// Tier-2 description target.
pub const TIER2_DESCRIPTION_LIMIT: usize = 100;

const HIGHLIGHT_CHARS: usize = 80;
const MIDDLE_HIGHLIGHT_LIMIT: usize = 2;
const KEY_PHRASES: [&str; 5] = ["resolved", "fixed", "decided", "concluded", "agreed"];

/// Summarizes a description for the requested tier.
///
/// Tier 1 cuts at the last sentence boundary inside the second half of the
/// 500-char window, falling back to a hard cut with an ellipsis. Tier 2
/// keeps the first sentence of the first line, capped at 100 chars.
pub fn summarize_description(description: &str, tier: u32) -> String {
    match tier {
        1 => summarize_tier1(description),
        _ => summarize_tier2(description),
    }
}

fn summarize_tier1(description: &str) -> String {
    let chars: Vec<char> = description.chars().collect();
    if chars.len() <= TIER1_DESCRIPTION_LIMIT {
        return description.to_string();
    }

    let window: String = chars[..TIER1_DESCRIPTION_LIMIT].iter().collect();
    let half = TIER1_DESCRIPTION_LIMIT / 2;
    if let Some(boundary) = last_sentence_boundary(&window) {
        if boundary + 1 > half {
            return window.chars().take(boundary + 1).collect();
        }
    }

    let mut cut: String = chars[..TIER1_DESCRIPTION_LIMIT - 1].iter().collect();
    cut.push('…');
    cut
}

fn summarize_tier2(description: &str) -> String {
    let first_line = description.lines().next().unwrap_or("");
    let sentence = match first_sentence_boundary(first_line) {
        Some(boundary) => first_line.chars().take(boundary + 1).collect::<String>(),
        None => first_line.to_string(),
    };

    let count = sentence.chars().count();
    if count <= TIER2_DESCRIPTION_LIMIT {
        return sentence.trim_end().to_string();
    }
    let mut cut: String = sentence
        .chars()
        .take(TIER2_DESCRIPTION_LIMIT - 1)
        .collect();
    cut.push('…');
    cut
}

/// Char index of the last `.`/`!`/`?` in `text`, if any.
fn last_sentence_boundary(text: &str) -> Option<usize> {
    text.chars()
        .enumerate()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(index, _)| index)
        .last()
}

/// Char index of the first `.`/`!`/`?` in `text`, if any.
fn first_sentence_boundary(text: &str) -> Option<usize> {
    text.chars()
        .enumerate()
        .find(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(index, _)| index)
}

/// Digests a comment thread: count, distinct authors, date range, and up
/// to four highlights. Returns `None` for an empty thread.
pub fn summarize_comments(comments: &[Comment]) -> Option<String> {
    if comments.is_empty() {
        return None;
    }

    let mut ordered: Vec<&Comment> = comments.iter().collect();
    ordered.sort_by_key(|comment| comment.created_at);

    let authors: BTreeSet<&str> = ordered
        .iter()
        .map(|comment| comment.author.as_str())
        .collect();
    let first_date = ordered[0].created_at.format("%Y-%m-%d").to_string();
    let last_date = ordered[ordered.len() - 1]
        .created_at
        .format("%Y-%m-%d")
        .to_string();
    let range = if first_date == last_date {
        first_date
    } else {
        format!("{first_date} to {last_date}")
    };

    let mut lines = vec![format!(
        "{} comments by {} authors ({range})",
        ordered.len(),
        authors.len()
    )];

    let mut highlights: Vec<&Comment> = vec![ordered[0]];
    if ordered.len() > 1 {
        let middle = &ordered[1..ordered.len() - 1];
        highlights.extend(
            middle
                .iter()
                .copied()
                .filter(|comment| contains_key_phrase(&comment.content))
                .take(MIDDLE_HIGHLIGHT_LIMIT),
        );
        let last = ordered[ordered.len() - 1];
        if last.created_at != ordered[0].created_at {
            highlights.push(last);
        }
    }

    for comment in highlights {
        lines.push(highlight_line(comment));
    }
    Some(lines.join("\n"))
}

fn contains_key_phrase(content: &str) -> bool {
    let lowered = content.to_lowercase();
    KEY_PHRASES.iter().any(|phrase| lowered.contains(phrase))
}

fn highlight_line(comment: &Comment) -> String {
    let line = format!("{}: {}", comment.author, comment.content.replace('\n', " "));
    if line.chars().count() <= HIGHLIGHT_CHARS {
        return line;
    }
    let mut cut: String = line.chars().take(HIGHLIGHT_CHARS - 1).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
mod tests {
    use super::{
        summarize_comments, summarize_description, TIER1_DESCRIPTION_LIMIT,
        TIER2_DESCRIPTION_LIMIT,
    };
    use crate::model::comment::Comment;
    use chrono::{Duration, Utc};

    fn comment(index: u32, author: &str, content: &str, minutes: i64) -> Comment {
        let mut comment = Comment::new(
            format!("proj-01JBZTMQ1RABCDEFGHKMNPQRST-c{index}"),
            "proj-01JBZTMQ1RABCDEFGHKMNPQRST",
            author,
            content,
        );
        comment.created_at = Utc::now() + Duration::minutes(minutes);
        comment.updated_at = comment.created_at;
        comment
    }

    #[test]
    fn tier1_keeps_short_descriptions_unchanged() {
        assert_eq!(summarize_description("short body.", 1), "short body.");
    }

    #[test]
    fn tier1_cuts_at_late_sentence_boundary() {
        let sentence = "This sentence is repeated to grow the body. ";
        let long = sentence.repeat(20);
        let summary = summarize_description(&long, 1);
        assert!(summary.chars().count() <= TIER1_DESCRIPTION_LIMIT);
        assert!(summary.ends_with('.'));
        assert!(summary.chars().count() > TIER1_DESCRIPTION_LIMIT / 2);
    }

    #[test]
    fn tier1_hard_cuts_when_no_boundary_exists() {
        let long = "x".repeat(700);
        let summary = summarize_description(&long, 1);
        assert_eq!(summary.chars().count(), TIER1_DESCRIPTION_LIMIT);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn tier2_keeps_first_sentence_of_first_line() {
        let body = "Fix the cache race. Then add tests.\nSecond line ignored.";
        assert_eq!(summarize_description(body, 2), "Fix the cache race.");
    }

    #[test]
    fn tier2_hard_cuts_overlong_sentences() {
        let body = "y".repeat(300);
        let summary = summarize_description(&body, 2);
        assert_eq!(summary.chars().count(), TIER2_DESCRIPTION_LIMIT);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn comment_digest_reports_counts_range_and_highlights() {
        let comments = vec![
            comment(1, "alice", "opening question", 0),
            comment(2, "bob", "we decided to ship the fallback", 10),
            comment(3, "carol", "irrelevant chatter", 20),
            comment(4, "alice", "fixed in the follow-up commit", 30),
            comment(5, "bob", "closing note", 40),
        ];

        let digest = summarize_comments(&comments).expect("digest should exist");
        let mut lines = digest.lines();
        let header = lines.next().expect("header line");
        assert!(header.starts_with("5 comments by 3 authors ("));

        let rest: Vec<&str> = lines.collect();
        assert_eq!(rest.len(), 4);
        assert!(rest[0].starts_with("alice: opening question"));
        assert!(rest[1].contains("decided"));
        assert!(rest[2].contains("fixed"));
        assert!(rest[3].starts_with("bob: closing note"));
    }

    #[test]
    fn comment_digest_truncates_highlights_to_80_chars() {
        let long = comment(1, "alice", &"z".repeat(200), 0);
        let digest = summarize_comments(&[long]).expect("digest should exist");
        let highlight = digest.lines().nth(1).expect("highlight line");
        assert_eq!(highlight.chars().count(), 80);
        assert!(highlight.ends_with('…'));
    }

    #[test]
    fn empty_thread_has_no_digest() {
        assert!(summarize_comments(&[]).is_none());
    }
}
