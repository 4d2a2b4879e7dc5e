//! Line-level preview of a proposed file revision.
//!
//! Lines are aligned with `similar`'s Myers diff, so unchanged lines between
//! edits stay in place and only real insertions and deletions are reported.

use std::fmt;

use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Same(String),
    Added(String),
    Removed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDiff {
    pub lines: Vec<DiffLine>,
    pub added: usize,
    pub removed: usize,
}

impl ContentDiff {
    pub fn is_unchanged(&self) -> bool {
        self.added == 0 && self.removed == 0
    }

    /// `+N -M`
    pub fn summary(&self) -> String {
        format!("+{} -{}", self.added, self.removed)
    }
}

impl fmt::Display for ContentDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            match line {
                DiffLine::Same(text) => writeln!(f, "  {}", text)?,
                DiffLine::Added(text) => writeln!(f, "+ {}", text)?,
                DiffLine::Removed(text) => writeln!(f, "- {}", text)?,
            }
        }
        Ok(())
    }
}

/// Diff `before` against `after` line by line. Line terminators are not
/// part of the comparison.
pub fn diff_lines(before: &str, after: &str) -> ContentDiff {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    let text_diff = TextDiff::from_slices(&old, &new);

    let mut diff = ContentDiff::default();
    for change in text_diff.iter_all_changes() {
        let text = change.value().to_string();
        match change.tag() {
            ChangeTag::Equal => diff.lines.push(DiffLine::Same(text)),
            ChangeTag::Delete => {
                diff.removed += 1;
                diff.lines.push(DiffLine::Removed(text));
            }
            ChangeTag::Insert => {
                diff.added += 1;
                diff.lines.push(DiffLine::Added(text));
            }
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_middle_line() {
        let diff = diff_lines("a\nb\nc\n", "a\nB\nc\n");
        assert_eq!(
            diff.lines,
            vec![
                DiffLine::Same("a".into()),
                DiffLine::Removed("b".into()),
                DiffLine::Added("B".into()),
                DiffLine::Same("c".into()),
            ]
        );
        assert_eq!(diff.summary(), "+1 -1");
    }

    #[test]
    fn test_insert_and_delete() {
        let diff = diff_lines("a\nc", "a\nb\nc\nd");
        assert_eq!((diff.added, diff.removed), (2, 0));

        let diff = diff_lines("a\nb\nc", "c");
        assert_eq!((diff.added, diff.removed), (0, 2));
        assert_eq!(diff.lines.last(), Some(&DiffLine::Same("c".into())));
    }

    #[test]
    fn test_identical_and_empty() {
        assert!(diff_lines("x\ny", "x\ny").is_unchanged());
        let diff = diff_lines("", "new file\n");
        assert_eq!(diff.lines, vec![DiffLine::Added("new file".into())]);
    }

    #[test]
    fn test_large_revision_only_reports_touched_lines() {
        let before: String = (0..20_000).map(|i| format!("line {}\n", i)).collect();
        let after = before.replace("line 10000\n", "line ten thousand\n");
        let diff = diff_lines(&before, &after);
        assert_eq!(diff.summary(), "+1 -1");
        assert_eq!(diff.lines.len(), 20_001);
    }

    #[test]
    fn test_display_marks_lines() {
        let rendered = diff_lines("old", "new").to_string();
        assert_eq!(rendered, "- old\n+ new\n");
    }
}
