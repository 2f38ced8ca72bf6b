//! # Line Diff
//!
//! A longest-common-subsequence diff over lines, used to summarize and show
//! the difference between an existing file and the content about to replace it.

use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

#[derive(Debug, Clone, Copy)]
struct Edit {
    op: Op,
    old: usize,
    new: usize,
}

/// The edit script turning `old` into `new`.
#[derive(Debug)]
pub struct LineDiff<'a> {
    old: Vec<&'a str>,
    new: Vec<&'a str>,
    edits: Vec<Edit>,
}

impl<'a> LineDiff<'a> {
    pub fn new(old: &'a str, new: &'a str) -> Self {
        let old: Vec<&str> = old.lines().collect();
        let new: Vec<&str> = new.lines().collect();
        let edits = edit_script(&old, &new);
        Self { old, new, edits }
    }

    pub fn added(&self) -> usize {
        self.edits.iter().filter(|e| e.op == Op::Insert).count()
    }

    pub fn removed(&self) -> usize {
        self.edits.iter().filter(|e| e.op == Op::Delete).count()
    }

    pub fn is_empty(&self) -> bool {
        self.edits.iter().all(|e| e.op == Op::Equal)
    }

    /// A one-line summary such as `3 lines added, 1 line removed`.
    pub fn summary(&self) -> String {
        let plural = |n: usize| if n == 1 { "" } else { "s" };
        let (added, removed) = (self.added(), self.removed());
        format!(
            "{added} line{} added, {removed} line{} removed",
            plural(added),
            plural(removed)
        )
    }

    /// Groups the edit script into hunks of changes with `context` lines around them.
    fn hunks(&self, context: usize) -> Vec<&[Edit]> {
        let changes: Vec<usize> = self
            .edits
            .iter()
            .enumerate()
            .filter(|(_, e)| e.op != Op::Equal)
            .map(|(i, _)| i)
            .collect();

        let mut ranges: Vec<(usize, usize)> = Vec::new();
        for index in changes {
            let start = index.saturating_sub(context);
            let end = (index + context + 1).min(self.edits.len());
            match ranges.last_mut() {
                Some(last) if start <= last.1 => last.1 = end,
                _ => ranges.push((start, end)),
            }
        }
        ranges
            .into_iter()
            .filter_map(|(start, end)| self.edits.get(start..end))
            .collect()
    }

    /// A unified diff (`diff -u` style).
    pub fn unified(&self, old_name: &str, new_name: &str, context: usize) -> String {
        let mut out = String::new();
        if self.is_empty() {
            return out;
        }
        let _ = writeln!(out, "--- {old_name}");
        let _ = writeln!(out, "+++ {new_name}");

        for hunk in self.hunks(context) {
            let (old_start, old_len) = self.span(hunk, |e| e.op != Op::Insert, |e| e.old);
            let (new_start, new_len) = self.span(hunk, |e| e.op != Op::Delete, |e| e.new);
            let _ = writeln!(
                out,
                "@@ -{} +{} @@",
                unified_range(old_start, old_len),
                unified_range(new_start, new_len)
            );
            for edit in hunk {
                let (marker, line) = match edit.op {
                    Op::Equal => (' ', self.old.get(edit.old)),
                    Op::Delete => ('-', self.old.get(edit.old)),
                    Op::Insert => ('+', self.new.get(edit.new)),
                };
                let _ = writeln!(out, "{marker}{}", line.copied().unwrap_or_default());
            }
        }
        out
    }

    /// A context diff (`diff -c` style).
    pub fn context(&self, old_name: &str, new_name: &str, context: usize) -> String {
        let mut out = String::new();
        if self.is_empty() {
            return out;
        }
        let _ = writeln!(out, "*** {old_name}");
        let _ = writeln!(out, "--- {new_name}");

        for hunk in self.hunks(context) {
            let changed = changed_blocks(hunk);
            let _ = writeln!(out, "***************");

            let (old_start, old_len) = self.span(hunk, |e| e.op != Op::Insert, |e| e.old);
            let _ = writeln!(out, "*** {} ****", context_range(old_start, old_len));
            if hunk.iter().any(|e| e.op == Op::Delete) {
                for (i, edit) in hunk.iter().enumerate() {
                    let marker = match edit.op {
                        Op::Insert => continue,
                        Op::Equal => "  ",
                        Op::Delete if changed.get(i).copied().unwrap_or(false) => "! ",
                        Op::Delete => "- ",
                    };
                    let line = self.old.get(edit.old).copied().unwrap_or_default();
                    let _ = writeln!(out, "{marker}{line}");
                }
            }

            let (new_start, new_len) = self.span(hunk, |e| e.op != Op::Delete, |e| e.new);
            let _ = writeln!(out, "--- {} ----", context_range(new_start, new_len));
            if hunk.iter().any(|e| e.op == Op::Insert) {
                for (i, edit) in hunk.iter().enumerate() {
                    let marker = match edit.op {
                        Op::Delete => continue,
                        Op::Equal => "  ",
                        Op::Insert if changed.get(i).copied().unwrap_or(false) => "! ",
                        Op::Insert => "+ ",
                    };
                    let line = self.new.get(edit.new).copied().unwrap_or_default();
                    let _ = writeln!(out, "{marker}{line}");
                }
            }
        }
        out
    }

    /// First line (0-based) and length of one side of a hunk.
    fn span(
        &self,
        hunk: &[Edit],
        on_side: impl Fn(&Edit) -> bool,
        index: impl Fn(&Edit) -> usize,
    ) -> (usize, usize) {
        let len = hunk.iter().filter(|e| on_side(e)).count();
        let start = hunk
            .iter()
            .find(|e| on_side(e))
            .map(&index)
            .or_else(|| hunk.first().map(&index))
            .unwrap_or(0);
        (start, len)
    }
}

/// Marks the edits that belong to a block containing both deletions and insertions.
fn changed_blocks(hunk: &[Edit]) -> Vec<bool> {
    let mut marks = vec![false; hunk.len()];
    let mut i = 0;
    while i < hunk.len() {
        if hunk.get(i).is_some_and(|e| e.op == Op::Equal) {
            i += 1;
            continue;
        }
        let start = i;
        while hunk.get(i).is_some_and(|e| e.op != Op::Equal) {
            i += 1;
        }
        let block = hunk.get(start..i).unwrap_or_default();
        let mixed = block.iter().any(|e| e.op == Op::Delete) && block.iter().any(|e| e.op == Op::Insert);
        if mixed {
            for mark in marks.iter_mut().take(i).skip(start) {
                *mark = true;
            }
        }
    }
    marks
}

fn unified_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        n => format!("{},{}", start + 1, n),
    }
}

fn context_range(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start}"),
        1 => format!("{}", start + 1),
        n => format!("{},{}", start + 1, start + n),
    }
}

fn edit_script(old: &[&str], new: &[&str]) -> Vec<Edit> {
    // Common prefix and suffix never need the quadratic table.
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old
        .iter()
        .rev()
        .zip(new.iter().rev())
        .take(old.len().min(new.len()) - prefix)
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = old.get(prefix..old.len() - suffix).unwrap_or_default();
    let new_mid = new.get(prefix..new.len() - suffix).unwrap_or_default();
    let (n, m) = (old_mid.len(), new_mid.len());

    // lcs[i][j] = length of the LCS of old_mid[i..] and new_mid[j..].
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            let value = if old_mid.get(i) == new_mid.get(j) {
                lcs.get(i + 1).and_then(|row| row.get(j + 1)).copied().unwrap_or(0) + 1
            } else {
                let down = lcs.get(i + 1).and_then(|row| row.get(j)).copied().unwrap_or(0);
                let right = lcs.get(i).and_then(|row| row.get(j + 1)).copied().unwrap_or(0);
                down.max(right)
            };
            if let Some(cell) = lcs.get_mut(i).and_then(|row| row.get_mut(j)) {
                *cell = value;
            }
        }
    }
    let at = |i: usize, j: usize| lcs.get(i).and_then(|row| row.get(j)).copied().unwrap_or(0);

    let mut edits: Vec<Edit> = (0..prefix)
        .map(|k| Edit {
            op: Op::Equal,
            old: k,
            new: k,
        })
        .collect();

    let (mut i, mut j) = (0, 0);
    while i < n || j < m {
        if i < n && j < m && old_mid.get(i) == new_mid.get(j) {
            edits.push(Edit {
                op: Op::Equal,
                old: prefix + i,
                new: prefix + j,
            });
            i += 1;
            j += 1;
        } else if j >= m || (i < n && at(i + 1, j) >= at(i, j + 1)) {
            edits.push(Edit {
                op: Op::Delete,
                old: prefix + i,
                new: prefix + j,
            });
            i += 1;
        } else {
            edits.push(Edit {
                op: Op::Insert,
                old: prefix + i,
                new: prefix + j,
            });
            j += 1;
        }
    }

    for k in 0..suffix {
        edits.push(Edit {
            op: Op::Equal,
            old: old.len() - suffix + k,
            new: new.len() - suffix + k,
        });
    }
    edits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_have_no_changes() {
        let diff = LineDiff::new("a\nb\n", "a\nb\n");
        assert!(diff.is_empty());
        assert_eq!(diff.unified("old", "new", 3), "");
    }

    #[test]
    fn test_counts_and_summary() {
        let diff = LineDiff::new("a\nb\nc\n", "a\nB\nc\nd\n");
        assert_eq!(diff.added(), 2);
        assert_eq!(diff.removed(), 1);
        assert_eq!(diff.summary(), "2 lines added, 1 line removed");
    }

    #[test]
    fn test_unified_output() {
        let diff = LineDiff::new("one\ntwo\nthree\n", "one\n2\nthree\n");
        let expected = "\
--- old
+++ new
@@ -1,3 +1,3 @@
 one
-two
+2
 three
";
        assert_eq!(diff.unified("old", "new", 3), expected);
    }

    #[test]
    fn test_context_output_marks_replacements() {
        let diff = LineDiff::new("one\ntwo\nthree\n", "one\n2\nthree\n");
        let expected = "\
*** old
--- new
***************
*** 1,3 ****
  one
! two
  three
--- 1,3 ----
  one
! 2
  three
";
        assert_eq!(diff.context("old", "new", 3), expected);
    }

    #[test]
    fn test_distant_changes_make_separate_hunks() {
        let old: String = (1..=20).map(|i| format!("{i}\n")).collect();
        let new: String = (1..=20)
            .map(|i| match i {
                2 => "two\n".to_string(),
                19 => "nineteen\n".to_string(),
                other => format!("{other}\n"),
            })
            .collect();
        let diff = LineDiff::new(&old, &new);
        assert_eq!(diff.unified("a", "b", 1).matches("@@ -").count(), 2);
    }
}
