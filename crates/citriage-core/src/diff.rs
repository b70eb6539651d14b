//! Line classification for unified diffs.
//!
//! Hunk bodies are delimited by the line counts in their `@@` headers, so a
//! removed line reading `--- x` or an added line reading `+++ y` is content,
//! not a file header.

/// One line of a unified diff, classified by where it sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DiffLine<'a> {
    /// Any line outside a hunk body (`diff --git`, `---`, `+++`, `rename to`, prose).
    Header(&'a str),
    HunkStart,
    Added,
    Removed,
    Context,
}

#[derive(Debug, Default)]
struct HunkState {
    old_left: usize,
    new_left: usize,
}

impl HunkState {
    fn in_body(&self) -> bool {
        self.old_left > 0 || self.new_left > 0
    }

    fn next<'a>(&mut self, line: &'a str) -> DiffLine<'a> {
        if !self.in_body() {
            return match hunk_lengths(line) {
                Some((old, new)) => {
                    self.old_left = old;
                    self.new_left = new;
                    DiffLine::HunkStart
                }
                None => DiffLine::Header(line),
            };
        }
        match line.as_bytes().first() {
            Some(b'+') => {
                self.new_left = self.new_left.saturating_sub(1);
                DiffLine::Added
            }
            Some(b'-') => {
                self.old_left = self.old_left.saturating_sub(1);
                DiffLine::Removed
            }
            // "\ No newline at end of file"
            Some(b'\\') => DiffLine::Context,
            _ => {
                self.old_left = self.old_left.saturating_sub(1);
                self.new_left = self.new_left.saturating_sub(1);
                DiffLine::Context
            }
        }
    }
}

/// Classify every line of `patch`.
pub(crate) fn diff_lines(patch: &str) -> impl Iterator<Item = DiffLine<'_>> {
    let mut state = HunkState::default();
    patch.lines().map(move |line| state.next(line))
}

/// Old and new line counts of a `@@ -a[,b] +c[,d] @@` header.
///
/// A range without a count covers one line.
pub(crate) fn hunk_lengths(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;
    Some((range_len(old)?, range_len(new)?))
}

fn range_len(range: &str) -> Option<usize> {
    match range.split_once(',') {
        Some((start, len)) => {
            start.parse::<usize>().ok()?;
            len.parse().ok()
        }
        None => range.parse::<usize>().ok().map(|_| 1),
    }
}
