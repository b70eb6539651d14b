//! Unified-diff inspection helpers.

use sha2::{Digest, Sha256};

use crate::diff::{diff_lines, DiffLine};

const DEV_NULL: &str = "/dev/null";
const NAME_ONLY_HEADERS: &[&str] = &["rename from ", "rename to ", "copy from ", "copy to "];

/// Every path a unified diff creates, modifies, deletes, renames or copies,
/// in first-seen order without duplicates.
///
/// Paths come from `diff --git`, `---`/`+++` and rename/copy headers, with
/// git's quoting undone and one leading component stripped the way
/// `git apply` does. `/dev/null` is not reported. Lines inside hunk bodies
/// are never read as headers.
pub fn touched_files(patch: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in diff_lines(patch) {
        let DiffLine::Header(header) = line else {
            continue;
        };
        for file in header_paths(header) {
            if !file.is_empty() && !files.contains(&file) {
                files.push(file);
            }
        }
    }
    files
}

fn header_paths(line: &str) -> Vec<String> {
    if let Some(rest) = line.strip_prefix("diff --git ") {
        return git_header_names(rest)
            .iter()
            .filter_map(|name| strip_component(name))
            .collect();
    }
    if let Some(rest) = line
        .strip_prefix("--- ")
        .or_else(|| line.strip_prefix("+++ "))
    {
        return file_header_name(rest)
            .filter(|name| name != DEV_NULL)
            .and_then(|name| strip_component(&name))
            .into_iter()
            .collect();
    }
    NAME_ONLY_HEADERS
        .iter()
        .find_map(|prefix| line.strip_prefix(prefix))
        .and_then(name_token)
        .into_iter()
        .collect()
}

/// Both names of `diff --git a/X b/Y`, prefixes still attached.
fn git_header_names(rest: &str) -> Vec<String> {
    if rest.starts_with('"') {
        let Some((first, tail)) = unquote(rest) else {
            return Vec::new();
        };
        return std::iter::once(first)
            .chain(name_token(tail.trim_start()))
            .collect();
    }
    if let Some(idx) = rest.find(" \"") {
        return std::iter::once(rest[..idx].to_string())
            .chain(unquote(&rest[idx + 1..]).map(|(name, _)| name))
            .collect();
    }
    // Unquoted names may hold spaces; both sides are equal unless renamed.
    let mid = rest.len() / 2;
    if rest.len() % 2 == 1 && rest.as_bytes()[mid] == b' ' {
        let (old, new) = (&rest[..mid], &rest[mid + 1..]);
        if strip_component(old) == strip_component(new) {
            return vec![old.to_string(), new.to_string()];
        }
    }
    match rest.split_once(" b/") {
        Some((old, new)) => vec![old.to_string(), format!("b/{new}")],
        None => Vec::new(),
    }
}

/// Name on a `---`/`+++` line, dropping any tab-separated timestamp.
fn file_header_name(rest: &str) -> Option<String> {
    if rest.starts_with('"') {
        return unquote(rest).map(|(name, _)| name);
    }
    let name = rest.split('\t').next().unwrap_or_default().trim_end();
    (!name.is_empty()).then(|| name.to_string())
}

fn name_token(rest: &str) -> Option<String> {
    if rest.starts_with('"') {
        return unquote(rest).map(|(name, _)| name);
    }
    let name = rest.trim_end();
    (!name.is_empty()).then(|| name.to_string())
}

/// Drop the first path component (`a/`, `b/`), as `git apply -p1` does.
fn strip_component(name: &str) -> Option<String> {
    name.split_once('/')
        .map(|(_, rest)| rest.to_string())
        .filter(|rest| !rest.is_empty())
}

/// Decode a C-quoted name at the start of `s`, returning it and what follows
/// the closing quote.
fn unquote(s: &str) -> Option<(String, &str)> {
    let body = s.strip_prefix('"')?;
    let raw = body.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        match raw[i] {
            b'"' => return Some((String::from_utf8_lossy(&out).into_owned(), &body[i + 1..])),
            b'\\' => {
                let escaped = *raw.get(i + 1)?;
                i += 2;
                let byte = match escaped {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b'f' => 0x0c,
                    b'n' => b'\n',
                    b'r' => b'\r',
                    b't' => b'\t',
                    b'v' => 0x0b,
                    b'"' | b'\\' => escaped,
                    b'0'..=b'3' => {
                        let digits = raw.get(i - 1..i + 2)?;
                        i += 2;
                        digits.iter().try_fold(0u8, |acc, d| match d {
                            b'0'..=b'7' => Some(acc * 8 + (d - b'0')),
                            _ => None,
                        })?
                    }
                    _ => return None,
                };
                out.push(byte);
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    None
}

/// Whether the patch carries NUL bytes, which text diffs never do.
pub fn is_binary(patch: &str) -> bool {
    patch.contains('\0')
}

/// Hex-encoded SHA-256 of the patch text.
pub fn patch_digest(patch: &str) -> String {
    hex::encode(Sha256::digest(patch.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_touched_files_dedupes_and_reports_deletions() {
        let patch = "\
diff --git a/src/a.ts b/src/a.ts
--- a/src/a.ts
+++ b/src/a.ts
@@ -1 +1 @@
-a
+b
diff --git a/src/old.ts b/src/old.ts
--- a/src/old.ts
+++ /dev/null
@@ -1 +0,0 @@
-gone
diff --git a/src/a.ts b/src/a.ts
--- a/src/a.ts
+++ b/src/a.ts
@@ -5 +5 @@
-c
+d
diff --git a/tests/new.test.ts b/tests/new.test.ts
--- /dev/null
+++ b/tests/new.test.ts
@@ -0,0 +1 @@
+it('works', () => {})
";
        assert_eq!(
            touched_files(patch),
            vec!["src/a.ts", "src/old.ts", "tests/new.test.ts"]
        );
    }

    #[test]
    fn test_touched_files_reports_both_sides_of_rename_and_copy() {
        let patch = "\
diff --git a/src/a.ts b/src/b.ts
similarity index 100%
rename from src/a.ts
rename to src/b.ts
diff --git a/src/c.ts b/src/d.ts
similarity index 100%
copy from src/c.ts
copy to src/d.ts
";
        assert_eq!(
            touched_files(patch),
            vec!["src/a.ts", "src/b.ts", "src/c.ts", "src/d.ts"]
        );
    }

    #[test]
    fn test_touched_files_unquotes_git_names() {
        let patch = "\
diff --git \"a/src/sp ace.ts\" \"b/src/sp ace.ts\"
--- \"a/src/sp ace.ts\"
+++ \"b/src/sp ace.ts\"
@@ -1 +1 @@
-a
+b
diff --git a/src/x.ts \"b/src/tab\\there.ts\"
rename from src/x.ts
rename to \"src/tab\\there.ts\"
diff --git \"a/caf\\303\\251.ts\" \"b/caf\\303\\251.ts\"
";
        assert_eq!(
            touched_files(patch),
            vec!["src/sp ace.ts", "src/x.ts", "src/tab\there.ts", "caf\u{e9}.ts"]
        );
    }

    #[test]
    fn test_touched_files_ignores_header_lookalikes_in_hunks() {
        let patch = "\
--- a/docs/notes.md
+++ b/docs/notes.md
@@ -1,2 +1,2 @@
--- a/.env
+++ b/.github/workflows/ci.yml
 context
";
        assert_eq!(touched_files(patch), vec!["docs/notes.md"]);
    }

    #[test]
    fn test_touched_files_handles_spaces_and_timestamps() {
        let patch = "\
diff --git a/src/my file.ts b/src/my file.ts
--- a/src/my file.ts\t2026-01-01 00:00:00
+++ b/src/my file.ts\t2026-01-01 00:00:00
@@ -1 +1 @@
-a
+b
";
        assert_eq!(touched_files(patch), vec!["src/my file.ts"]);
    }

    #[test]
    fn test_touched_files_empty_for_prose() {
        assert!(touched_files("I could not find a safe fix.").is_empty());
    }

    #[test]
    fn test_is_binary() {
        assert!(is_binary("+++ b/x\n\0\0"));
        assert!(!is_binary("+++ b/x\n+text"));
    }

    #[test]
    fn test_patch_digest_is_stable_hex() {
        let a = patch_digest("+++ b/src/a.ts\n");
        assert_eq!(a.len(), 64);
        assert_eq!(a, patch_digest("+++ b/src/a.ts\n"));
        assert_ne!(a, patch_digest("+++ b/src/b.ts\n"));
    }
}
