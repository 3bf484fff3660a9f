use serde::Serialize;

use super::types::CommentSide;

const NULL_DEVICE: &str = "/dev/null";

/// A parsed unified diff: one entry per file section, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diff {
    pub files: Vec<FileDiff>,
}

impl Diff {
    /// Find a file by its new path, or by its old path for deleted files.
    pub fn find_file(&self, path: &str) -> Option<&FileDiff> {
        self.files
            .iter()
            .find(|f| f.new_path == path || (f.new_path.is_empty() && f.old_path == path))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A single file within a diff.
///
/// An empty path means the file does not exist on that side.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileDiff {
    pub old_path: String,
    pub new_path: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub hunks: Vec<DiffHunk>,
}

impl FileDiff {
    /// Display path: the new path, or the old one when the file was deleted.
    pub fn path(&self) -> &str {
        if self.new_path.is_empty() {
            &self.old_path
        } else {
            &self.new_path
        }
    }

    pub fn additions(&self) -> usize {
        self.count(LineKind::Add)
    }

    pub fn deletions(&self) -> usize {
        self.count(LineKind::Delete)
    }

    fn count(&self, kind: LineKind) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Locate the line an inline comment on `side` at `line` would anchor to.
    pub fn line_at(&self, side: CommentSide, line: u32) -> Option<&DiffLine> {
        if line == 0 {
            return None;
        }
        self.hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .find(|l| l.line_for(side) == line)
    }
}

/// A contiguous block of lines anchored to starting line numbers on both sides.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffHunk {
    /// Full header line, e.g. `@@ -1,2 +1,3 @@ fn main()`
    pub header: String,
    pub old_start: u32,
    pub new_start: u32,
    pub lines: Vec<DiffLine>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Add,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiffLine {
    pub kind: LineKind,
    /// Line content without the leading `+`, `-` or space
    pub content: String,
    /// 0 for added lines
    pub old_line: u32,
    /// 0 for deleted lines
    pub new_line: u32,
}

impl DiffLine {
    pub fn line_for(&self, side: CommentSide) -> u32 {
        match side {
            CommentSide::Left => self.old_line,
            CommentSide::Right => self.new_line,
        }
    }
}

/// Hunk being filled, with the counters for the next line on each side.
struct OpenHunk {
    hunk: DiffHunk,
    next_old: u32,
    next_new: u32,
    /// Lines still expected per the header lengths, when the header carried them
    remaining: Option<(u32, u32)>,
}

impl OpenHunk {
    fn new(header: &str) -> Self {
        let range = parse_hunk_header(header);
        OpenHunk {
            hunk: DiffHunk {
                header: header.to_string(),
                old_start: range.old_start,
                new_start: range.new_start,
                lines: Vec::new(),
            },
            next_old: range.old_start,
            next_new: range.new_start,
            remaining: range.lengths,
        }
    }

    /// Whether the header declared lengths and some declared line is still to come.
    fn expects_more(&self) -> bool {
        matches!(self.remaining, Some((old, new)) if old > 0 || new > 0)
    }

    fn push(&mut self, line: &str) {
        let (kind, content) = match line.as_bytes().first() {
            Some(b'+') => (LineKind::Add, &line[1..]),
            Some(b'-') => (LineKind::Delete, &line[1..]),
            Some(b' ') => (LineKind::Context, &line[1..]),
            _ => (LineKind::Context, line),
        };

        // Numbers stick at u32::MAX rather than wrap
        let (old_line, new_line) = match kind {
            LineKind::Add => (0, take_next(&mut self.next_new)),
            LineKind::Delete => (take_next(&mut self.next_old), 0),
            LineKind::Context => (take_next(&mut self.next_old), take_next(&mut self.next_new)),
        };

        if let Some((old_left, new_left)) = self.remaining.as_mut() {
            if kind != LineKind::Add {
                *old_left = old_left.saturating_sub(1);
            }
            if kind != LineKind::Delete {
                *new_left = new_left.saturating_sub(1);
            }
        }

        self.hunk.lines.push(DiffLine {
            kind,
            content: content.to_string(),
            old_line,
            new_line,
        });
    }
}

fn take_next(counter: &mut u32) -> u32 {
    let current = *counter;
    *counter = current.saturating_add(1);
    current
}

/// Parse a unified diff into a [`Diff`].
///
/// Never fails: malformed input degrades to whatever structure could be
/// recovered. The scan has three states: seeking a file header, inside a
/// file's header lines, and inside a hunk.
///
/// - `diff --git a/{path} b/{path}` starts a new file
/// - `--- {path}` / `+++ {path}` set the old/new path; `/dev/null` marks the
///   file as new/deleted
/// - `@@ -{old}[,{len}] +{new}[,{len}] @@` opens a hunk
/// - inside a hunk, `+` lines are additions, `-` lines deletions and anything
///   else (including blank lines) context
///
/// Lines outside any hunk that are not headers are dropped, as are
/// `\ No newline at end of file` markers.
pub fn parse_diff(raw_diff: &str) -> Diff {
    let mut files = Vec::new();
    let mut current_file: Option<FileDiff> = None;
    let mut current_hunk: Option<OpenHunk> = None;

    let finish_hunk = |file: &mut Option<FileDiff>, hunk: &mut Option<OpenHunk>| {
        if let Some(open) = hunk.take() {
            // A hunk without a file header still belongs somewhere
            file.get_or_insert_with(FileDiff::default).hunks.push(open.hunk);
        }
    };

    let finish_file =
        |files: &mut Vec<FileDiff>, file: &mut Option<FileDiff>, hunk: &mut Option<OpenHunk>| {
            finish_hunk(file, hunk);
            if let Some(file) = file.take() {
                files.push(file);
            }
        };

    for line in raw_diff.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            finish_file(&mut files, &mut current_file, &mut current_hunk);
            let (old_path, new_path) = parse_git_header_paths(rest);
            current_file = Some(FileDiff {
                old_path,
                new_path,
                ..FileDiff::default()
            });
            continue;
        }

        let in_open_hunk = current_hunk.as_ref().is_some_and(OpenHunk::expects_more);

        if !in_open_hunk {
            if let Some(path) = line.strip_prefix("--- ") {
                // A plain `diff -u` file section has no `diff --git` line
                if current_hunk.is_some()
                    || current_file.as_ref().is_some_and(|f| !f.hunks.is_empty())
                {
                    finish_file(&mut files, &mut current_file, &mut current_hunk);
                }
                let file = current_file.get_or_insert_with(FileDiff::default);
                match strip_marker_path(path, "a/") {
                    None => {
                        file.old_path.clear();
                        file.is_new = true;
                    }
                    Some(p) => file.old_path = p,
                }
                continue;
            }

            if let Some(path) = line.strip_prefix("+++ ") {
                let file = current_file.get_or_insert_with(FileDiff::default);
                match strip_marker_path(path, "b/") {
                    None => {
                        file.new_path.clear();
                        file.is_deleted = true;
                    }
                    Some(p) => file.new_path = p,
                }
                continue;
            }
        }

        if line.starts_with("@@") {
            finish_hunk(&mut current_file, &mut current_hunk);
            current_hunk = Some(OpenHunk::new(line));
            continue;
        }

        if let Some(open) = current_hunk.as_mut() {
            if line.starts_with('\\') {
                continue;
            }
            open.push(line);
        }
    }

    finish_file(&mut files, &mut current_file, &mut current_hunk);
    Diff { files }
}

/// Paths from `a/{old} b/{new}`. Best effort: quoted or space-containing
/// paths are split at the ` b/` separator.
fn parse_git_header_paths(rest: &str) -> (String, String) {
    let rest = rest.trim();
    if let Some((a, b)) = rest.split_once(" b/") {
        let old = a.strip_prefix("a/").unwrap_or(a);
        return (old.to_string(), b.to_string());
    }
    let mut parts = rest.split_whitespace();
    let old = parts.next().unwrap_or_default();
    let new = parts.next().unwrap_or_default();
    (
        old.strip_prefix("a/").unwrap_or(old).to_string(),
        new.strip_prefix("b/").unwrap_or(new).to_string(),
    )
}

/// Path from a `---`/`+++` marker with the `a/`/`b/` prefix and any
/// trailing timestamp removed. `None` for the null device.
fn strip_marker_path(raw: &str, prefix: &str) -> Option<String> {
    let path = raw.split('\t').next().unwrap_or(raw).trim_end();
    if path == NULL_DEVICE {
        return None;
    }
    Some(path.strip_prefix(prefix).unwrap_or(path).to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HunkRange {
    old_start: u32,
    new_start: u32,
    /// Old/new lengths, when both could be read
    lengths: Option<(u32, u32)>,
}

/// Parse `@@ -{old}[,{len}] +{new}[,{len}] @@`. An omitted length means 1.
/// Each number is read on its own: a start that is missing or unparsable
/// becomes 0, and an unreadable length leaves `lengths` empty.
fn parse_hunk_header(line: &str) -> HunkRange {
    let body = line.strip_prefix("@@").unwrap_or(line).trim_start();
    let body = body.find("@@").map_or(body, |end| &body[..end]);
    let mut parts = body.split_whitespace();
    let (old_start, old_len) = parse_range(parts.next(), '-');
    let (new_start, new_len) = parse_range(parts.next(), '+');
    HunkRange {
        old_start,
        new_start,
        lengths: old_len.zip(new_len),
    }
}

fn parse_range(part: Option<&str>, prefix: char) -> (u32, Option<u32>) {
    let Some(range) = part.and_then(|p| p.strip_prefix(prefix)) else {
        return (0, None);
    };
    match range.split_once(',') {
        Some((start, len)) => (start.parse().unwrap_or(0), len.parse().ok()),
        None => (range.parse().unwrap_or(0), Some(1)),
    }
}
