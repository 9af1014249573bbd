// ABOUTME: Line-oriented editor for a repository's git config file.
// ABOUTME: Owns only `core.sshCommand`; every other byte is preserved verbatim.

use crate::error::{GitsmError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Options appended after `-i "<key>"` in the bound command.
const SSH_COMMAND_OPTIONS: &str =
    "-F /dev/null -o IdentitiesOnly=yes -o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null";

/// Value of `core.sshCommand` for a key. Backslashes become forward slashes and
/// the path is quoted, because git's config parser treats backslashes as escapes.
pub fn ssh_command_value(key_path: &Path) -> String {
    let path = key_path.to_string_lossy().replace('\\', "/");
    format!("ssh -i \"{path}\" {SSH_COMMAND_OPTIONS}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Header {
        name: String,
        subsection: Option<String>,
        raw: String,
    },
    /// A key/value line plus any continuation lines.
    Entry { key: String, raw: String },
    /// Blank lines, comments.
    Passthrough(String),
}

impl Line {
    fn raw(&self) -> &str {
        match self {
            Line::Header { raw, .. } | Line::Entry { raw, .. } | Line::Passthrough(raw) => raw,
        }
    }

    fn raw_mut(&mut self) -> &mut String {
        match self {
            Line::Header { raw, .. } | Line::Entry { raw, .. } | Line::Passthrough(raw) => raw,
        }
    }

    fn is_core_header(&self) -> bool {
        matches!(self, Line::Header { name, subsection: None, .. } if name == "core")
    }
}

/// A parsed git config, kept as tagged lines so rendering is byte-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitConfigText {
    lines: Vec<Line>,
    newline: &'static str,
}

impl GitConfigText {
    /// Parse config text. `path` is only used in error messages.
    pub fn parse(text: &str, path: &Path) -> Result<Self> {
        let newline = if text.contains("\r\n") { "\r\n" } else { "\n" };
        let mut lines: Vec<Line> = Vec::new();
        let mut in_section = false;
        let mut continuing = false;

        for (idx, physical) in text.split_inclusive('\n').enumerate() {
            let line_no = idx + 1;
            let parse_err = |message: &str| GitsmError::ConfigParse {
                path: path.to_path_buf(),
                line: line_no,
                message: message.to_string(),
            };

            if continuing {
                if let Some(Line::Entry { raw, .. }) = lines.last_mut() {
                    raw.push_str(physical);
                }
                continuing = ends_with_continuation(physical);
                continue;
            }

            // A leading byte order mark stays in the raw text but is not content.
            let content = if idx == 0 {
                physical.strip_prefix('\u{feff}').unwrap_or(physical)
            } else {
                physical
            };
            let trimmed = content.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                lines.push(Line::Passthrough(physical.to_string()));
                continue;
            }

            if trimmed.starts_with('[') {
                let (name, subsection, consumed) =
                    parse_header(trimmed).ok_or_else(|| parse_err("malformed section header"))?;
                in_section = true;

                let lead = physical.len() - content.trim_start().len();
                let (header_raw, rest) = physical.split_at(lead + consumed);
                let inline = rest.trim();
                if inline.is_empty() || inline.starts_with('#') || inline.starts_with(';') {
                    lines.push(Line::Header {
                        name,
                        subsection,
                        raw: physical.to_string(),
                    });
                    continue;
                }

                // `[core] key = value`: the entry shares the header's line.
                lines.push(Line::Header {
                    name,
                    subsection,
                    raw: header_raw.to_string(),
                });
                let key = parse_key(inline).ok_or_else(|| parse_err("invalid key"))?;
                continuing = ends_with_continuation(rest);
                lines.push(Line::Entry {
                    key,
                    raw: rest.to_string(),
                });
                continue;
            }

            if !in_section {
                return Err(parse_err("key outside of any section"));
            }
            let key = parse_key(trimmed).ok_or_else(|| parse_err("invalid key"))?;
            continuing = ends_with_continuation(physical);
            lines.push(Line::Entry {
                key,
                raw: physical.to_string(),
            });
        }

        Ok(Self { lines, newline })
    }

    pub fn render(&self) -> String {
        self.lines.iter().map(Line::raw).collect()
    }

    /// Effective `core.sshCommand` (git uses the last one).
    pub fn ssh_command(&self) -> Option<String> {
        self.core_ssh_command_indices()
            .last()
            .and_then(|&idx| entry_value(self.lines[idx].raw()))
    }

    /// Set or remove `core.sshCommand`. Idempotent.
    pub fn set_ssh_command(&mut self, value: Option<&str>) {
        let existing = self.core_ssh_command_indices();

        let Some(value) = value else {
            for idx in existing.into_iter().rev() {
                self.remove_line(idx);
            }
            return;
        };

        let encoded = encode_value(value);

        if let Some((&first, rest)) = existing.split_first() {
            let raw = self.lines[first].raw();
            let indent: String = raw.chars().take_while(|c| *c == ' ' || *c == '\t').collect();
            let ending = line_ending(raw);
            self.lines[first] = Line::Entry {
                key: "sshcommand".to_string(),
                raw: format!("{indent}sshCommand = {encoded}{ending}"),
            };
            for &idx in rest.iter().rev() {
                self.remove_line(idx);
            }
            return;
        }

        let entry = Line::Entry {
            key: "sshcommand".to_string(),
            raw: format!("\tsshCommand = {encoded}{}", self.newline),
        };

        if let Some(header_idx) = self.lines.iter().position(Line::is_core_header) {
            let mut at = header_idx + 1;
            // Keep an entry written on the header's own line next to it.
            if !self.lines[header_idx].raw().ends_with('\n') && at < self.lines.len() {
                at += 1;
            }
            let newline = self.newline;
            let previous = self.lines[at - 1].raw_mut();
            if !previous.ends_with('\n') {
                previous.push_str(newline);
            }
            self.lines.insert(at, entry);
            return;
        }

        self.ensure_trailing_newline();
        self.lines.push(Line::Header {
            name: "core".to_string(),
            subsection: None,
            raw: format!("[core]{}", self.newline),
        });
        self.lines.push(entry);
    }

    fn ensure_trailing_newline(&mut self) {
        let newline = self.newline;
        if let Some(last) = self.lines.last_mut() {
            let raw = last.raw_mut();
            if !raw.ends_with('\n') {
                raw.push_str(newline);
            }
        }
    }

    /// Remove a line. A header that shared its line with the removed entry
    /// takes over that entry's line ending.
    fn remove_line(&mut self, idx: usize) {
        let removed = self.lines.remove(idx);
        let ending = line_ending(removed.raw());
        if let Some(previous) = idx.checked_sub(1).and_then(|i| self.lines.get_mut(i)) {
            let raw = previous.raw_mut();
            if !raw.ends_with('\n') {
                raw.push_str(ending);
            }
        }
    }

    fn core_ssh_command_indices(&self) -> Vec<usize> {
        let mut in_core = false;
        let mut found = Vec::new();
        for (idx, line) in self.lines.iter().enumerate() {
            match line {
                Line::Header { .. } => in_core = line.is_core_header(),
                Line::Entry { key, .. } if in_core && key == "sshcommand" => found.push(idx),
                _ => {}
            }
        }
        found
    }
}

/// `(section, subsection, bytes consumed through the closing bracket)` from a
/// trimmed header line. Section names are case-insensitive; subsections are not.
/// A quoted subsection may contain `]` and backslash escapes.
fn parse_header(trimmed: &str) -> Option<(String, Option<String>, usize)> {
    let body = trimmed.strip_prefix('[')?;
    let stop = body.find([']', '"'])?;

    if body[stop..].starts_with('"') {
        let name = body[..stop].trim();
        if !valid_section_name(name) {
            return None;
        }
        let quoted = &body[stop + 1..];
        let mut sub = String::new();
        let mut chars = quoted.char_indices();
        let mut closing = None;
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => sub.push(chars.next()?.1),
                '"' => {
                    closing = Some(i);
                    break;
                }
                c => sub.push(c),
            }
        }
        let after_quote = stop + 1 + closing? + 1;
        if !body[after_quote..].starts_with(']') {
            return None;
        }
        return Some((name.to_ascii_lowercase(), Some(sub), 1 + after_quote + 1));
    }

    let inner = body[..stop].trim();
    let consumed = 1 + stop + 1;

    // Legacy `[section.subsection]` syntax.
    match inner.split_once('.') {
        Some((name, sub)) if valid_section_name(name) => {
            Some((name.to_ascii_lowercase(), Some(sub.to_string()), consumed))
        }
        Some(_) => None,
        None if valid_section_name(inner) => Some((inner.to_ascii_lowercase(), None, consumed)),
        None => None,
    }
}

fn valid_section_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

fn parse_key(trimmed: &str) -> Option<String> {
    let end = trimmed
        .find(|c: char| c == '=' || c.is_whitespace())
        .unwrap_or(trimmed.len());
    let key = &trimmed[..end];
    let mut chars = key.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() || !chars.all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }
    Some(key.to_ascii_lowercase())
}

fn line_ending(raw: &str) -> &'static str {
    if raw.ends_with("\r\n") {
        "\r\n"
    } else if raw.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

/// An odd number of trailing backslashes continues the value on the next line.
fn ends_with_continuation(physical: &str) -> bool {
    let body = physical.trim_end_matches(['\n', '\r']);
    body.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Quote and escape a value so git reads it back unchanged.
pub fn encode_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    let needs_quotes = value.contains(['#', ';'])
        || value.starts_with(char::is_whitespace)
        || value.ends_with(char::is_whitespace);
    if needs_quotes {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

/// Decode the value part of an entry line the way git does.
pub fn decode_value(raw: &str) -> String {
    let mut out = String::new();
    let mut pending_ws = String::new();
    let mut in_quotes = false;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\n') => {}
                Some('\r') if chars.peek() == Some(&'\n') => {
                    chars.next();
                }
                Some(escaped) => {
                    out.push_str(&pending_ws);
                    pending_ws.clear();
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'b' => '\u{8}',
                        other => other,
                    });
                }
                None => {}
            },
            '"' => {
                out.push_str(&pending_ws);
                pending_ws.clear();
                in_quotes = !in_quotes;
            }
            '#' | ';' if !in_quotes => break,
            '\n' | '\r' if !in_quotes => break,
            c if c.is_whitespace() && !in_quotes => {
                if !out.is_empty() {
                    pending_ws.push(c);
                }
            }
            c => {
                out.push_str(&pending_ws);
                pending_ws.clear();
                out.push(c);
            }
        }
    }
    out
}

fn entry_value(raw: &str) -> Option<String> {
    let (_, value) = raw.split_once('=')?;
    Some(decode_value(value))
}

/// Locate a repository's config file from its working tree, following a
/// `.git` file (worktrees, submodules) to the common directory.
pub fn config_path(repo: &Path) -> Result<PathBuf> {
    let dot_git = repo.join(".git");
    if dot_git.is_dir() {
        return Ok(dot_git.join("config"));
    }

    if dot_git.is_file() {
        let content = std::fs::read_to_string(&dot_git).map_err(|e| GitsmError::ConfigRead {
            path: dot_git.clone(),
            source: e,
        })?;
        if let Some(target) = content.trim().strip_prefix("gitdir:") {
            let git_dir = resolve(repo, target.trim());
            let common = git_dir.join("commondir");
            let base = match std::fs::read_to_string(&common) {
                Ok(rel) => resolve(&git_dir, rel.trim()),
                Err(_) => git_dir,
            };
            return Ok(base.join("config"));
        }
    }

    Err(GitsmError::NotARepository(repo.to_path_buf()))
}

fn resolve(base: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        base.join(target)
    }
}

/// Reconciles `core.sshCommand` in a repository's config with a binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigReconciler;

impl ConfigReconciler {
    pub fn new() -> Self {
        Self
    }

    /// Point `core.sshCommand` at `key`, or remove it when `key` is `None`.
    /// Writing the same key twice leaves the file byte-identical.
    pub fn set_ssh_command(&self, repo: &Path, key: Option<&Path>) -> Result<()> {
        let path = config_path(repo)?;
        let original = read_config(&path)?;
        let mut config = GitConfigText::parse(&original, &path)?;

        let value = key.map(ssh_command_value);
        config.set_ssh_command(value.as_deref());
        let updated = config.render();

        if updated == original {
            tracing::debug!(config = %path.display(), "sshCommand already reconciled");
            return Ok(());
        }

        write_atomic(&path, &updated)?;
        tracing::info!(
            config = %path.display(),
            key = ?key.map(|k| k.display().to_string()),
            "Reconciled core.sshCommand"
        );
        Ok(())
    }

    /// Current effective `core.sshCommand` of a repository.
    pub fn ssh_command(&self, repo: &Path) -> Result<Option<String>> {
        let path = config_path(repo)?;
        let text = read_config(&path)?;
        Ok(GitConfigText::parse(&text, &path)?.ssh_command())
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| GitsmError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let write_err = |e: std::io::Error| GitsmError::ConfigWrite {
        path: path.to_path_buf(),
        source: e,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(content.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions()).map_err(write_err)?;
    }
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
