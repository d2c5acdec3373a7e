//! Rewriting of duplicate origins that point into migrated archive files.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use tracing::{debug, warn};

use crate::crawl_log::parse_duplicate;
use crate::error::IndexResult;

/// Old `(file, offset)` to new `(file, offset)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationTable {
    moves: HashMap<(String, u64), (String, u64)>,
}

/// What happened to one line during a rewrite.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rewrite {
    /// No duplicate annotation, nothing to do.
    Unchanged,
    Rewritten(String),
    /// The annotation names an origin the table does not know.
    Unresolved,
}

/// Counts from [`MigrationTable::rewrite`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    pub lines: usize,
    pub rewritten: usize,
    pub unresolved: usize,
}

impl MigrationTable {
    /// Parse `<old-file> <old-offset> <new-file> <new-offset>` lines.
    /// Malformed lines are skipped with a warning.
    pub fn parse(text: &str) -> Self {
        let mut moves = HashMap::new();
        for (n, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            let parsed = match fields.as_slice() {
                [old, old_off, new, new_off] => old_off
                    .parse::<u64>()
                    .ok()
                    .zip(new_off.parse::<u64>().ok())
                    .map(|(from, to)| ((old.to_string(), from), (new.to_string(), to))),
                _ => None,
            };
            match parsed {
                Some((from, to)) => {
                    moves.insert(from, to);
                }
                None => warn!(line = n + 1, content = line, "skipping malformed migration record"),
            }
        }
        debug!(entries = moves.len(), "migration table parsed");
        Self { moves }
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn lookup(&self, file: &str, offset: u64) -> Option<&(String, u64)> {
        self.moves.get(&(file.to_string(), offset))
    }

    pub fn rewrite_line(&self, line: &str) -> Rewrite {
        let Some(dup) = parse_duplicate(line) else {
            return Rewrite::Unchanged;
        };
        match self.lookup(dup.file, dup.offset) {
            Some((file, offset)) => {
                let mut out = String::with_capacity(line.len() + 16);
                out.push_str(&line[..dup.span.start]);
                out.push_str(&format!("{file},{offset}"));
                out.push_str(&line[dup.span.end..]);
                Rewrite::Rewritten(out)
            }
            None => Rewrite::Unresolved,
        }
    }

    /// Copy `input` to `output`, rewriting duplicate origins. Lines whose
    /// origin cannot be resolved are kept as they are.
    pub fn rewrite(&self, input: impl BufRead, mut output: impl Write) -> IndexResult<RewriteStats> {
        let mut stats = RewriteStats::default();
        for line in input.lines() {
            let line = line?;
            stats.lines += 1;
            match self.rewrite_line(&line) {
                Rewrite::Unchanged => writeln!(output, "{line}")?,
                Rewrite::Rewritten(new) => {
                    stats.rewritten += 1;
                    writeln!(output, "{new}")?;
                }
                Rewrite::Unresolved => {
                    stats.unresolved += 1;
                    warn!(line = stats.lines, "no migration entry for duplicate origin, keeping line");
                    writeln!(output, "{line}")?;
                }
            }
        }
        output.flush()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MigrationTable {
        MigrationTable::parse("old.arc 512 new.warc.gz 100\nbroken line\nold.arc 900 new.warc.gz 300\n")
    }

    #[test]
    fn parse_skips_malformed() {
        let t = table();
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup("old.arc", 900), Some(&("new.warc.gz".to_string(), 300)));
    }

    #[test]
    fn rewrites_quoted_and_unquoted() {
        let t = table();
        assert_eq!(
            t.rewrite_line("a b duplicate:\"old.arc,512\",content-size:10"),
            Rewrite::Rewritten("a b duplicate:\"new.warc.gz,100\",content-size:10".into())
        );
        assert_eq!(
            t.rewrite_line("a b duplicate:old.arc,900"),
            Rewrite::Rewritten("a b duplicate:new.warc.gz,300".into())
        );
        assert_eq!(t.rewrite_line("a b content-size:10"), Rewrite::Unchanged);
    }

    #[test]
    fn unresolved_lines_kept() {
        let t = table();
        let input = "x duplicate:\"other.arc,1\"\ny duplicate:\"old.arc,512\"\nz\n";
        let mut out = Vec::new();
        let stats = t.rewrite(input.as_bytes(), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "x duplicate:\"other.arc,1\"\ny duplicate:\"new.warc.gz,100\"\nz\n"
        );
        assert_eq!(stats, RewriteStats { lines: 3, rewritten: 1, unresolved: 1 });
    }
}
