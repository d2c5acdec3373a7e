//! Bounded-memory external sort of line files.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::IndexResult;

/// Extracts the part of a line to sort on. Ties fall back to the whole line.
pub type SortKey = fn(&[u8]) -> &[u8];

/// The whole line, compared bytewise.
pub fn whole_line(line: &[u8]) -> &[u8] {
    line
}

/// The `n`th space-separated field, or the empty slice when absent.
pub fn field(line: &[u8], n: usize) -> &[u8] {
    line.split(|b| *b == b' ')
        .filter(|f| !f.is_empty())
        .nth(n)
        .unwrap_or(&[])
}

/// Sort the lines of `input` into `output` by `key`, then by the whole line.
///
/// Blank lines are dropped and every output line ends in `\n`. At most
/// `run_lines` lines are held in memory; longer inputs are sorted in runs
/// under `tmp_dir` and merged.
pub fn sort_file(
    input: &Path,
    output: &Path,
    tmp_dir: &Path,
    run_lines: usize,
    key: SortKey,
) -> IndexResult<()> {
    let run_lines = run_lines.max(1);
    fs::create_dir_all(tmp_dir)?;
    let runs_dir = tempfile::Builder::new().prefix("sort-runs").tempdir_in(tmp_dir)?;

    let mut reader = BufReader::new(File::open(input)?);
    let mut runs: Vec<PathBuf> = Vec::new();
    let mut chunk: Vec<Vec<u8>> = Vec::new();

    loop {
        let line = read_line(&mut reader)?;
        let done = line.is_none();
        if let Some(line) = line {
            if !line.is_empty() {
                chunk.push(line);
            }
        }
        if chunk.len() >= run_lines || (done && !chunk.is_empty()) {
            chunk.sort_unstable_by(|a, b| (key(a), a).cmp(&(key(b), b)));
            let run = runs_dir.path().join(format!("run-{}", runs.len()));
            write_lines(&run, &chunk)?;
            runs.push(run);
            chunk.clear();
        }
        if done {
            break;
        }
    }

    debug!(input = %input.display(), runs = runs.len(), "merging sorted runs");
    merge_runs(&runs, output, key)
}

fn read_line(reader: &mut impl BufRead) -> IndexResult<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(Some(line))
}

fn write_lines(path: &Path, lines: &[Vec<u8>]) -> IndexResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for line in lines {
        out.write_all(line)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

fn merge_runs(runs: &[PathBuf], output: &Path, key: SortKey) -> IndexResult<()> {
    let mut out = BufWriter::new(File::create(output)?);
    let mut readers = runs
        .iter()
        .map(|r| File::open(r).map(BufReader::new))
        .collect::<Result<Vec<_>, _>>()?;

    let mut heap = BinaryHeap::new();
    for (i, reader) in readers.iter_mut().enumerate() {
        if let Some(line) = read_line(reader)? {
            heap.push(Reverse((key(&line).to_vec(), line, i)));
        }
    }

    while let Some(Reverse((_, line, i))) = heap.pop() {
        out.write_all(&line)?;
        out.write_all(b"\n")?;
        if let Some(next) = read_line(&mut readers[i])? {
            heap.push(Reverse((key(&next).to_vec(), next, i)));
        }
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sorted(input: &str, run_lines: usize, key: SortKey) -> String {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in");
        let dst = dir.path().join("out");
        fs::write(&src, input).unwrap();
        sort_file(&src, &dst, &dir.path().join("tmp"), run_lines, key).unwrap();
        fs::read_to_string(dst).unwrap()
    }

    #[test]
    fn bytewise_order_across_runs() {
        let input = "b 2\na 1\nB 0\n\nc 3\na 0\n";
        let expected = "B 0\na 0\na 1\nb 2\nc 3\n";
        assert_eq!(sorted(input, 1000, whole_line), expected);
        assert_eq!(sorted(input, 2, whole_line), expected);
    }

    #[test]
    fn sorts_on_field() {
        let input = "x http://b/\ny http://a/\nz http://a/\n";
        let out = sorted(input, 1, |l| field(l, 1));
        assert_eq!(out, "y http://a/\nz http://a/\nx http://b/\n");
    }

    #[test]
    fn missing_trailing_newline_and_crlf() {
        assert_eq!(sorted("b\r\na", 10, whole_line), "a\nb\n");
    }

    #[test]
    fn field_extraction() {
        assert_eq!(field(b"a  b c", 1), b"b");
        assert_eq!(field(b"a b", 5), b"");
    }

    proptest! {
        #[test]
        fn output_is_sorted_permutation_of_input(
            lines in proptest::collection::vec("[ab ]{0,4}", 0..40),
            run_lines in 1usize..8,
        ) {
            let out = sorted(&lines.join("\n"), run_lines, |l| field(l, 1));
            let got: Vec<&str> = out.lines().collect();

            let mut expected: Vec<&str> = lines.iter().map(String::as_str).filter(|l| !l.is_empty()).collect();
            expected.sort_by(|a, b| {
                (field(a.as_bytes(), 1), a.as_bytes()).cmp(&(field(b.as_bytes(), 1), b.as_bytes()))
            });
            prop_assert_eq!(got, expected);
            prop_assert!(out.is_empty() || out.ends_with('\n'));
        }
    }
}
