use ansi_term::Color;
use std::io;
use std::path::{Path, PathBuf};
use textwrap::{NoHyphenation, Wrapper};

use crate::file_cache::FileCache;

/// An error which knows how to render itself for a human, quoting source from `files`.
pub trait Reportable {
    fn report(&self, dest: &mut impl io::Write, files: &FileCache) -> io::Result<()>;

    fn exit_status(&self) -> i32;
}

/// Byte offsets of line starts, for turning spans into line/column positions.
#[derive(Clone, Debug)]
struct SourceLines<'a> {
    content: &'a str,
    starts: Vec<usize>,
}

impl<'a> SourceLines<'a> {
    fn new(content: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(content.match_indices('\n').map(|(pos, _)| pos + 1))
            .collect();
        SourceLines { content, starts }
    }

    fn line_of(&self, pos: usize) -> usize {
        match self.starts.binary_search(&pos) {
            Ok(line) => line,
            Err(next) => next - 1,
        }
    }

    /// The line holding the last byte of a range ending (exclusively) at `end`.
    fn last_line_of(&self, end: usize) -> usize {
        self.line_of(end.saturating_sub(1))
    }

    fn column(&self, line: usize, pos: usize) -> usize {
        pos - self.starts[line]
    }

    fn text(&self, line: usize) -> &'a str {
        let start = self.starts[line];
        let end = match self.starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.content.len(),
        };
        self.content[start..end].trim_end_matches('\r')
    }

    fn gutter_width(&self) -> usize {
        self.starts.len().to_string().len()
    }
}

fn write_snippet(
    dest: &mut impl io::Write,
    src: &SourceLines,
    lo: usize,
    hi: usize,
) -> io::Result<()> {
    let gutter_style = Color::Blue.bold();
    let marker_style = Color::Red.bold();
    let width = src.gutter_width();

    let gutter = |line: Option<usize>| {
        let label = line.map(|line| (line + 1).to_string()).unwrap_or_default();
        gutter_style.paint(format!(" {label:>width$} |"))
    };

    let first = src.line_of(lo);
    let last = src.last_line_of(hi.max(lo + 1));
    let start_col = src.column(first, lo);

    writeln!(dest, "{}", gutter(None))?;
    for line in first..=last {
        writeln!(dest, "{} {}", gutter(Some(line)), src.text(line))?;
    }

    if first == last {
        let len = (hi - lo).max(1);
        writeln!(
            dest,
            "{} {:start_col$}{}",
            gutter(None),
            "",
            marker_style.paint("^".repeat(len))
        )?;
    } else {
        let end_col = src.column(last, hi);
        writeln!(
            dest,
            "{} {}",
            gutter(None),
            marker_style.paint(format!("{}^ (from column {})", "~".repeat(end_col), start_col + 1))
        )?;
    }

    Ok(())
}

#[derive(Clone, Copy, Debug)]
pub struct Report<'a> {
    pub path: Option<&'a Path>,
    pub span: Option<(usize, usize)>,
    pub title: &'a str,
    pub message: Option<&'a str>,
}

const TITLE_COLS: usize = 60;
const MESSAGE_COLS: usize = 72;

pub fn report_error(
    dest: &mut impl io::Write,
    files: &FileCache,
    report: Report,
) -> io::Result<()> {
    let title_style = Color::Blue.bold();
    let path_style = Color::Yellow.normal();

    let rule = "=".repeat(TITLE_COLS.saturating_sub(report.title.len() + 4));
    writeln!(
        dest,
        "\n{}",
        title_style.paint(format!("== {} {}", report.title, rule))
    )?;

    if let Some(path) = report.path {
        match report.span {
            Some((lo, hi)) => {
                let src = SourceLines::new(files.read_cached(path)?);
                let line = src.line_of(lo);
                writeln!(
                    dest,
                    "{}\n",
                    path_style.paint(format!(
                        "{}:{}:{}",
                        path.display(),
                        line + 1,
                        src.column(line, lo) + 1
                    ))
                )?;
                write_snippet(dest, &src, lo, hi)?;
            }
            None => writeln!(dest, "{}", path_style.paint(path.display().to_string()))?,
        }
    }

    if let Some(message) = report.message {
        writeln!(dest)?;
        for paragraph in message.lines() {
            let indent = &paragraph[..paragraph.len() - paragraph.trim_start_matches(' ').len()];
            let wrapped = Wrapper::with_splitter(MESSAGE_COLS, NoHyphenation)
                .initial_indent(indent)
                .subsequent_indent(indent)
                .wrap(paragraph.trim_start_matches(' '));
            if wrapped.is_empty() {
                writeln!(dest)?;
            }
            for line in wrapped {
                writeln!(dest, "{}", line)?;
            }
        }
    }

    writeln!(dest)
}

/// An error value together with the file and byte range it arose from, both filled in lazily as
/// the error propagates outward.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Locate<E> {
    pub path: Option<PathBuf>,
    pub span: Option<(usize, usize)>,
    pub error: E,
}

impl<E> From<E> for Locate<E> {
    fn from(error: E) -> Self {
        Locate {
            path: None,
            span: None,
            error,
        }
    }
}

// Curried so they compose with `map_err`. The innermost location wins.

pub fn locate_path<'a, E>(
    path: &'a (impl AsRef<Path> + ?Sized),
) -> impl FnOnce(Locate<E>) -> Locate<E> + 'a {
    move |err| Locate {
        path: err.path.or_else(|| Some(path.as_ref().to_owned())),
        ..err
    }
}

pub fn locate_span<E>(lo: usize, hi: usize) -> impl FnOnce(Locate<E>) -> Locate<E> {
    move |err| Locate {
        span: err.span.or(Some((lo, hi))),
        ..err
    }
}

impl<E> Locate<E> {
    pub fn report_with<Title, Msg>(
        &self,
        dest: &mut impl io::Write,
        files: &FileCache,
        reporter: impl FnOnce(&E) -> (Title, Msg),
    ) -> io::Result<()>
    where
        Title: AsRef<str>,
        Msg: AsRef<str>,
    {
        let (title, message) = reporter(&self.error);
        report_error(
            dest,
            files,
            Report {
                path: self.path.as_deref(),
                span: self.span,
                title: title.as_ref(),
                message: Some(message.as_ref()),
            },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn render(src: &str, span: (usize, usize)) -> String {
        let mut files = FileCache::new();
        files.insert("sample.arb", src);
        let err = Locate {
            path: Some(PathBuf::from("sample.arb")),
            span: Some(span),
            error: "boom",
        };
        let mut out = Vec::new();
        err.report_with(&mut out, &files, |msg| ("Test Error", msg.to_string()))
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_position_is_one_based() {
        let out = render("f t = t\ng t = leaf\n", (14, 18));
        assert!(out.contains("sample.arb:2:7"), "{}", out);
        assert!(out.contains("g t = leaf"));
        assert!(out.contains("boom"));
    }

    #[test]
    fn test_innermost_location_wins() {
        let err: Locate<()> = Locate::from(());
        let err = locate_span(3, 4)(err);
        let err = locate_span(0, 10)(err);
        assert_eq!(err.span, Some((3, 4)));
        let err = locate_path("a.arb")(err);
        let err = locate_path("b.arb")(err);
        assert_eq!(err.path, Some(PathBuf::from("a.arb")));
    }
}
