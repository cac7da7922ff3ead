use arbor_common::file_cache::FileCache;
use arbor_common::report_error::{report_error, Report};
use std::io;
use std::path::Path;

use crate::lex;

#[derive(Clone, Debug)]
pub enum ParseError {
    InvalidToken {
        location: usize,
    },
    UnrecognizedToken {
        token: (usize, lex::Token, usize),
        expected: Vec<&'static str>,
    },
    UnrecognizedEof {
        location: usize,
        expected: Vec<&'static str>,
    },
    /// A definition must start in the first column, and only definitions may.
    MisplacedDefinition {
        span: (usize, usize),
    },
    ZeroCost {
        span: (usize, usize),
    },
}

impl From<lex::Error> for ParseError {
    fn from(err: lex::Error) -> Self {
        ParseError::InvalidToken { location: err.0 }
    }
}

fn expectation(expected: &[&str]) -> String {
    match expected {
        [] => String::new(),
        [single] => format!("I expected to see {} here instead.", single),
        many => {
            let mut msg = "I expected to see one of the following here instead:\n\n".to_owned();
            for name in many {
                msg.push_str(&format!("    {}\n", name));
            }
            msg
        }
    }
}

pub fn report(
    dest: &mut impl io::Write,
    files: &FileCache,
    path: Option<&Path>,
    err: &ParseError,
) -> io::Result<()> {
    let (span, title, message) = match err {
        ParseError::InvalidToken { location } => {
            ((*location, *location + 1), "Unexpected Character", None)
        }
        ParseError::UnrecognizedToken {
            token: (lo, token, hi),
            expected,
        } => (
            (*lo, *hi),
            "Incorrect Syntax",
            Some(format!(
                "I don't know how to parse \"{}\" here.\n\n{}",
                token,
                expectation(expected)
            )),
        ),
        ParseError::UnrecognizedEof { location, expected } => (
            (*location, *location),
            "Unexpected End of File",
            Some(format!(
                "The file ended before I expected it to.\n\n{}",
                expectation(expected)
            )),
        ),
        ParseError::MisplacedDefinition { span } => (
            *span,
            "Misplaced Definition",
            Some(
                "Function definitions start in the first column of a line. Lines that continue \
                 a function body must be indented."
                    .to_owned(),
            ),
        ),
        ParseError::ZeroCost { span } => (
            *span,
            "Invalid Cost",
            Some("The denominator of a tick cost must not be zero.".to_owned()),
        ),
    };

    report_error(
        dest,
        files,
        Report {
            path,
            span: Some(span),
            title,
            message: message.as_deref(),
        },
    )
}
