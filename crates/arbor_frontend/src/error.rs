use crate::{resolve, type_infer};
use arbor_common::file_cache;
use arbor_common::report_error::Reportable;
use std::io;

#[derive(Debug)]
pub enum Error {
    ResolveFailed(resolve::Error),
    TypeInferFailed(type_infer::Error),
}

impl Reportable for Error {
    fn report(&self, dest: &mut impl io::Write, files: &file_cache::FileCache) -> io::Result<()> {
        use Error::*;

        match &self {
            ResolveFailed(err) => err.report(dest, files),
            TypeInferFailed(err) => err.report(dest, files),
        }
    }

    fn exit_status(&self) -> i32 {
        1
    }
}
