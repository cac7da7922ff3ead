/// Aborts on a broken internal invariant.
macro_rules! bug {
    ($($arg:tt)*) => {
        panic!("bug: {}", format_args!($($arg)*))
    };
}

mod lex;
mod parse;
mod parse_error;
mod resolve;
mod type_infer;
mod unshare;

pub mod error;

use crate::error::Error;
use arbor_common::{data, file_cache};
use std::path::Path;

/// Parses, resolves, normalises, type checks and unshares a source file.
pub fn compile_to_typed_ast(
    src_path: &Path,
    files: &mut file_cache::FileCache,
) -> Result<data::typed_ast::Program, Error> {
    let resolved = resolve::resolve_program(src_path, files).map_err(Error::ResolveFailed)?;
    tracing::debug!(
        module = %resolved.module,
        funcs = resolved.funcs.len(),
        "resolved program"
    );

    let typed =
        type_infer::type_infer_file(&resolved, src_path).map_err(Error::TypeInferFailed)?;
    tracing::debug!(sccs = typed.sccs.len(), "inferred types");

    Ok(unshare::unshare_program(typed))
}

/// Like [`compile_to_typed_ast`], for source text which does not live in a file.
pub fn compile_source(module: &str, src: &str) -> Result<data::typed_ast::Program, Error> {
    let resolved = resolve::resolve_source(module, src)
        .map_err(|err| Error::ResolveFailed(resolve::Error::from(err)))?;
    let typed = type_infer::type_infer(&resolved).map_err(Error::TypeInferFailed)?;
    Ok(unshare::unshare_program(typed))
}
