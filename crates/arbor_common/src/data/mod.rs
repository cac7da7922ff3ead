pub mod raw_ast;

pub mod anf_ast;

pub mod typed_ast;
