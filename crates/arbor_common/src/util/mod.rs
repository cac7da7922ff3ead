pub mod id_gen;
pub mod lines;
pub mod progress_logger;
