#[macro_use]
mod run_sample;

mod test_samples;
