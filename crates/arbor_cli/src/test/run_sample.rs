use crate::cli::Config;
use arbor_common::file_cache::FileCache;
use arbor_common::report_error::Reportable;
use std::ffi::OsString;

/// Runs the analysis as the command line would, returning the exit status and what was written
/// to stdout.
pub fn analyze_sample(args: &[OsString]) -> anyhow::Result<(i32, String)> {
    let argv = std::iter::once(OsString::from("arbor")).chain(args.iter().cloned());
    let config = Config::try_from_iter(argv)?;
    let mut files = FileCache::new();
    let mut output = Vec::new();
    let status = match crate::analyze(&config, &mut files, &mut output) {
        Ok(()) => 0,
        Err(err) => {
            let mut report = Vec::new();
            err.report(&mut report, &files)?;
            tracing::debug!("{}", String::from_utf8_lossy(&report));
            err.exit_status()
        }
    };
    Ok((status, String::from_utf8(output)?))
}

/// Every expected line must start some line of the output, in the given order.
pub fn run_sample(args: &[&str], expected_lines: &[&str], expected_status: i32) {
    let args: Vec<OsString> = args.iter().map(OsString::from).collect();
    let (status, output) = analyze_sample(&args).expect("Could not run the sample");

    let mut remaining = output.lines();
    let missing = expected_lines
        .iter()
        .find(|expected| !remaining.any(|line| line.starts_with(**expected)));

    assert!(
        status == expected_status && missing.is_none(),
        r#"Analysis did not match expectations:
            status:   {actual_status}
            expected: {expected_status}
            ---------------------------------------------
            first missing line:
{missing:?}
            ---------------------------------------------
            stdout:
{output}"#,
        actual_status = status,
        expected_status = expected_status,
        missing = missing,
        output = output,
    );
}

macro_rules! sample {
    (
        $name:ident $path:expr ;
        $( args = [ $( $arg:expr ),* $(,)? ] ; )?
        stdout = $stdout:expr ;
        $( status = $status:expr ; )?
    ) => {
        #[test]
        fn $name() {
            #[allow(unused_mut)]
            let mut args: Vec<&str> = vec![$path];
            $(
                args.extend([ $( $arg ),* ]);
            )?

            #[allow(unused_mut, unused_assignments)]
            let mut status = 0;
            $(
                status = $status;
            )?

            let expected: &[&str] = &$stdout;
            crate::test::run_sample::run_sample(&args, expected, status);
        }
    };
}
