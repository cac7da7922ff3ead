use std::{borrow::Cow, time::Duration};

use crate::util::progress_logger::{ProgressLogger, ProgressSession};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProgressMode {
    Hidden,
    Visible,
}

#[derive(Clone, Debug)]
pub struct ProgressBarLogger {
    name: String,
    mode: ProgressMode,
}

pub fn bar(mode: ProgressMode, name: impl ToString) -> ProgressBarLogger {
    ProgressBarLogger {
        name: name.to_string(),
        mode,
    }
}

#[derive(Clone, Debug)]
pub struct ProgressBarSession {
    bar: indicatif::ProgressBar,
}

const SPINNER: &[&str] = &["◐", "◓", "◑", "◒", "●"];

fn style(bounded: bool) -> indicatif::ProgressStyle {
    let template = if bounded {
        "{spinner:.green} {elapsed:>4} {wide_bar:.green/white} {pos}/{len} SCCs  {msg}"
    } else {
        "{spinner:.green} {elapsed:>4} {msg}"
    };
    let base = if bounded {
        indicatif::ProgressStyle::default_bar().progress_chars("## ")
    } else {
        indicatif::ProgressStyle::default_spinner()
    };
    // The templates are fixed strings; a malformed one is a programming error caught by tests.
    base.template(template)
        .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner())
        .tick_strings(SPINNER)
}

impl ProgressLogger for ProgressBarLogger {
    type Session = ProgressBarSession;

    fn start_session(self, count: Option<usize>) -> Self::Session {
        let target = match self.mode {
            ProgressMode::Hidden => indicatif::ProgressDrawTarget::hidden(),
            ProgressMode::Visible => indicatif::ProgressDrawTarget::stderr(),
        };
        let bar = indicatif::ProgressBar::with_draw_target(count.map(|n| n as u64), target);
        bar.set_style(style(count.is_some()));
        bar.set_message(Cow::Owned(self.name));
        bar.enable_steady_tick(Duration::from_millis(120));
        ProgressBarSession { bar }
    }
}

impl ProgressSession for ProgressBarSession {
    fn update(&mut self, inc: usize) {
        self.bar.inc(inc as u64);
    }

    fn finish(self) {
        self.bar.finish_and_clear();
    }
}
