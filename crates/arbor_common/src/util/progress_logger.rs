/// Something that can report progress through a sequence of work items.
pub trait ProgressLogger {
    type Session: ProgressSession;
    fn start_session(self, total_count: Option<usize>) -> Self::Session;
}

pub trait ProgressSession {
    fn update(&mut self, progress: usize);
    fn finish(self);
}

/// Progress that nobody watches, used by tests and by library callers without a terminal.
#[derive(Clone, Copy, Debug)]
pub struct Hidden;

#[derive(Clone, Copy, Debug)]
pub struct HiddenSession;

impl ProgressLogger for Hidden {
    type Session = HiddenSession;
    fn start_session(self, _total_count: Option<usize>) -> Self::Session {
        HiddenSession
    }
}

impl ProgressSession for HiddenSession {
    fn update(&mut self, _progress: usize) {}
    fn finish(self) {}
}
