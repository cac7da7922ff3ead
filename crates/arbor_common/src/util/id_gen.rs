use id_collections::{Count, Id};

/// Hands out consecutive ids of one id type, starting from zero.
#[derive(Clone, Debug)]
pub struct IdGen<T: Id> {
    next: Count<T>,
}

impl<T: Id> IdGen<T> {
    pub fn new() -> IdGen<T> {
        IdGen { next: Count::new() }
    }

    pub fn fresh(&mut self) -> T {
        self.next.inc()
    }
}

impl<T: Id> Default for IdGen<T> {
    fn default() -> Self {
        IdGen::new()
    }
}
