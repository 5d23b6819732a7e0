/// Result of processing one item in a batch that tolerates per-item failures.
///
/// Fatal failures are reported as `Err` by the caller; an item that is merely
/// unusable comes back as `Skipped` with the reason, is logged, and is left
/// out of the response.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<T> {
    Done(T),
    Skipped(String),
}

impl<T> ItemOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ItemOutcome::Skipped(_))
    }
}

impl<T, E: std::fmt::Display> From<Result<T, E>> for ItemOutcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => ItemOutcome::Done(value),
            Err(e) => ItemOutcome::Skipped(e.to_string()),
        }
    }
}
