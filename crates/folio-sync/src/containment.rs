//! Recovery boundaries: a failure inside one is logged and swallowed so the
//! next sibling unit of work still runs.

use std::fmt::Display;
use std::future::Future;

use tracing::error;

/// Awaits `work`; on error logs it with `operation` (and `repo_name` when the
/// unit is a single repository) and yields `None`.
pub async fn contain<T, E, F>(operation: &'static str, repo_name: Option<&str>, work: F) -> Option<T>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match work.await {
        Ok(value) => Some(value),
        Err(err) => {
            match repo_name {
                Some(repo_name) => {
                    error!(operation, repo_name, error = %err, "contained failure")
                }
                None => error!(operation, error = %err, "contained failure"),
            }
            None
        }
    }
}
