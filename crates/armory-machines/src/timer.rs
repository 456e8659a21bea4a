use std::future::pending;

use tokio::time::{Instant, sleep_until};

/// Sleep until `deadline`, or forever when there is none.
///
/// Lets an actor loop keep one `select!` arm for its timer whether or not a
/// timer is currently armed.
pub(crate) async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending::<()>().await,
    }
}
