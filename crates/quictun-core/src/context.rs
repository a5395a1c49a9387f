use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// Process-wide handles shared by every component.
///
/// Created once at startup and passed down explicitly; components derive
/// child tokens for their own shutdown scope and spawn long-lived work
/// through the tracker so the application can wait for it on exit.
#[derive(Default)]
pub struct AppContext {
	pub token: CancellationToken,
	pub tasks: TaskTracker,
}
