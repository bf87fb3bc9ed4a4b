use serde_json::Value;
use tokio::sync::mpsc;

/// One emission of a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub path: String,
    /// `None` while nothing is stored at the path.
    pub value: Option<Value>,
}

type Release = Box<dyn FnOnce() + Send>;

/// Handle on a live subscription.
///
/// Dropping the handle releases the registration just like
/// [`Subscription::unsubscribe`] does.
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<Snapshot>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(
        path: String,
        rx: mpsc::UnboundedReceiver<Snapshot>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self { path, rx, release: Some(Box::new(release)) }
    }

    /// Next snapshot, or `None` once the subscription is closed.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.rx.recv().await
    }

    /// Snapshot already queued, without waiting.
    pub fn try_next(&mut self) -> Option<Snapshot> {
        self.rx.try_recv().ok()
    }

    pub fn unsubscribe(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            self.rx.close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("released", &self.release.is_none())
            .finish()
    }
}
