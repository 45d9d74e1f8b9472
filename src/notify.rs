/// Sink for user-visible warnings (toasts in a browser host).
pub trait Notifier: Send + Sync {
    fn notify_warning(&self, title: &str, text: &str);
}

/// Routes warnings to the log when the host has no toast surface.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify_warning(&self, title: &str, text: &str) {
        tracing::warn!(title, text, "user-facing warning");
    }
}
