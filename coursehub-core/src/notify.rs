use async_trait::async_trait;
use coursehub_shared::models::events::LifecycleEvent;

/// Outbound signal to the notification collaborator. Delivery is the
/// collaborator's concern; callers log failures and carry on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        event: &LifecycleEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Writes events to the trace log only. Used when no broker is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        event: &LifecycleEvent,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!(topic = event.topic(), key = %event.key(), "lifecycle event");
        Ok(())
    }
}
