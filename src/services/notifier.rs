use serde::Serialize;
use uuid::Uuid;

/// Outbound event channel consumed by the operator surfaces.
const NOTIFICATIONS_CHANNEL: &str = "notifications";

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Notification {
    pub fn task_created(task_id: Uuid) -> Self {
        Self::new("task_created", Some(task_id), None)
    }

    pub fn task_stopped(task_id: Uuid) -> Self {
        Self::new("task_stopped", Some(task_id), None)
    }

    pub fn task_removed(task_id: Option<Uuid>) -> Self {
        Self::new("task_removed", task_id, None)
    }

    pub fn task_restarted(task_id: Uuid) -> Self {
        Self::new("task_restarted", Some(task_id), None)
    }

    pub fn task_error(task_id: Option<Uuid>, detail: impl Into<String>) -> Self {
        Self::new("task_error", task_id, Some(detail.into()))
    }

    fn new(event: &'static str, task_id: Option<Uuid>, detail: Option<String>) -> Self {
        Self {
            event,
            task_id,
            detail,
        }
    }
}

/// Publishes engine events to the shared notifications channel. Failures are
/// logged but never block the caller.
#[derive(Clone)]
pub struct Notifier {
    client: redis::Client,
}

impl Notifier {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub async fn publish(&self, notification: &Notification) {
        let payload = match serde_json::to_string(notification) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize notification");
                return;
            }
        };

        let result: Result<(), redis::RedisError> = async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: i64 = redis::cmd("PUBLISH")
                .arg(NOTIFICATIONS_CHANNEL)
                .arg(&payload)
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(
                event = notification.event,
                error = %e,
                "Failed to publish notification"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifications_serialize_compactly() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&Notification::task_created(id)).unwrap();
        assert!(json.contains("task_created"));
        assert!(json.contains(&id.to_string()));
        assert!(!json.contains("detail"));

        let json = serde_json::to_string(&Notification::task_error(None, "bad input")).unwrap();
        assert!(json.contains("task_error"));
        assert!(json.contains("bad input"));
        assert!(!json.contains("task_id"));
    }
}
