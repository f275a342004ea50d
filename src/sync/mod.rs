//! Background sync loop.
//!
//! One task per broker instance. Each iteration visits, under the broker
//! lock, every topic whose sync interval elapsed and which may have pending
//! messages. For each such topic it drains the non-GD backlog of subscribers
//! with a known delivery owner and dispatches a single notification to the
//! after-publish service. Dispatch is fire-and-forget; dirty flags are
//! cleared once it is issued.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::model::{QueuedMessage, Subscription, TopicId};
use crate::pubsub::names::AFTER_PUBLISH;
use crate::pubsub::state::BrokerState;
use crate::pubsub::PubSub;
use crate::registry::Result as RegistryResult;
use crate::utils::time::new_cid;

/// "New messages available" signal for the delivery tasks of one topic.
#[derive(Debug, Clone, Serialize)]
pub struct SyncNotification {
    pub cid: String,
    pub topic_id: TopicId,
    pub topic_name: String,
    /// Subscribers whose delivery owner is known.
    pub subscriptions: Vec<Subscription>,
    /// Non-GD messages drained from the backlog.
    pub non_gd_msg_list: Vec<QueuedMessage>,
    /// GD messages may be waiting in the durable store.
    pub has_gd_msg_list: bool,
    pub is_bg_call: bool,
    /// Latest publication time of anything pending.
    pub pub_time_max: f64,
}

/// Outcome of one pass over all topics.
#[derive(Debug, Default)]
pub struct SyncPass {
    pub notifications: Vec<SyncNotification>,
    /// Subscribers skipped because their owner is unknown, with their wsx flag.
    pub unresolved: Vec<(String, bool)>,
}

/// Visit every topic due for a sync. Caller holds the broker lock.
///
/// A failure on one topic is logged and the remaining topics are still
/// visited.
pub(crate) fn collect_pass(state: &mut BrokerState, now: Instant) -> SyncPass {
    let mut pass = SyncPass::default();

    for topic_id in state.registry.topic_ids() {
        match sync_topic(state, topic_id, now, &mut pass.unresolved) {
            Ok(Some(notification)) => pass.notifications.push(notification),
            Ok(None) => {}
            Err(e) => warn!(topic_id, error = %e, "Could not sync topic"),
        }
    }

    pass
}

fn sync_topic(
    state: &mut BrokerState,
    topic_id: TopicId,
    now: Instant,
    unresolved: &mut Vec<(String, bool)>,
) -> RegistryResult<Option<SyncNotification>> {
    let topic = state.registry.topic_by_id_mut(topic_id)?;
    if !topic.needs_task_sync(now) || !topic.has_pending_sync() {
        return Ok(None);
    }
    topic.update_task_sync_time(now);

    let topic_name = topic.name().to_string();
    let has_gd_msg_list = topic.sync_has_gd_msg;
    let gd_pub_time_max = topic.gd_pub_time_max;

    let mut subscriptions = Vec::new();
    for sub in state.registry.subscriptions_by_topic(&topic_name) {
        let has_owner = state
            .router
            .get(sub.sub_key())
            .is_some_and(|owner| owner.server_pid > 0);
        if has_owner {
            subscriptions.push(sub.clone());
        } else {
            unresolved.push((sub.sub_key().to_string(), sub.is_wsx()));
        }
    }

    if subscriptions.is_empty() {
        debug!(topic = %topic_name, "No subscribers with a delivery owner, flags kept");
        return Ok(None);
    }

    let sub_keys: Vec<String> = subscriptions
        .iter()
        .map(|sub| sub.sub_key().to_string())
        .collect();
    let non_gd_msg_list = state
        .backlog
        .get_delete_messages_by_sub_keys(topic_id, &sub_keys);

    let pub_time_max = non_gd_msg_list
        .iter()
        .map(QueuedMessage::pub_time)
        .fold(gd_pub_time_max, f64::max);

    let topic = state.registry.topic_by_id_mut(topic_id)?;
    topic.sync_has_gd_msg = false;
    topic.sync_has_non_gd_msg = false;

    debug!(
        topic = %topic_name,
        subscriptions = subscriptions.len(),
        non_gd = non_gd_msg_list.len(),
        has_gd = has_gd_msg_list,
        pub_time_max,
        "Notifying delivery tasks"
    );

    Ok(Some(SyncNotification {
        cid: new_cid(),
        topic_id,
        topic_name,
        subscriptions,
        non_gd_msg_list,
        has_gd_msg_list,
        is_bg_call: true,
        pub_time_max,
    }))
}

/// Drives sync passes for one broker instance.
#[derive(Debug, Clone)]
pub struct SyncLoop {
    pubsub: PubSub,
}

impl SyncLoop {
    pub fn new(pubsub: PubSub) -> Self {
        Self { pubsub }
    }

    /// Run a single pass. Returns the number of notifications dispatched.
    pub async fn run_once(&self) -> usize {
        let pass = {
            let mut state = self.pubsub.lock().await;
            collect_pass(&mut state, Instant::now())
        };

        let dispatched = pass.notifications.len();
        for notification in pass.notifications {
            let pubsub = self.pubsub.clone();
            tokio::spawn(async move { dispatch(pubsub, notification).await });
        }

        if !pass.unresolved.is_empty() {
            let pubsub = self.pubsub.clone();
            tokio::spawn(async move {
                for (sub_key, is_wsx) in pass.unresolved {
                    pubsub.add_missing_server_for_sub_key(&sub_key, is_wsx).await;
                }
            });
        }

        dispatched
    }

    /// Loop until cancelled, or for the configured number of iterations.
    pub async fn run(self, mut cancel: watch::Receiver<bool>) {
        let sleep = self.pubsub.config().sync_sleep();
        let max_iters = self.pubsub.config().sync_max_iters;
        info!(sleep_ms = sleep.as_millis() as u64, ?max_iters, "Sync loop started");

        let mut iterations: u64 = 0;
        loop {
            if max_iters.is_some_and(|max| iterations >= max) {
                info!(iterations, "Sync loop reached its iteration limit");
                break;
            }
            self.run_once().await;
            iterations += 1;

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                changed = cancel.changed() => {
                    // A dropped handle stops the loop too
                    if changed.is_err() || *cancel.borrow() {
                        info!(iterations, "Sync loop stopped");
                        break;
                    }
                }
            }
        }
    }
}

async fn dispatch(pubsub: PubSub, notification: SyncNotification) {
    let topic_id = notification.topic_id;
    let pub_time_max = notification.pub_time_max;

    let request = match serde_json::to_value(&notification) {
        Ok(request) => request,
        Err(e) => {
            warn!(topic = %notification.topic_name, error = %e, "Could not serialize sync notification");
            return;
        }
    };

    if let Err(e) = pubsub.invoker().invoke(AFTER_PUBLISH, request).await {
        warn!(
            topic = %notification.topic_name,
            cid = %notification.cid,
            error = %e,
            "Could not notify delivery tasks"
        );
        if let Err(e) = pubsub
            .after_gd_sync_error(topic_id, "sync_loop", pub_time_max)
            .await
        {
            warn!(topic_id, error = %e, "Could not re-arm topic after sync error");
        }
    }
}

/// Handle to a running sync task.
#[derive(Debug)]
pub struct SyncTaskHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SyncTaskHandle {
    /// Signal the sync task to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Sync task ended abnormally");
        }
    }

    /// Stop the task and wait for it, giving up after `timeout`.
    pub async fn shutdown(self, timeout: Duration) {
        self.stop();
        if tokio::time::timeout(timeout, self.join()).await.is_err() {
            warn!("Sync task did not stop in time");
        }
    }
}

/// Spawn the sync loop of a broker instance.
pub fn spawn_sync_task(pubsub: PubSub) -> SyncTaskHandle {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let task = tokio::spawn(SyncLoop::new(pubsub).run(cancel_rx));
    SyncTaskHandle {
        cancel: cancel_tx,
        task,
    }
}

#[cfg(test)]
mod tests;
