//! In-RAM backlog interface step definitions.

use std::sync::Arc;

use cucumber::{given, then, when, World};

use pubsub_core::backlog::{BacklogLimits, InRamBacklog};
use pubsub_core::model::{QueuedMessage, TopicId};
use pubsub_core::test_utils::{make_message, MemoryOverflowSink};

const TOPIC_NAME: &str = "/orders";

/// Test context for backlog scenarios.
#[derive(Debug, World)]
#[world(init = Self::new)]
pub struct BacklogWorld {
    backlog: InRamBacklog,
    overflow: Arc<MemoryOverflowSink>,
    topic_id: TopicId,
    limits: BacklogLimits,
    next_pub_time: f64,
    drained: Vec<QueuedMessage>,
}

impl BacklogWorld {
    fn new() -> Self {
        let overflow = Arc::new(MemoryOverflowSink::new());
        Self {
            backlog: InRamBacklog::new(overflow.clone()),
            overflow,
            topic_id: 0,
            limits: BacklogLimits {
                max_depth: 0,
                use_overflow_log: true,
            },
            next_pub_time: 1.0,
            drained: Vec::new(),
        }
    }

    fn pending_ids(&self, sub_key: &str) -> Vec<String> {
        self.backlog
            .pending(self.topic_id, sub_key)
            .iter()
            .map(|msg| msg.pub_msg_id.clone())
            .collect()
    }
}

fn split(list: &str) -> Vec<String> {
    list.split(',').map(|item| item.trim().to_string()).collect()
}

// --- Background ---

#[given("a backlog")]
async fn given_backlog(world: &mut BacklogWorld) {
    assert_eq!(world.backlog.topic_depth(world.topic_id), 0);
}

// --- Given steps ---

#[given(expr = "topic {int} holds at most {int} non-GD messages per subscriber")]
async fn given_capacity(world: &mut BacklogWorld, topic_id: TopicId, max_depth: usize) {
    world.topic_id = topic_id;
    world.limits = BacklogLimits {
        max_depth,
        use_overflow_log: true,
    };
}

#[given(expr = "topic {int} holds at most {int} non-GD messages per subscriber without overflow log")]
async fn given_capacity_without_overflow(world: &mut BacklogWorld, topic_id: TopicId, max_depth: usize) {
    world.topic_id = topic_id;
    world.limits = BacklogLimits {
        max_depth,
        use_overflow_log: false,
    };
}

// --- When steps ---

#[when(expr = "messages {string} are added for {string}")]
async fn when_messages_added(world: &mut BacklogWorld, ids: String, sub_keys: String) {
    let messages = split(&ids)
        .iter()
        .map(|id| {
            let pub_time = world.next_pub_time;
            world.next_pub_time += 1.0;
            make_message(id, pub_time, world.topic_id, TOPIC_NAME)
        })
        .collect();
    world.backlog.add_messages(
        "cid",
        world.topic_id,
        TOPIC_NAME,
        world.limits,
        &split(&sub_keys),
        messages,
    );
}

#[when(expr = "the queues of {string} are drained")]
async fn when_drained(world: &mut BacklogWorld, sub_keys: String) {
    world.drained = world
        .backlog
        .get_delete_messages_by_sub_keys(world.topic_id, &split(&sub_keys));
}

#[when(expr = "{string} is unsubscribed from the backlog")]
async fn when_unsubscribed(world: &mut BacklogWorld, sub_key: String) {
    world
        .backlog
        .unsubscribe(world.topic_id, TOPIC_NAME, &[sub_key]);
}

// --- Then steps ---

#[then(expr = "{string} has pending messages {string}")]
async fn then_pending_ids(world: &mut BacklogWorld, sub_key: String, ids: String) {
    assert_eq!(world.pending_ids(&sub_key), split(&ids));
}

#[then(expr = "{string} has {int} pending messages")]
async fn then_pending_count(world: &mut BacklogWorld, sub_key: String, count: usize) {
    assert_eq!(world.pending_ids(&sub_key).len(), count);
}

#[then(expr = "the overflow sink holds {string}")]
async fn then_overflow_ids(world: &mut BacklogWorld, ids: String) {
    let overflowed: Vec<String> = world
        .overflow
        .overflowed()
        .into_iter()
        .map(|(_, _, msg_id)| msg_id)
        .collect();
    assert_eq!(overflowed, split(&ids));
}

#[then(expr = "the overflow sink holds {int} messages")]
async fn then_overflow_count(world: &mut BacklogWorld, count: usize) {
    assert_eq!(world.overflow.overflowed().len(), count);
}

#[then("the overflow sink is empty")]
async fn then_overflow_empty(world: &mut BacklogWorld) {
    assert!(world.overflow.overflowed().is_empty());
}

#[then(expr = "the drained messages are {string}")]
async fn then_drained(world: &mut BacklogWorld, ids: String) {
    let drained: Vec<String> = world
        .drained
        .iter()
        .map(|msg| msg.pub_msg_id().to_string())
        .collect();
    assert_eq!(drained, split(&ids));
}

#[then(expr = "topic {int} holds {int} distinct messages")]
async fn then_topic_depth(world: &mut BacklogWorld, topic_id: TopicId, count: usize) {
    assert_eq!(world.backlog.topic_depth(topic_id), count);
}
