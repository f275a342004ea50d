//! Durable store pass-throughs for delivery tasks.

use std::collections::HashSet;

use super::{PubSub, Result};
use crate::interfaces::StoredMessage;
use crate::utils::time::utcnow_as_ms;

impl PubSub {
    /// GD messages for sub_keys published between `last_sql_run` and
    /// `pub_time_max`, skipping those already being delivered.
    pub async fn get_sql_messages_by_sub_key(
        &self,
        sub_keys: &[String],
        last_sql_run: f64,
        pub_time_max: f64,
        ignore_list: &HashSet<String>,
    ) -> Result<Vec<StoredMessage>> {
        Ok(self
            .store()
            .get_messages_by_sub_keys(
                self.server().cluster_id,
                sub_keys,
                last_sql_run,
                pub_time_max,
                ignore_list,
            )
            .await?)
    }

    /// IDs of all GD messages of a sub_key when its delivery task starts.
    pub async fn get_initial_sql_msg_ids_by_sub_key(
        &self,
        sub_key: &str,
        pub_time_max: f64,
    ) -> Result<Vec<String>> {
        Ok(self
            .store()
            .get_msg_ids_by_sub_key(self.server().cluster_id, sub_key, pub_time_max)
            .await?)
    }

    pub async fn get_sql_messages_by_msg_id_list(
        &self,
        sub_key: &str,
        pub_time_max: f64,
        msg_ids: &[String],
    ) -> Result<Vec<StoredMessage>> {
        Ok(self
            .store()
            .get_messages_by_msg_ids(self.server().cluster_id, sub_key, pub_time_max, msg_ids)
            .await?)
    }

    pub async fn confirm_pubsub_msg_delivered(&self, sub_key: &str, msg_ids: &[String]) -> Result<()> {
        self.store()
            .confirm_delivered(self.server().cluster_id, sub_key, msg_ids, utcnow_as_ms())
            .await?;
        Ok(())
    }

    pub async fn set_to_delete(&self, sub_key: &str, msg_ids: &[String]) -> Result<()> {
        self.store()
            .set_to_delete(self.server().cluster_id, sub_key, msg_ids, utcnow_as_ms())
            .await?;
        Ok(())
    }
}
