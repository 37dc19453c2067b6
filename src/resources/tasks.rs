//! Task resource: generic optimistic writes, plus the read-side
//! partition of the flat server list into per-group buckets.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::{decode_records, ResourceWriter};
use crate::net::{ConditionalFetcher, Method};
use crate::store::EntityStore;

/// A task as this engine cares about it: an id, an optional group, and
/// whatever else the server put in the body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  #[serde(rename = "groupId", skip_serializing_if = "Option::is_none")]
  pub group_id: Option<String>,
  #[serde(flatten)]
  pub rest: serde_json::Map<String, Value>,
}

/// The flat server task list reshaped for group-oriented consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskBuckets {
  pub by_group: HashMap<String, Vec<Task>>,
  pub unassigned: Vec<Task>,
}

#[derive(Clone)]
pub struct Tasks {
  fetch: ConditionalFetcher,
  writer: ResourceWriter,
}

impl Tasks {
  pub(crate) fn new(fetch: ConditionalFetcher, writer: ResourceWriter) -> Self {
    Self { fetch, writer }
  }

  /// Fetch the task collection and partition it by group. The
  /// reshaping is read-side only; writes stay flat.
  pub async fn list(&self) -> Result<TaskBuckets> {
    let records = self.fetch.fetch_collection("/tasks", EntityStore::Tasks).await?;
    Ok(partition(decode_records(records)))
  }

  pub async fn create(&self, task: &Task) -> Result<Task> {
    let record = serde_json::to_value(task)?;
    let body = self
      .writer
      .write(EntityStore::Tasks, "/tasks", Method::Post, record)
      .await?;
    decode_task(body)
  }

  pub async fn update(&self, task: &Task) -> Result<Task> {
    let record = serde_json::to_value(task)?;
    let path = format!("/tasks/{}", task.id);
    let body = self
      .writer
      .write(EntityStore::Tasks, &path, Method::Put, record)
      .await?;
    decode_task(body)
  }

  pub async fn remove(&self, id: &str) -> Result<()> {
    self
      .writer
      .remove(EntityStore::Tasks, &format!("/tasks/{}", id), id)
      .await
  }
}

fn decode_task(body: Value) -> Result<Task> {
  serde_json::from_value(body).map_err(|e| eyre!("Failed to parse task: {}", e))
}

fn partition(tasks: Vec<Task>) -> TaskBuckets {
  let mut buckets = TaskBuckets::default();
  for task in tasks {
    match task.group_id.clone() {
      Some(group) => buckets.by_group.entry(group).or_default().push(task),
      None => buckets.unassigned.push(task),
    }
  }
  buckets
}
