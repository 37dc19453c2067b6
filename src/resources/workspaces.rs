//! Workspace resource.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_records, ResourceWriter};
use crate::net::{ConditionalFetcher, Method};
use crate::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
  pub id: String,
  #[serde(flatten)]
  pub rest: serde_json::Map<String, Value>,
}

#[derive(Clone)]
pub struct Workspaces {
  fetch: ConditionalFetcher,
  writer: ResourceWriter,
}

impl Workspaces {
  pub(crate) fn new(fetch: ConditionalFetcher, writer: ResourceWriter) -> Self {
    Self { fetch, writer }
  }

  pub async fn list(&self) -> Result<Vec<Workspace>> {
    let records = self
      .fetch
      .fetch_collection("/workspaces", EntityStore::Workspaces)
      .await?;
    Ok(decode_records(records))
  }

  pub async fn create(&self, workspace: &Workspace) -> Result<Workspace> {
    let record = serde_json::to_value(workspace)?;
    let body = self
      .writer
      .write(EntityStore::Workspaces, "/workspaces", Method::Post, record)
      .await?;
    decode_workspace(body)
  }

  pub async fn update(&self, workspace: &Workspace) -> Result<Workspace> {
    let record = serde_json::to_value(workspace)?;
    let path = format!("/workspaces/{}", workspace.id);
    let body = self
      .writer
      .write(EntityStore::Workspaces, &path, Method::Put, record)
      .await?;
    decode_workspace(body)
  }

  pub async fn remove(&self, id: &str) -> Result<()> {
    self
      .writer
      .remove(EntityStore::Workspaces, &format!("/workspaces/{}", id), id)
      .await
  }
}

fn decode_workspace(body: Value) -> Result<Workspace> {
  serde_json::from_value(body).map_err(|e| eyre!("Failed to parse workspace: {}", e))
}
