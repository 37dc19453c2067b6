//! Group resource.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_records, ResourceWriter};
use crate::net::{ConditionalFetcher, Method};
use crate::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
  pub id: String,
  #[serde(flatten)]
  pub rest: serde_json::Map<String, Value>,
}

#[derive(Clone)]
pub struct Groups {
  fetch: ConditionalFetcher,
  writer: ResourceWriter,
}

impl Groups {
  pub(crate) fn new(fetch: ConditionalFetcher, writer: ResourceWriter) -> Self {
    Self { fetch, writer }
  }

  pub async fn list(&self) -> Result<Vec<Group>> {
    let records = self
      .fetch
      .fetch_collection("/groups", EntityStore::Groups)
      .await?;
    Ok(decode_records(records))
  }

  pub async fn create(&self, group: &Group) -> Result<Group> {
    let record = serde_json::to_value(group)?;
    let body = self
      .writer
      .write(EntityStore::Groups, "/groups", Method::Post, record)
      .await?;
    decode_group(body)
  }

  pub async fn update(&self, group: &Group) -> Result<Group> {
    let record = serde_json::to_value(group)?;
    let path = format!("/groups/{}", group.id);
    let body = self
      .writer
      .write(EntityStore::Groups, &path, Method::Put, record)
      .await?;
    decode_group(body)
  }

  pub async fn remove(&self, id: &str) -> Result<()> {
    self
      .writer
      .remove(EntityStore::Groups, &format!("/groups/{}", id), id)
      .await
  }
}

fn decode_group(body: Value) -> Result<Group> {
  serde_json::from_value(body).map_err(|e| eyre!("Failed to parse group: {}", e))
}
