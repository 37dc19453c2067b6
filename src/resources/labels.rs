//! Label resource.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_records, ResourceWriter};
use crate::net::{ConditionalFetcher, Method};
use crate::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
  pub id: String,
  #[serde(flatten)]
  pub rest: serde_json::Map<String, Value>,
}

#[derive(Clone)]
pub struct Labels {
  fetch: ConditionalFetcher,
  writer: ResourceWriter,
}

impl Labels {
  pub(crate) fn new(fetch: ConditionalFetcher, writer: ResourceWriter) -> Self {
    Self { fetch, writer }
  }

  pub async fn list(&self) -> Result<Vec<Label>> {
    let records = self
      .fetch
      .fetch_collection("/labels", EntityStore::Labels)
      .await?;
    Ok(decode_records(records))
  }

  pub async fn create(&self, label: &Label) -> Result<Label> {
    let record = serde_json::to_value(label)?;
    let body = self
      .writer
      .write(EntityStore::Labels, "/labels", Method::Post, record)
      .await?;
    decode_label(body)
  }

  pub async fn update(&self, label: &Label) -> Result<Label> {
    let record = serde_json::to_value(label)?;
    let path = format!("/labels/{}", label.id);
    let body = self
      .writer
      .write(EntityStore::Labels, &path, Method::Put, record)
      .await?;
    decode_label(body)
  }

  pub async fn remove(&self, id: &str) -> Result<()> {
    self
      .writer
      .remove(EntityStore::Labels, &format!("/labels/{}", id), id)
      .await
  }
}

fn decode_label(body: Value) -> Result<Label> {
  serde_json::from_value(body).map_err(|e| eyre!("Failed to parse label: {}", e))
}
