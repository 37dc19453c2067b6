//! Calendar accounts resource.
//!
//! Accounts are linked through the host application's OAuth flow; this
//! engine only syncs the resulting account list and handles
//! disconnects.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{decode_records, ResourceWriter};
use crate::net::ConditionalFetcher;
use crate::store::EntityStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarAccount {
  pub id: String,
  #[serde(flatten)]
  pub rest: serde_json::Map<String, Value>,
}

#[derive(Clone)]
pub struct CalendarAccounts {
  fetch: ConditionalFetcher,
  writer: ResourceWriter,
}

impl CalendarAccounts {
  pub(crate) fn new(fetch: ConditionalFetcher, writer: ResourceWriter) -> Self {
    Self { fetch, writer }
  }

  pub async fn list(&self) -> Result<Vec<CalendarAccount>> {
    let records = self
      .fetch
      .fetch_collection("/calendar/accounts", EntityStore::CalendarAccounts)
      .await?;
    Ok(decode_records(records))
  }

  pub async fn disconnect(&self, id: &str) -> Result<()> {
    self
      .writer
      .remove(
        EntityStore::CalendarAccounts,
        &format!("/calendar/accounts/{}", id),
        id,
      )
      .await
  }
}
