//! Account transactions

use async_trait::async_trait;
use n26_clock::UnixTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// A transaction as listed by the N26 API
///
/// Fields the API leaves out take their default value. Fields not listed
/// here are ignored.
#[allow(missing_docs)]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub amount: f64,
    pub currency_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merchant_country_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcc: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcc_group: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_iban: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_bic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner_bank_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<Uuid>,
    pub category: String,
    #[serde(rename = "transactionNature")]
    pub nature: String,
    pub pending: bool,
    pub recurring: bool,
    /// Milliseconds since the Unix epoch
    #[serde(rename = "visibleTS")]
    pub visible_ts: i64,
    /// Milliseconds since the Unix epoch
    #[serde(rename = "createdTS")]
    pub created_ts: i64,
    pub user_certified: i64,
    pub confirmed: i64,
    pub smart_link_id: Uuid,
    pub link_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txn_condition: Option<String>,
}

/// Finds transactions
#[async_trait]
pub trait TransactionFinder: Send + Sync {
    /// Finds every transaction between `from` and `to`, following pagination
    async fn find_all_transactions_in_range(
        &self,
        from: UnixTime,
        to: UnixTime,
    ) -> Result<Vec<Transaction>, Error>;
}

/// Query parameters of `GET /api/smrt/transactions`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TransactionsQuery {
    pub from: u64,
    pub to: u64,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_id: Option<Uuid>,
}
