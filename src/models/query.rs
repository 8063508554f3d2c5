use super::transaction::{TransactionType, WalletTransaction};
use crate::error::WalletError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Listing parameters for the transaction table. `page_index` is 1-based.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    pub page_index: Option<usize>,
    pub page_size: Option<usize>,
    pub search_term: Option<String>,
    pub sort_column: Option<String>,
    pub sort_order: Option<SortOrder>,
    #[serde(rename = "type")]
    pub type_: Option<TransactionType>,
    pub clinic_id: Option<Uuid>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagedList<T> {
    pub items: Vec<T>,
    pub page_index: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SortColumn {
    TransactionDate,
    Amount,
    Status,
    Type,
    Description,
}

impl SortColumn {
    fn parse(raw: Option<&str>) -> Result<Self, WalletError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(SortColumn::TransactionDate);
        };

        match raw.to_ascii_lowercase().as_str() {
            "transactiondate" | "date" => Ok(SortColumn::TransactionDate),
            "amount" => Ok(SortColumn::Amount),
            "status" => Ok(SortColumn::Status),
            "type" => Ok(SortColumn::Type),
            "description" => Ok(SortColumn::Description),
            _ => Err(WalletError::InvalidInput(format!("Unknown sort column: {}", raw))),
        }
    }

    fn compare(self, a: &WalletTransaction, b: &WalletTransaction) -> Ordering {
        match self {
            SortColumn::TransactionDate => a.transaction_date.cmp(&b.transaction_date),
            SortColumn::Amount => a.amount.cmp(&b.amount),
            SortColumn::Status => a.status.as_str().cmp(b.status.as_str()),
            SortColumn::Type => format!("{:?}", a.type_).cmp(&format!("{:?}", b.type_)),
            SortColumn::Description => a.description.cmp(&b.description),
        }
    }
}

impl TransactionQuery {
    fn matches(&self, tx: &WalletTransaction, search: Option<&str>) -> bool {
        if self.type_.is_some_and(|t| t != tx.type_) {
            return false;
        }
        if self.clinic_id.is_some_and(|c| c != tx.clinic_id) {
            return false;
        }
        if self.date_from.is_some_and(|from| tx.transaction_date < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| tx.transaction_date > to) {
            return false;
        }
        match search {
            Some(term) => {
                tx.description.to_lowercase().contains(term)
                    || tx.id.to_string().contains(term)
            }
            None => true,
        }
    }

    /// Filters, sorts and pages `transactions`. Ties keep id order so that
    /// paging is stable across calls.
    pub fn apply(
        &self,
        transactions: Vec<WalletTransaction>,
    ) -> Result<PagedList<WalletTransaction>, WalletError> {
        let page_index = self.page_index.unwrap_or(1);
        if page_index == 0 {
            return Err(WalletError::InvalidInput("pageIndex starts at 1".to_string()));
        }
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(WalletError::InvalidInput(format!(
                "pageSize must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }
        let column = SortColumn::parse(self.sort_column.as_deref())?;
        let order = self.sort_order.unwrap_or_default();

        let search = self
            .search_term
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut matching: Vec<WalletTransaction> = transactions
            .into_iter()
            .filter(|tx| self.matches(tx, search.as_deref()))
            .collect();

        matching.sort_by(|a, b| {
            let ord = column.compare(a, b).then_with(|| a.id.cmp(&b.id));
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        });

        let offset = (page_index - 1)
            .checked_mul(page_size)
            .ok_or_else(|| WalletError::InvalidInput("pageIndex is out of range".to_string()))?;

        let total_count = matching.len();
        let items: Vec<WalletTransaction> = matching
            .into_iter()
            .skip(offset)
            .take(page_size)
            .collect();

        Ok(PagedList {
            items,
            page_index,
            page_size,
            total_count,
            has_next_page: offset.saturating_add(page_size) < total_count,
            has_previous_page: page_index > 1,
        })
    }
}
