use super::user::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type PaymentMethodId = u64;

/// A card the gateway tokenized during a top-up, reusable for later ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub user: UserId,
    pub card_type: String,
    pub masked_pan: String,
    /// `YEAR/MONTH` as reported by the gateway.
    pub expiration_date: Option<String>,
    /// Gateway token charged in place of the card number.
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethod {
    pub fn belongs_to(&self, user: UserId) -> bool {
        self.user == user
    }

    pub fn last_four_digits(&self) -> &str {
        let start = self
            .masked_pan
            .char_indices()
            .rev()
            .nth(3)
            .map_or(0, |(index, _)| index);
        &self.masked_pan[start..]
    }
}

/// Joins the gateway's expiry fields, `None` unless both are present.
pub fn expiration_date(year: Option<&str>, month: Option<&str>) -> Option<String> {
    match (year, month) {
        (Some(year), Some(month)) if !year.is_empty() && !month.is_empty() => {
            Some(format!("{year}/{month}"))
        }
        _ => None,
    }
}
