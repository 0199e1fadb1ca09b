use super::money::round_currency;
use super::order::OrderId;
use super::user::UserId;
use crate::error::MarketplaceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A 1 to 5 star rating.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> Result<Self, MarketplaceError> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(MarketplaceError::ValidationError(format!(
                "Rating must be between 1 and 5, got {value}"
            )))
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = MarketplaceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Review {
    pub id: u64,
    pub order_id: OrderId,
    pub reviewer: UserId,
    pub technician: UserId,
    pub rating: Rating,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Mean of the ratings, rounded to two decimals. `None` for no reviews.
pub fn average_rating<'a>(reviews: impl IntoIterator<Item = &'a Review>) -> Option<Decimal> {
    let (sum, count) = reviews
        .into_iter()
        .fold((0u32, 0u32), |(sum, count), review| {
            (sum + u32::from(review.rating.value()), count + 1)
        });
    (count > 0).then(|| round_currency(Decimal::from(sum) / Decimal::from(count)))
}
