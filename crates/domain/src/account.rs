//! User-owned records: users, addresses, cards, favorites, promo codes.
//!
//! Plain storage with uniqueness and ownership invariants only; every store
//! operation on them is scoped to the authenticated user.

use chrono::{DateTime, Utc};
use common::{AddressId, CardId, FavoriteId, ProductId, PromoId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// A registered shopper. Email is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A shipping destination with its delivery cost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub id: AddressId,
    pub user_id: UserId,
    pub recipient_name: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub phone_number: String,
    pub is_default: bool,
    pub shipping_cost: Money,
    pub created_at: DateTime<Utc>,
}

/// A discount code. Recorded on carts and orders; totals do not subtract
/// the discount (the source system never did).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoCode {
    pub id: PromoId,
    pub code: String,
    pub discount_percent: u8,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl PromoCode {
    /// Returns true if the code can be applied at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.valid_from <= now && now <= self.valid_until
    }
}

/// A saved favorite, unique per (user, product).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub id: FavoriteId,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub created_at: DateTime<Utc>,
}

/// A stored payment card. Only the last four digits are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCard {
    pub id: CardId,
    pub user_id: UserId,
    pub last_four: String,
    pub brand: String,
    pub exp_date: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}
