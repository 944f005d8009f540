//! Payment records and the order-status rules they drive.
//!
//! The payment here is a local status flag, not a gateway integration. The
//! source system reacted to payment saves through an ambient signal; these
//! are the same rules as explicit functions, called by the store operations
//! that mutate payments.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};

use crate::order::OrderStatus;

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// How the payment is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Cash,
    #[default]
    CreditCard,
}

impl PaymentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentKind::Cash => "cash",
            PaymentKind::CreditCard => "credit_card",
        }
    }
}

impl std::str::FromStr for PaymentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cash" => Ok(PaymentKind::Cash),
            "credit_card" => Ok(PaymentKind::CreditCard),
            other => Err(format!("unknown payment kind: {other}")),
        }
    }
}

/// The card network or wallet used for a card payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    PaymeCard,
    #[default]
    PaypalCard,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::PaymeCard => "payme_card",
            PaymentMethod::PaypalCard => "paypal_card",
        }
    }
}

impl std::str::FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "payme_card" => Ok(PaymentMethod::PaymeCard),
            "paypal_card" => Ok(PaymentMethod::PaypalCard),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

/// A payment record, 1:1 with its order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub kind: PaymentKind,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub last_four: String,
    pub exp_date: String,
    pub created_at: DateTime<Utc>,
}

/// Order status change on payment creation.
///
/// Creating a (pending) payment re-affirms the order's Pending status: the
/// move is Pending → Pending, and nothing else. An order in any other
/// status is left untouched.
pub fn order_status_on_creation(current: OrderStatus) -> Option<OrderStatus> {
    (current == OrderStatus::Pending).then_some(OrderStatus::Pending)
}

/// Order status change on payment completion.
///
/// Advances Pending → Accepted exactly once. Completing a payment for an
/// order in any other status is recorded but triggers no transition, so a
/// duplicate completion cannot re-fire side effects.
pub fn order_status_after_completion(current: OrderStatus) -> Option<OrderStatus> {
    (current == OrderStatus::Pending).then_some(OrderStatus::Accepted)
}
