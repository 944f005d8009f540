//! Newtype identifiers for every entity in the system.
//!
//! Each id wraps a UUID so that, for example, an `OrderId` can never be
//! passed where a `CartId` is expected.

/// Defines a UUID-backed identifier newtype.
///
/// Generated types provide `new()` (random v4), `from_uuid()`, `as_uuid()`,
/// `Display`, and transparent serde, plus `From` conversions in both
/// directions.
macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(::uuid::Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(::uuid::Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            pub fn from_uuid(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> ::uuid::Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<::uuid::Uuid> for $name {
            fn from(uuid: ::uuid::Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for ::uuid::Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Identifies a registered shopper.
    UserId
);
define_id!(
    /// Identifies a product category.
    CategoryId
);
define_id!(
    /// Identifies a product (the catalog entry; variants carry the stock).
    ProductId
);
define_id!(
    /// Identifies a purchasable product variant (one SKU).
    VariantId
);
define_id!(
    /// Identifies a promo code.
    PromoId
);
define_id!(
    /// Identifies a shipping address.
    AddressId
);
define_id!(
    /// Identifies a user's cart.
    CartId
);
define_id!(
    /// Identifies an order.
    OrderId
);
define_id!(
    /// Identifies a payment record.
    PaymentId
);
define_id!(
    /// Identifies a stored payment card.
    CardId
);
define_id!(
    /// Identifies a favorite entry.
    FavoriteId
);
