//! Status vocabularies stored as `VARCHAR` columns.
//!
//! Every enum here round-trips through its upper-case database spelling via
//! `as_str` / `FromStr`, and serializes the same way.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::internal(
                        concat!("parse ", stringify!($name)),
                        anyhow::anyhow!("unknown value {:?}", other),
                    )),
                }
            }
        }
    };
}

string_enum!(
    /// Lifecycle of the order aggregate.
    OrderStatus {
        Pending => "PENDING",
        Created => "CREATED",
        Confirmed => "CONFIRMED",
        Preparing => "PREPARING",
        Ready => "READY",
        Picked => "PICKED",
        Delivered => "DELIVERED",
        Rejected => "REJECTED",
        Cancelled => "CANCELLED",
    }
);

string_enum!(
    /// Per-restaurant sub-state of an order.
    PickupStatus {
        New => "NEW",
        Confirmed => "CONFIRMED",
        Preparing => "PREPARING",
        Ready => "READY",
        Picked => "PICKED",
        Rejected => "REJECTED",
    }
);

string_enum!(
    PaymentStatus {
        Unpaid => "UNPAID",
        Paid => "PAID",
        Refunded => "REFUNDED",
        PartiallyRefunded => "PARTIALLY_REFUNDED",
    }
);

string_enum!(
    PaymentMethod {
        Cod => "COD",
        Bkash => "BKASH",
        Aamarpay => "AAMARPAY",
        Sandbox => "SANDBOX",
        Wallet => "WALLET",
    }
);

string_enum!(
    /// Status of one payment attempt.
    TxnStatus {
        Pending => "PENDING",
        Success => "SUCCESS",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
        Refunded => "REFUNDED",
    }
);

string_enum!(
    RefundStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Processed => "PROCESSED",
        Rejected => "REJECTED",
    }
);

string_enum!(
    ActorType {
        Customer => "CUSTOMER",
        Restaurant => "RESTAURANT",
        Rider => "RIDER",
        PlatformAdmin => "PLATFORM_ADMIN",
        System => "SYSTEM",
    }
);

string_enum!(
    OutboxStatus {
        Pending => "PENDING",
        Processed => "PROCESSED",
        Failed => "FAILED",
    }
);

string_enum!(
    WalletDirection {
        Credit => "CREDIT",
        Debit => "DEBIT",
    }
);

string_enum!(
    WalletSource {
        Refund => "REFUND",
        PromoCashback => "PROMO_CASHBACK",
        Topup => "TOPUP",
        OrderPayment => "ORDER_PAYMENT",
    }
);

string_enum!(
    PromoType {
        Fixed => "FIXED",
        Percent => "PERCENT",
    }
);

string_enum!(
    /// What a promo's restriction list refers to.
    PromoAppliesTo {
        All => "ALL",
        SpecificRestaurant => "SPECIFIC_RESTAURANT",
        Category => "CATEGORY",
    }
);

impl PaymentMethod {
    /// Methods settled through an external gateway before the restaurant sees the order.
    pub fn is_online(&self) -> bool {
        matches!(
            self,
            PaymentMethod::Bkash | PaymentMethod::Aamarpay | PaymentMethod::Sandbox
        )
    }

    pub fn from_path(segment: &str) -> Option<Self> {
        segment.to_ascii_uppercase().parse().ok()
    }
}

impl OrderStatus {
    pub fn initial_for(method: PaymentMethod) -> Self {
        if method.is_online() {
            OrderStatus::Pending
        } else {
            OrderStatus::Created
        }
    }
}

impl TxnStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, TxnStatus::Pending)
    }
}
