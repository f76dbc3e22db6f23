//! Typed identifiers. Every entity gets its own newtype so a
//! `PlayerId` can never slip into a call site expecting a `SessionId`.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }

        impl From<$name> for i64 {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

id_type!(PlayerId);
id_type!(AccountId);
id_type!(PaymentId);
id_type!(QueueEntryId);
id_type!(SessionId);
id_type!(WithdrawId);
