//! Orders and Payment Status
//!
//! The status vocabulary shared by the gateway, the order store and the
//! status endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Payment status as reported by the gateway or recorded on an order
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Pending,
    Approved,
    Accredited,
    Authorized,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    /// Value this build does not know about, kept verbatim
    Other(String),
}

impl PaymentStatus {
    /// Every known status, used to build store filters
    pub const KNOWN: [Self; 10] = [
        Self::Pending,
        Self::Approved,
        Self::Accredited,
        Self::Authorized,
        Self::InProcess,
        Self::InMediation,
        Self::Rejected,
        Self::Cancelled,
        Self::Refunded,
        Self::ChargedBack,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Accredited => "accredited",
            Self::Authorized => "authorized",
            Self::InProcess => "in_process",
            Self::InMediation => "in_mediation",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::ChargedBack => "charged_back",
            Self::Other(s) => s,
        }
    }

    /// Parse a provider or database value; unrecognised values become `Other`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "accredited" => Self::Accredited,
            "authorized" => Self::Authorized,
            "in_process" => Self::InProcess,
            "in_mediation" => Self::InMediation,
            "rejected" => Self::Rejected,
            "cancelled" | "canceled" => Self::Cancelled,
            "refunded" => Self::Refunded,
            "charged_back" => Self::ChargedBack,
            _ => Self::Other(s.to_string()),
        }
    }

    /// Approved and fully accredited
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Approved | Self::Accredited)
    }

    /// No further transition is expected
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved
                | Self::Accredited
                | Self::Rejected
                | Self::Cancelled
                | Self::Refunded
                | Self::ChargedBack
        )
    }

    /// Monotonic progress rank. A stored order only accepts updates whose rank
    /// is at least its current rank.
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Rejected | Self::Cancelled => 1,
            Self::Approved | Self::Accredited => 2,
            Self::Refunded | Self::ChargedBack => 3,
            _ => 0,
        }
    }

    /// Whether an order currently in `self` may be moved to `next`
    pub const fn may_transition_to(&self, next: &Self) -> bool {
        next.rank() >= self.rank()
    }
}

impl Default for PaymentStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PaymentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PaymentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A row of the `orders` table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub external_reference: String,

    #[serde(default)]
    pub status: PaymentStatus,

    /// Gateway payment id, once known
    #[serde(default, with = "id_string::option")]
    pub payment_id: Option<String>,

    /// Last reconciliation
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    /// New order as recorded at checkout
    pub fn pending(external_reference: impl Into<String>) -> Self {
        Self {
            external_reference: external_reference.into(),
            status: PaymentStatus::Pending,
            payment_id: None,
            updated_at: Some(Utc::now()),
        }
    }
}

/// Where a status answer came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    Database,
    Gateway,
}

/// Answer to a status query
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PaymentStatusResult {
    pub id: Option<String>,
    pub status: PaymentStatus,
    pub status_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_approved: Option<String>,
    pub source: StatusSource,
}

/// Payment ids arrive as JSON numbers from the gateway and as strings from
/// notifications and the database; they are handled as strings throughout.
pub(crate) mod id_string {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn from_value(value: &Value) -> Option<String> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
        let value = Value::deserialize(deserializer)?;
        from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("expected a string or numeric id"))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use serde_json::Value;

        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            id: &Option<String>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match id {
                Some(id) => serializer.serialize_str(id),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<String>, D::Error> {
            let value = Option::<Value>::deserialize(deserializer)?;
            Ok(value.as_ref().and_then(super::from_value))
        }
    }
}
