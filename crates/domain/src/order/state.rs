//! Order lifecycle.

use serde::{Deserialize, Serialize};

/// Where an order is in its lifecycle.
///
/// ```text
/// Draft ──► Submitted
///   │           │
///   └───────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Lines can be added, changed and removed.
    #[default]
    Draft,

    /// Lines are frozen.
    Submitted,

    /// Terminal.
    Cancelled,
}

impl OrderStatus {
    pub fn can_modify_lines(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    pub fn can_submit(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Draft | OrderStatus::Submitted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "Draft",
            OrderStatus::Submitted => "Submitted",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
