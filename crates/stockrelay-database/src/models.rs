//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Movement record - one inventory change event destined for the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Movement {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub integration_id: String,
    pub movement_type: MovementType,
    pub sku: String,
    pub quantity: i64,
    pub order_id: Option<String>,
    /// Free-form tag from the upstream event source (e.g. "order_paid").
    pub event_type: String,
    /// Opaque payload carried through to the adapter.
    pub metadata: serde_json::Value,
    pub status: MovementStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Claim lease. Non-null exactly while a worker holds the movement.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Movement direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    /// Stock entering the store.
    Ingreso,
    /// Stock leaving the store.
    Egreso,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingreso => "ingreso",
            Self::Egreso => "egreso",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "egreso" => Self::Egreso,
            _ => Self::Ingreso,
        }
    }
}

/// Movement lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl Default for MovementStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl MovementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Terminal states receive no further automatic transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Input for appending a new movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMovement {
    pub tenant_id: String,
    pub store_id: String,
    pub integration_id: String,
    pub movement_type: MovementType,
    pub sku: String,
    pub quantity: i64,
    pub order_id: Option<String>,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub max_attempts: i32,
}

impl NewMovement {
    /// Check creation invariants. Returns the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.quantity <= 0 {
            return Err(format!("quantity must be positive, got {}", self.quantity));
        }
        if self.sku.trim().is_empty() {
            return Err("sku must not be empty".to_string());
        }
        if self.store_id.trim().is_empty() {
            return Err("store_id must not be empty".to_string());
        }
        if self.tenant_id.trim().is_empty() {
            return Err("tenant_id must not be empty".to_string());
        }
        if self.integration_id.trim().is_empty() {
            return Err("integration_id must not be empty".to_string());
        }
        if self.max_attempts < 1 {
            return Err(format!(
                "max_attempts must be at least 1, got {}",
                self.max_attempts
            ));
        }
        Ok(())
    }
}

/// Unmapped SKU record - a product identifier the platform could not resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmappedSku {
    pub id: String,
    pub tenant_id: String,
    pub store_id: String,
    pub sku: String,
    pub product_name: Option<String>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrences: i64,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing movements.
#[derive(Debug, Clone, Default)]
pub struct MovementFilter {
    pub status: Option<MovementStatus>,
    pub movement_type: Option<MovementType>,
    pub store_id: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// 1-based page number. Zero is treated as 1.
    pub page: u32,
    /// Page size. Zero falls back to the default of 50.
    pub limit: u32,
}

/// Pagination envelope metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// One page of movements plus pagination metadata.
#[derive(Debug, Clone, Serialize)]
pub struct MovementPage {
    pub items: Vec<Movement>,
    pub pagination: Pagination,
}

/// Rolling operational snapshot over the movement store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovementStats {
    pub pending: i64,
    pub processing: i64,
    /// Completed within the trailing 24 hours (by processed_at).
    pub completed_24h: i64,
    /// Failed within the trailing 24 hours (by last_attempt_at).
    pub failed_24h: i64,
    /// completed_24h / (completed_24h + failed_24h); 1.0 when the
    /// denominator is zero.
    pub success_rate: f64,
    /// Unresolved unmapped-SKU rows awaiting operator action.
    pub unmapped_unresolved: i64,
}
