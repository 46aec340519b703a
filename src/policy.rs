use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, Result};
use crate::filter::TenantId;

/// Stock-level thresholds used to classify a computed quantity.
///
/// - in stock: `quantity >= in_stock_min`
/// - low stock: `out_of_stock_max < quantity < in_stock_min`
/// - out of stock: `quantity <= out_of_stock_max`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockPolicy {
    pub in_stock_min: i64,
    pub out_of_stock_max: i64,
}

impl Default for StockPolicy {
    fn default() -> Self {
        Self {
            in_stock_min: 50,
            out_of_stock_max: 0,
        }
    }
}

impl StockPolicy {
    pub fn new(in_stock_min: i64, out_of_stock_max: i64) -> Result<Self> {
        let policy = Self {
            in_stock_min,
            out_of_stock_max,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        self.check().map_err(Error::InvalidPolicy)
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.in_stock_min <= self.out_of_stock_max {
            return Err(format!(
                "in-stock minimum ({}) must be greater than out-of-stock maximum ({})",
                self.in_stock_min, self.out_of_stock_max
            ));
        }
        Ok(())
    }

    pub fn classify(&self, quantity: i64) -> StockBucket {
        if quantity >= self.in_stock_min {
            StockBucket::InStock
        } else if quantity <= self.out_of_stock_max {
            StockBucket::OutOfStock
        } else {
            StockBucket::LowStock
        }
    }

    /// Query-operator document selecting the quantities in `bucket`.
    pub fn range(&self, bucket: StockBucket) -> Value {
        match bucket {
            StockBucket::InStock => json!({ "$gte": self.in_stock_min }),
            StockBucket::LowStock => {
                json!({ "$gt": self.out_of_stock_max, "$lt": self.in_stock_min })
            }
            StockBucket::OutOfStock => json!({ "$lte": self.out_of_stock_max }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StockBucket {
    InStock,
    LowStock,
    OutOfStock,
}

impl StockBucket {
    /// Accepts the dashboard labels and their short forms, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "in stock" | "available" => Some(StockBucket::InStock),
            "low stock" | "low" => Some(StockBucket::LowStock),
            "out of stock" | "empty" => Some(StockBucket::OutOfStock),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            StockBucket::InStock => "In Stock",
            StockBucket::LowStock => "Low Stock",
            StockBucket::OutOfStock => "Out of Stock",
        }
    }
}

/// A default policy plus per-tenant overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantPolicies {
    #[serde(default)]
    pub default: StockPolicy,
    #[serde(default)]
    pub tenants: HashMap<String, StockPolicy>,
}

impl TenantPolicies {
    pub fn new(default: StockPolicy) -> Self {
        Self {
            default,
            tenants: HashMap::new(),
        }
    }

    pub fn with_override(mut self, tenant: &str, policy: StockPolicy) -> Self {
        self.tenants.insert(tenant.to_string(), policy);
        self
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let policies: TenantPolicies = serde_json::from_value(value.clone())?;
        policies.validate()?;
        Ok(policies)
    }

    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for (tenant, policy) in &self.tenants {
            if let Err(reason) = policy.check() {
                return Err(Error::InvalidPolicy(format!("tenant '{tenant}': {reason}")));
            }
        }
        Ok(())
    }

    pub fn policy_for(&self, tenant: &TenantId) -> StockPolicy {
        self.tenants
            .get(tenant.as_str())
            .copied()
            .unwrap_or(self.default)
    }
}
