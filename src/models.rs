use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

/// Utilization tier derived from the spend/contract ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warning,
    Critical,
}

impl Status {
    pub fn from_percentage(percentage: f64) -> Self {
        if percentage > 90.0 {
            Status::Critical
        } else if percentage > 70.0 {
            Status::Warning
        } else {
            Status::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One company as shown on the dashboard. Percentage and status are derived
/// on every read and never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyRecord {
    pub code: String,
    pub name: String,
    pub contract_value: f64,
    pub spent_value: f64,
}

impl CompanyRecord {
    pub fn new(code: impl Into<String>, name: impl Into<String>, contract_value: f64, spent_value: f64) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            contract_value,
            spent_value,
        }
    }

    fn ratio(&self) -> f64 {
        if self.contract_value > 0.0 {
            self.spent_value / self.contract_value * 100.0
        } else {
            0.0
        }
    }

    pub fn percentage(&self) -> f64 {
        round2(self.ratio())
    }

    /// Tier of the published percentage, so the two fields always agree.
    pub fn status(&self) -> Status {
        Status::from_percentage(self.percentage())
    }

    pub fn available(&self) -> f64 {
        self.contract_value - self.spent_value
    }
}

impl Serialize for CompanyRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("CompanyRecord", 6)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("name", &self.name)?;
        s.serialize_field("contract_value", &self.contract_value)?;
        s.serialize_field("spent_value", &self.spent_value)?;
        s.serialize_field("percentage", &self.percentage())?;
        s.serialize_field("status", &self.status())?;
        s.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Adjustment {
    pub company_code: String,
    pub company_name: String,
    pub contract_value: Option<f64>,
    pub spent_value: Option<f64>,
    pub reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Write shape for an adjustment. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct AdjustmentUpdate {
    pub company_code: String,
    pub company_name: String,
    pub contract_value: Option<f64>,
    pub spent_value: Option<f64>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpenseEntry {
    pub id: i64,
    pub company_code: String,
    pub company_name: String,
    pub description: String,
    pub amount: f64,
    pub expense_date: String,
    pub category: String,
    pub notes: String,
    pub created_by: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewExpense {
    pub company_code: String,
    pub company_name: String,
    pub amount: f64,
    pub description: String,
    pub expense_date: Option<String>,
    pub category: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_contracted: f64,
    pub total_spent: f64,
    pub average_utilization: f64,
    pub companies_count: usize,
}

/// The blob served at `/api/data` and pushed to every client.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub companies: Vec<CompanyRecord>,
    pub statistics: Statistics,
    pub last_update: Option<String>,
    pub file_path: Option<String>,
}

impl Snapshot {
    pub fn company(&self, code: &str) -> Option<&CompanyRecord> {
        self.companies.iter().find(|c| c.code == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_above_ninety() {
        let c = CompanyRecord::new("001", "Acme", 1000.0, 950.0);
        assert_eq!(c.percentage(), 95.0);
        assert_eq!(c.status(), Status::Critical);
    }

    #[test]
    fn test_zero_contract_is_zero_percent() {
        let c = CompanyRecord::new("001", "Acme", 0.0, 5000.0);
        assert_eq!(c.percentage(), 0.0);
        assert_eq!(c.status(), Status::Ok);
    }

    #[test]
    fn test_status_boundaries() {
        assert_eq!(Status::from_percentage(90.0), Status::Warning);
        assert_eq!(Status::from_percentage(90.01), Status::Critical);
        assert_eq!(Status::from_percentage(70.0), Status::Ok);
        assert_eq!(Status::from_percentage(70.5), Status::Warning);
    }

    #[test]
    fn test_percentage_rounds_to_two_places() {
        let c = CompanyRecord::new("001", "Acme", 3.0, 1.0);
        assert_eq!(c.percentage(), 33.33);
    }

    #[test]
    fn test_status_follows_rounded_percentage() {
        let c = CompanyRecord::new("001", "Acme", 1000.0, 900.04);
        assert_eq!(c.percentage(), 90.0);
        assert_eq!(c.status(), Status::Warning);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["percentage"], 90.0);
        assert_eq!(json["status"], "warning");
    }

    #[test]
    fn test_serializes_derived_fields() {
        let c = CompanyRecord::new("042", "Beta", 200.0, 150.0);
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["code"], "042");
        assert_eq!(json["percentage"], 75.0);
        assert_eq!(json["status"], "warning");
    }
}
