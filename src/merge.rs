use std::collections::HashMap;

use crate::models::{round2, Adjustment, CompanyRecord, Statistics};

/// Spend shown for a company: a manual override if set, otherwise the sum of
/// its expense entries when positive, otherwise the spreadsheet figure.
pub fn resolve_spend(sheet_spend: f64, adjustment: Option<&Adjustment>, expense_total: Option<f64>) -> f64 {
    if let Some(spent) = adjustment.and_then(|a| a.spent_value) {
        return spent;
    }
    match expense_total {
        Some(total) if total > 0.0 => total,
        _ => sheet_spend,
    }
}

pub fn resolve_contract(sheet_contract: f64, adjustment: Option<&Adjustment>) -> f64 {
    adjustment
        .and_then(|a| a.contract_value)
        .unwrap_or(sheet_contract)
}

/// Apply adjustments and expense totals to the spreadsheet-derived records.
/// Every recomputation path goes through here.
pub fn merge(
    base: &[CompanyRecord],
    adjustments: &HashMap<String, Adjustment>,
    expense_totals: &HashMap<String, f64>,
) -> Vec<CompanyRecord> {
    base.iter()
        .map(|company| {
            let adjustment = adjustments.get(&company.code);
            let expenses = expense_totals.get(&company.code).copied();
            CompanyRecord {
                contract_value: resolve_contract(company.contract_value, adjustment),
                spent_value: resolve_spend(company.spent_value, adjustment, expenses),
                ..company.clone()
            }
        })
        .collect()
}

pub fn statistics(companies: &[CompanyRecord]) -> Statistics {
    let total_contracted: f64 = companies.iter().map(|c| c.contract_value).sum();
    let total_spent: f64 = companies.iter().map(|c| c.spent_value).sum();
    let average_utilization = if total_contracted > 0.0 {
        round2(total_spent / total_contracted * 100.0)
    } else {
        0.0
    };
    Statistics {
        total_contracted,
        total_spent,
        average_utilization,
        companies_count: companies.len(),
    }
}
