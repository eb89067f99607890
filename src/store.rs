use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Row};

use crate::error::{DashError, Result};
use crate::models::{Adjustment, AdjustmentUpdate, ExpenseEntry, NewExpense, UserAccount};

// ---------------------------------------------------------------------------
// Expenses
// ---------------------------------------------------------------------------

const EXPENSE_COLUMNS: &str = "id, company_code, company_name, description, amount, expense_date, \
     category, notes, created_by, created_at";

fn expense_from_row(row: &Row) -> rusqlite::Result<ExpenseEntry> {
    Ok(ExpenseEntry {
        id: row.get(0)?,
        company_code: row.get(1)?,
        company_name: row.get(2)?,
        description: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        amount: row.get(4)?,
        expense_date: row.get(5)?,
        category: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        notes: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        created_by: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        created_at: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
    })
}

fn normalize_date(raw: Option<&str>) -> Result<String> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(chrono::Local::now().format("%Y-%m-%d").to_string()),
        Some(s) => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(|d| d.format("%Y-%m-%d").to_string())
            .map_err(|_| DashError::InvalidInput(format!("expense_date must be YYYY-MM-DD, got '{s}'"))),
    }
}

pub fn add_expense(conn: &Connection, expense: &NewExpense, created_by: &str) -> Result<i64> {
    let code = expense.company_code.trim();
    if code.is_empty() {
        return Err(DashError::InvalidInput("company_code is required".to_string()));
    }
    if !expense.amount.is_finite() {
        return Err(DashError::InvalidInput("amount must be a number".to_string()));
    }
    let date = normalize_date(expense.expense_date.as_deref())?;
    conn.execute(
        "INSERT INTO expenses (company_code, company_name, description, amount, expense_date, category, notes, created_by) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            code,
            expense.company_name,
            expense.description,
            expense.amount,
            date,
            expense.category,
            expense.notes,
            created_by,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_expenses(conn: &Connection, company_code: Option<&str>) -> Result<Vec<ExpenseEntry>> {
    let rows = match company_code {
        Some(code) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE company_code = ?1 \
                 ORDER BY expense_date DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([code], expense_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses ORDER BY expense_date DESC, id DESC"
            ))?;
            let rows = stmt
                .query_map([], expense_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

/// Returns `false` when no row had that id.
pub fn delete_expense(conn: &Connection, expense_id: i64) -> Result<bool> {
    let affected = conn.execute("DELETE FROM expenses WHERE id = ?1", [expense_id])?;
    Ok(affected > 0)
}

pub fn expense_totals(conn: &Connection) -> Result<HashMap<String, f64>> {
    let mut stmt = conn.prepare("SELECT company_code, SUM(amount) FROM expenses GROUP BY company_code")?;
    let totals = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;
    Ok(totals)
}

pub fn total_expenses(conn: &Connection) -> Result<f64> {
    let total: Option<f64> = conn.query_row("SELECT SUM(amount) FROM expenses", [], |r| r.get(0))?;
    Ok(total.unwrap_or(0.0))
}

// ---------------------------------------------------------------------------
// Adjustments
// ---------------------------------------------------------------------------

const ADJUSTMENT_COLUMNS: &str =
    "company_code, company_name, contract_value, spent_value, reason, created_at, updated_at";

fn adjustment_from_row(row: &Row) -> rusqlite::Result<Adjustment> {
    Ok(Adjustment {
        company_code: row.get(0)?,
        company_name: row.get(1)?,
        contract_value: row.get(2)?,
        spent_value: row.get(3)?,
        reason: row.get::<_, Option<String>>(4)?.filter(|r| !r.is_empty()),
        created_at: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        updated_at: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
    })
}

/// Insert an adjustment, or update only the fields that are set. The reason
/// is replaced only when non-empty.
pub fn set_adjustment(conn: &Connection, update: &AdjustmentUpdate) -> Result<()> {
    let code = update.company_code.trim();
    if code.is_empty() {
        return Err(DashError::InvalidInput("company_code is required".to_string()));
    }
    conn.execute(
        "INSERT INTO company_adjustments (company_code, company_name, contract_value, spent_value, reason) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(company_code) DO UPDATE SET \
             contract_value = COALESCE(excluded.contract_value, company_adjustments.contract_value), \
             spent_value = COALESCE(excluded.spent_value, company_adjustments.spent_value), \
             reason = CASE WHEN excluded.reason <> '' THEN excluded.reason ELSE company_adjustments.reason END, \
             updated_at = datetime('now')",
        rusqlite::params![
            code,
            update.company_name,
            update.contract_value,
            update.spent_value,
            update.reason,
        ],
    )?;
    Ok(())
}

pub fn get_adjustment(conn: &Connection, company_code: &str) -> Result<Option<Adjustment>> {
    let adj = conn
        .query_row(
            &format!("SELECT {ADJUSTMENT_COLUMNS} FROM company_adjustments WHERE company_code = ?1"),
            [company_code],
            adjustment_from_row,
        )
        .optional()?;
    Ok(adj)
}

pub fn list_adjustments(conn: &Connection) -> Result<Vec<Adjustment>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ADJUSTMENT_COLUMNS} FROM company_adjustments ORDER BY company_name"
    ))?;
    let rows = stmt
        .query_map([], adjustment_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn adjustments_by_code(conn: &Connection) -> Result<HashMap<String, Adjustment>> {
    Ok(list_adjustments(conn)?
        .into_iter()
        .map(|a| (a.company_code.clone(), a))
        .collect())
}

pub fn clear_adjustment(conn: &Connection, company_code: &str) -> Result<bool> {
    let affected = conn.execute(
        "DELETE FROM company_adjustments WHERE company_code = ?1",
        [company_code],
    )?;
    Ok(affected > 0)
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub fn user_exists(conn: &Connection, username: &str) -> Result<bool> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM users WHERE username = ?1")?;
    Ok(stmt.exists([username])?)
}

pub fn create_user(conn: &Connection, username: &str, password_hash: &str, full_name: &str) -> Result<i64> {
    let username = username.trim();
    if username.is_empty() {
        return Err(DashError::InvalidInput("username is required".to_string()));
    }
    if user_exists(conn, username)? {
        return Err(DashError::UserExists(username.to_string()));
    }
    conn.execute(
        "INSERT INTO users (username, password, full_name) VALUES (?1, ?2, ?3)",
        rusqlite::params![username, password_hash, full_name],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Look up a user together with the stored password hash.
pub fn find_user_with_hash(conn: &Connection, username: &str) -> Result<Option<(UserAccount, String)>> {
    let found = conn
        .query_row(
            "SELECT id, username, full_name, password FROM users WHERE username = ?1",
            [username],
            |row| {
                Ok((
                    UserAccount {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        full_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    },
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;
    Ok(found)
}

pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<UserAccount>> {
    let user = conn
        .query_row(
            "SELECT id, username, full_name FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(UserAccount {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    full_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            },
        )
        .optional()?;
    Ok(user)
}

pub fn count_users(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT count(*) FROM users", [], |r| r.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn expense(code: &str, amount: f64, date: &str) -> NewExpense {
        NewExpense {
            company_code: code.to_string(),
            company_name: format!("Company {code}"),
            amount,
            expense_date: Some(date.to_string()),
            description: "Invoice".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_add_and_list_expenses() {
        let (_dir, conn) = test_db();
        add_expense(&conn, &expense("001", 100.0, "2025-01-10"), "alice").unwrap();
        add_expense(&conn, &expense("001", 50.0, "2025-02-10"), "alice").unwrap();
        add_expense(&conn, &expense("002", 75.0, "2025-01-15"), "bob").unwrap();

        let all = list_expenses(&conn, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].expense_date, "2025-02-10");

        let only = list_expenses(&conn, Some("001")).unwrap();
        assert_eq!(only.len(), 2);
        assert!(only.iter().all(|e| e.company_code == "001"));
        assert_eq!(only[0].created_by, "alice");
    }

    #[test]
    fn test_add_expense_defaults_date_to_today() {
        let (_dir, conn) = test_db();
        let mut e = expense("001", 10.0, "");
        e.expense_date = None;
        add_expense(&conn, &e, "system").unwrap();
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        assert_eq!(list_expenses(&conn, None).unwrap()[0].expense_date, today);
    }

    #[test]
    fn test_add_expense_rejects_bad_input() {
        let (_dir, conn) = test_db();
        assert!(matches!(
            add_expense(&conn, &expense("", 10.0, "2025-01-01"), "x"),
            Err(DashError::InvalidInput(_))
        ));
        assert!(matches!(
            add_expense(&conn, &expense("001", 10.0, "01/02/2025"), "x"),
            Err(DashError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_expense_totals() {
        let (_dir, conn) = test_db();
        add_expense(&conn, &expense("001", 100.0, "2025-01-10"), "a").unwrap();
        add_expense(&conn, &expense("001", 200.0, "2025-01-11"), "a").unwrap();
        add_expense(&conn, &expense("002", 5.5, "2025-01-12"), "a").unwrap();
        let totals = expense_totals(&conn).unwrap();
        assert_eq!(totals.get("001"), Some(&300.0));
        assert_eq!(totals.get("999"), None);
        assert_eq!(totals.get("002"), Some(&5.5));
        assert_eq!(total_expenses(&conn).unwrap(), 305.5);
    }

    #[test]
    fn test_delete_expense() {
        let (_dir, conn) = test_db();
        let id = add_expense(&conn, &expense("001", 100.0, "2025-01-10"), "a").unwrap();
        assert!(delete_expense(&conn, id).unwrap());
        assert!(!delete_expense(&conn, id).unwrap());
        assert!(expense_totals(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_set_adjustment_inserts_then_partially_updates() {
        let (_dir, conn) = test_db();
        set_adjustment(&conn, &AdjustmentUpdate {
            company_code: "001".to_string(),
            company_name: "Acme".to_string(),
            contract_value: Some(5000.0),
            spent_value: None,
            reason: "Amendment 1".to_string(),
        }).unwrap();
        set_adjustment(&conn, &AdjustmentUpdate {
            company_code: "001".to_string(),
            company_name: "Acme".to_string(),
            contract_value: None,
            spent_value: Some(400.0),
            reason: String::new(),
        }).unwrap();

        let adj = get_adjustment(&conn, "001").unwrap().unwrap();
        assert_eq!(adj.contract_value, Some(5000.0));
        assert_eq!(adj.spent_value, Some(400.0));
        assert_eq!(adj.reason.as_deref(), Some("Amendment 1"));
        assert_eq!(list_adjustments(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_clear_adjustment() {
        let (_dir, conn) = test_db();
        set_adjustment(&conn, &AdjustmentUpdate {
            company_code: "001".to_string(),
            company_name: "Acme".to_string(),
            spent_value: Some(1.0),
            ..Default::default()
        }).unwrap();
        assert!(clear_adjustment(&conn, "001").unwrap());
        assert!(get_adjustment(&conn, "001").unwrap().is_none());
        assert!(adjustments_by_code(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_users() {
        let (_dir, conn) = test_db();
        let id = create_user(&conn, "maria", "sha256$aa$bb", "Maria Silva").unwrap();
        assert!(user_exists(&conn, "maria").unwrap());
        assert!(matches!(
            create_user(&conn, "maria", "x", ""),
            Err(DashError::UserExists(_))
        ));
        let (user, hash) = find_user_with_hash(&conn, "maria").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(hash, "sha256$aa$bb");
        assert_eq!(get_user(&conn, id).unwrap().unwrap().full_name, "Maria Silva");
        assert!(find_user_with_hash(&conn, "nobody").unwrap().is_none());
        assert_eq!(count_users(&conn).unwrap(), 1);
    }
}
