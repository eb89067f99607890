use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rusqlite::Connection;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::error::{DashError, Result};
use crate::merge::{merge, statistics};
use crate::models::{Adjustment, AdjustmentUpdate, CompanyRecord, ExpenseEntry, NewExpense, Snapshot};
use crate::workbook::{parse_workbook, SheetNames};
use crate::{export, store};

pub(crate) const EVENT_CAPACITY: usize = 64;

/// Messages pushed to WebSocket clients.
#[derive(Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum DashboardEvent<'a> {
    Update(&'a Snapshot),
    Error { message: String },
}

#[derive(Default)]
struct State {
    /// Records exactly as parsed from the last accepted spreadsheet.
    base: Vec<CompanyRecord>,
    snapshot: Snapshot,
}

/// Shared between the watcher thread and the request handlers. Each
/// operation is atomic on its own; concurrent edits are last write wins.
pub struct Dashboard {
    conn: Mutex<Connection>,
    sheets: SheetNames,
    state: RwLock<State>,
    events: broadcast::Sender<String>,
}

fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

impl Dashboard {
    pub fn new(conn: Connection, sheets: SheetNames) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            conn: Mutex::new(conn),
            sheets,
            state: RwLock::new(State::default()),
            events,
        }
    }

    fn db(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DashError::Poisoned)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Run `f` against the store.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.db()?;
        f(&conn)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.read_state().snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    /// The current snapshot as an `update` event, sent to clients on connect.
    pub fn update_message(&self) -> Result<String> {
        let state = self.read_state();
        Ok(serde_json::to_string(&DashboardEvent::Update(&state.snapshot))?)
    }

    fn broadcast(&self, message: String) {
        match self.events.send(message) {
            Ok(receivers) => debug!(receivers, "event broadcast"),
            Err(_) => debug!("event dropped, no connected clients"),
        }
    }

    /// Replace the company set from a spreadsheet and publish the result.
    /// On error the previous snapshot stays in place.
    pub fn ingest(&self, file_path: &Path) -> Result<usize> {
        let base = parse_workbook(file_path, &self.sheets)?;
        let count = base.len();
        self.recompute(Some(base), Some(file_path))?;
        info!(file = %file_path.display(), companies = count, "spreadsheet ingested");
        Ok(count)
    }

    /// Watcher callback: ingest and report failures to clients.
    pub fn handle_file(&self, file_path: &Path) {
        if let Err(e) = self.ingest(file_path) {
            error!(file = %file_path.display(), error = %e, "failed to process spreadsheet");
            self.report_error(&e.to_string());
        }
    }

    /// Re-merge the last parsed records with the store and publish.
    pub fn refresh(&self) -> Result<()> {
        self.recompute(None, None)
    }

    fn recompute(&self, base: Option<Vec<CompanyRecord>>, file_path: Option<&Path>) -> Result<()> {
        let (adjustments, totals) = {
            let conn = self.db()?;
            (store::adjustments_by_code(&conn)?, store::expense_totals(&conn)?)
        };

        let message = {
            let mut state = self.write_state();
            if let Some(base) = base {
                state.base = base;
            }
            let companies = merge(&state.base, &adjustments, &totals);
            let file_path = file_path
                .map(|p| p.display().to_string())
                .or_else(|| state.snapshot.file_path.take());
            state.snapshot = Snapshot {
                statistics: statistics(&companies),
                companies,
                last_update: Some(now_iso()),
                file_path,
            };
            serde_json::to_string(&DashboardEvent::Update(&state.snapshot))?
        };
        self.broadcast(message);
        Ok(())
    }

    pub fn report_error(&self, message: &str) {
        let event = DashboardEvent::Error {
            message: message.to_string(),
        };
        if let Ok(json) = serde_json::to_string(&event) {
            self.broadcast(json);
        }
    }

    fn company_name(&self, code: &str) -> Option<String> {
        self.read_state().snapshot.company(code).map(|c| c.name.clone())
    }

    pub fn expenses(&self, company_code: Option<&str>) -> Result<Vec<ExpenseEntry>> {
        self.with_conn(|conn| store::list_expenses(conn, company_code))
    }

    pub fn add_expense(&self, mut expense: NewExpense, created_by: &str) -> Result<i64> {
        if expense.company_name.trim().is_empty() {
            expense.company_name = self
                .company_name(&expense.company_code)
                .unwrap_or_else(|| expense.company_code.clone());
        }
        let id = self.with_conn(|conn| store::add_expense(conn, &expense, created_by))?;
        info!(id, company = %expense.company_code, amount = expense.amount, by = created_by, "expense added");
        self.refresh()?;
        Ok(id)
    }

    pub fn delete_expense(&self, expense_id: i64) -> Result<bool> {
        let deleted = self.with_conn(|conn| store::delete_expense(conn, expense_id))?;
        if deleted {
            info!(id = expense_id, "expense deleted");
            self.refresh()?;
        }
        Ok(deleted)
    }

    pub fn adjustment(&self, company_code: &str) -> Result<Option<Adjustment>> {
        self.with_conn(|conn| store::get_adjustment(conn, company_code))
    }

    pub fn set_adjustment(&self, mut update: AdjustmentUpdate) -> Result<()> {
        if update.company_name.trim().is_empty() {
            update.company_name = self
                .company_name(&update.company_code)
                .unwrap_or_else(|| update.company_code.clone());
        }
        self.with_conn(|conn| store::set_adjustment(conn, &update))?;
        info!(
            company = %update.company_code,
            contract = ?update.contract_value,
            spent = ?update.spent_value,
            "adjustment saved"
        );
        self.refresh()
    }

    pub fn clear_adjustment(&self, company_code: &str) -> Result<bool> {
        let cleared = self.with_conn(|conn| store::clear_adjustment(conn, company_code))?;
        if cleared {
            info!(company = %company_code, "adjustment cleared");
            self.refresh()?;
        }
        Ok(cleared)
    }

    /// Build the expense workbook for a company on the current dashboard.
    pub fn export_expenses(&self, company_code: &str) -> Result<Vec<u8>> {
        let company = self
            .read_state()
            .snapshot
            .company(company_code)
            .cloned()
            .ok_or_else(|| DashError::UnknownCompany(company_code.to_string()))?;
        let expenses = self.expenses(Some(company_code))?;
        let bytes = export::company_expenses_xlsx(&company, &expenses)?;
        info!(company = %company_code, rows = expenses.len(), "expense report exported");
        Ok(bytes)
    }
}
