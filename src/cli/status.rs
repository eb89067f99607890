use crate::db::get_connection;
use crate::error::Result;
use crate::settings::{load_settings, settings_path};
use crate::store;

pub fn run() -> Result<()> {
    let settings = load_settings();
    let db_path = settings.db_path();

    println!("Settings:     {}", settings_path().display());
    println!("Database:     {}", db_path.display());
    println!(
        "Watch folder: {}",
        if settings.watch_folder.is_empty() { "(not set)" } else { &settings.watch_folder }
    );
    println!("Pattern:      {}", settings.file_pattern);
    println!("Listen:       http://{}", settings.bind_addr());
    println!("Auth:         {}", if settings.auth_enabled { "on" } else { "off" });

    if !db_path.exists() {
        println!();
        println!("Database not found. Run `spendwatch init` to set up.");
        return Ok(());
    }

    let conn = get_connection(&db_path)?;
    let expenses = store::list_expenses(&conn, None)?;
    let adjustments = store::list_adjustments(&conn)?;

    println!();
    println!("Expenses:     {} ({:.2})", expenses.len(), store::total_expenses(&conn)?);
    println!("Adjustments:  {}", adjustments.len());
    println!("Users:        {}", store::count_users(&conn)?);
    Ok(())
}
