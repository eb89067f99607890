use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{load_settings, save_settings, settings_path, shellexpand_path};

pub fn run(data_dir: Option<String>, watch_folder: Option<String>) -> Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    if let Some(folder) = watch_folder {
        settings.watch_folder = shellexpand_path(&folder);
    }

    let db_path = settings.db_path();
    let conn = get_connection(&db_path)?;
    init_db(&conn)?;
    save_settings(&settings)?;

    println!("Settings:     {}", settings_path().display());
    println!("Database:     {}", db_path.display());
    if settings.watch_folder.is_empty() {
        println!("Watch folder: (not set, pass --watch-folder)");
    } else {
        println!("Watch folder: {}", settings.watch_folder);
    }
    Ok(())
}
