use zeroize::Zeroize;

use crate::auth::register_user;
use crate::db::{get_connection, init_db};
use crate::error::{DashError, Result};
use crate::settings::load_settings;

pub fn add(username: &str, name: Option<&str>) -> Result<()> {
    let username = username.trim();
    if username.is_empty() {
        return Err(DashError::InvalidInput("username must not be empty".to_string()));
    }
    let conn = get_connection(&load_settings().db_path())?;
    init_db(&conn)?;

    let mut password = rpassword::prompt_password("Password: ")?;
    let mut confirm = rpassword::prompt_password("Confirm password: ")?;
    let matches = password == confirm;
    confirm.zeroize();
    if !matches {
        password.zeroize();
        return Err(DashError::InvalidInput("passwords do not match".to_string()));
    }

    let result = register_user(&conn, username, &password, name.unwrap_or(username));
    password.zeroize();
    result?;
    println!("Added user: {username}");
    Ok(())
}
