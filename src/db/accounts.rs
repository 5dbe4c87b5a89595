use super::model::Account;
use super::Pool;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::instrument;

fn account_from_row(row: &SqliteRow) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        password_salt: row.get("password_salt"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        is_staff: row.get("is_staff"),
        is_active: row.get("is_active"),
    }
}

pub struct NewAccount<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub password_salt: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub is_staff: bool,
    pub is_active: bool,
}

#[instrument(skip_all)]
pub async fn create_account(pool: &Pool, new: &NewAccount<'_>) -> Result<i64> {
    let id: i64 = sqlx::query(
        "INSERT INTO accounts (email, password_hash, password_salt, first_name, last_name, is_staff, is_active, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(new.email.to_lowercase())
    .bind(new.password_hash)
    .bind(new.password_salt)
    .bind(new.first_name)
    .bind(new.last_name)
    .bind(new.is_staff)
    .bind(new.is_active)
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .context("failed to create account")?
    .get("id");
    Ok(id)
}

#[instrument(skip_all)]
pub async fn find_account_by_email(pool: &Pool, email: &str) -> Result<Option<Account>> {
    let row = sqlx::query("SELECT * FROM accounts WHERE email = ?")
        .bind(email.trim().to_lowercase())
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(account_from_row))
}

#[instrument(skip_all)]
pub async fn get_account(pool: &Pool, id: i64) -> Result<Option<Account>> {
    let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(account_from_row))
}

#[instrument(skip_all)]
pub async fn set_account_active(pool: &Pool, id: i64, active: bool) -> Result<()> {
    sqlx::query("UPDATE accounts SET is_active = ? WHERE id = ?")
        .bind(active)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn create_session(pool: &Pool, account_id: i64, token: &str) -> Result<()> {
    sqlx::query("INSERT INTO sessions (token, account_id, created_at) VALUES (?, ?, ?)")
        .bind(token)
        .bind(account_id)
        .bind(Utc::now())
        .execute(pool)
        .await
        .context("failed to create session")?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn account_for_session(pool: &Pool, token: &str) -> Result<Option<Account>> {
    let row = sqlx::query(
        "SELECT a.* FROM sessions s JOIN accounts a ON a.id = s.account_id WHERE s.token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(account_from_row))
}

#[instrument(skip_all)]
pub async fn delete_session(pool: &Pool, token: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(())
}
