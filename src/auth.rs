//! Password hashing and token sessions shared by the fund and grants logins.
use crate::db::accounts::{self, NewAccount};
use crate::db::model::Account;
use crate::db::Pool;
use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{info, instrument};

pub fn new_salt() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Hex SHA-256 of `salt:password`.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn verify_password(account: &Account, password: &str) -> bool {
    hash_password(password, &account.password_salt) == account.password_hash
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    LoggedIn { account: Account, token: String },
    NoAccount,
    WrongPassword,
    Inactive,
}

/// Checks credentials and opens a session on success.
#[instrument(skip_all)]
pub async fn login(pool: &Pool, email: &str, password: &str) -> Result<LoginOutcome> {
    let Some(account) = accounts::find_account_by_email(pool, email).await? else {
        return Ok(LoginOutcome::NoAccount);
    };
    if !verify_password(&account, password) {
        return Ok(LoginOutcome::WrongPassword);
    }
    if !account.is_active {
        return Ok(LoginOutcome::Inactive);
    }
    let token = start_session(pool, account.id).await?;
    info!(account_id = account.id, "login");
    Ok(LoginOutcome::LoggedIn { account, token })
}

pub async fn start_session(pool: &Pool, account_id: i64) -> Result<String> {
    let token = uuid::Uuid::new_v4().to_string();
    accounts::create_session(pool, account_id, &token).await?;
    Ok(token)
}

pub async fn logout(pool: &Pool, token: &str) -> Result<()> {
    accounts::delete_session(pool, token).await
}

/// Creates a login with a fresh salt.
pub async fn create_account(
    pool: &Pool,
    email: &str,
    password: &str,
    first_name: &str,
    last_name: &str,
    is_active: bool,
) -> Result<i64> {
    let salt = new_salt();
    let hash = hash_password(password, &salt);
    accounts::create_account(
        pool,
        &NewAccount {
            email,
            password_hash: &hash,
            password_salt: &salt,
            first_name,
            last_name,
            is_staff: false,
            is_active,
        },
    )
    .await
}

pub async fn create_staff_account(pool: &Pool, email: &str, password: &str) -> Result<i64> {
    let salt = new_salt();
    let hash = hash_password(password, &salt);
    accounts::create_account(
        pool,
        &NewAccount {
            email,
            password_hash: &hash,
            password_salt: &salt,
            first_name: "",
            last_name: "",
            is_staff: true,
            is_active: true,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_pool, run_migrations};

    #[test]
    fn hashes_depend_on_salt() {
        let a = hash_password("secret", "s1");
        assert_eq!(a.len(), 64);
        assert_eq!(a, hash_password("secret", "s1"));
        assert_ne!(a, hash_password("secret", "s2"));
    }

    #[tokio::test]
    async fn login_outcomes() {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        create_account(&pool, "Ann@Example.org", "pw", "Ann", "Lee", true)
            .await
            .unwrap();
        create_account(&pool, "off@example.org", "pw", "Off", "", false)
            .await
            .unwrap();

        assert!(matches!(
            login(&pool, "nobody@example.org", "pw").await.unwrap(),
            LoginOutcome::NoAccount
        ));
        assert!(matches!(
            login(&pool, "ann@example.org", "nope").await.unwrap(),
            LoginOutcome::WrongPassword
        ));
        assert!(matches!(
            login(&pool, "off@example.org", "pw").await.unwrap(),
            LoginOutcome::Inactive
        ));
        let LoginOutcome::LoggedIn { account, token } =
            login(&pool, "ann@example.org", "pw").await.unwrap()
        else {
            panic!("expected login");
        };
        let found = accounts::account_for_session(&pool, &token).await.unwrap().unwrap();
        assert_eq!(found.id, account.id);
        logout(&pool, &token).await.unwrap();
        assert!(accounts::account_for_session(&pool, &token).await.unwrap().is_none());
    }
}
