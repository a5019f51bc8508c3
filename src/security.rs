//! Local user store: one Parquet table of accounts with Argon2 password
//! hashes and a single role column. All operations are whole-file
//! read-modify-write; the table is small (campus-sized) by construction.

use anyhow::{anyhow, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use polars::prelude::*;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use crate::identity::Role;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: String,
    pub role: Role,
    pub display_name: String,
}

fn user_path(db_root: &str) -> PathBuf {
    Path::new(db_root).join("user.parquet")
}

fn mk_schema_df() -> DataFrame {
    let usernames: Series = Series::new("username".into(), Vec::<String>::new());
    let hashes: Series = Series::new("password_hash".into(), Vec::<String>::new());
    let roles: Series = Series::new("role".into(), Vec::<String>::new());
    let display_names: Series = Series::new("display_name".into(), Vec::<String>::new());
    DataFrame::new(vec![usernames.into(), hashes.into(), roles.into(), display_names.into()]).unwrap()
}

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else {
        false
    }
}

fn read_users(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Ok(mk_schema_df());
    }
    let file = std::fs::File::open(path)?;
    let df = ParquetReader::new(file).finish()?;
    Ok(df)
}

fn write_users(path: &Path, mut df: DataFrame) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    let mut f = std::fs::File::create(path)?;
    ParquetWriter::new(&mut f).finish(&mut df)?;
    Ok(())
}

fn str_at(df: &DataFrame, col: &str, i: usize) -> Result<String> {
    match df.column(col)?.get(i)? {
        AnyValue::String(s) => Ok(s.to_string()),
        AnyValue::StringOwned(s) => Ok(s.to_string()),
        other => Err(anyhow!("unexpected value in {}: {:?}", col, other)),
    }
}

fn username_matches(av: &AnyValue, username: &str) -> bool {
    match av {
        AnyValue::String(s) => *s == username,
        AnyValue::StringOwned(s) => s.as_str() == username,
        _ => false,
    }
}

fn row_index_of(df: &DataFrame, username: &str) -> Result<Option<usize>> {
    if df.height() == 0 {
        return Ok(None);
    }
    for i in 0..df.height() {
        let uname = df.column("username")?.get(i)?;
        if username_matches(&uname, username) {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

fn one_user_df(username: &str, phc: &str, role: Role, display_name: &str) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Series::new("username".into(), vec![username.to_string()]).into(),
        Series::new("password_hash".into(), vec![phc.to_string()]).into(),
        Series::new("role".into(), vec![role.as_str().to_string()]).into(),
        Series::new("display_name".into(), vec![display_name.to_string()]).into(),
    ])?)
}

fn drop_user_rows(df: DataFrame, username: &str) -> Result<DataFrame> {
    if df.height() == 0 {
        return Ok(df);
    }
    let user_s = df.column("username")?.clone();
    let Some(series) = user_s.as_series() else { return Ok(df) };
    let mask: ChunkedArray<BooleanType> = series.iter().map(|av| !username_matches(&av, username)).collect();
    Ok(df.filter(&mask)?)
}

/// Seed the store with an `admin`/`admin` account on first start so the
/// instance is reachable before any provisioning has happened.
pub fn ensure_default_admin(db_root: &str) -> Result<()> {
    let p = user_path(db_root);
    if p.exists() {
        return Ok(());
    }
    let phc = hash_password("admin")?;
    let df = one_user_df("admin", &phc, Role::Admin, "Administrator")?;
    write_users(&p, df)
}

pub fn add_user(db_root: &str, username: &str, password: &str, role: Role, display_name: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(AppError::user("empty_username", "username must not be empty").into());
    }
    if password.is_empty() {
        return Err(AppError::user("empty_password", "password must not be empty").into());
    }
    let p = user_path(db_root);
    let df = read_users(&p)?;
    if row_index_of(&df, username)?.is_some() {
        return Err(AppError::conflict("user_exists", "username is already taken").into());
    }
    let phc = hash_password(password)?;
    let new = one_user_df(username, &phc, role, display_name)?;
    if df.height() == 0 {
        write_users(&p, new)
    } else {
        let stacked = df.vstack(&new)?;
        write_users(&p, stacked)
    }
}

pub fn delete_user(db_root: &str, username: &str) -> Result<()> {
    let p = user_path(db_root);
    let df = read_users(&p)?;
    if row_index_of(&df, username)?.is_none() {
        return Err(AppError::not_found("user_not_found", "no such user").into());
    }
    let df = drop_user_rows(df, username)?;
    write_users(&p, df)
}

/// Update password and/or display name, keeping everything else as stored.
pub fn alter_user(db_root: &str, username: &str, new_password: Option<&str>, new_display_name: Option<&str>) -> Result<()> {
    let p = user_path(db_root);
    let df = read_users(&p)?;
    let Some(i) = row_index_of(&df, username)? else {
        return Err(AppError::not_found("user_not_found", "no such user").into());
    };
    let cur_hash = str_at(&df, "password_hash", i)?;
    let cur_role: Role = str_at(&df, "role", i)?.parse()?;
    let cur_display = str_at(&df, "display_name", i)?;

    let phc = if let Some(pw) = new_password { hash_password(pw)? } else { cur_hash };
    let display = new_display_name.map(|s| s.to_string()).unwrap_or(cur_display);

    let df = drop_user_rows(df, username)?;
    let updated = one_user_df(username, &phc, cur_role, &display)?;
    if df.height() == 0 {
        write_users(&p, updated)
    } else {
        let stacked = df.vstack(&updated)?;
        write_users(&p, stacked)
    }
}

pub fn authenticate(db_root: &str, username: &str, password: &str) -> Result<bool> {
    let df = read_users(&user_path(db_root))?;
    let Some(i) = row_index_of(&df, username)? else { return Ok(false) };
    let hash = str_at(&df, "password_hash", i)?;
    Ok(verify_password(&hash, password))
}

pub fn find_user(db_root: &str, username: &str) -> Result<Option<UserRecord>> {
    let df = read_users(&user_path(db_root))?;
    let Some(i) = row_index_of(&df, username)? else { return Ok(None) };
    Ok(Some(UserRecord {
        username: str_at(&df, "username", i)?,
        role: str_at(&df, "role", i)?.parse()?,
        display_name: str_at(&df, "display_name", i)?,
    }))
}

pub fn list_users(db_root: &str) -> Result<Vec<UserRecord>> {
    let df = read_users(&user_path(db_root))?;
    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        out.push(UserRecord {
            username: str_at(&df, "username", i)?,
            role: str_at(&df, "role", i)?.parse()?,
            display_name: str_at(&df, "display_name", i)?,
        });
    }
    Ok(out)
}
