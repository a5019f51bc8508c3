use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::AppError;
use crate::identity::{opaque_token, Role};

use super::{Activity, ActivityAttendance, NewActivity, Registration};

/// Parquet-backed registry. Every mutation is a whole-file read-modify-write
/// under one lock; reads take the lock too so they never observe a torn file.
pub struct RegistryStore {
    root: PathBuf,
    lock: Mutex<()>,
}

fn mk_activities_df() -> DataFrame {
    DataFrame::new(vec![
        Series::new("id".into(), Vec::<String>::new()).into(),
        Series::new("title".into(), Vec::<String>::new()).into(),
        Series::new("description".into(), Vec::<String>::new()).into(),
        Series::new("organizer".into(), Vec::<String>::new()).into(),
        Series::new("organizer_role".into(), Vec::<String>::new()).into(),
        Series::new("capacity".into(), Vec::<i64>::new()).into(),
        Series::new("starts_at_ms".into(), Vec::<i64>::new()).into(),
        Series::new("location".into(), Vec::<String>::new()).into(),
    ])
    .unwrap()
}

fn mk_registrations_df() -> DataFrame {
    DataFrame::new(vec![
        Series::new("activity_id".into(), Vec::<String>::new()).into(),
        Series::new("username".into(), Vec::<String>::new()).into(),
        Series::new("checkin_token".into(), Vec::<String>::new()).into(),
        Series::new("registered_at_ms".into(), Vec::<i64>::new()).into(),
        Series::new("checked_in_at_ms".into(), Vec::<i64>::new()).into(),
    ])
    .unwrap()
}

fn read_df(path: &Path, empty: fn() -> DataFrame) -> Result<DataFrame> {
    if !path.exists() {
        return Ok(empty());
    }
    let file = std::fs::File::open(path)?;
    Ok(ParquetReader::new(file).finish()?)
}

fn write_df(path: &Path, mut df: DataFrame) -> Result<()> {
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

fn i64_at(df: &DataFrame, col: &str, i: usize) -> Result<i64> {
    df.column(col)?.i64()?.get(i).ok_or_else(|| anyhow!("null value in {}", col))
}

fn activity_at(df: &DataFrame, i: usize) -> Result<Activity> {
    Ok(Activity {
        id: str_at(df, "id", i)?,
        title: str_at(df, "title", i)?,
        description: str_at(df, "description", i)?,
        organizer: str_at(df, "organizer", i)?,
        organizer_role: str_at(df, "organizer_role", i)?.parse()?,
        capacity: i64_at(df, "capacity", i)?,
        starts_at_ms: i64_at(df, "starts_at_ms", i)?,
        location: str_at(df, "location", i)?,
    })
}

fn registration_at(df: &DataFrame, i: usize) -> Result<Registration> {
    Ok(Registration {
        activity_id: str_at(df, "activity_id", i)?,
        username: str_at(df, "username", i)?,
        checkin_token: str_at(df, "checkin_token", i)?,
        registered_at_ms: i64_at(df, "registered_at_ms", i)?,
        checked_in_at_ms: i64_at(df, "checked_in_at_ms", i)?,
    })
}

fn one_registration_df(reg: &Registration) -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Series::new("activity_id".into(), vec![reg.activity_id.clone()]).into(),
        Series::new("username".into(), vec![reg.username.clone()]).into(),
        Series::new("checkin_token".into(), vec![reg.checkin_token.clone()]).into(),
        Series::new("registered_at_ms".into(), vec![reg.registered_at_ms]).into(),
        Series::new("checked_in_at_ms".into(), vec![reg.checked_in_at_ms]).into(),
    ])?)
}

fn vstack_or_replace(df: DataFrame, row: DataFrame) -> Result<DataFrame> {
    if df.height() == 0 {
        Ok(row)
    } else {
        Ok(df.vstack(&row)?)
    }
}

impl RegistryStore {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        Ok(Self { root: root.as_ref().to_path_buf(), lock: Mutex::new(()) })
    }

    fn activities_path(&self) -> PathBuf {
        self.root.join("activities.parquet")
    }

    fn registrations_path(&self) -> PathBuf {
        self.root.join("registrations.parquet")
    }

    pub fn create_activity(&self, organizer: &str, organizer_role: Role, new: &NewActivity) -> Result<Activity> {
        if new.title.trim().is_empty() {
            return Err(AppError::user("empty_title", "activity title must not be empty").into());
        }
        if new.capacity < 1 {
            return Err(AppError::user("bad_capacity", "capacity must be at least 1").into());
        }
        let _g = self.lock.lock();
        let df = read_df(&self.activities_path(), mk_activities_df)?;
        let activity = Activity {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title.trim().to_string(),
            description: new.description.clone(),
            organizer: organizer.to_string(),
            organizer_role,
            capacity: new.capacity,
            starts_at_ms: new.starts_at_ms,
            location: new.location.clone(),
        };
        let row = DataFrame::new(vec![
            Series::new("id".into(), vec![activity.id.clone()]).into(),
            Series::new("title".into(), vec![activity.title.clone()]).into(),
            Series::new("description".into(), vec![activity.description.clone()]).into(),
            Series::new("organizer".into(), vec![activity.organizer.clone()]).into(),
            Series::new("organizer_role".into(), vec![activity.organizer_role.as_str().to_string()]).into(),
            Series::new("capacity".into(), vec![activity.capacity]).into(),
            Series::new("starts_at_ms".into(), vec![activity.starts_at_ms]).into(),
            Series::new("location".into(), vec![activity.location.clone()]).into(),
        ])?;
        write_df(&self.activities_path(), vstack_or_replace(df, row)?)?;
        info!(target: "registry", id = %activity.id, title = %activity.title, organizer = %organizer, "activity created");
        Ok(activity)
    }

    pub fn list_activities(&self) -> Result<Vec<Activity>> {
        let _g = self.lock.lock();
        let df = read_df(&self.activities_path(), mk_activities_df)?;
        (0..df.height()).map(|i| activity_at(&df, i)).collect()
    }

    pub fn get_activity(&self, id: &str) -> Result<Option<Activity>> {
        Ok(self.list_activities()?.into_iter().find(|a| a.id == id))
    }

    /// Register `username` for an activity, issuing the check-in token.
    pub fn register(&self, activity_id: &str, username: &str) -> Result<Registration> {
        let _g = self.lock.lock();
        let activities = read_df(&self.activities_path(), mk_activities_df)?;
        let mut capacity: Option<i64> = None;
        for i in 0..activities.height() {
            if str_at(&activities, "id", i)? == activity_id {
                capacity = Some(i64_at(&activities, "capacity", i)?);
                break;
            }
        }
        let Some(capacity) = capacity else {
            return Err(AppError::not_found("activity_not_found", "no such activity").into());
        };

        let regs = read_df(&self.registrations_path(), mk_registrations_df)?;
        let mut taken = 0i64;
        for i in 0..regs.height() {
            if str_at(&regs, "activity_id", i)? == activity_id {
                if str_at(&regs, "username", i)? == username {
                    return Err(AppError::conflict("already_registered", "already registered for this activity").into());
                }
                taken += 1;
            }
        }
        if taken >= capacity {
            return Err(AppError::conflict("activity_full", "no seats left").into());
        }

        let reg = Registration {
            activity_id: activity_id.to_string(),
            username: username.to_string(),
            checkin_token: opaque_token(),
            registered_at_ms: chrono::Utc::now().timestamp_millis(),
            checked_in_at_ms: 0,
        };
        write_df(&self.registrations_path(), vstack_or_replace(regs, one_registration_df(&reg)?)?)?;
        info!(target: "registry", activity = %activity_id, user = %username, "registration created");
        Ok(reg)
    }

    /// Redeem a check-in token, stamping attendance exactly once.
    pub fn check_in(&self, token: &str) -> Result<Registration> {
        let _g = self.lock.lock();
        let regs = read_df(&self.registrations_path(), mk_registrations_df)?;
        let mut found: Option<Registration> = None;
        for i in 0..regs.height() {
            if str_at(&regs, "checkin_token", i)? == token {
                found = Some(registration_at(&regs, i)?);
                break;
            }
        }
        let Some(mut reg) = found else {
            return Err(AppError::not_found("unknown_token", "no registration for this token").into());
        };
        if reg.is_checked_in() {
            return Err(AppError::conflict("already_checked_in", "token already redeemed").into());
        }
        reg.checked_in_at_ms = chrono::Utc::now().timestamp_millis();

        // Rewrite the row: drop by token, append the stamped copy
        let token_s = regs.column("checkin_token")?.clone();
        let Some(series) = token_s.as_series() else {
            return Err(anyhow!("checkin_token column is not a series"));
        };
        let mask: ChunkedArray<BooleanType> = series
            .iter()
            .map(|av| match av {
                AnyValue::String(s) => s != token,
                AnyValue::StringOwned(s) => s.as_str() != token,
                _ => true,
            })
            .collect();
        let remaining = regs.filter(&mask)?;
        write_df(&self.registrations_path(), vstack_or_replace(remaining, one_registration_df(&reg)?)?)?;
        info!(target: "registry", activity = %reg.activity_id, user = %reg.username, "checked in");
        Ok(reg)
    }

    pub fn registrations_for(&self, activity_id: &str) -> Result<Vec<Registration>> {
        Ok(self.all_registrations()?.into_iter().filter(|r| r.activity_id == activity_id).collect())
    }

    pub fn registrations_by(&self, username: &str) -> Result<Vec<Registration>> {
        Ok(self.all_registrations()?.into_iter().filter(|r| r.username == username).collect())
    }

    fn all_registrations(&self) -> Result<Vec<Registration>> {
        let _g = self.lock.lock();
        let df = read_df(&self.registrations_path(), mk_registrations_df)?;
        (0..df.height()).map(|i| registration_at(&df, i)).collect()
    }

    /// Per-activity registered/checked-in counts, in catalog order.
    pub fn attendance_report(&self) -> Result<Vec<ActivityAttendance>> {
        let activities = self.list_activities()?;
        let regs = self.all_registrations()?;
        Ok(activities
            .into_iter()
            .map(|a| {
                let for_activity: Vec<_> = regs.iter().filter(|r| r.activity_id == a.id).collect();
                ActivityAttendance {
                    registered: for_activity.len(),
                    checked_in: for_activity.iter().filter(|r| r.is_checked_in()).count(),
                    activity_id: a.id,
                    title: a.title,
                }
            })
            .collect())
    }
}
