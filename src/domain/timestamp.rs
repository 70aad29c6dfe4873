//! Staleness oracle for project descriptors
//!
//! A project is re-read only when its timestamp differs from the stored one.
//! Every input that can change the effective model contributes a component;
//! missing files contribute `-1`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::UNIX_EPOCH;

/// Value used for absent files and absent parents
pub const MISSING: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub descriptor: i64,
    pub parent_read_stamp: i64,
    pub profiles_file: i64,
    pub user_settings: i64,
    pub global_settings: i64,
    pub profiles_hash: i64,
    pub environment: Vec<i64>,
}

impl Timestamp {
    pub fn missing() -> Self {
        Self {
            descriptor: MISSING,
            parent_read_stamp: MISSING,
            profiles_file: MISSING,
            user_settings: MISSING,
            global_settings: MISSING,
            profiles_hash: 0,
            environment: Vec::new(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}:{}:{}:{}:{}:{}",
            self.descriptor,
            self.parent_read_stamp,
            self.profiles_file,
            self.user_settings,
            self.global_settings,
            self.profiles_hash
        )?;
        for stamp in &self.environment {
            write!(f, ":{}", stamp)?;
        }
        f.write_str(")")
    }
}

/// Modification time in milliseconds since the epoch, or [`MISSING`]
pub fn file_stamp(path: Option<&Path>) -> i64 {
    let Some(path) = path else {
        return MISSING;
    };
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(MISSING)
}
