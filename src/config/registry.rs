//! Auxiliary Lookup Inputs
//!
//! Two side channels feed the input data tables:
//!
//! - a SQLite registry mapping exposures to the patches they overlap
//!   (table `sky` with columns `visit, ccd, tract, patch`), replacing the
//!   YAML sky map when supplied
//! - a plain-text blacklist of ccds to exclude, one `visit ccd` pair per
//!   line, `#` starting a comment

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{info, warn};
use rusqlite::{params, Connection};

use super::model::{Data, InputData};
use crate::error::GenError;

/// Reads a blacklist file into a list of ccds to exclude.
pub fn load_blacklist(path: &Path) -> Result<Vec<Data>, GenError> {
    let content = fs::read_to_string(path).map_err(|e| {
        GenError::InvalidInput(format!(
            "failed to read blacklist file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let mut blacklist = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let mut fields = line.split_whitespace();
        let entry = match (fields.next(), fields.next(), fields.next()) {
            (Some(visit), Some(ccd), None) => visit
                .parse::<u64>()
                .ok()
                .zip(ccd.parse::<u32>().ok())
                .map(|(visit, ccd)| Data::new(visit, ccd)),
            _ => None,
        };

        match entry {
            Some(data) => blacklist.push(data),
            None => {
                return Err(GenError::InvalidInput(format!(
                    "blacklist line {}: expected 'visit ccd', got '{}'",
                    lineno + 1,
                    line
                )))
            }
        }
    }

    info!(
        "Loaded {} blacklist entries from {}",
        blacklist.len(),
        path.display()
    );
    Ok(blacklist)
}

/// An exposure-to-patch registry backed by SQLite.
pub struct PatchRegistry {
    conn: Connection,
}

impl PatchRegistry {
    /// Opens a registry database.
    pub fn open(path: &Path) -> Result<Self, GenError> {
        let conn = Connection::open(path)?;
        info!("Opened patch registry {}", path.display());
        Ok(Self { conn })
    }

    /// Reads the sky map of a tract: which exposures overlap which
    /// patch, per filter. The filter of each row is resolved through the
    /// input data tables; rows for ccds the tables do not list are
    /// skipped.
    pub fn sky_map(
        &self,
        input: &InputData,
        tract: i64,
    ) -> Result<BTreeMap<String, BTreeMap<String, Vec<Data>>>, GenError> {
        let mut stmt = self
            .conn
            .prepare("SELECT visit, ccd, patch FROM sky WHERE tract = ?1 ORDER BY visit, ccd")?;
        let rows = stmt.query_map(params![tract], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut sky_map: BTreeMap<String, BTreeMap<String, Vec<Data>>> = BTreeMap::new();
        let mut skipped = 0usize;
        for row in rows {
            let (visit, ccd, patch) = row?;
            let data = Data::new(visit as u64, ccd as u32);
            let owner = input
                .filters
                .iter()
                .find(|(_, list)| list.contains(&data))
                .map(|(filter, _)| filter.clone());
            match owner {
                Some(filter) => {
                    sky_map
                        .entry(filter)
                        .or_default()
                        .entry(patch)
                        .or_default()
                        .push(data);
                }
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(
                "Skipped {} registry rows for ccds not in the input data",
                skipped
            );
        }
        info!("Registry sky map covers {} filters", sky_map.len());
        Ok(sky_map)
    }
}
