use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::migrate::MigrationSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// v1 assignment id -> migrated v2 id, process lifetime.
    pub migration_session: MigrationSession,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            migration_session: MigrationSession::new(),
        }
    }
}
