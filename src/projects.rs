//! Project storage collaborator.
//!
//! The suggestion stream only asks one question of storage: does this
//! caller own this project? [`ProjectStore`] captures that lookup so the
//! orchestrator works against SQLite in production and an in-memory map
//! in tests.
//!
//! Used by the `brainstormer project` CLI commands and by
//! `POST /search/stream` before any model call.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

use crate::config::Config;
use crate::db;

/// A brainstorming project owned by one caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Project {
    pub fn new(name: &str, owner_id: &str) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ownership-filtered project lookup.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Returns the project only if it exists *and* belongs to `caller_id`.
    async fn find_project(&self, project_id: &str, caller_id: &str) -> Result<Option<Project>>;
}

// ============ SQLite ============

/// [`ProjectStore`] backed by the `projects` table.
pub struct SqliteProjectStore {
    pool: SqlitePool,
}

impl SqliteProjectStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub async fn create_project(&self, name: &str, owner_id: &str) -> Result<Project> {
        let project = Project::new(name, owner_id);
        sqlx::query(
            "INSERT INTO projects (id, name, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&project.id)
        .bind(&project.name)
        .bind(&project.owner_id)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(project)
    }

    pub async fn list_projects(&self, owner_id: &str) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, name, owner_id, created_at, updated_at FROM projects WHERE owner_id = ? ORDER BY updated_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_project).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_project(row: &sqlx::sqlite::SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        owner_id: row.get("owner_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl ProjectStore for SqliteProjectStore {
    async fn find_project(&self, project_id: &str, caller_id: &str) -> Result<Option<Project>> {
        let row = sqlx::query(
            "SELECT id, name, owner_id, created_at, updated_at FROM projects WHERE id = ? AND owner_id = ?",
        )
        .bind(project_id)
        .bind(caller_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_project))
    }
}

// ============ In-memory ============

/// In-memory [`ProjectStore`] for tests and in-process runs.
#[derive(Default)]
pub struct InMemoryProjectStore {
    projects: RwLock<HashMap<String, Project>>,
}

impl InMemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, project: Project) {
        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        projects.insert(project.id.clone(), project);
    }
}

#[async_trait]
impl ProjectStore for InMemoryProjectStore {
    async fn find_project(&self, project_id: &str, caller_id: &str) -> Result<Option<Project>> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        Ok(projects
            .get(project_id)
            .filter(|p| p.owner_id == caller_id)
            .cloned())
    }
}

// ============ CLI ============

pub async fn run_project_create(config: &Config, name: &str, owner: &str) -> Result<()> {
    let store = SqliteProjectStore::connect(config).await?;
    let project = store.create_project(name, owner).await?;
    store.close().await;

    println!("Created project {} ({})", project.name, project.id);
    Ok(())
}

pub async fn run_project_list(config: &Config, owner: &str) -> Result<()> {
    let store = SqliteProjectStore::connect(config).await?;
    let projects = store.list_projects(owner).await?;
    store.close().await;

    if projects.is_empty() {
        println!("No projects for {}.", owner);
        return Ok(());
    }

    println!("{:<38} {:<24} UPDATED", "ID", "NAME");
    for p in &projects {
        let updated = chrono::DateTime::from_timestamp(p.updated_at, 0)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| p.updated_at.to_string());
        println!("{:<38} {:<24} {}", p.id, p.name, updated);
    }
    Ok(())
}
