use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::{AppError, AppResult};
use crate::model::ProjectInfo;

pub fn create_project(
    connection: &Connection,
    name: &str,
    destination: &str,
    country: Option<&str>,
) -> AppResult<ProjectInfo> {
    let trimmed_destination = destination.trim();
    if trimmed_destination.is_empty() {
        return Err(AppError::Config("project destination must not be empty".into()));
    }
    let country = country.map(str::trim).filter(|value| !value.is_empty());
    connection.execute(
        "INSERT INTO projects (name, destination, country) VALUES (?1, ?2, ?3)",
        params![name.trim(), trimmed_destination, country],
    )?;
    Ok(ProjectInfo {
        id: connection.last_insert_rowid(),
        name: name.trim().to_string(),
        destination: trimmed_destination.to_string(),
        country: country.map(str::to_string),
    })
}

pub fn load_project(connection: &Connection, project_id: i64) -> AppResult<ProjectInfo> {
    connection
        .query_row(
            "SELECT id, name, destination, country FROM projects WHERE id = ?1",
            [project_id],
            map_project,
        )
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("project {project_id}")))
}

pub fn list_projects(connection: &Connection) -> AppResult<Vec<ProjectInfo>> {
    let mut stmt =
        connection.prepare("SELECT id, name, destination, country FROM projects ORDER BY id ASC")?;
    let rows = stmt
        .query_map([], map_project)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_project(row: &Row<'_>) -> rusqlite::Result<ProjectInfo> {
    Ok(ProjectInfo {
        id: row.get(0)?,
        name: row.get(1)?,
        destination: row.get(2)?,
        country: row.get(3)?,
    })
}
