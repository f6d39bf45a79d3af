use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{trace, warn};

use crate::errors::{AppError, AppResult};
use crate::model::{ExistingPlace, ItemPayload, ItemStatus, NewPlace, ProcessableItem, SourceType};

#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    pub status: ItemStatus,
    pub raw_text: Option<String>,
    pub error_message: Option<String>,
}

impl ItemUpdate {
    pub fn processed(raw_text: Option<String>) -> Self {
        Self {
            status: ItemStatus::Processed,
            raw_text,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>, raw_text: Option<String>) -> Self {
        Self {
            status: ItemStatus::Failed,
            raw_text,
            error_message: Some(message.into()),
        }
    }
}

/// Rows that cannot be turned into a payload still count as pending work;
/// they come back in `unusable` so the batch can fail them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingItems {
    pub ready: Vec<ProcessableItem>,
    pub unusable: Vec<UnusableItem>,
}

impl PendingItems {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.unusable.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ready.len() + self.unusable.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnusableItem {
    pub id: i64,
    pub reason: String,
}

#[async_trait]
pub trait PlaceRepository: Send + Sync {
    /// Writes a genuinely new place and returns it with its assigned id.
    async fn create(&self, project_id: i64, place: &NewPlace) -> AppResult<ExistingPlace>;

    async fn list_for_project(&self, project_id: i64) -> AppResult<Vec<ExistingPlace>>;
}

#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn list_pending(
        &self,
        project_id: i64,
        source_type: SourceType,
    ) -> AppResult<PendingItems>;

    async fn update(&self, item_id: i64, update: &ItemUpdate) -> AppResult<()>;

    /// Puts items back into `pending` so the next batch picks them up.
    async fn reset_to_pending(&self, item_ids: &[i64]) -> AppResult<usize>;

    /// Upsert keyed on `(place_id, item_id)`; repeating a link is a no-op.
    async fn link_to_place(
        &self,
        source_type: SourceType,
        item_id: i64,
        place_id: i64,
    ) -> AppResult<()>;
}

#[derive(Clone)]
pub struct SqlitePlaceRepository {
    db: Arc<Mutex<Connection>>,
}

impl SqlitePlaceRepository {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PlaceRepository for SqlitePlaceRepository {
    async fn create(&self, project_id: i64, place: &NewPlace) -> AppResult<ExistingPlace> {
        let geocode = &place.geocode;
        let id = {
            let conn = self.db.lock();
            conn.execute(
                "INSERT INTO places (
                    project_id, name, name_en, category, note, latitude, longitude,
                    formatted_address, external_place_id, maps_url, rating, rating_count,
                    price_level, source
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    project_id,
                    place.name,
                    place.name_en,
                    place.category,
                    place.note,
                    geocode.latitude,
                    geocode.longitude,
                    geocode.formatted_address,
                    geocode.external_place_id,
                    geocode.maps_url,
                    geocode.rating,
                    geocode.rating_count,
                    geocode.price_level,
                    place.source_type.as_tag(),
                ],
            )?;
            conn.last_insert_rowid()
        };

        trace!(project_id, place_id = id, name = place.name.as_str(), "place created");
        Ok(ExistingPlace {
            id,
            name: place.name.clone(),
            latitude: geocode.latitude,
            longitude: geocode.longitude,
            external_place_id: geocode.external_place_id.clone(),
        })
    }

    async fn list_for_project(&self, project_id: i64) -> AppResult<Vec<ExistingPlace>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, latitude, longitude, external_place_id
            FROM places
            WHERE project_id = ?1
            ORDER BY id ASC",
        )?;
        let places = stmt
            .query_map([project_id], |row| {
                Ok(ExistingPlace {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    latitude: row.get(2)?,
                    longitude: row.get(3)?,
                    external_place_id: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(places)
    }
}

#[derive(Clone)]
pub struct SqliteItemRepository {
    db: Arc<Mutex<Connection>>,
}

impl SqliteItemRepository {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ItemRepository for SqliteItemRepository {
    async fn list_pending(
        &self,
        project_id: i64,
        source_type: SourceType,
    ) -> AppResult<PendingItems> {
        let rows = {
            let conn = self.db.lock();
            let mut stmt = conn.prepare(
                "SELECT id, image_url, mime_type, content
                FROM source_items
                WHERE project_id = ?1 AND source_type = ?2 AND status = 'pending'
                ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map(params![project_id, source_type.as_tag()], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut pending = PendingItems::default();
        for (id, image_url, mime_type, content) in rows {
            match source_type.payload_from_columns(image_url, mime_type, content) {
                Ok(payload) => pending.ready.push(ProcessableItem {
                    id,
                    project_id,
                    source_type,
                    payload,
                }),
                Err(err) => {
                    warn!(?err, item_id = id, "pending item has no usable payload");
                    pending.unusable.push(UnusableItem {
                        id,
                        reason: err.to_string(),
                    });
                }
            }
        }
        Ok(pending)
    }

    async fn update(&self, item_id: i64, update: &ItemUpdate) -> AppResult<()> {
        let conn = self.db.lock();
        let changed = conn.execute(
            "UPDATE source_items
            SET status = ?2,
                raw_text = COALESCE(?3, raw_text),
                error_message = ?4,
                updated_at = DATETIME('now')
            WHERE id = ?1",
            params![
                item_id,
                update.status.as_tag(),
                update.raw_text,
                update.error_message
            ],
        )?;
        if changed == 0 {
            return Err(AppError::NotFound(format!("item {item_id}")));
        }
        Ok(())
    }

    async fn reset_to_pending(&self, item_ids: &[i64]) -> AppResult<usize> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE source_items
                SET status = 'pending', error_message = NULL, updated_at = DATETIME('now')
                WHERE id = ?1",
            )?;
            for id in item_ids {
                changed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    async fn link_to_place(
        &self,
        source_type: SourceType,
        item_id: i64,
        place_id: i64,
    ) -> AppResult<()> {
        let sql = format!(
            "INSERT INTO {} (place_id, item_id) VALUES (?1, ?2)
            ON CONFLICT(place_id, item_id) DO NOTHING",
            source_type.link_table()
        );
        let conn = self.db.lock();
        conn.execute(&sql, params![place_id, item_id])?;
        Ok(())
    }
}

/// Stores a new item in `pending` state and returns its id. Blank payloads
/// are rejected.
pub fn enqueue_item(
    connection: &Connection,
    project_id: i64,
    payload: &ItemPayload,
) -> AppResult<i64> {
    let blank = match payload {
        ItemPayload::Image { url, .. } => url.trim().is_empty(),
        ItemPayload::Text { content } => content.trim().is_empty(),
    };
    if blank {
        return Err(AppError::Config("item payload must not be empty".into()));
    }
    match payload {
        ItemPayload::Image { url, mime_type } => connection.execute(
            "INSERT INTO source_items (project_id, source_type, image_url, mime_type)
            VALUES (?1, 'photo', ?2, ?3)",
            params![project_id, url, mime_type],
        )?,
        ItemPayload::Text { content } => connection.execute(
            "INSERT INTO source_items (project_id, source_type, content)
            VALUES (?1, 'text', ?2)",
            params![project_id, content],
        )?,
    };
    Ok(connection.last_insert_rowid())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemState {
    pub status: ItemStatus,
    pub raw_text: Option<String>,
    pub error_message: Option<String>,
}

pub fn item_state(connection: &Connection, item_id: i64) -> AppResult<ItemState> {
    let row = connection
        .query_row(
            "SELECT status, raw_text, error_message FROM source_items WHERE id = ?1",
            [item_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;
    let (status, raw_text, error_message) =
        row.ok_or_else(|| AppError::NotFound(format!("item {item_id}")))?;
    Ok(ItemState {
        status: ItemStatus::parse(&status)?,
        raw_text,
        error_message,
    })
}

pub fn linked_place_ids(
    connection: &Connection,
    source_type: SourceType,
    item_id: i64,
) -> AppResult<Vec<i64>> {
    let sql = format!(
        "SELECT place_id FROM {} WHERE item_id = ?1 ORDER BY place_id ASC",
        source_type.link_table()
    );
    let mut stmt = connection.prepare(&sql)?;
    let ids = stmt
        .query_map([item_id], |row| row.get(0))?
        .collect::<Result<Vec<i64>, _>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;
    use crate::model::GeocodeResult;
    use crate::projects::create_project;

    fn setup() -> (Arc<Mutex<Connection>>, i64) {
        let conn = open_in_memory().unwrap();
        let project = create_project(&conn, "Trip", "Tokyo", Some("Japan")).unwrap();
        (Arc::new(Mutex::new(conn)), project.id)
    }

    fn new_place(name: &str) -> NewPlace {
        NewPlace {
            name: name.into(),
            name_en: None,
            category: "attraction".into(),
            note: None,
            source_type: SourceType::Text,
            geocode: GeocodeResult {
                latitude: 35.7148,
                longitude: 139.7967,
                formatted_address: "Asakusa".into(),
                external_place_id: Some("gp-1".into()),
                maps_url: None,
                rating: Some(4.5),
                rating_count: Some(10),
                price_level: None,
            },
        }
    }

    #[tokio::test]
    async fn linking_twice_keeps_a_single_row() {
        let (db, project_id) = setup();
        let item_id = enqueue_item(
            &db.lock(),
            project_id,
            &ItemPayload::Text {
                content: "Sensoji".into(),
            },
        )
        .unwrap();
        let places = SqlitePlaceRepository::new(db.clone());
        let items = SqliteItemRepository::new(db.clone());
        let place = places.create(project_id, &new_place("Sensoji")).await.unwrap();

        items
            .link_to_place(SourceType::Text, item_id, place.id)
            .await
            .unwrap();
        items
            .link_to_place(SourceType::Text, item_id, place.id)
            .await
            .unwrap();

        let conn = db.lock();
        assert_eq!(
            linked_place_ids(&conn, SourceType::Text, item_id).unwrap(),
            vec![place.id]
        );
        assert!(linked_place_ids(&conn, SourceType::Photo, item_id)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn lists_pending_and_resets_failed_items() {
        let (db, project_id) = setup();
        let (photo, text) = {
            let conn = db.lock();
            let photo = enqueue_item(
                &conn,
                project_id,
                &ItemPayload::Image {
                    url: "https://example.com/a.jpg".into(),
                    mime_type: Some("image/jpeg".into()),
                },
            )
            .unwrap();
            let text = enqueue_item(
                &conn,
                project_id,
                &ItemPayload::Text {
                    content: "Ramen at Ichiran".into(),
                },
            )
            .unwrap();
            (photo, text)
        };
        let items = SqliteItemRepository::new(db.clone());

        let pending = items.list_pending(project_id, SourceType::Photo).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.ready[0].id, photo);

        items
            .update(text, &ItemUpdate::failed("No places were recognized", Some("{}".into())))
            .await
            .unwrap();
        assert!(items
            .list_pending(project_id, SourceType::Text)
            .await
            .unwrap()
            .is_empty());
        let state = item_state(&db.lock(), text).unwrap();
        assert_eq!(state.status, ItemStatus::Failed);
        assert_eq!(state.raw_text.as_deref(), Some("{}"));

        assert_eq!(items.reset_to_pending(&[text, 999]).await.unwrap(), 1);
        let state = item_state(&db.lock(), text).unwrap();
        assert_eq!(state.status, ItemStatus::Pending);
        assert!(state.error_message.is_none());
    }

    #[tokio::test]
    async fn blank_rows_come_back_as_unusable() {
        let (db, project_id) = setup();
        let blank = {
            let conn = db.lock();
            let rejected = enqueue_item(
                &conn,
                project_id,
                &ItemPayload::Text {
                    content: "   ".into(),
                },
            );
            assert!(matches!(rejected, Err(AppError::Config(_))));
            conn.execute(
                "INSERT INTO source_items (project_id, source_type, content)
                VALUES (?1, 'text', '   ')",
                [project_id],
            )
            .unwrap();
            conn.last_insert_rowid()
        };
        let items = SqliteItemRepository::new(db.clone());

        let pending = items.list_pending(project_id, SourceType::Text).await.unwrap();

        assert!(pending.ready.is_empty());
        assert_eq!(pending.unusable.len(), 1);
        assert_eq!(pending.unusable[0].id, blank);
        assert!(pending.unusable[0].reason.contains("no content"));
    }

    #[tokio::test]
    async fn creates_places_visible_to_project_listing() {
        let (db, project_id) = setup();
        let places = SqlitePlaceRepository::new(db.clone());
        let created = places.create(project_id, &new_place("Sensoji")).await.unwrap();
        let listed = places.list_for_project(project_id).await.unwrap();
        assert_eq!(listed, vec![created]);
        assert!(places.list_for_project(project_id + 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn updating_unknown_item_is_not_found() {
        let (db, _) = setup();
        let items = SqliteItemRepository::new(db);
        let err = items
            .update(404, &ItemUpdate::processed(None))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
