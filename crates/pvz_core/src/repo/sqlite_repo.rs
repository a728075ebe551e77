//! SQLite implementation of `PvzRepository`.
//!
//! # Responsibility
//! - Run every operation on a pooled connection bound to the request context.
//! - Translate constraint violations and interrupts into `RepoError` kinds.
//!
//! # Invariants
//! - Mutations that read before they write run in IMMEDIATE transactions, so
//!   writers on one database are serialized.
//! - The partial unique index on `receptions(pvz_id) WHERE status = 'OPEN'`
//!   backs the one-open-reception rule even if the read check is bypassed.
//! - LIFO pops delete exactly one row chosen by `created_at DESC, seq DESC`.

use super::error::{ConflictKind, Entity, NotFoundKind, RepoError, RepoResult};
use super::pvz_repo::{PageWindow, PickupPointListQuery, PvzRepository};
use crate::config::PvzConfig;
use crate::context::RequestContext;
use crate::db::schema::{current_user_version, latest_version};
use crate::db::{ConnectionPool, ContextGuard, DbError};
use crate::model::item::{Category, Item, NewItem};
use crate::model::pickup_point::{PickupPoint, PickupPointId, PickupPointWithReceptions};
use crate::model::reception::{Reception, ReceptionId, ReceptionStatus, ReceptionWithItems};
use crate::telemetry::{MetricEvent, Telemetry};
use log::{debug, error, info, warn};
use rusqlite::types::Value;
use rusqlite::{
    ffi, params, params_from_iter, Connection, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const RECEPTION_COLUMNS: &str = "id, pvz_id, opened_at, status";

const REQUIRED_COLUMNS: &[(&str, &[&str])] = &[
    ("pickup_points", &["id", "city", "registered_at"]),
    ("receptions", &["id", "pvz_id", "opened_at", "status"]),
    (
        "items",
        &["seq", "id", "reception_id", "category", "created_at"],
    ),
];

/// SQLite-backed pickup-point repository. Safe to share across threads.
pub struct SqlitePvzRepository {
    pool: ConnectionPool,
    telemetry: Arc<Telemetry>,
}

impl SqlitePvzRepository {
    /// Creates a repository over a bootstrapped pool.
    ///
    /// # Errors
    /// - `Storage` when the schema version, tables or columns do not match.
    pub fn try_new(pool: ConnectionPool, telemetry: Arc<Telemetry>) -> RepoResult<Self> {
        {
            let conn = pool.acquire(&RequestContext::background())?;
            ensure_connection_ready(&conn)?;
        }
        Ok(Self { pool, telemetry })
    }

    /// Builds the pool described by `config` and wraps it.
    pub fn from_config(config: &PvzConfig, telemetry: Arc<Telemetry>) -> RepoResult<Self> {
        let pool = match config.db_path.as_ref() {
            Some(path) => ConnectionPool::open(path, config.pool_size, config.busy_timeout)?,
            None => ConnectionPool::in_memory(config.busy_timeout)?,
        };
        Self::try_new(pool, telemetry)
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Runs `body` on a pooled connection guarded by `ctx`, then classifies,
    /// logs and counts the outcome.
    fn run<T>(
        &self,
        ctx: &RequestContext,
        op: &'static str,
        body: impl FnOnce(&ContextGuard<'_>) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let started_at = Instant::now();
        let result = self
            .pool
            .acquire(ctx)
            .map_err(RepoError::from)
            .and_then(|conn| {
                let guard = ContextGuard::arm(&conn, ctx, self.pool.busy_timeout())?;
                body(&guard).map_err(|err| match err {
                    RepoError::Storage(DbError::Sqlite(inner)) => {
                        RepoError::Storage(guard.classify(inner))
                    }
                    other => other,
                })
            });

        let duration_ms = started_at.elapsed().as_millis();
        match &result {
            Ok(_) => debug!("event={op} module=repo status=ok duration_ms={duration_ms}"),
            Err(err @ RepoError::Storage(inner)) if inner.is_context_error() => {
                self.telemetry.metrics().record(MetricEvent::StorageError);
                warn!(
                    "event={op} module=repo status=aborted duration_ms={duration_ms} error_code={}",
                    err.error_code()
                );
            }
            Err(err @ RepoError::Storage(_)) => {
                self.telemetry.metrics().record(MetricEvent::StorageError);
                error!(
                    "event={op} module=repo status=error duration_ms={duration_ms} error_code={} error={err}",
                    err.error_code()
                );
            }
            Err(err) => {
                if matches!(err, RepoError::Conflict(_)) {
                    self.telemetry.metrics().record(MetricEvent::Conflict);
                }
                info!(
                    "event={op} module=repo status=rejected duration_ms={duration_ms} error_code={}",
                    err.error_code()
                );
            }
        }
        result
    }

    fn record(&self, event: MetricEvent) {
        self.telemetry.metrics().record(event);
    }
}

impl PvzRepository for SqlitePvzRepository {
    fn create_pickup_point(
        &self,
        ctx: &RequestContext,
        point: &PickupPoint,
    ) -> RepoResult<PickupPoint> {
        let point = point.normalized()?;

        let created = self.run(ctx, "create_pickup_point", |conn| {
            let tx = conn.begin_immediate()?;
            tx.execute(
                "INSERT INTO pickup_points (id, city, registered_at)
                 VALUES (?1, ?2, ?3);",
                params![point.id.to_string(), point.city.as_str(), point.registered_at],
            )
            .map_err(|err| translate_insert_error(err, Entity::PickupPoint, point.id))?;
            tx.commit()?;
            Ok(point)
        })?;

        self.record(MetricEvent::PickupPointCreated);
        Ok(created)
    }

    fn list_pickup_points(
        &self,
        ctx: &RequestContext,
        query: &PickupPointListQuery,
    ) -> RepoResult<Vec<PickupPointWithReceptions>> {
        let window = query.page_window()?;

        self.run(ctx, "list_pickup_points", |conn| {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Deferred)?;
            let points = load_pickup_point_page(&tx, window)?;
            if points.is_empty() {
                return Ok(Vec::new());
            }

            let point_ids: Vec<String> = points.iter().map(|point| point.id.to_string()).collect();
            let receptions = load_receptions(&tx, &point_ids, query)?;
            let mut items = load_items(&tx, &point_ids, query)?;
            tx.commit()?;

            let mut receptions_by_point: HashMap<PickupPointId, Vec<ReceptionWithItems>> =
                HashMap::new();
            for reception in receptions {
                let reception_items = items.remove(&reception.id).unwrap_or_default();
                receptions_by_point
                    .entry(reception.pvz_id)
                    .or_default()
                    .push(ReceptionWithItems {
                        reception,
                        items: reception_items,
                    });
            }

            Ok(points
                .into_iter()
                .map(|pickup_point| PickupPointWithReceptions {
                    receptions: receptions_by_point
                        .remove(&pickup_point.id)
                        .unwrap_or_default(),
                    pickup_point,
                })
                .collect())
        })
    }

    fn create_reception(
        &self,
        ctx: &RequestContext,
        reception: &Reception,
    ) -> RepoResult<Reception> {
        reception.validate_new()?;

        let created = self.run(ctx, "create_reception", |conn| {
            let tx = conn.begin_immediate()?;
            if !pickup_point_exists(&tx, reception.pvz_id)? {
                return Err(RepoError::NotFound(NotFoundKind::PickupPoint(
                    reception.pvz_id,
                )));
            }
            if find_open_reception(&tx, reception.pvz_id)?.is_some() {
                return Err(RepoError::Conflict(ConflictKind::ReceptionAlreadyOpen(
                    reception.pvz_id,
                )));
            }

            tx.execute(
                "INSERT INTO receptions (id, pvz_id, opened_at, status)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    reception.id.to_string(),
                    reception.pvz_id.to_string(),
                    reception.opened_at,
                    ReceptionStatus::Open.as_str(),
                ],
            )
            .map_err(|err| translate_reception_insert_error(err, reception))?;
            tx.commit()?;
            Ok(reception.clone())
        })?;

        self.record(MetricEvent::ReceptionCreated);
        Ok(created)
    }

    fn add_item(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
        item: &NewItem,
    ) -> RepoResult<Item> {
        item.validate()?;

        let added = self.run(ctx, "add_item", |conn| {
            let tx = conn.begin_immediate()?;
            let reception = find_open_reception(&tx, pvz_id)?
                .ok_or_else(|| RepoError::no_open_reception(pvz_id))?;

            let stored = item.clone().into_item(reception.id);
            tx.execute(
                "INSERT INTO items (id, reception_id, category, created_at)
                 VALUES (?1, ?2, ?3, ?4);",
                params![
                    stored.id.to_string(),
                    stored.reception_id.to_string(),
                    stored.category.as_str(),
                    stored.created_at,
                ],
            )
            .map_err(|err| translate_insert_error(err, Entity::Item, stored.id))?;
            tx.commit()?;
            Ok(stored)
        })?;

        self.record(MetricEvent::ItemAdded);
        Ok(added)
    }

    fn remove_last_item(&self, ctx: &RequestContext, pvz_id: PickupPointId) -> RepoResult<Item> {
        let removed = self.run(ctx, "remove_last_item", |conn| {
            let tx = conn.begin_immediate()?;
            let reception = find_open_reception(&tx, pvz_id)?
                .ok_or_else(|| RepoError::no_open_reception(pvz_id))?;

            let removed = pop_last_item(&tx, reception.id)?
                .ok_or_else(|| RepoError::NotFound(NotFoundKind::NoItemsToRemove(reception.id)))?;
            tx.commit()?;
            Ok(removed)
        })?;

        self.record(MetricEvent::ItemRemoved);
        Ok(removed)
    }

    fn close_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> RepoResult<Reception> {
        let closed = self.run(ctx, "close_reception", |conn| {
            let tx = conn.begin_immediate()?;
            let mut reception = find_open_reception(&tx, pvz_id)?
                .ok_or_else(|| RepoError::no_open_reception(pvz_id))?;

            let changed = tx.execute(
                "UPDATE receptions
                 SET status = ?2
                 WHERE id = ?1
                   AND status = ?3;",
                params![
                    reception.id.to_string(),
                    ReceptionStatus::Closed.as_str(),
                    ReceptionStatus::Open.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(RepoError::no_open_reception(pvz_id));
            }
            tx.commit()?;

            reception.status = ReceptionStatus::Closed;
            Ok(reception)
        })?;

        self.record(MetricEvent::ReceptionClosed);
        Ok(closed)
    }

    fn open_reception(
        &self,
        ctx: &RequestContext,
        pvz_id: PickupPointId,
    ) -> RepoResult<Option<Reception>> {
        self.run(ctx, "open_reception", |conn| find_open_reception(conn, pvz_id))
    }
}

fn pickup_point_exists(conn: &Connection, pvz_id: PickupPointId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pickup_points WHERE id = ?1);",
        [pvz_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn find_open_reception(conn: &Connection, pvz_id: PickupPointId) -> RepoResult<Option<Reception>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECEPTION_COLUMNS}
         FROM receptions
         WHERE pvz_id = ?1
           AND status = ?2
         ORDER BY opened_at DESC
         LIMIT 1;"
    ))?;
    let mut rows = stmt.query(params![pvz_id.to_string(), ReceptionStatus::Open.as_str()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_reception_row(row)?));
    }
    Ok(None)
}

/// Deletes the newest item of `reception_id` and returns it.
fn pop_last_item(conn: &Connection, reception_id: ReceptionId) -> RepoResult<Option<Item>> {
    let mut stmt = conn.prepare(
        "DELETE FROM items
         WHERE seq = (
             SELECT seq
             FROM items
             WHERE reception_id = ?1
             ORDER BY created_at DESC, seq DESC
             LIMIT 1
         )
         RETURNING id, reception_id, category, created_at;",
    )?;
    let mut rows = stmt.query([reception_id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_item_row(row)?));
    }
    Ok(None)
}

fn load_pickup_point_page(conn: &Connection, window: PageWindow) -> RepoResult<Vec<PickupPoint>> {
    let offset = i64::try_from(window.offset)
        .map_err(|_| RepoError::invalid_data(format!("page offset {} overflows", window.offset)))?;
    let mut stmt = conn.prepare(
        "SELECT id, city, registered_at
         FROM pickup_points
         ORDER BY registered_at DESC, id ASC
         LIMIT ?1 OFFSET ?2;",
    )?;
    let mut rows = stmt.query(params![i64::from(window.limit), offset])?;
    let mut points = Vec::new();
    while let Some(row) = rows.next()? {
        points.push(parse_pickup_point_row(row)?);
    }
    Ok(points)
}

/// Appends ` AND <column> >= ?` / `<= ?` for the query's date range.
fn push_date_filter(
    sql: &mut String,
    bind_values: &mut Vec<Value>,
    column: &str,
    query: &PickupPointListQuery,
) {
    if let Some(start) = query.start {
        sql.push_str(&format!(" AND {column} >= ?"));
        bind_values.push(Value::Integer(start));
    }
    if let Some(end) = query.end {
        sql.push_str(&format!(" AND {column} <= ?"));
        bind_values.push(Value::Integer(end));
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn load_receptions(
    conn: &Connection,
    point_ids: &[String],
    query: &PickupPointListQuery,
) -> RepoResult<Vec<Reception>> {
    let mut sql = format!(
        "SELECT {RECEPTION_COLUMNS}
         FROM receptions
         WHERE pvz_id IN ({})",
        placeholders(point_ids.len())
    );
    let mut bind_values: Vec<Value> = point_ids.iter().cloned().map(Value::Text).collect();
    push_date_filter(&mut sql, &mut bind_values, "opened_at", query);
    sql.push_str(" ORDER BY opened_at DESC, id ASC;");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut receptions = Vec::new();
    while let Some(row) = rows.next()? {
        receptions.push(parse_reception_row(row)?);
    }
    Ok(receptions)
}

/// Loads items of every reception that passed the filter, grouped by
/// reception and ordered newest first within each group.
fn load_items(
    conn: &Connection,
    point_ids: &[String],
    query: &PickupPointListQuery,
) -> RepoResult<HashMap<ReceptionId, Vec<Item>>> {
    let mut sql = format!(
        "SELECT i.id AS id, i.reception_id AS reception_id, i.category AS category, i.created_at AS created_at
         FROM items i
         INNER JOIN receptions r ON r.id = i.reception_id
         WHERE r.pvz_id IN ({})",
        placeholders(point_ids.len())
    );
    let mut bind_values: Vec<Value> = point_ids.iter().cloned().map(Value::Text).collect();
    push_date_filter(&mut sql, &mut bind_values, "r.opened_at", query);
    sql.push_str(" ORDER BY i.created_at DESC, i.seq DESC;");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut items: HashMap<ReceptionId, Vec<Item>> = HashMap::new();
    while let Some(row) = rows.next()? {
        let item = parse_item_row(row)?;
        items.entry(item.reception_id).or_default().push(item);
    }
    Ok(items)
}

/// Maps a uniqueness violation on insert to `Conflict(DuplicateId)`.
fn translate_insert_error(err: rusqlite::Error, entity: Entity, id: Uuid) -> RepoError {
    if is_unique_violation(&err) {
        return RepoError::Conflict(ConflictKind::DuplicateId { entity, id });
    }
    RepoError::from(err)
}

fn translate_reception_insert_error(err: rusqlite::Error, reception: &Reception) -> RepoError {
    if is_unique_violation(&err) {
        // The partial index reports the indexed column; the primary key reports `id`.
        if violated_constraint(&err).is_some_and(|target| target.contains("receptions.pvz_id")) {
            return RepoError::Conflict(ConflictKind::ReceptionAlreadyOpen(reception.pvz_id));
        }
        return RepoError::Conflict(ConflictKind::DuplicateId {
            entity: Entity::Reception,
            id: reception.id,
        });
    }
    if is_foreign_key_violation(&err) {
        return RepoError::NotFound(NotFoundKind::PickupPoint(reception.pvz_id));
    }
    RepoError::from(err)
}

fn constraint_extended_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Some(inner.extended_code)
        }
        _ => None,
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        constraint_extended_code(err),
        Some(ffi::SQLITE_CONSTRAINT_UNIQUE) | Some(ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
    )
}

fn is_foreign_key_violation(err: &rusqlite::Error) -> bool {
    constraint_extended_code(err) == Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

fn violated_constraint(err: &rusqlite::Error) -> Option<&str> {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => message
            .strip_prefix("UNIQUE constraint failed: ")
            .or(Some(message.as_str())),
        _ => None,
    }
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::invalid_data(format!("invalid uuid `{value}` in {column}")))
}

fn parse_pickup_point_row(row: &Row<'_>) -> RepoResult<PickupPoint> {
    let id_text: String = row.get("id")?;
    let point = PickupPoint::with_id(
        parse_uuid(&id_text, "pickup_points.id")?,
        row.get::<_, String>("city")?,
        row.get("registered_at")?,
    );
    point
        .normalized()
        .map_err(|err| RepoError::invalid_data(format!("pickup_points row {id_text}: {err}")))
}

fn parse_reception_row(row: &Row<'_>) -> RepoResult<Reception> {
    let id_text: String = row.get("id")?;
    let pvz_id_text: String = row.get("pvz_id")?;
    let status_text: String = row.get("status")?;
    let status = ReceptionStatus::parse(&status_text).ok_or_else(|| {
        RepoError::invalid_data(format!(
            "invalid reception status `{status_text}` in receptions.status"
        ))
    })?;

    Ok(Reception {
        id: parse_uuid(&id_text, "receptions.id")?,
        pvz_id: parse_uuid(&pvz_id_text, "receptions.pvz_id")?,
        opened_at: row.get("opened_at")?,
        status,
    })
}

fn parse_item_row(row: &Row<'_>) -> RepoResult<Item> {
    let id_text: String = row.get("id")?;
    let reception_id_text: String = row.get("reception_id")?;
    let category_text: String = row.get("category")?;
    let category = Category::parse(&category_text).ok_or_else(|| {
        RepoError::invalid_data(format!(
            "invalid item category `{category_text}` in items.category"
        ))
    })?;

    Ok(Item {
        id: parse_uuid(&id_text, "items.id")?,
        reception_id: parse_uuid(&reception_id_text, "items.reception_id")?,
        category,
        created_at: row.get("created_at")?,
    })
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(DbError::UninitializedConnection {
            expected_version,
            actual_version,
        }
        .into());
    }

    for &(table, columns) in REQUIRED_COLUMNS {
        if !table_exists(conn, table)? {
            return Err(DbError::MissingRequiredTable(table).into());
        }
        for &column in columns {
            if !table_has_column(conn, table, column)? {
                return Err(DbError::MissingRequiredColumn { table, column }.into());
            }
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists = conn
        .query_row(
            "SELECT 1
             FROM sqlite_master
             WHERE type = 'table' AND name = ?1;",
            [table],
            |row| row.get::<_, i64>(0),
        )
        .optional()?;
    Ok(exists.is_some())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
