//! Synchronous SQL used by [`LocalSqliteStore`](crate::LocalSqliteStore).
//!
//! Every function takes a borrowed connection and must be called from inside
//! `spawn_blocking`.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde::Serialize;
use viewsync_catalog_core::{
    increment_catalog_version, CatalogError, Datasource, FieldReset, FormView, FormViewField,
    OnlineStatus, Result, ScanRecord,
};

use crate::{CatalogStats, FieldChangeSet, OutboxEvent};

// ============================================================================
// Row mapping
// ============================================================================

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = CatalogError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

const DATASOURCE_COLUMNS: &str = "id, name, source_type, external_id, catalog_name, schema_name, \
     data_view_source, status, metadata_task_id, created_at, updated_at";

fn datasource_from_row(row: &Row<'_>) -> rusqlite::Result<Datasource> {
    Ok(Datasource {
        id: row.get(0)?,
        name: row.get(1)?,
        source_type: row.get(2)?,
        external_id: row.get(3)?,
        catalog_name: row.get(4)?,
        schema: row.get(5)?,
        data_view_source: row.get(6)?,
        status: parse_column(row, 7)?,
        metadata_task_id: row.get(8)?,
        created_at: timestamp_column(row, 9)?,
        updated_at: timestamp_column(row, 10)?,
    })
}

const FORM_VIEW_COLUMNS: &str = "id, datasource_id, technical_name, business_name, original_name, \
     uniform_catalog_code, status, edit_status, online_status, comment, filter_rule, \
     delete_message, created_at, updated_at";

fn form_view_from_row(row: &Row<'_>) -> rusqlite::Result<FormView> {
    Ok(FormView {
        id: row.get(0)?,
        datasource_id: row.get(1)?,
        technical_name: row.get(2)?,
        business_name: row.get(3)?,
        original_name: row.get(4)?,
        uniform_catalog_code: row.get(5)?,
        status: parse_column(row, 6)?,
        edit_status: parse_column(row, 7)?,
        online_status: parse_column(row, 8)?,
        comment: row.get(9)?,
        filter_rule: row.get(10)?,
        delete_message: row.get(11)?,
        created_at: timestamp_column(row, 12)?,
        updated_at: timestamp_column(row, 13)?,
    })
}

const FIELD_COLUMNS: &str = "id, form_view_id, technical_name, business_name, original_name, \
     comment, primary_key, data_type, original_data_type, data_length, data_accuracy, \
     is_nullable, status, field_index, reset_before_data_type, reset_convert_rules, \
     reset_data_length, reset_data_accuracy";

fn field_from_row(row: &Row<'_>) -> rusqlite::Result<FormViewField> {
    let reset_before: Option<String> = row.get(14)?;
    let reset = match reset_before {
        Some(before_data_type) if !before_data_type.is_empty() => Some(FieldReset {
            before_data_type,
            convert_rules: row.get::<_, Option<String>>(15)?.unwrap_or_default(),
            data_length: row.get::<_, Option<i32>>(16)?.unwrap_or(0),
            data_accuracy: row.get::<_, Option<i32>>(17)?.unwrap_or(0),
        }),
        _ => None,
    };

    Ok(FormViewField {
        id: row.get(0)?,
        form_view_id: row.get(1)?,
        technical_name: row.get(2)?,
        business_name: row.get(3)?,
        original_name: row.get(4)?,
        comment: row.get(5)?,
        primary_key: row.get(6)?,
        data_type: row.get(7)?,
        original_data_type: row.get(8)?,
        data_length: row.get(9)?,
        data_accuracy: row.get(10)?,
        is_nullable: row.get(11)?,
        status: parse_column(row, 12)?,
        index: row.get(13)?,
        reset,
    })
}

// ============================================================================
// Datasources
// ============================================================================

pub(crate) fn get_datasource(conn: &Connection, id: &str) -> Result<Option<Datasource>> {
    let sql = format!("SELECT {} FROM datasources WHERE id = ?1", DATASOURCE_COLUMNS);
    let ds = conn
        .query_row(&sql, [id], datasource_from_row)
        .optional()?;
    Ok(ds)
}

pub(crate) fn list_datasources(conn: &Connection) -> Result<Vec<Datasource>> {
    let sql = format!("SELECT {} FROM datasources ORDER BY name", DATASOURCE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], datasource_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn upsert_datasource(conn: &mut Connection, ds: &Datasource) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        r#"
        INSERT INTO datasources (id, name, source_type, external_id, catalog_name, schema_name,
                                 data_view_source, status, metadata_task_id, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            source_type = excluded.source_type,
            external_id = excluded.external_id,
            catalog_name = excluded.catalog_name,
            schema_name = excluded.schema_name,
            data_view_source = excluded.data_view_source,
            updated_at = excluded.updated_at
        "#,
        params![
            ds.id,
            ds.name,
            ds.source_type,
            ds.external_id,
            ds.catalog_name,
            ds.schema,
            ds.data_view_source,
            ds.status.to_string(),
            ds.metadata_task_id,
            ds.created_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    increment_catalog_version(&tx)?;
    tx.commit()?;
    Ok(())
}

/// Conditional status flip; returns false when another scan holds the datasource.
pub(crate) fn try_begin_scan(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE datasources SET status = 'scanning', updated_at = ?2
         WHERE id = ?1 AND status != 'scanning'",
        params![id, Utc::now().to_rfc3339()],
    )?;

    if rows > 0 {
        return Ok(true);
    }

    if get_datasource(conn, id)?.is_none() {
        return Err(CatalogError::DatasourceNotFound(id.to_string()));
    }
    Ok(false)
}

pub(crate) fn finish_scan(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE datasources SET status = 'available', metadata_task_id = NULL, updated_at = ?2
         WHERE id = ?1",
        params![id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub(crate) fn set_metadata_task_id(conn: &Connection, id: &str, task_id: Option<&str>) -> Result<()> {
    let rows = conn.execute(
        "UPDATE datasources SET metadata_task_id = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, task_id, Utc::now().to_rfc3339()],
    )?;
    if rows == 0 {
        return Err(CatalogError::DatasourceNotFound(id.to_string()));
    }
    Ok(())
}

pub(crate) fn set_data_view_source(conn: &mut Connection, id: &str, source: &str) -> Result<()> {
    let tx = conn.transaction()?;
    let rows = tx.execute(
        "UPDATE datasources SET data_view_source = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, source, Utc::now().to_rfc3339()],
    )?;
    if rows == 0 {
        return Err(CatalogError::DatasourceNotFound(id.to_string()));
    }
    increment_catalog_version(&tx)?;
    tx.commit()?;
    Ok(())
}

// ============================================================================
// Form views
// ============================================================================

pub(crate) fn list_form_views(conn: &Connection, datasource_id: &str) -> Result<Vec<FormView>> {
    let sql = format!(
        "SELECT {} FROM form_views WHERE datasource_id = ?1 ORDER BY technical_name",
        FORM_VIEW_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([datasource_id], form_view_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn get_form_view(conn: &Connection, id: &str) -> Result<Option<FormView>> {
    let sql = format!("SELECT {} FROM form_views WHERE id = ?1", FORM_VIEW_COLUMNS);
    let view = conn.query_row(&sql, [id], form_view_from_row).optional()?;
    Ok(view)
}

pub(crate) fn list_fields(conn: &Connection, form_view_id: &str) -> Result<Vec<FormViewField>> {
    let sql = format!(
        "SELECT {} FROM form_view_fields WHERE form_view_id = ?1 ORDER BY field_index, technical_name",
        FIELD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([form_view_id], field_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn list_fields_by_views(
    conn: &Connection,
    form_view_ids: &[String],
) -> Result<HashMap<String, Vec<FormViewField>>> {
    let mut by_view: HashMap<String, Vec<FormViewField>> = HashMap::new();
    let sql = format!(
        "SELECT {} FROM form_view_fields WHERE form_view_id = ?1 ORDER BY field_index, technical_name",
        FIELD_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;

    for id in form_view_ids {
        let fields = stmt
            .query_map([id], field_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        by_view.insert(id.clone(), fields);
    }

    Ok(by_view)
}

fn insert_form_view(tx: &Transaction<'_>, view: &FormView) -> Result<()> {
    let inserted = tx.execute(
        r#"
        INSERT INTO form_views (id, datasource_id, technical_name, business_name, original_name,
                                uniform_catalog_code, status, edit_status, online_status, comment,
                                filter_rule, delete_message, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
        params![
            view.id,
            view.datasource_id,
            view.technical_name,
            view.business_name,
            view.original_name,
            view.uniform_catalog_code,
            view.status.to_string(),
            view.edit_status.to_string(),
            view.online_status.to_string(),
            view.comment,
            view.filter_rule,
            view.delete_message,
            view.created_at.to_rfc3339(),
            view.updated_at.to_rfc3339(),
        ],
    );

    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(CatalogError::ConflictError(format!(
                "Form view '{}' already exists in datasource '{}'",
                view.technical_name, view.datasource_id
            )))
        }
        Err(e) => Err(e.into()),
    }
}

fn write_form_view(tx: &Transaction<'_>, view: &FormView) -> Result<()> {
    let rows = tx.execute(
        r#"
        UPDATE form_views SET
            business_name = ?2,
            original_name = ?3,
            uniform_catalog_code = ?4,
            status = ?5,
            edit_status = ?6,
            online_status = ?7,
            comment = ?8,
            filter_rule = ?9,
            delete_message = ?10,
            updated_at = ?11
        WHERE id = ?1
        "#,
        params![
            view.id,
            view.business_name,
            view.original_name,
            view.uniform_catalog_code,
            view.status.to_string(),
            view.edit_status.to_string(),
            view.online_status.to_string(),
            view.comment,
            view.filter_rule,
            view.delete_message,
            Utc::now().to_rfc3339(),
        ],
    )?;
    if rows == 0 {
        return Err(CatalogError::FormViewNotFound(view.id.clone()));
    }
    Ok(())
}

/// Write the columns a scan owns, leaving user edits in place.
///
/// Business name and filter rule are never touched. The online status is only
/// written over a pending approval, which is the one state a scan revokes.
fn write_scanned_view(tx: &Transaction<'_>, view: &FormView) -> Result<()> {
    let rows = tx.execute(
        r#"
        UPDATE form_views SET
            original_name = ?2,
            uniform_catalog_code = ?3,
            status = ?4,
            edit_status = ?5,
            online_status = CASE WHEN online_status IN (?6, ?7) THEN ?8 ELSE online_status END,
            comment = ?9,
            delete_message = ?10,
            updated_at = ?11
        WHERE id = ?1
        "#,
        params![
            view.id,
            view.original_name,
            view.uniform_catalog_code,
            view.status.to_string(),
            view.edit_status.to_string(),
            OnlineStatus::OnlineAuditing.to_string(),
            OnlineStatus::OfflineAuditing.to_string(),
            view.online_status.to_string(),
            view.comment,
            view.delete_message,
            Utc::now().to_rfc3339(),
        ],
    )?;
    if rows == 0 {
        return Err(CatalogError::FormViewNotFound(view.id.clone()));
    }
    Ok(())
}

fn insert_field(tx: &Transaction<'_>, field: &FormViewField) -> Result<()> {
    let reset = field.reset.as_ref();
    tx.execute(
        r#"
        INSERT INTO form_view_fields (id, form_view_id, technical_name, business_name, original_name,
                                      comment, primary_key, data_type, original_data_type, data_length,
                                      data_accuracy, is_nullable, status, field_index,
                                      reset_before_data_type, reset_convert_rules,
                                      reset_data_length, reset_data_accuracy)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
        "#,
        params![
            field.id,
            field.form_view_id,
            field.technical_name,
            field.business_name,
            field.original_name,
            field.comment,
            field.primary_key,
            field.data_type,
            field.original_data_type,
            field.data_length,
            field.data_accuracy,
            field.is_nullable,
            field.status.to_string(),
            field.index,
            reset.map(|r| r.before_data_type.as_str()),
            reset.map(|r| r.convert_rules.as_str()),
            reset.map(|r| r.data_length),
            reset.map(|r| r.data_accuracy),
        ],
    )?;
    Ok(())
}

fn write_field(tx: &Transaction<'_>, field: &FormViewField) -> Result<()> {
    let reset = field.reset.as_ref();
    tx.execute(
        r#"
        UPDATE form_view_fields SET
            business_name = ?2,
            original_name = ?3,
            comment = ?4,
            primary_key = ?5,
            data_type = ?6,
            original_data_type = ?7,
            data_length = ?8,
            data_accuracy = ?9,
            is_nullable = ?10,
            status = ?11,
            field_index = ?12,
            reset_before_data_type = ?13,
            reset_convert_rules = ?14,
            reset_data_length = ?15,
            reset_data_accuracy = ?16
        WHERE id = ?1
        "#,
        params![
            field.id,
            field.business_name,
            field.original_name,
            field.comment,
            field.primary_key,
            field.data_type,
            field.original_data_type,
            field.data_length,
            field.data_accuracy,
            field.is_nullable,
            field.status.to_string(),
            field.index,
            reset.map(|r| r.before_data_type.as_str()),
            reset.map(|r| r.convert_rules.as_str()),
            reset.map(|r| r.data_length),
            reset.map(|r| r.data_accuracy),
        ],
    )?;
    Ok(())
}

#[derive(Serialize)]
struct IndexPayload<'a> {
    view: &'a FormView,
    fields: &'a [FormViewField],
}

fn append_outbox(
    tx: &Transaction<'_>,
    event_type: &str,
    view: &FormView,
    fields: &[FormViewField],
) -> Result<()> {
    let payload = serde_json::to_string(&IndexPayload { view, fields })?;
    tx.execute(
        "INSERT INTO search_index_outbox (form_view_id, event_type, payload, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![view.id, event_type, payload, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub(crate) fn create_form_view(
    conn: &mut Connection,
    view: &FormView,
    fields: &[FormViewField],
) -> Result<()> {
    let tx = conn.transaction()?;
    insert_form_view(&tx, view)?;
    for field in fields {
        insert_field(&tx, field)?;
    }
    append_outbox(&tx, "created", view, fields)?;
    increment_catalog_version(&tx)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn update_form_view(conn: &mut Connection, view: &FormView) -> Result<()> {
    let tx = conn.transaction()?;
    write_form_view(&tx, view)?;
    increment_catalog_version(&tx)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn update_scanned_view(conn: &mut Connection, view: &FormView) -> Result<()> {
    let tx = conn.transaction()?;
    write_scanned_view(&tx, view)?;
    increment_catalog_version(&tx)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn update_form_view_with_fields(
    conn: &mut Connection,
    view: &FormView,
    changes: &FieldChangeSet,
) -> Result<()> {
    let tx = conn.transaction()?;
    write_scanned_view(&tx, view)?;

    for field in &changes.created {
        insert_field(&tx, field)?;
    }
    for field in changes.updated.iter().chain(changes.deleted.iter()) {
        write_field(&tx, field)?;
    }

    let fields = list_fields(&tx, &view.id)?;
    append_outbox(&tx, "updated", view, &fields)?;
    increment_catalog_version(&tx)?;
    tx.commit()?;
    Ok(())
}

pub(crate) fn mark_views_deleted(conn: &mut Connection, views: &[FormView]) -> Result<usize> {
    let tx = conn.transaction()?;
    for view in views {
        write_scanned_view(&tx, view)?;
        append_outbox(&tx, "deleted", view, &[])?;
    }
    if !views.is_empty() {
        increment_catalog_version(&tx)?;
    }
    tx.commit()?;
    Ok(views.len())
}

// ============================================================================
// Scan records and outbox
// ============================================================================

pub(crate) fn append_scan_record(conn: &Connection, record: &ScanRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_records (id, datasource_id, scanner, scanned_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.id,
            record.datasource_id,
            record.scanner,
            record.scanned_at.to_rfc3339()
        ],
    )?;
    Ok(())
}

pub(crate) fn list_scan_records(
    conn: &Connection,
    datasource_id: &str,
    limit: usize,
) -> Result<Vec<ScanRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, datasource_id, scanner, scanned_at FROM scan_records
         WHERE datasource_id = ?1 ORDER BY scanned_at DESC, rowid DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![datasource_id, limit as i64], |row| {
            Ok(ScanRecord {
                id: row.get(0)?,
                datasource_id: row.get(1)?,
                scanner: row.get(2)?,
                scanned_at: timestamp_column(row, 3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn list_pending_outbox(conn: &Connection, limit: usize) -> Result<Vec<OutboxEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, form_view_id, event_type, payload, created_at FROM search_index_outbox
         WHERE published_at IS NULL ORDER BY id LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(OutboxEvent {
                id: row.get(0)?,
                form_view_id: row.get(1)?,
                event_type: row.get(2)?,
                payload: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn mark_outbox_published(conn: &mut Connection, ids: &[i64]) -> Result<usize> {
    let tx = conn.transaction()?;
    let now = Utc::now().to_rfc3339();
    let mut marked = 0;
    for id in ids {
        marked += tx.execute(
            "UPDATE search_index_outbox SET published_at = ?2 WHERE id = ?1 AND published_at IS NULL",
            params![id, now],
        )?;
    }
    tx.commit()?;
    Ok(marked)
}

pub(crate) fn catalog_stats(conn: &Connection) -> Result<CatalogStats> {
    let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |row| row.get(0))?) };

    let mut views_by_status = Vec::new();
    {
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM form_views GROUP BY status ORDER BY status")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            views_by_status.push(row?);
        }
    }

    Ok(CatalogStats {
        datasources: count("SELECT COUNT(*) FROM datasources")?,
        form_views: count("SELECT COUNT(*) FROM form_views")?,
        fields: count("SELECT COUNT(*) FROM form_view_fields")?,
        scan_records: count("SELECT COUNT(*) FROM scan_records")?,
        pending_outbox: count("SELECT COUNT(*) FROM search_index_outbox WHERE published_at IS NULL")?,
        views_by_status,
        catalog_version: viewsync_catalog_core::get_catalog_version(conn)?,
    })
}
