//! Field-level diff and the view status machine.
//!
//! Both are pure: they decide what changes, the engine persists it.

use std::collections::{HashMap, HashSet};
use viewsync_catalog_core::{
    ColumnInfo, EditStatus, FieldStatus, FormView, FormViewField, ViewStatus,
};
use viewsync_catalog_storage::FieldChangeSet;

use crate::types::{is_convertible, virtual_type};

/// How a scanned column relates to the stored field of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldChange {
    New,
    /// The field was marked deleted and the column is back
    Reversed,
    Changed,
    CommentOnly,
    IndexOnly,
    Unchanged,
}

/// Result of diffing the stored fields of a view against scanned columns.
#[derive(Debug, Clone, Default)]
pub struct FieldDiff {
    /// Every field of the view after the diff, scanned columns first
    pub fields: Vec<FormViewField>,
    /// Rows to write
    pub changes: FieldChangeSet,
    /// The SELECT list has to be regenerated (`formViewModify`)
    pub structural: bool,
    /// A field was added, re-added or removed
    pub added_or_removed: bool,
}

pub(crate) fn business_name(name: &str, comment: Option<&str>) -> String {
    comment
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(name)
        .to_string()
}

fn scanned_status(data_type: &str, otherwise: FieldStatus) -> FieldStatus {
    if data_type.is_empty() {
        FieldStatus::NotSupport
    } else {
        otherwise
    }
}

/// Build a field for a column seen for the first time.
pub fn build_field(form_view_id: &str, column: &ColumnInfo, index: i32) -> FormViewField {
    let data_type = virtual_type(&column.data_type).to_string();
    FormViewField {
        id: uuid::Uuid::new_v4().to_string(),
        form_view_id: form_view_id.to_string(),
        technical_name: column.name.clone(),
        business_name: business_name(&column.name, column.comment.as_deref()),
        original_name: column.source_name().to_string(),
        comment: column.comment.clone(),
        primary_key: column.primary_key,
        status: scanned_status(&data_type, FieldStatus::New),
        data_type,
        original_data_type: column.data_type.clone(),
        data_length: column.length,
        data_accuracy: column.precision,
        is_nullable: column.nullable,
        index,
        reset: None,
    }
}

/// Scanned columns with repeated names dropped, first occurrence wins.
///
/// Positions are numbered over the kept columns only.
pub fn distinct_columns<'a>(
    form_view_id: &str,
    columns: &'a [ColumnInfo],
) -> Vec<(i32, &'a ColumnInfo)> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(columns.len());
    let mut kept = Vec::with_capacity(columns.len());
    for column in columns {
        if !seen.insert(column.name.as_str()) {
            tracing::warn!(
                form_view_id = %form_view_id,
                column = %column.name,
                "Duplicate column in scanned table, keeping first"
            );
            continue;
        }
        kept.push((kept.len() as i32, column));
    }
    kept
}

/// Fields of a view created from `columns`.
pub fn new_fields(form_view_id: &str, columns: &[ColumnInfo]) -> Vec<FormViewField> {
    distinct_columns(form_view_id, columns)
        .into_iter()
        .map(|(index, column)| build_field(form_view_id, column, index))
        .collect()
}

/// Whether the source definition of a column differs from the stored field.
///
/// With an active override the scanned virtual type is compared with the
/// type the override was applied to, not with the override itself.
pub fn is_changed(field: &FormViewField, column: &ColumnInfo) -> bool {
    let scanned_vt = virtual_type(&column.data_type);
    let baseline_vt = match &field.reset {
        Some(reset) if field.has_reset() => reset.before_data_type.as_str(),
        _ => field.data_type.as_str(),
    };

    field.original_data_type != column.data_type
        || baseline_vt != scanned_vt
        || field.is_nullable != column.nullable
        || field.data_length != column.length
        || field.data_accuracy != column.precision
        || field.primary_key != column.primary_key
        || field.original_name != column.source_name()
}

/// Classify a scanned column at position `index` against its stored field.
pub fn classify(existing: Option<&FormViewField>, column: &ColumnInfo, index: i32) -> FieldChange {
    match existing {
        None => FieldChange::New,
        Some(field) if field.status == FieldStatus::Delete => FieldChange::Reversed,
        Some(field) if is_changed(field, column) => FieldChange::Changed,
        Some(field) if field.comment != column.comment => FieldChange::CommentOnly,
        Some(field) if field.index != index => FieldChange::IndexOnly,
        Some(_) => FieldChange::Unchanged,
    }
}

/// Refresh a stored field from a changed column, keeping user edits.
///
/// An active override survives when the newly scanned type can still be cast
/// to it; it is dropped when the scan now reports the override type itself or
/// when no conversion path exists.
pub fn apply_source_change(field: &mut FormViewField, column: &ColumnInfo) {
    let scanned_vt = virtual_type(&column.data_type);

    field.original_data_type = column.data_type.clone();
    field.original_name = column.source_name().to_string();
    field.data_length = column.length;
    field.data_accuracy = column.precision;
    field.is_nullable = column.nullable;
    field.primary_key = column.primary_key;

    if field.has_reset() {
        let override_vt = field.data_type.clone();
        if scanned_vt == override_vt {
            field.reset = None;
        } else if is_convertible(scanned_vt, &override_vt) {
            if let Some(reset) = field.reset.as_mut() {
                reset.before_data_type = scanned_vt.to_string();
            }
        } else {
            field.reset = None;
            field.data_type = scanned_vt.to_string();
        }
    } else {
        field.reset = None;
        field.data_type = scanned_vt.to_string();
    }

    field.status = scanned_status(&field.data_type, FieldStatus::Modify);
}

/// Diff the stored fields of a view against the scanned columns.
pub fn diff_fields(
    form_view_id: &str,
    existing: &[FormViewField],
    columns: &[ColumnInfo],
) -> FieldDiff {
    let by_name: HashMap<&str, &FormViewField> = existing
        .iter()
        .map(|f| (f.technical_name.as_str(), f))
        .collect();
    let kept = distinct_columns(form_view_id, columns);
    let seen: HashSet<&str> = kept.iter().map(|&(_, c)| c.name.as_str()).collect();
    let mut diff = FieldDiff::default();

    for (index, column) in kept {
        let stored = by_name.get(column.name.as_str()).copied();
        match classify(stored, column, index) {
            FieldChange::New => {
                let field = build_field(form_view_id, column, index);
                diff.changes.created.push(field.clone());
                diff.fields.push(field);
                diff.structural = true;
                diff.added_or_removed = true;
            }
            FieldChange::Reversed => {
                let mut field = stored
                    .cloned()
                    .unwrap_or_else(|| build_field(form_view_id, column, index));
                apply_source_change(&mut field, column);
                field.comment = column.comment.clone();
                field.index = index;
                field.status = scanned_status(&field.data_type, FieldStatus::New);
                diff.changes.updated.push(field.clone());
                diff.fields.push(field);
                diff.structural = true;
                diff.added_or_removed = true;
            }
            FieldChange::Changed => {
                let mut field = stored
                    .cloned()
                    .unwrap_or_else(|| build_field(form_view_id, column, index));
                apply_source_change(&mut field, column);
                field.comment = column.comment.clone();
                field.index = index;
                diff.changes.updated.push(field.clone());
                diff.fields.push(field);
                diff.structural = true;
            }
            FieldChange::CommentOnly | FieldChange::IndexOnly => {
                let mut field = stored
                    .cloned()
                    .unwrap_or_else(|| build_field(form_view_id, column, index));
                field.comment = column.comment.clone();
                field.index = index;
                diff.changes.updated.push(field.clone());
                diff.fields.push(field);
            }
            FieldChange::Unchanged => {
                if let Some(field) = stored {
                    diff.fields.push(field.clone());
                }
            }
        }
    }

    for field in existing {
        if seen.contains(field.technical_name.as_str()) {
            continue;
        }
        let mut field = field.clone();
        if field.status != FieldStatus::Delete {
            field.status = FieldStatus::Delete;
            diff.changes.deleted.push(field.clone());
            diff.structural = true;
            diff.added_or_removed = true;
        }
        diff.fields.push(field);
    }

    diff
}

/// Apply the status transition of a rescanned view.
///
/// - a soft-deleted view found again returns to `New`/`Draft`
/// - a structural change moves `New`/`Uniformity` to `Modify` and `Latest` to `Draft`
/// - no structural change settles `New`/`Modify` into `Uniformity`
pub fn advance_view_status(view: &mut FormView, structural: bool) {
    if view.status == ViewStatus::Delete {
        view.status = ViewStatus::New;
        view.edit_status = EditStatus::Draft;
        view.delete_message = None;
        return;
    }

    if structural {
        if view.edit_status == EditStatus::Latest {
            view.edit_status = EditStatus::Draft;
        }
        if matches!(view.status, ViewStatus::New | ViewStatus::Uniformity) {
            view.status = ViewStatus::Modify;
        }
    } else if matches!(view.status, ViewStatus::New | ViewStatus::Modify) {
        view.status = ViewStatus::Uniformity;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use viewsync_catalog_core::{FieldReset, OnlineStatus};

    fn column(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            original_name: None,
            comment: None,
            data_type: data_type.into(),
            length: 0,
            precision: 0,
            nullable: true,
            primary_key: false,
        }
    }

    fn stored(columns: &[ColumnInfo]) -> Vec<FormViewField> {
        new_fields("v1", columns)
    }

    fn view(status: ViewStatus, edit_status: EditStatus) -> FormView {
        FormView {
            id: "v1".into(),
            datasource_id: "ds".into(),
            technical_name: "orders".into(),
            business_name: "orders".into(),
            original_name: "orders".into(),
            uniform_catalog_code: String::new(),
            status,
            edit_status,
            online_status: OnlineStatus::NotOnline,
            comment: None,
            filter_rule: None,
            delete_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn with_override(mut field: FormViewField, override_vt: &str) -> FormViewField {
        field.reset = Some(FieldReset {
            before_data_type: field.data_type.clone(),
            convert_rules: String::new(),
            data_length: 0,
            data_accuracy: 0,
        });
        field.data_type = override_vt.into();
        field
    }

    #[test]
    fn test_build_field_marks_unsupported_types() {
        let mut col = column("geo", "geometry");
        col.comment = Some("location".into());
        let field = build_field("v1", &col, 3);
        assert_eq!(field.status, FieldStatus::NotSupport);
        assert_eq!(field.data_type, "");
        assert_eq!(field.business_name, "location");
        assert_eq!(field.index, 3);
        assert!(!field.is_selectable());

        let field = build_field("v1", &column("id", "int"), 0);
        assert_eq!(field.status, FieldStatus::New);
        assert_eq!(field.data_type, "integer");
        assert_eq!(field.business_name, "id");
    }

    #[test]
    fn test_unchanged_columns_produce_no_changes() {
        let cols = vec![column("id", "bigint"), column("name", "varchar")];
        let diff = diff_fields("v1", &stored(&cols), &cols);
        assert!(diff.changes.is_empty());
        assert!(!diff.structural);
        assert_eq!(diff.fields.len(), 2);
    }

    #[test]
    fn test_nullable_flip_is_structural() {
        let cols = vec![column("id", "bigint")];
        let mut scanned = cols.clone();
        scanned[0].nullable = false;

        let diff = diff_fields("v1", &stored(&cols), &scanned);
        assert!(diff.structural);
        assert!(!diff.added_or_removed);
        assert_eq!(diff.changes.updated.len(), 1);
        assert_eq!(diff.changes.updated[0].status, FieldStatus::Modify);
        assert!(!diff.changes.updated[0].is_nullable);
    }

    #[test]
    fn test_comment_and_index_changes_are_not_structural() {
        let cols = vec![column("id", "bigint"), column("name", "varchar")];
        let existing = stored(&cols);

        let mut commented = cols.clone();
        commented[1].comment = Some("customer name".into());
        let diff = diff_fields("v1", &existing, &commented);
        assert!(!diff.structural);
        assert_eq!(diff.changes.updated.len(), 1);
        assert_eq!(
            classify(Some(&existing[1]), &commented[1], 1),
            FieldChange::CommentOnly
        );
        // Business name edited by users is left alone
        assert_eq!(diff.changes.updated[0].business_name, "name");

        let reordered = vec![cols[1].clone(), cols[0].clone()];
        let diff = diff_fields("v1", &existing, &reordered);
        assert!(!diff.structural);
        assert_eq!(diff.changes.updated.len(), 2);
        assert_eq!(
            classify(Some(&existing[0]), &reordered[1], 1),
            FieldChange::IndexOnly
        );
    }

    #[test]
    fn test_added_and_removed_fields() {
        let cols = vec![column("id", "bigint"), column("legacy", "varchar")];
        let scanned = vec![column("id", "bigint"), column("email", "varchar")];

        let diff = diff_fields("v1", &stored(&cols), &scanned);
        assert!(diff.structural);
        assert!(diff.added_or_removed);
        assert_eq!(diff.changes.created.len(), 1);
        assert_eq!(diff.changes.created[0].technical_name, "email");
        assert_eq!(diff.changes.deleted.len(), 1);
        assert_eq!(diff.changes.deleted[0].technical_name, "legacy");
        assert_eq!(diff.changes.deleted[0].status, FieldStatus::Delete);
        assert_eq!(diff.fields.len(), 3);
    }

    #[test]
    fn test_deleted_field_found_again_is_new() {
        let cols = vec![column("id", "bigint"), column("name", "varchar")];
        let mut existing = stored(&cols);
        existing[1].status = FieldStatus::Delete;
        existing[1].business_name = "Customer".into();

        let diff = diff_fields("v1", &existing, &cols);
        assert!(diff.structural);
        assert!(diff.added_or_removed);
        let revived = &diff.changes.updated[0];
        assert_eq!(revived.status, FieldStatus::New);
        assert_eq!(revived.id, existing[1].id);
        assert_eq!(revived.business_name, "Customer");
    }

    #[test]
    fn test_already_deleted_missing_field_is_left_alone() {
        let cols = vec![column("id", "bigint"), column("old", "varchar")];
        let mut existing = stored(&cols);
        existing[1].status = FieldStatus::Delete;

        let diff = diff_fields("v1", &existing, &cols[..1]);
        assert!(diff.changes.is_empty());
        assert!(!diff.structural);
    }

    #[test]
    fn test_override_is_compared_against_reset_baseline() {
        let cols = vec![column("code", "int")];
        let existing = vec![with_override(stored(&cols).remove(0), "varchar")];

        // Same source: the override is not a change
        let diff = diff_fields("v1", &existing, &cols);
        assert!(diff.changes.is_empty());
        assert!(!diff.structural);
    }

    #[test]
    fn test_override_kept_when_conversion_exists() {
        let cols = vec![column("code", "int")];
        let existing = vec![with_override(stored(&cols).remove(0), "varchar")];

        let scanned = vec![column("code", "bigint")];
        let diff = diff_fields("v1", &existing, &scanned);
        assert!(diff.structural);
        let field = &diff.changes.updated[0];
        assert_eq!(field.data_type, "varchar");
        assert_eq!(field.reset.as_ref().unwrap().before_data_type, "bigint");
        assert_eq!(field.original_data_type, "bigint");
    }

    #[test]
    fn test_override_cleared_without_conversion() {
        let cols = vec![column("payload", "varchar")];
        let existing = vec![with_override(stored(&cols).remove(0), "date")];

        let scanned = vec![column("payload", "blob")];
        let diff = diff_fields("v1", &existing, &scanned);
        let field = &diff.changes.updated[0];
        assert!(field.reset.is_none());
        assert_eq!(field.data_type, "varbinary");
    }

    #[test]
    fn test_override_cleared_when_source_reaches_override_type() {
        let cols = vec![column("code", "int")];
        let existing = vec![with_override(stored(&cols).remove(0), "varchar")];

        let diff = diff_fields("v1", &existing, &[column("code", "varchar")]);
        let field = &diff.changes.updated[0];
        assert!(field.reset.is_none());
        assert_eq!(field.data_type, "varchar");
    }

    #[test]
    fn test_duplicate_columns_keep_first_and_renumber() {
        let mut dup = column("id", "varchar");
        dup.comment = Some("second".into());
        let cols = vec![column("id", "bigint"), dup, column("name", "varchar")];

        let fields = new_fields("v1", &cols);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].technical_name, "id");
        assert_eq!(fields[0].data_type, "bigint");
        assert_eq!(fields[1].technical_name, "name");
        assert_eq!(fields[1].index, 1);

        // The update path agrees with the create path
        let diff = diff_fields("v1", &fields, &cols);
        assert!(diff.changes.is_empty());
        assert_eq!(diff.fields.len(), 2);
    }

    #[test]
    fn test_status_transitions() {
        let mut v = view(ViewStatus::New, EditStatus::Draft);
        advance_view_status(&mut v, false);
        assert_eq!(v.status, ViewStatus::Uniformity);

        let mut v = view(ViewStatus::Uniformity, EditStatus::Latest);
        advance_view_status(&mut v, true);
        assert_eq!(v.status, ViewStatus::Modify);
        assert_eq!(v.edit_status, EditStatus::Draft);

        let mut v = view(ViewStatus::Modify, EditStatus::Latest);
        advance_view_status(&mut v, true);
        assert_eq!(v.status, ViewStatus::Modify);
        assert_eq!(v.edit_status, EditStatus::Draft);

        let mut v = view(ViewStatus::Uniformity, EditStatus::Latest);
        advance_view_status(&mut v, false);
        assert_eq!(v.status, ViewStatus::Uniformity);
        assert_eq!(v.edit_status, EditStatus::Latest);
    }

    #[test]
    fn test_deletion_reversal_wins() {
        let mut v = view(ViewStatus::Delete, EditStatus::Latest);
        v.delete_message = Some("gone".into());
        advance_view_status(&mut v, true);
        assert_eq!(v.status, ViewStatus::New);
        assert_eq!(v.edit_status, EditStatus::Draft);
        assert!(v.delete_message.is_none());
    }
}
