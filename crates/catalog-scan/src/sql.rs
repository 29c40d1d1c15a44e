//! SELECT statements backing federated views.

use viewsync_catalog_core::FormViewField;

use crate::types::{is_string, is_temporal, render_type};

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Projection of one field.
///
/// A field with an active type override is cast from the scanned type to the
/// user-chosen one; string to temporal overrides with a format in the
/// convert rules go through `date_parse`.
pub fn select_expr(field: &FormViewField) -> String {
    let column = quote_ident(&field.technical_name);
    let reset = match field.reset.as_ref().filter(|_| field.has_reset()) {
        Some(reset) => reset,
        None => return column,
    };

    let target = field.data_type.as_str();
    let expr = if is_string(&reset.before_data_type)
        && is_temporal(target)
        && !reset.convert_rules.trim().is_empty()
    {
        let parsed = format!(
            "date_parse({}, {})",
            column,
            quote_literal(reset.convert_rules.trim())
        );
        if target == "timestamp" {
            parsed
        } else {
            format!("CAST({} AS {})", parsed, render_type(target, 0, 0))
        }
    } else {
        format!(
            "CAST({} AS {})",
            column,
            render_type(target, reset.data_length, reset.data_accuracy)
        )
    };

    format!("{} AS {}", expr, column)
}

/// `SELECT <fields> FROM "catalog"."schema"."table" [WHERE filter]`.
///
/// Fields are projected in index order; deleted and unsupported fields are
/// skipped. Returns `None` when no field can be selected.
pub fn build_select(
    catalog: &str,
    schema: &str,
    table: &str,
    fields: &[FormViewField],
    filter_rule: Option<&str>,
) -> Option<String> {
    let mut selectable: Vec<&FormViewField> = fields.iter().filter(|f| f.is_selectable()).collect();
    if selectable.is_empty() {
        return None;
    }
    selectable.sort_by_key(|f| f.index);

    let columns = selectable
        .into_iter()
        .map(select_expr)
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT {} FROM {}.{}.{}",
        columns,
        quote_ident(catalog),
        quote_ident(schema),
        quote_ident(table)
    );

    if let Some(filter) = filter_rule.map(str::trim).filter(|f| !f.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(filter);
    }

    Some(sql)
}
