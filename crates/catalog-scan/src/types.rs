//! Source type normalisation, virtual type detection and conversion paths.
//!
//! Virtual types are the federation engine's column types. A source type with
//! no virtual type cannot be selected by a federated view.

/// Every virtual type the federation engine understands
pub const VIRTUAL_TYPES: &[&str] = &[
    "tinyint",
    "smallint",
    "integer",
    "bigint",
    "real",
    "double",
    "decimal",
    "char",
    "varchar",
    "varbinary",
    "boolean",
    "date",
    "time",
    "timestamp",
    "json",
];

/// Lower-case a source type and drop parameters and sign modifiers.
///
/// `"DECIMAL(10, 2) UNSIGNED"` becomes `"decimal"`,
/// `"timestamp(6) with time zone"` becomes `"timestamp with time zone"`.
pub fn normalize_source_type(raw: &str) -> String {
    let mut stripped = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => stripped.extend(c.to_lowercase()),
            _ => {}
        }
    }

    stripped
        .split_whitespace()
        .filter(|word| !matches!(*word, "unsigned" | "signed" | "zerofill"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Virtual type of a source column type; empty when there is none.
pub fn virtual_type(source_type: &str) -> &'static str {
    match normalize_source_type(source_type).as_str() {
        "tinyint" | "int1" => "tinyint",
        "smallint" | "int2" | "year" | "smallserial" => "smallint",
        "int" | "integer" | "int4" | "mediumint" | "serial" => "integer",
        "bigint" | "int8" | "bigserial" | "long" => "bigint",
        "float" | "float4" | "real" | "binary_float" => "real",
        "double" | "double precision" | "float8" | "binary_double" => "double",
        "decimal" | "numeric" | "number" | "dec" | "money" => "decimal",
        "char" | "character" | "nchar" | "bpchar" => "char",
        "varchar" | "character varying" | "nvarchar" | "varchar2" | "nvarchar2" | "text"
        | "tinytext" | "mediumtext" | "longtext" | "string" | "clob" | "nclob" | "uuid"
        | "enum" | "set" => "varchar",
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" | "bytea"
        | "raw" => "varbinary",
        "bool" | "boolean" | "bit" => "boolean",
        "date" => "date",
        "time" | "time without time zone" => "time",
        "timestamp" | "datetime" | "datetime2" | "timestamp without time zone"
        | "timestamptz" | "timestamp with time zone" => "timestamp",
        "json" | "jsonb" => "json",
        _ => "",
    }
}

fn is_integral(vt: &str) -> bool {
    matches!(vt, "tinyint" | "smallint" | "integer" | "bigint")
}

fn is_numeric(vt: &str) -> bool {
    is_integral(vt) || matches!(vt, "real" | "double" | "decimal")
}

pub(crate) fn is_string(vt: &str) -> bool {
    matches!(vt, "char" | "varchar")
}

pub(crate) fn is_temporal(vt: &str) -> bool {
    matches!(vt, "date" | "time" | "timestamp")
}

/// Whether a column of virtual type `from` can be cast to `to`.
///
/// Identical types are trivially convertible.
pub fn is_convertible(from: &str, to: &str) -> bool {
    if from.is_empty() || to.is_empty() {
        return false;
    }
    if from == to {
        return true;
    }
    match (from, to) {
        (f, t) if is_numeric(f) && is_numeric(t) => true,
        (f, t) if is_numeric(f) && is_string(t) => true,
        (f, t) if is_string(f) && (is_numeric(t) || is_string(t)) => true,
        (f, t) if is_string(f) && is_temporal(t) => true,
        (f, t) if is_temporal(f) && is_string(t) => true,
        ("boolean", t) => is_integral(t) || is_string(t),
        (f, "boolean") => is_integral(f) || is_string(f),
        ("date", "timestamp") | ("timestamp", "date") | ("timestamp", "time") => true,
        ("json", t) => is_string(t),
        _ => false,
    }
}

/// SQL spelling of a virtual type with optional length/precision.
pub fn render_type(vt: &str, length: i32, accuracy: i32) -> String {
    let name = vt.to_uppercase();
    match vt {
        "decimal" if length > 0 => format!("{}({}, {})", name, length, accuracy.max(0)),
        "char" | "varchar" if length > 0 => format!("{}({})", name, length),
        _ => name,
    }
}
