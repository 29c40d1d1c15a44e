//! Factory functions for test data.

use viewsync_catalog_core::{ColumnInfo, Datasource, TableInfo};

/// Id of the datasource seeded by [`TestStore`](crate::TestStore).
pub const TEST_DATASOURCE_ID: &str = "ds-test";

/// A datasource named after its connector catalog `mysql_orders`, schema `sales`.
pub fn datasource(id: &str) -> Datasource {
    Datasource::new(id, "orders-db", "mysql", format!("ext-{}", id), "mysql_orders", "sales")
}

/// A nullable, non-key column with no length or comment.
pub fn column(name: &str, data_type: &str) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        original_name: None,
        comment: None,
        data_type: data_type.to_string(),
        length: 0,
        precision: 0,
        nullable: true,
        primary_key: false,
    }
}

/// A table with the given columns and no comment.
pub fn table(name: &str, columns: Vec<ColumnInfo>) -> TableInfo {
    TableInfo {
        name: name.to_string(),
        comment: None,
        columns,
    }
}

/// `count` tables named `t0000..`, each with an `id bigint` key and a `name varchar` column.
pub fn tables(count: usize) -> Vec<TableInfo> {
    (0..count)
        .map(|i| {
            table(
                &format!("t{:04}", i),
                vec![
                    column("id", "bigint").primary_key(),
                    column("name", "varchar").sized(64, 0),
                ],
            )
        })
        .collect()
}

/// Builder-style tweaks for fixture columns.
pub trait ColumnExt {
    fn primary_key(self) -> Self;
    fn not_null(self) -> Self;
    fn nullable(self, nullable: bool) -> Self;
    fn sized(self, length: i32, precision: i32) -> Self;
    fn commented(self, comment: &str) -> Self;
    fn original(self, original_name: &str) -> Self;
}

impl ColumnExt for ColumnInfo {
    fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    fn sized(mut self, length: i32, precision: i32) -> Self {
        self.length = length;
        self.precision = precision;
        self
    }

    fn commented(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    fn original(mut self, original_name: &str) -> Self {
        self.original_name = Some(original_name.to_string());
        self
    }
}

/// Builder-style tweaks for fixture tables.
pub trait TableExt {
    fn commented(self, comment: &str) -> Self;
}

impl TableExt for TableInfo {
    fn commented(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }
}
