use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::AnyPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::ports::{DdlSource, ObjectLister, RowSource};
use crate::domain::row::{KeyValues, RowMap, SignedKey};
use crate::domain::signature::signed_key;
use crate::domain::value_objects::{
    ColumnName, ObjectDescriptor, ObjectType, Schema, TableName, TableSchema, TableShape,
};
use crate::infrastructure::config::DbConfig;
use crate::infrastructure::db::dialect::{from_driver, CatalogQuery, CreateQuery, Dialect};
use crate::infrastructure::db::row_mapper::row_to_map;
use crate::infrastructure::db::sql_utils::{
    assemble_create_table, build_count_query, build_select_by_key_queries, build_select_query,
    build_signature_query, select_list,
};

/// Database adapter over a sqlx `AnyPool`, bound to one schema.
pub struct SqlxDatabase {
    pool: AnyPool,
    dialect: Arc<dyn Dialect>,
    schema: Schema,
}

/// Connect to the database described in `cfg` and return a `SqlxDatabase`.
pub async fn connect(cfg: &DbConfig) -> Result<SqlxDatabase> {
    sqlx::any::install_default_drivers();

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.url())
        .await
        .with_context(|| {
            format!(
                "Failed to connect to {} (driver: {})",
                cfg.dbname, cfg.driver
            )
        })?;

    debug!(
        "Connected to {}/{} via {} driver",
        cfg.host, cfg.dbname, cfg.driver
    );

    Ok(SqlxDatabase {
        pool,
        dialect: Arc::from(from_driver(&cfg.driver)),
        schema: Schema(cfg.schema.clone()),
    })
}

/// Read a column from an AnyRow as String, handling MySQL's habit of returning
/// information_schema string columns as BLOB to sqlx AnyRow.
fn blob_or_string(row: &AnyRow, idx: usize) -> Result<String> {
    use sqlx::{Column, Row, TypeInfo};
    let type_name = row.column(idx).type_info().name();
    if type_name == "BLOB" {
        let bytes: Vec<u8> = row.try_get(idx)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    } else {
        Ok(row.try_get(idx)?)
    }
}

impl SqlxDatabase {
    async fn catalog_rows(&self, query: &CatalogQuery) -> Result<Vec<AnyRow>> {
        let mut q = sqlx::query(&query.sql);
        for bind in &query.binds {
            q = q.bind(bind);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Catalog query failed: {}", query.sql))?;
        Ok(rows)
    }

    /// `(column_name, data_type)` pairs in ordinal order.
    async fn column_types(&self, table: &TableName) -> Result<Vec<(String, String)>> {
        let rows = self
            .catalog_rows(&self.dialect.columns_query(&self.schema.0, &table.0))
            .await
            .with_context(|| format!("Failed to fetch column types for {}.{}", self.schema.0, table.0))?;

        let mut cols = Vec::with_capacity(rows.len());
        for row in &rows {
            cols.push((blob_or_string(row, 0)?, blob_or_string(row, 1)?));
        }
        Ok(cols)
    }

    async fn primary_key(&self, table: &TableName) -> Result<Vec<String>> {
        let rows = self
            .catalog_rows(&self.dialect.primary_key_query(&self.schema.0, &table.0))
            .await?;
        rows.iter().map(|r| blob_or_string(r, 0)).collect()
    }

    /// Types only matter on the typed SELECT path.
    async fn projection_types(&self, table: &TableName) -> Result<Vec<(String, String)>> {
        if self.dialect.needs_introspection() {
            self.column_types(table).await
        } else {
            Ok(Vec::new())
        }
    }

    async fn query_rows(&self, sql: &str, col_types: &[(String, String)]) -> Result<Vec<RowMap>> {
        debug!("Executing: {}", sql);
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Query failed: {}", sql))?;

        let type_map: HashMap<String, String> = col_types.iter().cloned().collect();
        rows.iter()
            .map(|row| row_to_map(row, &type_map, self.dialect.as_ref()))
            .collect()
    }

    /// Key values from the leading columns, digest from the one after them.
    fn decode_signed(
        &self,
        row: &AnyRow,
        key_columns: &[ColumnName],
        type_map: &HashMap<String, String>,
    ) -> Result<SignedKey> {
        use sqlx::{Column, Row, TypeInfo};
        let mut key = Vec::with_capacity(key_columns.len());
        for (idx, col) in key_columns.iter().enumerate() {
            let hint = match type_map.get(col.as_str()) {
                Some(t) => t.as_str(),
                None => row.column(idx).type_info().name(),
            };
            key.push(self.dialect.decode_column(row, idx, hint)?);
        }
        Ok(SignedKey {
            key,
            compare_sign: blob_or_string(row, key_columns.len())?,
        })
    }
}

#[async_trait]
impl RowSource for SqlxDatabase {
    fn schema(&self) -> Option<&str> {
        Some(self.schema.0.as_str()).filter(|s| !s.is_empty())
    }

    fn content_digest(&self) -> Option<&'static str> {
        self.dialect.content_digest()
    }

    async fn describe_table(&self, table: &TableName) -> Result<TableShape> {
        let columns = self.column_types(table).await?;
        let primary_key = self.primary_key(table).await?;
        Ok(TableShape {
            columns,
            primary_key,
        })
    }

    async fn fetch_rows(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        order_by: &[ColumnName],
    ) -> Result<Vec<RowMap>> {
        let col_types = self.projection_types(table).await?;
        let exprs = select_list(projection, &col_types, self.dialect.as_ref());
        let sql = build_select_query(&self.schema, table, &exprs, order_by, self.dialect.as_ref());
        self.query_rows(&sql, &col_types)
            .await
            .with_context(|| format!("Failed to query {}.{}", self.schema.0, table.0))
    }

    /// Rows are streamed, so at most one decoded row is held at a time.
    async fn fetch_signatures(
        &self,
        table: &TableName,
        schema: &TableSchema,
        in_database: bool,
    ) -> Result<Vec<SignedKey>> {
        let col_types = self.projection_types(table).await?;
        let type_map: HashMap<String, String> = col_types.iter().cloned().collect();
        let dialect = self.dialect.as_ref();
        let digest_query = if in_database {
            let key_exprs = select_list(&schema.pk_columns, &col_types, dialect);
            build_signature_query(
                &self.schema,
                table,
                &key_exprs,
                &schema.compare_columns,
                &schema.pk_columns,
                dialect,
            )
        } else {
            None
        };

        let mut signed = Vec::new();
        match digest_query {
            Some(sql) => {
                debug!("Executing: {}", sql);
                let mut rows = sqlx::query(&sql).fetch(&self.pool);
                while let Some(row) = rows
                    .try_next()
                    .await
                    .with_context(|| format!("Signature query failed: {}", sql))?
                {
                    signed.push(self.decode_signed(&row, &schema.pk_columns, &type_map)?);
                }
            }
            None => {
                let exprs = select_list(&schema.projection(), &col_types, dialect);
                let sql = build_select_query(&self.schema, table, &exprs, &schema.pk_columns, dialect);
                debug!("Executing: {}", sql);
                let mut rows = sqlx::query(&sql).fetch(&self.pool);
                while let Some(row) = rows
                    .try_next()
                    .await
                    .with_context(|| format!("Query failed: {}", sql))?
                {
                    let map = row_to_map(&row, &type_map, dialect)?;
                    signed.push(signed_key(&map, schema)?);
                }
            }
        }
        debug!(table = %table.0, rows = signed.len(), in_database, "signature scan done");
        Ok(signed)
    }

    async fn fetch_rows_by_key(
        &self,
        table: &TableName,
        projection: &[ColumnName],
        key_columns: &[ColumnName],
        keys: &[KeyValues],
    ) -> Result<Vec<RowMap>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let col_types = self.projection_types(table).await?;
        let exprs = select_list(projection, &col_types, self.dialect.as_ref());

        let mut rows = Vec::with_capacity(keys.len());
        for sql in build_select_by_key_queries(
            &self.schema,
            table,
            &exprs,
            key_columns,
            keys,
            self.dialect.as_ref(),
        ) {
            rows.extend(self.query_rows(&sql, &col_types).await?);
        }
        Ok(rows)
    }

    async fn row_count(&self, table: &TableName) -> Result<u64> {
        use sqlx::Row;
        let sql = build_count_query(&self.schema, table, self.dialect.as_ref());
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count rows of {}.{}", self.schema.0, table.0))?;
        let n: i64 = row.try_get(0)?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl DdlSource for SqlxDatabase {
    async fn create_statement(&self, object: &ObjectDescriptor) -> Result<String> {
        match self.dialect.create_query(&self.schema.0, object) {
            CreateQuery::Text {
                query,
                column,
                prefix,
            } => {
                let rows = self.catalog_rows(&query).await?;
                let row = rows
                    .first()
                    .ok_or_else(|| anyhow!("{} has no definition", object))?;
                Ok(format!("{}{}", prefix, blob_or_string(row, column)?))
            }
            CreateQuery::TableColumns(query) => {
                let rows = self.catalog_rows(&query).await?;
                if rows.is_empty() {
                    return Err(anyhow!("{} has no definition", object));
                }
                let mut columns = Vec::with_capacity(rows.len());
                for row in &rows {
                    columns.push((blob_or_string(row, 0)?, blob_or_string(row, 1)?));
                }
                let pk = self.primary_key(&TableName(object.name.clone())).await?;
                Ok(assemble_create_table(
                    &object.name,
                    &columns,
                    &pk,
                    self.dialect.as_ref(),
                ))
            }
            CreateQuery::Unsupported => Err(anyhow!(
                "{} objects are not supported by the {} driver",
                object.object_type,
                self.dialect.name()
            )),
        }
    }
}

#[async_trait]
impl ObjectLister for SqlxDatabase {
    async fn list_objects(&self) -> Result<Vec<ObjectDescriptor>> {
        let rows = self
            .catalog_rows(&self.dialect.list_objects_query(&self.schema.0))
            .await
            .with_context(|| format!("Failed to list objects of {}", self.schema.0))?;

        let mut objects = Vec::with_capacity(rows.len());
        for row in &rows {
            let kind = blob_or_string(row, 0)?;
            let name = blob_or_string(row, 1)?;
            match ObjectType::parse(&kind) {
                Some(object_type) => objects.push(ObjectDescriptor::new(object_type, name)),
                None => warn!(kind = %kind, name = %name, "ignoring object of unknown type"),
            }
        }
        objects.sort();
        objects.dedup();
        Ok(objects)
    }
}
