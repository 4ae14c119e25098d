// sql.rs
//
// Renderizado puro de SQL por dialecto. Cada tabla tiene la misma forma:
// `ID_`, `REV_`, una columna por clave foránea declarada (`<CAMPO>_`) y
// `FIELDS_` con el resto del registro serializado como JSON. Las columnas FK
// también permanecen dentro de `FIELDS_`.
use crate::dialect::DatabaseDialect;
use crate::statement::{FlushOperation, FlushParameter, FlushStatement};
use proc_command::{CommandError, Result};
use proc_domain::{Criteria, EntityKind, EntityRecord, ForeignKeys};
use std::collections::HashMap;

/// Valor ligado a un marcador.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
  Text(String),
  NullableText(Option<String>),
  Int(i32),
}

/// Sentencia lista para ejecutar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSql {
  pub sql: String,
  pub params: Vec<SqlValue>,
}

/// Columna física de un campo lógico.
pub fn column_for(field: &str) -> String {
  format!("{}_", field.to_uppercase())
}

fn check_identifier(field: &str) -> Result<()> {
  let valid = !field.is_empty() && field.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
  if valid {
    Ok(())
  } else {
    Err(CommandError::IllegalArgument(format!("nombre de campo no válido: {}", field)))
  }
}

/// Tabla física de un tipo: nombre con prefijo y columnas FK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableLayout {
  pub kind: EntityKind,
  pub table: String,
  pub fk_fields: Vec<&'static str>,
}

impl TableLayout {
  pub fn new(kind: EntityKind, table_prefix: &str, foreign_keys: &ForeignKeys) -> Self {
    Self { kind,
           table: format!("{}{}", table_prefix, kind.table_name()),
           fk_fields: foreign_keys.columns_of(kind) }
  }

  fn columns(&self) -> Vec<String> {
    let mut cols = vec!["ID_".to_string(), "REV_".to_string()];
    cols.extend(self.fk_fields.iter().map(|f| column_for(f)));
    cols.push("FIELDS_".to_string());
    cols
  }

  fn row_values(&self, record: &EntityRecord, revision: i32) -> Vec<SqlValue> {
    let mut values = vec![SqlValue::Text(record.id.clone()), SqlValue::Int(revision)];
    values.extend(self.fk_fields
                      .iter()
                      .map(|f| SqlValue::NullableText(record.field_str(f).map(|s| s.to_string()))));
    values.push(SqlValue::Text(serde_json::Value::Object(record.fields.clone()).to_string()));
    values
  }

  /// Expresión SQL que lee `field`: columna propia para `id` y las FK, o
  /// extracción JSON de `FIELDS_` para el resto.
  fn field_expr(&self, dialect: DatabaseDialect, field: &str) -> Result<String> {
    check_identifier(field)?;
    if field == "id" {
      return Ok("ID_".to_string());
    }
    if self.fk_fields.contains(&field) {
      return Ok(column_for(field));
    }
    Ok(match dialect {
      DatabaseDialect::Sqlite => format!("json_extract(FIELDS_, '$.{}')", field),
      DatabaseDialect::Postgres => format!("(FIELDS_::json ->> '{}')", field),
      DatabaseDialect::MySql => format!("JSON_UNQUOTE(JSON_EXTRACT(FIELDS_, '$.{}'))", field),
      _ => format!("JSON_VALUE(FIELDS_, '$.{}')", field),
    })
  }
}

struct Placeholders {
  dialect: DatabaseDialect,
  next: usize,
}

impl Placeholders {
  fn new(dialect: DatabaseDialect) -> Self {
    Self { dialect, next: 1 }
  }

  fn take(&mut self) -> String {
    let p = self.dialect.placeholder(self.next);
    self.next += 1;
    p
  }

  fn group(&mut self, n: usize) -> String {
    (0..n).map(|_| self.take()).collect::<Vec<_>>().join(", ")
  }
}

/// INSERT de una o varias filas. Las filas conservan su revisión actual.
pub fn render_insert(dialect: DatabaseDialect, layout: &TableLayout, records: &[&EntityRecord]) -> Result<RenderedSql> {
  if records.is_empty() {
    return Err(CommandError::IllegalArgument(format!("insert sin filas en {}", layout.table)));
  }
  let cols = layout.columns();
  let col_list = cols.join(", ");
  let mut ph = Placeholders::new(dialect);
  let mut params = Vec::with_capacity(records.len() * cols.len());
  let sql = if records.len() > 1 && dialect.uses_insert_all() {
    let mut sql = String::from("INSERT ALL");
    for r in records {
      sql.push_str(&format!(" INTO {} ({}) VALUES ({})", layout.table, col_list, ph.group(cols.len())));
      params.extend(layout.row_values(r, r.revision));
    }
    sql.push_str(" SELECT * FROM DUAL");
    sql
  } else {
    let groups: Vec<String> = records.iter()
                                     .map(|r| {
                                       params.extend(layout.row_values(r, r.revision));
                                       format!("({})", ph.group(cols.len()))
                                     })
                                     .collect();
    format!("INSERT INTO {} ({}) VALUES {}", layout.table, col_list, groups.join(", "))
  };
  Ok(RenderedSql { sql, params })
}

/// UPDATE por id. Para tipos con revisión escribe `revision + 1` y exige la
/// revisión actual.
pub fn render_update(dialect: DatabaseDialect, layout: &TableLayout, record: &EntityRecord) -> RenderedSql {
  let mut ph = Placeholders::new(dialect);
  let mut sets = Vec::new();
  let mut params = Vec::new();
  let revisioned = layout.kind.has_revision();
  if revisioned {
    sets.push(format!("REV_ = {}", ph.take()));
    params.push(SqlValue::Int(record.revision_next()));
  }
  for f in &layout.fk_fields {
    sets.push(format!("{} = {}", column_for(f), ph.take()));
    params.push(SqlValue::NullableText(record.field_str(f).map(|s| s.to_string())));
  }
  sets.push(format!("FIELDS_ = {}", ph.take()));
  params.push(SqlValue::Text(serde_json::Value::Object(record.fields.clone()).to_string()));
  let mut sql = format!("UPDATE {} SET {} WHERE ID_ = {}", layout.table, sets.join(", "), ph.take());
  params.push(SqlValue::Text(record.id.clone()));
  if revisioned {
    sql.push_str(&format!(" AND REV_ = {}", ph.take()));
    params.push(SqlValue::Int(record.revision));
  }
  RenderedSql { sql, params }
}

/// DELETE por id, con control de revisión para los tipos que la tienen.
pub fn render_delete(dialect: DatabaseDialect, layout: &TableLayout, record: &EntityRecord) -> RenderedSql {
  let mut ph = Placeholders::new(dialect);
  let mut sql = format!("DELETE FROM {} WHERE ID_ = {}", layout.table, ph.take());
  let mut params = vec![SqlValue::Text(record.id.clone())];
  if layout.kind.has_revision() {
    sql.push_str(&format!(" AND REV_ = {}", ph.take()));
    params.push(SqlValue::Int(record.revision));
  }
  RenderedSql { sql, params }
}

pub fn render_bulk_delete(dialect: DatabaseDialect, layout: &TableLayout, criteria: &Criteria) -> Result<RenderedSql> {
  let expr = layout.field_expr(dialect, &criteria.field)?;
  let mut ph = Placeholders::new(dialect);
  Ok(RenderedSql { sql: format!("DELETE FROM {} WHERE {} = {}", layout.table, expr, ph.take()),
                   params: vec![SqlValue::Text(criteria.value.clone())] })
}

const SELECT_COLUMNS: &str = "ID_ AS id_, REV_ AS rev_, FIELDS_ AS fields_";

pub fn render_select_by_id(dialect: DatabaseDialect, layout: &TableLayout, id: &str) -> RenderedSql {
  let mut ph = Placeholders::new(dialect);
  RenderedSql { sql: format!("SELECT {} FROM {} WHERE ID_ = {}", SELECT_COLUMNS, layout.table, ph.take()),
                params: vec![SqlValue::Text(id.to_string())] }
}

pub fn render_select_by_criteria(dialect: DatabaseDialect,
                                 layout: &TableLayout,
                                 criteria: Option<&Criteria>)
                                 -> Result<RenderedSql> {
  let Some(c) = criteria else {
    return Ok(RenderedSql { sql: format!("SELECT {} FROM {} ORDER BY ID_", SELECT_COLUMNS, layout.table),
                            params: Vec::new() });
  };
  let expr = layout.field_expr(dialect, &c.field)?;
  let mut ph = Placeholders::new(dialect);
  Ok(RenderedSql { sql: format!("SELECT {} FROM {} WHERE {} = {} ORDER BY ID_",
                                SELECT_COLUMNS,
                                layout.table,
                                expr,
                                ph.take()),
                   params: vec![SqlValue::Text(c.value.clone())] })
}

/// Esquema físico completo: dialecto, claves foráneas y tabla de cada tipo.
#[derive(Debug, Clone)]
pub struct Schema {
  pub dialect: DatabaseDialect,
  pub table_prefix: String,
  pub foreign_keys: ForeignKeys,
  layouts: HashMap<EntityKind, TableLayout>,
}

impl Schema {
  pub fn new(dialect: DatabaseDialect, table_prefix: &str, foreign_keys: ForeignKeys) -> Self {
    let layouts = EntityKind::all().iter()
                                   .map(|k| (*k, TableLayout::new(*k, table_prefix, &foreign_keys)))
                                   .collect();
    Self { dialect,
           table_prefix: table_prefix.to_string(),
           foreign_keys,
           layouts }
  }

  pub fn layout(&self, kind: EntityKind) -> Result<&TableLayout> {
    self.layouts
        .get(&kind)
        .ok_or_else(|| CommandError::IllegalState(format!("tipo sin tabla: {}", kind)))
  }

  /// Traduce una sentencia del plan de flush a SQL del dialecto.
  pub fn render(&self, statement: &FlushStatement) -> Result<RenderedSql> {
    let layout = self.layout(statement.kind)?;
    match (&statement.operation, &statement.parameter) {
      (FlushOperation::Insert, FlushParameter::Entity(r)) => render_insert(self.dialect, layout, &[r]),
      (FlushOperation::BulkInsert, FlushParameter::Entities(rs)) => {
        let refs: Vec<&EntityRecord> = rs.iter().collect();
        render_insert(self.dialect, layout, &refs)
      }
      (FlushOperation::Update, FlushParameter::Entity(r)) => Ok(render_update(self.dialect, layout, r)),
      (FlushOperation::Delete, FlushParameter::Entity(r)) => Ok(render_delete(self.dialect, layout, r)),
      (FlushOperation::BulkDelete, FlushParameter::Criteria(c)) => render_bulk_delete(self.dialect, layout, c),
      (op, _) => Err(CommandError::IllegalArgument(format!("parámetro incompatible con {} en {}", op, statement.statement))),
    }
  }

  /// DDL de las tablas en orden de inserción (padres primero). Se usa
  /// cuando hay prefijo de tablas; sin prefijo mandan las migraciones.
  pub fn create_table_ddl(&self, insert_order: &[EntityKind]) -> Vec<String> {
    insert_order.iter()
                .filter_map(|k| self.layouts.get(k))
                .map(|layout| {
                  let mut cols = vec!["ID_ VARCHAR(64) NOT NULL PRIMARY KEY".to_string(),
                                      "REV_ INTEGER NOT NULL DEFAULT 1".to_string()];
                  for f in &layout.fk_fields {
                    let parent = self.foreign_keys
                                     .find(layout.kind, f)
                                     .and_then(|fk| self.layouts.get(&fk.parent))
                                     .map(|p| p.table.clone())
                                     .unwrap_or_default();
                    cols.push(format!("{} VARCHAR(64) REFERENCES {} (ID_)", column_for(f), parent));
                  }
                  cols.push("FIELDS_ TEXT NOT NULL".to_string());
                  format!("CREATE TABLE IF NOT EXISTS {} ({})", layout.table, cols.join(", "))
                })
                .collect()
  }
}
