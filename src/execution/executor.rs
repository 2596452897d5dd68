use std::ops::ControlFlow;
use std::sync::Arc;

use log::debug;

use crate::catalog::Database;
use crate::common::{DbError, Result};
use crate::index::{Filter, Op};
use crate::sql::ast::{IndexClause, Select, SelectItem, Statement};
use crate::sql::parse;
use crate::table::{Selection, Table};
use crate::tuple::{Row, Schema, Value};

use super::{spawn_producer, stream, AggFunc, GroupTrie, Predicate, StreamReader};

/// Rows a statement produces. DML yields one `[count]` row, DDL none.
pub type QueryOutput = StreamReader<Vec<Value>>;

/// Runs parsed statements against a database.
pub struct Executor {
    db: Arc<Database>,
}

/// Where one output column of a grouped select comes from.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Group(usize),
    Agg(usize),
}

struct GroupPlan {
    keys: Vec<usize>,
    funcs: Vec<AggFunc>,
    /// Input column of each aggregate; `None` for `COUNT()`
    inputs: Vec<Option<usize>>,
    slots: Vec<Slot>,
}

enum Output {
    Project(Vec<usize>),
    Group(GroupPlan),
}

impl Executor {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Parses and runs one statement.
    pub fn execute(&self, sql: &str) -> Result<QueryOutput> {
        let stmt = parse(sql)?;
        self.run(stmt)
    }

    pub fn run(&self, stmt: Statement) -> Result<QueryOutput> {
        debug!("executing {:?}", stmt);
        match stmt {
            Statement::CreateTable(def) => {
                self.db.create_table(&def)?;
                rows(Vec::new())
            }
            Statement::DropTable(name) => {
                self.db.drop_table(&name)?;
                rows(Vec::new())
            }
            Statement::CreateIndex { table, def } => {
                self.db.table(&table)?.create_index(def)?;
                rows(Vec::new())
            }
            Statement::DropIndex { table, name } => {
                self.db.table(&table)?.drop_index(&name)?;
                rows(Vec::new())
            }
            Statement::Insert {
                table,
                columns,
                rows: values,
            } => {
                let table = self.db.table(&table)?;
                let n = insert(&table, columns, values)?;
                count(n)
            }
            Statement::Select(select) => self.select(select),
            Statement::Update {
                table,
                assignments,
                index,
                filter,
            } => {
                let table = self.db.table(&table)?;
                let predicate = filter
                    .map(|e| Predicate::bind(&e, &table.schema()))
                    .transpose()?;
                let n = table.update(&selection(index), &assignments, |row| {
                    matches_filter(predicate.as_ref(), row)
                })?;
                count(n as u64)
            }
            Statement::Delete {
                table,
                index,
                filter,
            } => {
                let table = self.db.table(&table)?;
                let predicate = filter
                    .map(|e| Predicate::bind(&e, &table.schema()))
                    .transpose()?;
                let n = table.delete(&selection(index), |row| {
                    matches_filter(predicate.as_ref(), row)
                })?;
                count(n as u64)
            }
            Statement::Prepare { table, rows: n } => count(self.db.table(&table)?.prepare(n)?),
            Statement::ShowTables => rows(
                self.db
                    .table_names()
                    .into_iter()
                    .map(|n| vec![Value::String(n)])
                    .collect(),
            ),
            Statement::Describe(name) => {
                let schema = self.db.table(&name)?.schema();
                rows(
                    schema
                        .columns()
                        .iter()
                        .map(|c| {
                            vec![
                                Value::String(c.name.clone()),
                                Value::String(c.data_type.to_string()),
                                Value::UInt8(c.auto_increment as u8),
                            ]
                        })
                        .collect(),
                )
            }
        }
    }

    /// Runs a select as two threads: a scan feeding filtered rows into a
    /// stream, and a stage projecting or grouping them into the output.
    fn select(&self, select: Select) -> Result<QueryOutput> {
        let table = self.db.table(&select.table)?;
        let schema = table.schema();
        let output = plan(&select, &schema)?;
        let predicate = select
            .filter
            .as_ref()
            .map(|e| Predicate::bind(e, &schema))
            .transpose()?;
        let selection = selection(select.index);
        let limit = select.limit.unwrap_or(usize::MAX);
        let capacity = self.db.config().stream_capacity;

        let scanned = spawn_producer(capacity, move |w| {
            table.scan(&selection, |row| {
                if matches_filter(predicate.as_ref(), &row)? {
                    w.push(row)?;
                }
                Ok(ControlFlow::Continue(()))
            })
        });

        Ok(spawn_producer(capacity, move |out| {
            let mut sent = 0;
            let mut emit = |row: Vec<Value>| -> Result<ControlFlow<()>> {
                if sent >= limit {
                    return Ok(ControlFlow::Break(()));
                }
                out.push(row)?;
                sent += 1;
                Ok(if sent >= limit {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            };

            match output {
                Output::Project(positions) => {
                    if limit == 0 {
                        return Ok(());
                    }
                    for row in scanned {
                        let row = row?;
                        let values = positions.iter().map(|&p| row[p].clone()).collect();
                        if emit(values)?.is_break() {
                            break;
                        }
                    }
                }
                Output::Group(plan) => {
                    let mut trie = GroupTrie::new(plan.keys.len(), plan.funcs.clone());
                    for row in scanned {
                        let row = row?;
                        let keys: Vec<Value> = plan.keys.iter().map(|&p| row[p].clone()).collect();
                        let inputs: Vec<Value> = plan
                            .inputs
                            .iter()
                            .map(|p| p.map_or(Value::Int64(1), |p| row[p].clone()))
                            .collect();
                        trie.add(&keys, &inputs)?;
                    }
                    trie.flush(|keys, aggs| {
                        let values = plan
                            .slots
                            .iter()
                            .map(|slot| match slot {
                                Slot::Group(i) => keys[*i].clone(),
                                Slot::Agg(i) => aggs[*i].clone(),
                            })
                            .collect();
                        emit(values)
                    })?;
                }
            }
            Ok(())
        }))
    }
}

fn matches_filter(predicate: Option<&Predicate>, row: &Row) -> Result<bool> {
    match predicate {
        Some(p) => p.eval(row),
        None => Ok(true),
    }
}

/// Turns a `WHERE_INDEX` clause into a table selection. When the first
/// condition is an equality, its column is carried into the second bound so
/// that a second condition on a later index column stays anchored.
fn selection(clause: Option<IndexClause>) -> Selection {
    let Some(clause) = clause else {
        return Selection::all();
    };
    let first = clause.first;
    let mut sel = Selection::index(clause.index).start(Filter::new(
        first.op,
        vec![(first.column.clone(), first.value.clone())],
    ));
    if let Some(second) = clause.second {
        let mut values = Vec::new();
        if first.op == Op::Eq && second.column != first.column {
            values.push((first.column, first.value));
        }
        values.push((second.column, second.value));
        sel = sel.end(Filter::new(second.op, values));
    }
    if clause.reverse {
        sel = sel.reverse();
    }
    sel
}

fn plan(select: &Select, schema: &Schema) -> Result<Output> {
    let grouped = !select.group_by.is_empty()
        || select
            .items
            .iter()
            .any(|i| matches!(i, SelectItem::Aggregate(..)));

    if !grouped {
        let mut positions = Vec::new();
        for item in &select.items {
            match item {
                SelectItem::Wildcard => positions.extend(0..schema.len()),
                SelectItem::Column(name) => positions.push(schema.require(name)?),
                SelectItem::Aggregate(..) => {}
            }
        }
        return Ok(Output::Project(positions));
    }

    let keys = select
        .group_by
        .iter()
        .map(|name| schema.require(name))
        .collect::<Result<Vec<_>>>()?;
    let mut plan = GroupPlan {
        keys,
        funcs: Vec::new(),
        inputs: Vec::new(),
        slots: Vec::new(),
    };
    for item in &select.items {
        let slot = match item {
            SelectItem::Wildcard => {
                return Err(DbError::schema("'*' cannot be combined with aggregates"))
            }
            SelectItem::Column(name) => {
                match select.group_by.iter().position(|g| g == name) {
                    Some(i) => Slot::Group(i),
                    // Plain columns outside GROUP BY keep their first value.
                    None => plan.add(AggFunc::AnyFirst, Some(schema.require(name)?)),
                }
            }
            SelectItem::Aggregate(func, arg) => {
                let input = match arg {
                    Some(name) => Some(schema.require(name)?),
                    None => None,
                };
                plan.add(*func, input)
            }
        };
        plan.slots.push(slot);
    }
    Ok(Output::Group(plan))
}

impl GroupPlan {
    fn add(&mut self, func: AggFunc, input: Option<usize>) -> Slot {
        self.funcs.push(func);
        self.inputs.push(input);
        Slot::Agg(self.funcs.len() - 1)
    }
}

fn insert(table: &Table, columns: Vec<String>, values: Vec<Vec<Value>>) -> Result<u64> {
    let columns: Vec<String> = if columns.is_empty() {
        table.schema().names().map(str::to_string).collect()
    } else {
        columns
    };
    let mut n = 0;
    for row in values {
        if row.len() != columns.len() {
            return Err(DbError::schema(format!(
                "{} values for {} columns",
                row.len(),
                columns.len()
            )));
        }
        let pairs: Vec<(String, Value)> = columns.iter().cloned().zip(row).collect();
        table.insert(&pairs)?;
        n += 1;
    }
    Ok(n)
}

/// A finished stream holding `values`.
fn rows(values: Vec<Vec<Value>>) -> Result<QueryOutput> {
    let (writer, reader) = stream(values.len());
    for row in values {
        writer.push(row)?;
    }
    Ok(reader)
}

fn count(n: u64) -> Result<QueryOutput> {
    rows(vec![vec![Value::Int64(n as i64)]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DbConfig;
    use tempfile::TempDir;

    fn executor(dir: &TempDir) -> Executor {
        Executor::new(Arc::new(Database::open(dir.path(), DbConfig::new()).unwrap()))
    }

    fn query(ex: &Executor, sql: &str) -> Vec<Vec<Value>> {
        ex.execute(sql).unwrap().collect_all().unwrap()
    }

    #[test]
    fn test_select_projection_filter_limit() {
        let dir = TempDir::new().unwrap();
        let ex = executor(&dir);
        query(&ex, "CREATE TABLE t (id Int32, n Int32) PRIMARY KEY(id) pk");
        query(&ex, "INSERT INTO t VALUES (1, 10), (2, 20), (3, 30), (4, 40)");

        let out = query(&ex, "SELECT n FROM t WHERE n > 15 LIMIT 2");
        assert_eq!(out, vec![vec![Value::Int32(20)], vec![Value::Int32(30)]]);

        let out = query(&ex, "SELECT id FROM t WHERE_INDEX pk id <= 3 DESC LIMIT 2");
        assert_eq!(out, vec![vec![Value::Int32(3)], vec![Value::Int32(2)]]);

        assert!(query(&ex, "SELECT * FROM t LIMIT 0").is_empty());
    }

    #[test]
    fn test_aggregate_without_group() {
        let dir = TempDir::new().unwrap();
        let ex = executor(&dir);
        query(&ex, "CREATE TABLE t (id Int32, n Int32) PRIMARY KEY(id) pk");
        assert!(query(&ex, "SELECT COUNT() FROM t").is_empty());

        query(&ex, "INSERT INTO t VALUES (1, 10), (2, 20)");
        let out = query(&ex, "SELECT COUNT(*), SUM(n), AVG(n), MIN(id) FROM t");
        assert_eq!(
            out,
            vec![vec![
                Value::Int64(2),
                Value::Int64(30),
                Value::Float64(15.0),
                Value::Int32(1)
            ]]
        );
    }

    #[test]
    fn test_dml_counts_and_errors() {
        let dir = TempDir::new().unwrap();
        let ex = executor(&dir);
        query(&ex, "CREATE TABLE t (id Int32, n Int32) PRIMARY KEY(id) pk");
        assert_eq!(
            query(&ex, "INSERT INTO t (id) VALUES (1), (2)"),
            vec![vec![Value::Int64(2)]]
        );
        assert_eq!(
            query(&ex, "UPDATE t SET n = 5 WHERE id = 2"),
            vec![vec![Value::Int64(1)]]
        );
        assert_eq!(
            query(&ex, "DELETE FROM t WHERE_INDEX pk id >= 1"),
            vec![vec![Value::Int64(2)]]
        );
        assert!(matches!(ex.execute("SELECT * FROM nope"), Err(DbError::TableNotFound(_))));
        assert!(matches!(ex.execute("INSERT INTO t (id) VALUES (1, 2)"), Err(DbError::SchemaViolation(_))));
        assert!(matches!(ex.execute("SELEC 1"), Err(DbError::Syntax(_))));
    }

    #[test]
    fn test_catalog_statements() {
        let dir = TempDir::new().unwrap();
        let ex = executor(&dir);
        query(&ex, "CREATE TABLE b (id Int32) PRIMARY KEY(id) pk");
        query(&ex, "CREATE TABLE a (id Int32, v VARCHAR(3)) PRIMARY KEY(id) pk");
        assert_eq!(
            query(&ex, "SHOW TABLES"),
            vec![vec![Value::from("a")], vec![Value::from("b")]]
        );
        assert_eq!(
            query(&ex, "DESCRIBE a")[1],
            vec![Value::from("v"), Value::from("VARCHAR(3)"), Value::UInt8(0)]
        );
        query(&ex, "CREATE INDEX by_v ON a (v)");
        query(&ex, "DROP INDEX by_v ON a");
        query(&ex, "DROP TABLE b");
        assert_eq!(query(&ex, "SHOW TABLES"), vec![vec![Value::from("a")]]);
    }
}
