use std::cmp::Ordering;

use crate::common::Result;
use crate::sql::ast::{CmpOp, Expr, Operand};
use crate::tuple::{DataType, Row, Schema, Value};

enum Term {
    Column(usize),
    Literal(Value),
}

enum Node {
    Compare(Term, CmpOp, Term),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
}

/// A `WHERE` expression with its columns resolved against a schema.
pub struct Predicate {
    root: Node,
}

impl Predicate {
    /// Resolves column names and casts each literal compared with a column
    /// to that column's type. A literal the column type cannot hold, such
    /// as `1.5` against an integer, is compared as written.
    pub fn bind(expr: &Expr, schema: &Schema) -> Result<Self> {
        Ok(Self {
            root: bind(expr, schema)?,
        })
    }

    pub fn eval(&self, row: &Row) -> Result<bool> {
        Ok(eval(&self.root, row))
    }
}

fn bind(expr: &Expr, schema: &Schema) -> Result<Node> {
    let node = match expr {
        Expr::Compare(left, op, right) => {
            let l = term(left, schema)?;
            let r = term(right, schema)?;
            let (l, r) = match (l, r) {
                (Term::Column(c), Term::Literal(v)) => {
                    let ty = schema.columns()[c].data_type;
                    (Term::Column(c), Term::Literal(coerce(v, ty)))
                }
                (Term::Literal(v), Term::Column(c)) => {
                    let ty = schema.columns()[c].data_type;
                    (Term::Literal(coerce(v, ty)), Term::Column(c))
                }
                other => other,
            };
            Node::Compare(l, *op, r)
        }
        Expr::And(a, b) => Node::And(Box::new(bind(a, schema)?), Box::new(bind(b, schema)?)),
        Expr::Or(a, b) => Node::Or(Box::new(bind(a, schema)?), Box::new(bind(b, schema)?)),
        Expr::Not(a) => Node::Not(Box::new(bind(a, schema)?)),
    };
    Ok(node)
}

fn coerce(v: Value, ty: DataType) -> Value {
    v.cast(ty).unwrap_or(v)
}

fn term(operand: &Operand, schema: &Schema) -> Result<Term> {
    match operand {
        Operand::Column(name) => Ok(Term::Column(schema.require(name)?)),
        Operand::Literal(v) => Ok(Term::Literal(v.clone())),
    }
}

fn value<'a>(term: &'a Term, row: &'a Row) -> Option<&'a Value> {
    match term {
        Term::Column(i) => row.get(*i),
        Term::Literal(v) => Some(v),
    }
}

// Incomparable operands never satisfy a comparison, `!=` included.
fn eval(node: &Node, row: &Row) -> bool {
    match node {
        Node::Compare(l, op, r) => {
            let ord = match (value(l, row), value(r, row)) {
                (Some(a), Some(b)) => a.compare(b),
                _ => None,
            };
            match ord {
                Some(ord) => holds(*op, ord),
                None => false,
            }
        }
        Node::And(a, b) => eval(a, row) && eval(b, row),
        Node::Or(a, b) => eval(a, row) || eval(b, row),
        Node::Not(a) => !eval(a, row),
    }
}

fn holds(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Ne => ord != Ordering::Equal,
        other => other.index_op().is_some_and(|op| op.holds(ord)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DbError;
    use crate::sql::{parse, Statement};
    use crate::tuple::{Column, DataType};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::UInt32),
            Column::new("name", DataType::VarChar(8)),
            Column::new("score", DataType::Float64),
        ])
        .unwrap()
    }

    fn predicate(cond: &str) -> Result<Predicate> {
        let sql = format!("DELETE FROM t WHERE {}", cond);
        match parse(&sql)? {
            Statement::Delete {
                filter: Some(expr), ..
            } => Predicate::bind(&expr, &schema()),
            other => panic!("unexpected {:?}", other),
        }
    }

    fn row(id: u32, name: &str, score: f64) -> Row {
        Row::new(vec![Value::UInt32(id), name.into(), Value::Float64(score)])
    }

    #[test]
    fn test_comparisons() {
        let p = predicate("id >= 2 AND name != 'bob'").unwrap();
        assert!(p.eval(&row(2, "amy", 0.0)).unwrap());
        assert!(!p.eval(&row(2, "bob", 0.0)).unwrap());
        assert!(!p.eval(&row(1, "amy", 0.0)).unwrap());

        let p = predicate("3 > id").unwrap();
        assert!(p.eval(&row(2, "", 0.0)).unwrap());
    }

    #[test]
    fn test_logic() {
        let p = predicate("NOT (id = 1 OR score < 0.5)").unwrap();
        assert!(p.eval(&row(2, "", 0.75)).unwrap());
        assert!(!p.eval(&row(1, "", 0.75)).unwrap());
        assert!(!p.eval(&row(2, "", 0.25)).unwrap());

        let p = predicate("id = score").unwrap();
        assert!(p.eval(&row(3, "", 3.0)).unwrap());
    }

    #[test]
    fn test_bind_errors() {
        assert!(matches!(predicate("nope = 1"), Err(DbError::SchemaViolation(_))));
    }

    #[test]
    fn test_literals_outside_column_type() {
        let r = row(2, "abcd", 0.0);

        // Too long for VARCHAR(8): never equal, still ordered as text.
        assert!(!predicate("name = 'abcdefghij'").unwrap().eval(&r).unwrap());
        assert!(predicate("name < 'abcdefghij'").unwrap().eval(&r).unwrap());

        assert!(predicate("id >= 1.5").unwrap().eval(&r).unwrap());
        assert!(!predicate("id >= 2.5").unwrap().eval(&r).unwrap());
        assert!(predicate("id > -1").unwrap().eval(&r).unwrap());

        // Text against a number compares as nothing.
        assert!(!predicate("id = 'abc'").unwrap().eval(&r).unwrap());
        assert!(!predicate("id != 'abc'").unwrap().eval(&r).unwrap());
    }
}
