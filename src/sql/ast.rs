//! Parsed statements.

use std::fmt;

use crate::execution::AggFunc;
use crate::index::{IndexDef, Op};
use crate::table::TableDef;
use crate::tuple::Value;

/// Comparison operator of a `WHERE` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// The matching index filter operator; `!=` has none.
    pub fn index_op(&self) -> Option<Op> {
        match self {
            CmpOp::Eq => Some(Op::Eq),
            CmpOp::Lt => Some(Op::Lt),
            CmpOp::Le => Some(Op::Le),
            CmpOp::Gt => Some(Op::Gt),
            CmpOp::Ge => Some(Op::Ge),
            CmpOp::Ne => None,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(String),
    Literal(Value),
}

/// A `WHERE` expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare(Operand, CmpOp, Operand),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// `column op literal` inside `WHERE_INDEX`.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

/// `WHERE_INDEX name cond [AND cond] [DESC]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexClause {
    pub index: String,
    pub first: Condition,
    pub second: Option<Condition>,
    pub reverse: bool,
}

/// One item of a `SELECT` list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    Column(String),
    /// `FUNC(column)`, or `COUNT()` / `COUNT(*)` without a column
    Aggregate(AggFunc, Option<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub items: Vec<SelectItem>,
    pub index: Option<IndexClause>,
    pub filter: Option<Expr>,
    pub group_by: Vec<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(TableDef),
    DropTable(String),
    CreateIndex {
        table: String,
        def: IndexDef,
    },
    DropIndex {
        table: String,
        name: String,
    },
    Insert {
        table: String,
        /// Target columns; empty means every column in schema order
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    Select(Select),
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        index: Option<IndexClause>,
        filter: Option<Expr>,
    },
    Delete {
        table: String,
        index: Option<IndexClause>,
        filter: Option<Expr>,
    },
    Prepare {
        table: String,
        rows: u64,
    },
    ShowTables,
    Describe(String),
}
