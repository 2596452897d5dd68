use crate::common::{DbError, Result};
use crate::execution::AggFunc;
use crate::index::{IndexDef, Op};
use crate::table::TableDef;
use crate::tuple::{Column, DataType, Value};

use super::ast::{
    CmpOp, Condition, Expr, IndexClause, Operand, Select, SelectItem, Statement,
};
use super::tokenizer::{Spanned, Token, Tokenizer};

/// Parses a single statement; a trailing `;` is allowed.
pub fn parse(sql: &str) -> Result<Statement> {
    let tokens = Tokenizer::new(sql).tokenize()?;
    let mut parser = Parser::new(tokens);
    let stmt = parser.statement()?;
    parser.eat(&Token::Semicolon);
    if let Some(extra) = parser.peek_spanned() {
        return Err(DbError::syntax(format!(
            "unexpected '{}' at {} after statement",
            extra.token, extra.offset
        )));
    }
    Ok(stmt)
}

/// Recursive-descent parser over a token list.
pub struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Spanned>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&Token> {
        self.peek_spanned().map(|s| &s.token)
    }

    fn unexpected(&self, wanted: &str) -> DbError {
        match self.peek_spanned() {
            Some(s) => DbError::syntax(format!(
                "expected {}, found '{}' at {}",
                wanted, s.token, s.offset
            )),
            None => DbError::syntax(format!("expected {}, found end of input", wanted)),
        }
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(kw))
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(kw))
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", token)))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    fn ident_list(&mut self) -> Result<Vec<String>> {
        self.expect(Token::LParen)?;
        let mut names = vec![self.ident()?];
        while self.eat(&Token::Comma) {
            names.push(self.ident()?);
        }
        self.expect(Token::RParen)?;
        Ok(names)
    }

    fn unsigned(&mut self) -> Result<u64> {
        match self.peek() {
            Some(Token::Number(n)) => {
                let parsed = n.parse::<u64>().ok();
                match parsed {
                    Some(v) => {
                        self.pos += 1;
                        Ok(v)
                    }
                    None => Err(self.unexpected("unsigned integer")),
                }
            }
            _ => Err(self.unexpected("unsigned integer")),
        }
    }

    fn literal(&mut self) -> Result<Value> {
        let negative = self.eat(&Token::Minus);
        let value = match self.peek() {
            Some(Token::Number(n)) => number_literal(n, negative)?,
            Some(Token::Str(s)) if !negative => Value::String(s.clone()),
            _ => return Err(self.unexpected("literal")),
        };
        self.pos += 1;
        Ok(value)
    }

    pub fn statement(&mut self) -> Result<Statement> {
        match self.peek() {
            Some(Token::Word(w)) => match w.to_ascii_uppercase().as_str() {
                "CREATE" => self.create(),
                "DROP" => self.drop_stmt(),
                "INSERT" => self.insert(),
                "SELECT" => self.select().map(Statement::Select),
                "UPDATE" => self.update(),
                "DELETE" => self.delete(),
                "PREPARE" => self.prepare(),
                "SHOW" => {
                    self.pos += 1;
                    self.expect_keyword("TABLES")?;
                    Ok(Statement::ShowTables)
                }
                "DESCRIBE" | "DESC" => {
                    self.pos += 1;
                    Ok(Statement::Describe(self.ident()?))
                }
                _ => Err(self.unexpected("statement")),
            },
            _ => Err(self.unexpected("statement")),
        }
    }

    fn create(&mut self) -> Result<Statement> {
        self.expect_keyword("CREATE")?;
        if self.eat_keyword("TABLE") {
            return self.create_table();
        }
        let mut unique = self.eat_keyword("UNIQUE");
        self.expect_keyword("INDEX")?;
        let name = self.ident()?;
        self.expect_keyword("ON")?;
        let table = self.ident()?;
        let columns = self.ident_list()?;
        unique |= self.eat_keyword("UNIQUE");
        Ok(Statement::CreateIndex {
            table,
            def: IndexDef::new(name, columns, unique),
        })
    }

    fn create_table(&mut self) -> Result<Statement> {
        let name = self.ident()?;
        self.expect(Token::LParen)?;
        let mut columns = vec![self.column_def()?];
        while self.eat(&Token::Comma) {
            columns.push(self.column_def()?);
        }
        self.expect(Token::RParen)?;

        self.expect_keyword("PRIMARY")?;
        self.expect_keyword("KEY")?;
        let pk_columns = self.ident_list()?;
        let pk_name = self.ident()?;
        let mut def = TableDef::new(name, columns, IndexDef::new(pk_name, pk_columns, true));

        while self.eat(&Token::Comma) {
            self.expect_keyword("INDEX")?;
            let columns = self.ident_list()?;
            let name = self.ident()?;
            let unique = self.eat_keyword("UNIQUE");
            def = def.index(IndexDef::new(name, columns, unique));
        }
        Ok(Statement::CreateTable(def))
    }

    fn column_def(&mut self) -> Result<Column> {
        let name = self.ident()?;
        let data_type = self.data_type()?;
        let mut column = Column::new(name, data_type);
        if self.eat_keyword("AUTO") {
            self.expect_keyword("INCREMENT")?;
            column = column.auto_increment();
        } else if self.eat_keyword("AUTO_INCREMENT") {
            column = column.auto_increment();
        }
        Ok(column)
    }

    fn data_type(&mut self) -> Result<DataType> {
        let name = self.ident()?;
        if name.eq_ignore_ascii_case("VARCHAR") {
            self.expect(Token::LParen)?;
            let cap = self.unsigned()?;
            self.expect(Token::RParen)?;
            let cap = u16::try_from(cap)
                .map_err(|_| DbError::syntax(format!("VARCHAR({}) is too wide", cap)))?;
            return Ok(DataType::VarChar(cap));
        }
        DataType::from_name(&name).ok_or_else(|| DbError::syntax(format!("unknown type '{}'", name)))
    }

    fn drop_stmt(&mut self) -> Result<Statement> {
        self.expect_keyword("DROP")?;
        if self.eat_keyword("TABLE") {
            return Ok(Statement::DropTable(self.ident()?));
        }
        self.expect_keyword("INDEX")?;
        let name = self.ident()?;
        self.expect_keyword("ON")?;
        let table = self.ident()?;
        Ok(Statement::DropIndex { table, name })
    }

    fn insert(&mut self) -> Result<Statement> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("INTO")?;
        let table = self.ident()?;
        let columns = if self.peek() == Some(&Token::LParen) {
            self.ident_list()?
        } else {
            Vec::new()
        };
        self.expect_keyword("VALUES")?;

        let mut rows = Vec::new();
        loop {
            self.expect(Token::LParen)?;
            let mut row = vec![self.literal()?];
            while self.eat(&Token::Comma) {
                row.push(self.literal()?);
            }
            self.expect(Token::RParen)?;
            rows.push(row);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(Statement::Insert {
            table,
            columns,
            rows,
        })
    }

    fn select(&mut self) -> Result<Select> {
        self.expect_keyword("SELECT")?;
        let mut items = vec![self.select_item()?];
        while self.eat(&Token::Comma) {
            items.push(self.select_item()?);
        }
        self.expect_keyword("FROM")?;
        let table = self.ident()?;
        let index = self.index_clause()?;
        let filter = self.where_clause()?;

        let mut group_by = Vec::new();
        if self.eat_keyword("GROUP") {
            self.expect_keyword("BY")?;
            group_by.push(self.ident()?);
            while self.eat(&Token::Comma) {
                group_by.push(self.ident()?);
            }
        }
        let limit = if self.eat_keyword("LIMIT") {
            Some(self.unsigned()? as usize)
        } else {
            None
        };
        Ok(Select {
            table,
            items,
            index,
            filter,
            group_by,
            limit,
        })
    }

    fn select_item(&mut self) -> Result<SelectItem> {
        if self.eat(&Token::Star) {
            return Ok(SelectItem::Wildcard);
        }
        let name = self.ident()?;
        if !self.eat(&Token::LParen) {
            return Ok(SelectItem::Column(name));
        }
        let func = AggFunc::from_name(&name)
            .ok_or_else(|| DbError::syntax(format!("unknown function '{}'", name)))?;
        let arg = if self.eat(&Token::RParen) {
            None
        } else if self.eat(&Token::Star) {
            self.expect(Token::RParen)?;
            None
        } else {
            let col = self.ident()?;
            self.expect(Token::RParen)?;
            Some(col)
        };
        if arg.is_none() && func.needs_argument() {
            return Err(DbError::syntax(format!("{} needs a column", func)));
        }
        Ok(SelectItem::Aggregate(func, arg))
    }

    fn index_clause(&mut self) -> Result<Option<IndexClause>> {
        if !self.eat_keyword("WHERE_INDEX") {
            return Ok(None);
        }
        let index = self.ident()?;
        let first = self.condition()?;
        let second = if self.eat_keyword("AND") {
            Some(self.condition()?)
        } else {
            None
        };
        let reverse = if self.eat_keyword("DESC") {
            true
        } else {
            self.eat_keyword("ASC");
            false
        };
        Ok(Some(IndexClause {
            index,
            first,
            second,
            reverse,
        }))
    }

    fn condition(&mut self) -> Result<Condition> {
        let column = self.ident()?;
        let op: Op = match self.peek() {
            Some(Token::Op(op)) => match op.index_op() {
                Some(op) => op,
                None => return Err(self.unexpected("one of < <= = >= >")),
            },
            _ => return Err(self.unexpected("one of < <= = >= >")),
        };
        self.pos += 1;
        let value = self.literal()?;
        Ok(Condition { column, op, value })
    }

    fn where_clause(&mut self) -> Result<Option<Expr>> {
        if self.eat_keyword("WHERE") {
            self.expr().map(Some)
        } else {
            Ok(None)
        }
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut left = self.and_expr()?;
        while self.eat_keyword("OR") {
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let mut left = self.unary()?;
        while self.eat_keyword("AND") {
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.eat_keyword("NOT") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.expr()?;
            self.expect(Token::RParen)?;
            return Ok(inner);
        }
        let left = self.operand()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => return Err(self.unexpected("comparison operator")),
        };
        self.pos += 1;
        let right = self.operand()?;
        Ok(Expr::Compare(left, op, right))
    }

    fn operand(&mut self) -> Result<Operand> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let w = w.clone();
                self.pos += 1;
                Ok(Operand::Column(w))
            }
            _ => self.literal().map(Operand::Literal),
        }
    }

    fn update(&mut self) -> Result<Statement> {
        self.expect_keyword("UPDATE")?;
        let table = self.ident()?;
        self.expect_keyword("SET")?;
        let mut assignments = Vec::new();
        loop {
            let column = self.ident()?;
            self.expect(Token::Op(CmpOp::Eq))?;
            assignments.push((column, self.literal()?));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        let index = self.index_clause()?;
        let filter = self.where_clause()?;
        Ok(Statement::Update {
            table,
            assignments,
            index,
            filter,
        })
    }

    fn delete(&mut self) -> Result<Statement> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("FROM")?;
        let table = self.ident()?;
        let index = self.index_clause()?;
        let filter = self.where_clause()?;
        Ok(Statement::Delete {
            table,
            index,
            filter,
        })
    }

    fn prepare(&mut self) -> Result<Statement> {
        self.expect_keyword("PREPARE")?;
        self.expect_keyword("TABLE")?;
        let table = self.ident()?;
        self.expect_keyword("ROWS")?;
        let rows = self.unsigned()?;
        Ok(Statement::Prepare { table, rows })
    }
}

fn number_literal(text: &str, negative: bool) -> Result<Value> {
    let bad = || DbError::syntax(format!("invalid number '{}'", text));
    if text.contains('.') {
        let v: f64 = text.parse().map_err(|_| bad())?;
        return Ok(Value::Float64(if negative { -v } else { v }));
    }
    let magnitude: u64 = text.parse().map_err(|_| bad())?;
    if negative {
        let v = i64::try_from(-(magnitude as i128)).map_err(|_| bad())?;
        Ok(Value::Int64(v))
    } else {
        Ok(match i64::try_from(magnitude) {
            Ok(v) => Value::Int64(v),
            Err(_) => Value::UInt64(magnitude),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table() {
        let stmt = parse(
            "CREATE TABLE t (id UInt32 AUTO INCREMENT, first VARCHAR(4), last varchar(4)) \
             PRIMARY KEY(id) pk, INDEX(first,last) fl UNIQUE, INDEX(last) l;",
        )
        .unwrap();
        let Statement::CreateTable(def) = stmt else {
            panic!("not a create table");
        };
        assert_eq!(def.name, "t");
        assert!(def.columns[0].auto_increment);
        assert_eq!(def.columns[1].data_type, DataType::VarChar(4));
        assert_eq!(def.primary, IndexDef::new("pk", vec!["id".into()], true));
        assert_eq!(def.indexes.len(), 2);
        assert!(def.indexes[0].unique);
        assert!(!def.indexes[1].unique);
    }

    #[test]
    fn test_insert() {
        let stmt = parse(r#"INSERT INTO t (name, n) VALUES ("alice", -3),("bob", 2.5)"#).unwrap();
        assert_eq!(
            stmt,
            Statement::Insert {
                table: "t".into(),
                columns: vec!["name".into(), "n".into()],
                rows: vec![
                    vec![Value::from("alice"), Value::Int64(-3)],
                    vec![Value::from("bob"), Value::Float64(2.5)],
                ],
            }
        );
    }

    #[test]
    fn test_select_with_index_and_where() {
        let stmt = parse(
            "SELECT first, COUNT(), MAX(last) FROM t WHERE_INDEX fl first = 'aaaa' AND last < 'z' DESC \
             WHERE NOT (id = 3 OR id != 4) GROUP BY first LIMIT 10",
        )
        .unwrap();
        let Statement::Select(select) = stmt else {
            panic!("not a select");
        };
        assert_eq!(select.items[1], SelectItem::Aggregate(AggFunc::Count, None));
        let clause = select.index.unwrap();
        assert_eq!(clause.first.op, Op::Eq);
        assert_eq!(clause.second.unwrap().op, Op::Lt);
        assert!(clause.reverse);
        assert!(matches!(select.filter, Some(Expr::Not(_))));
        assert_eq!(select.group_by, vec!["first".to_string()]);
        assert_eq!(select.limit, Some(10));
    }

    #[test]
    fn test_precedence() {
        let Statement::Delete { filter, .. } =
            parse("DELETE FROM t WHERE a = 1 OR b = 2 AND c = 3").unwrap()
        else {
            panic!("not a delete");
        };
        match filter {
            Some(Expr::Or(_, right)) => assert!(matches!(*right, Expr::And(_, _))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_misc_statements() {
        assert_eq!(
            parse("PREPARE TABLE t ROWS 100").unwrap(),
            Statement::Prepare {
                table: "t".into(),
                rows: 100
            }
        );
        assert_eq!(parse("show tables").unwrap(), Statement::ShowTables);
        assert_eq!(parse("DROP TABLE t").unwrap(), Statement::DropTable("t".into()));
        assert_eq!(
            parse("CREATE UNIQUE INDEX u ON t (a, b)").unwrap(),
            Statement::CreateIndex {
                table: "t".into(),
                def: IndexDef::new("u", vec!["a".into(), "b".into()], true),
            }
        );
        assert!(matches!(
            parse("UPDATE t SET a = 1, b = 'x' WHERE_INDEX pk id = 2").unwrap(),
            Statement::Update { ref assignments, .. } if assignments.len() == 2
        ));
    }

    #[test]
    fn test_syntax_errors() {
        for sql in [
            "SELECT FROM t",
            "SELECT a FROM t WHERE_INDEX pk id != 1",
            "CREATE TABLE t (a Int128) PRIMARY KEY(a) pk",
            "INSERT INTO t VALUES (1",
            "SELECT a FROM t extra",
            "SELECT SUM() FROM t",
        ] {
            assert!(matches!(parse(sql), Err(DbError::Syntax(_))), "{}", sql);
        }
    }
}
