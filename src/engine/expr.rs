//! Structured query layer
//!
//! A small `SELECT` builder compiled per SQL dialect. Connectors use it for row counts,
//! previews and the expression fallback of the query executor, so none of them has to
//! hand-assemble quoted identifiers.

/// Identifier quoting and row-limit syntax of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `"ident"` and `LIMIT n` (duckdb, sqlite, postgres, redshift, snowflake)
    Ansi,
    /// `` `ident` `` and `LIMIT n` (mysql, bigquery, databricks)
    Backtick,
    /// `[ident]` and `SELECT TOP n` (mssql)
    TSql,
}

impl Dialect {
    /// Quote a single identifier, doubling any embedded closing quote
    #[must_use]
    pub fn quote(self, ident: &str) -> String {
        match self {
            Self::Ansi => format!("\"{}\"", ident.replace('"', "\"\"")),
            Self::Backtick => format!("`{}`", ident.replace('`', "``")),
            Self::TSql => format!("[{}]", ident.replace(']', "]]")),
        }
    }

    /// Quote `schema.table`
    #[must_use]
    pub fn qualified(self, schema: &str, table: &str) -> String {
        format!("{}.{}", self.quote(schema), self.quote(table))
    }
}

/// What a `SELECT` reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation {
    Table { schema: String, name: String },
    /// Arbitrary SQL used as a derived table
    Sql(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    All,
    CountAll,
}

/// `SELECT <projection> FROM <relation> [LIMIT n]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub relation: Relation,
    pub projection: Projection,
    pub limit: Option<usize>,
}

impl Select {
    pub fn table(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            relation: Relation::Table { schema: schema.into(), name: name.into() },
            projection: Projection::All,
            limit: None,
        }
    }

    /// Wrap raw SQL so the backend evaluates it as a subquery
    ///
    /// Trailing semicolons are dropped since they are illegal inside a derived table.
    pub fn from_sql(sql: impl Into<String>) -> Self {
        let sql: String = sql.into();
        let trimmed = sql.trim().trim_end_matches(';').trim_end().to_string();
        Self { relation: Relation::Sql(trimmed), projection: Projection::All, limit: None }
    }

    #[must_use]
    pub fn count(mut self) -> Self {
        self.projection = Projection::CountAll;
        self
    }

    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Render the statement for a dialect
    #[must_use]
    pub fn compile(&self, dialect: Dialect) -> String {
        let projection = match self.projection {
            Projection::All => "*",
            Projection::CountAll => "COUNT(*)",
        };

        let source = match &self.relation {
            Relation::Table { schema, name } => dialect.qualified(schema, name),
            Relation::Sql(sql) => format!("({sql}) AS {}", dialect.quote("_dbprobe_q")),
        };

        match (dialect, self.limit) {
            (Dialect::TSql, Some(n)) => format!("SELECT TOP {n} {projection} FROM {source}"),
            (_, Some(n)) => format!("SELECT {projection} FROM {source} LIMIT {n}"),
            (_, None) => format!("SELECT {projection} FROM {source}"),
        }
    }
}
