use postgres::types::ToSql;
use postgres::{Client, NoTls};

use crate::errors::Result;
use crate::source::{QueryExecutor, QueryTemplate, Row};

/// [`QueryExecutor`] backed by a PostgreSQL connection.
///
/// All templates select text-cast columns and take text parameters, so the
/// translation layer stays mechanical: bind the parameters, collect every
/// column as `Option<String>`.
pub struct PgExecutor {
    client: Client,
}

impl PgExecutor {
    pub fn connect(params: &str) -> Result<PgExecutor> {
        let client = Client::connect(params, NoTls)?;
        Ok(PgExecutor { client })
    }
}

impl QueryExecutor for PgExecutor {
    fn execute(&mut self, template: &QueryTemplate, params: &[&str]) -> Result<Vec<Row>> {
        let bound: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect();
        let result = self.client.query(template.sql.as_str(), &bound)?;
        let mut rows = Vec::with_capacity(result.len());
        for row in result {
            let mut columns: Row = Vec::with_capacity(row.len());
            for index in 0..row.len() {
                columns.push(row.try_get(index)?);
            }
            rows.push(columns);
        }
        Ok(rows)
    }
}
