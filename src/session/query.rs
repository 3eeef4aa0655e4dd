//! Query Façade
//!
//! Every call checks the connection first, renders `%s` parameters, runs on
//! the query handle and copies the handle's last error into
//! [`SessionState::last_error`](super::SessionState), cleared on success.
//!
//! An empty result is not an error by itself: only an empty or failed result
//! with a recorded error is reported. Reports are formatted into
//! `last_error_msg` and shown through the session's
//! [`ErrorReporter`](crate::report::ErrorReporter) unless the call runs in a
//! background task.

use serde_json::Value;
use tracing::{info, warn};

use super::{ConnectionSession, ReconnectStatus, BROKEN_CONNECTION};
use crate::engine::{QueryBackend, Row, SqlParam, UiRegistry};
use crate::report::{build_exception_message, should_show_exception, ExceptionContext, DB_ERROR_TITLE};

/// Per-call switches of the query façade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    /// Log "Any record found" on empty results
    pub log_info: bool,
    /// Log the rendered SQL before running it
    pub log_sql: bool,
    /// Log the SQL of failed statements
    pub log_error: bool,
    /// Called from a background task: record and log, never show
    pub is_thread: bool,
    /// Report failed statements (`execute`, `execute_returning`)
    pub show_exception: bool,
    /// Empty `get_row` results are expected, not reported
    pub is_admin: bool,
    /// Prepend an `("", "")` row to `get_rows` results
    pub add_empty_row: bool,
    /// Script the SQL was read from, for error reports
    pub filepath: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            log_info: true,
            log_sql: false,
            log_error: false,
            is_thread: false,
            show_exception: true,
            is_admin: false,
            add_empty_row: false,
            filepath: None,
        }
    }
}

impl QueryOptions {
    /// Defaults without the empty-result info log
    #[must_use]
    pub fn quiet() -> Self {
        Self { log_info: false, ..Self::default() }
    }

    /// Defaults for calls made from a background task
    #[must_use]
    pub fn background() -> Self {
        Self { is_thread: true, ..Self::default() }
    }
}

impl<U: UiRegistry, B: QueryBackend> ConnectionSession<U, B> {
    /// First row of `sql`, or `None` when empty or failed
    pub async fn get_row(&mut self, sql: &str, params: &[SqlParam], opts: &QueryOptions) -> Option<Row> {
        let sql = self.prepare_sql("get_row", sql, params, opts).await?;
        let handle = self.query.as_mut()?;
        let row = handle.get_row(&sql).await;
        self.state.last_error.clone_from(&handle.last_error);

        if row.is_none() && !opts.is_admin {
            self.report_empty_result("get_row", &sql, opts);
        }
        row
    }

    /// All rows of `sql`, or `None` when empty or failed
    pub async fn get_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        opts: &QueryOptions,
    ) -> Option<Vec<Row>> {
        let sql = self.prepare_sql("get_rows", sql, params, opts).await?;
        let handle = self.query.as_mut()?;
        let rows = handle.get_rows(&sql).await;
        self.state.last_error.clone_from(&handle.last_error);

        match rows {
            Some(rows) if !rows.is_empty() => {
                if opts.add_empty_row {
                    let mut padded = vec![vec![Value::from(""), Value::from("")]];
                    padded.extend(rows);
                    Some(padded)
                } else {
                    Some(rows)
                }
            }
            _ => {
                self.report_empty_result("get_rows", &sql, opts);
                None
            }
        }
    }

    /// Run a statement; false when it failed
    pub async fn execute(&mut self, sql: &str, params: &[SqlParam], opts: &QueryOptions) -> bool {
        let Some(sql) = self.prepare_sql("execute", sql, params, opts).await else {
            return false;
        };
        let Some(handle) = self.query.as_mut() else {
            return false;
        };
        let ok = handle.execute(&sql).await;
        self.state.last_error.clone_from(&handle.last_error);

        if !ok {
            self.report_failed_statement("execute", &sql, opts);
        }
        ok
    }

    /// Run a statement with `RETURNING`; its first row, or `None`
    pub async fn execute_returning(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        opts: &QueryOptions,
    ) -> Option<Row> {
        let sql = self.prepare_sql("execute_returning", sql, params, opts).await?;
        let handle = self.query.as_mut()?;
        let row = handle.execute_returning(&sql).await;
        self.state.last_error.clone_from(&handle.last_error);

        if row.is_none() {
            self.report_failed_statement("execute_returning", &sql, opts);
        }
        row
    }

    /// Check the connection and render parameters
    async fn prepare_sql(
        &mut self,
        function: &str,
        sql: &str,
        params: &[SqlParam],
        opts: &QueryOptions,
    ) -> Option<String> {
        if self.query.is_none() {
            warn!(sql, "{BROKEN_CONNECTION}");
            return None;
        }

        if let ReconnectStatus::ReconnectFailed(e) = self.check_connection().await {
            warn!(sql, error = %e, "connection could not be recovered");
            self.state.last_error = Some(e);
            return None;
        }

        if params.is_empty() {
            if opts.log_sql {
                info!(sql, "executing statement");
            }
            return Some(sql.to_string());
        }

        let handle = self.query.as_mut()?;
        let rendered = handle.mogrify(sql, params);
        self.state.last_error.clone_from(&handle.last_error);

        match rendered {
            Some(rendered) => {
                if opts.log_sql {
                    info!(sql = %rendered, "executing statement");
                }
                Some(rendered)
            }
            None => {
                if let Some(err) = self.state.last_error.clone() {
                    if opts.is_thread {
                        warn!(sql, error = %err, "could not render query parameters");
                    } else {
                        self.manage_exception_db(function, &err, sql, opts.filepath.as_deref());
                    }
                }
                None
            }
        }
    }

    fn report_empty_result(&mut self, function: &str, sql: &str, opts: &QueryOptions) {
        match self.state.last_error.clone() {
            Some(err) if !opts.is_thread => {
                self.manage_exception_db(function, &err, sql, opts.filepath.as_deref());
            }
            Some(err) => warn!(sql, error = %err, "query failed in background task"),
            None if opts.log_info => info!(sql, "Any record found"),
            None => {}
        }
    }

    fn report_failed_statement(&mut self, function: &str, sql: &str, opts: &QueryOptions) {
        if opts.log_error {
            info!(sql, "failed statement");
        }
        match self.state.last_error.clone() {
            Some(err) if opts.show_exception && !opts.is_thread => {
                self.manage_exception_db(function, &err, sql, opts.filepath.as_deref());
            }
            Some(err) => warn!(sql, error = %err, "statement failed"),
            None => {}
        }
    }

    /// Format, record and (unless noise or in background) show a database error
    fn manage_exception_db(&mut self, function: &str, description: &str, sql: &str, filepath: Option<&str>) {
        let msg = build_exception_message(&ExceptionContext {
            function,
            description: Some(description),
            filepath,
            sql: Some(sql),
            schema_name: self.state.schema_name.as_deref(),
        });
        self.state.last_error_msg = Some(msg.clone());

        if should_show_exception(description) && !self.state.in_background() {
            self.reporter.show_db_exception(DB_ERROR_TITLE, &msg);
        } else {
            warn!("Exception message not shown to user");
        }
        warn!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = QueryOptions::default();
        assert!(opts.log_info);
        assert!(opts.show_exception);
        assert!(!opts.is_thread);
        assert!(!QueryOptions::quiet().log_info);
        assert!(QueryOptions::background().is_thread);
    }
}
