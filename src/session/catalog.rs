//! Catalog helpers built on the query façade
//!
//! Schema arguments default to the session schema and lose their `"` quotes.
//! Values travel as parameters; trusted identifiers (table names, search
//! paths, extension names) are interpolated.

use serde_json::Value;
use tracing::debug;

use super::{ConnectionSession, QueryOptions};
use crate::engine::{QueryBackend, Row, UiRegistry};
use crate::error::{Result, SessionError};

/// First column of a row
fn first_value(row: Option<Row>) -> Option<Value> {
    row.and_then(|r| r.into_iter().next())
}

fn first_bool(row: Option<Row>) -> bool {
    first_value(row).and_then(|v| v.as_bool()).unwrap_or(false)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl<U: UiRegistry, B: QueryBackend> ConnectionSession<U, B> {
    fn schema_or_default(&self, schema: Option<&str>) -> Option<String> {
        schema
            .filter(|s| !matches!(*s, "" | "null"))
            .map(String::from)
            .or_else(|| self.state.schema_name.clone())
            .map(|s| s.replace('"', ""))
    }

    pub async fn check_schema(&mut self, schema: Option<&str>) -> Option<Row> {
        let schema = self.schema_or_default(schema)?;
        self.get_row(
            "SELECT nspname FROM pg_namespace WHERE nspname = %s",
            &[schema.into()],
            &QueryOptions::default(),
        )
        .await
    }

    pub async fn check_table(&mut self, table: &str, schema: Option<&str>) -> Option<Row> {
        let Some(schema) = self.schema_or_default(schema) else {
            debug!(table, "no schema to look the table up in");
            return None;
        };
        self.get_row(
            "SELECT * FROM pg_tables WHERE schemaname = %s AND tablename = %s",
            &[schema.into(), table.into()],
            &QueryOptions::quiet(),
        )
        .await
    }

    pub async fn check_view(&mut self, view: &str, schema: Option<&str>) -> Option<Row> {
        let schema = self.schema_or_default(schema)?;
        self.get_row(
            "SELECT * FROM pg_views WHERE schemaname = %s AND viewname = %s",
            &[schema.into(), view.into()],
            &QueryOptions::quiet(),
        )
        .await
    }

    pub async fn check_column(&mut self, table: &str, column: &str, schema: Option<&str>) -> Option<Row> {
        let schema = self.schema_or_default(schema)?;
        self.get_row(
            "SELECT * FROM information_schema.columns \
             WHERE table_schema = %s AND table_name = %s AND column_name = %s",
            &[schema.into(), table.into(), column.into()],
            &QueryOptions::quiet(),
        )
        .await
    }

    pub async fn check_role(&mut self, role: &str, is_admin: bool) -> Option<Row> {
        self.get_row(
            "SELECT * FROM pg_roles WHERE rolname = %s",
            &[role.into()],
            &QueryOptions { is_admin, ..QueryOptions::quiet() },
        )
        .await
    }

    /// Whether `username` (default: the connected user) is a member of `role`
    pub async fn check_role_user(&mut self, role: &str, username: Option<&str>) -> bool {
        if self.check_role(role, false).await.is_none() {
            return false;
        }
        let Some(user) = username.map(String::from).or_else(|| self.state.current_user.clone()) else {
            return false;
        };
        if self.check_role(&user, false).await.is_none() {
            return false;
        }
        let row = self
            .get_row(
                "SELECT pg_has_role(%s, %s, 'MEMBER')",
                &[user.into(), role.into()],
                &QueryOptions::default(),
            )
            .await;
        first_bool(row)
    }

    pub async fn check_super_user(&mut self, username: Option<&str>) -> bool {
        let Some(user) = username.map(String::from).or_else(|| self.state.current_user.clone()) else {
            return false;
        };
        if self.check_role(&user, false).await.is_none() {
            return false;
        }
        let row = self
            .get_row(
                "SELECT usesuper FROM pg_user WHERE usename = %s",
                &[user.into()],
                &QueryOptions::default(),
            )
            .await;
        first_bool(row)
    }

    pub async fn check_function(
        &mut self,
        function: &str,
        schema: Option<&str>,
        is_thread: bool,
    ) -> Option<Row> {
        let schema = self.schema_or_default(schema)?;
        self.get_row(
            "SELECT routine_name FROM information_schema.routines \
             WHERE lower(routine_schema) = %s AND lower(routine_name) = %s",
            &[schema.into(), function.into()],
            &QueryOptions { is_thread, ..QueryOptions::default() },
        )
        .await
    }

    /// Make sure `extension` is installed, creating it when available
    ///
    /// Installing `postgis` 3 or later also installs `postgis_raster`. With
    /// `form_enabled` off a missing extension is not an error.
    pub async fn check_pg_extension(&mut self, extension: &str, form_enabled: bool) -> Result<()> {
        if !is_identifier(extension) {
            return Err(SessionError::invalid_input(format!("invalid extension name '{extension}'")));
        }

        let opts = QueryOptions::default();
        let installed = self
            .get_row("SELECT extname FROM pg_extension WHERE extname = %s", &[extension.into()], &opts)
            .await;
        if installed.is_some() {
            return Ok(());
        }

        let available = self
            .get_row(
                "SELECT name FROM pg_available_extensions WHERE name = %s",
                &[extension.into()],
                &opts,
            )
            .await
            .is_some();

        if available && form_enabled {
            self.execute(&format!("CREATE EXTENSION IF NOT EXISTS {extension};"), &[], &opts).await;
            if extension == "postgis" {
                let major = self
                    .postgis_lib_version()
                    .await
                    .and_then(|v| v.split('.').next().and_then(|m| m.parse::<u32>().ok()));
                if major.is_some_and(|m| m >= 3) {
                    self.execute("CREATE EXTENSION IF NOT EXISTS postgis_raster;", &[], &opts).await;
                }
            }
            return Ok(());
        }

        if form_enabled {
            return Err(SessionError::query_error(format!(
                "Unable to create '{extension}' extension. Packages must be installed, consult your administrator."
            )));
        }
        Ok(())
    }

    /// Connected user, cached in the session state
    pub async fn get_current_user(&mut self) -> String {
        if let Some(user) = self.state.current_user.clone().filter(|u| !u.is_empty()) {
            return user;
        }
        let row = self.get_row("SELECT current_user", &[], &QueryOptions::default()).await;
        let user = first_value(row).map(|v| value_to_string(&v)).unwrap_or_default();
        self.state.current_user = Some(user.clone());
        user
    }

    /// Column names of `table`, in ordinal order
    pub async fn get_columns_list(&mut self, table: &str, schema: Option<&str>) -> Option<Vec<Row>> {
        let schema = self.schema_or_default(schema)?;
        self.get_rows(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = %s AND table_name = %s ORDER BY ordinal_position",
            &[schema.into(), table.into()],
            &QueryOptions::default(),
        )
        .await
    }

    /// SRID of the `the_geom` column of `table`
    pub async fn get_srid(&mut self, table: &str, schema: Option<&str>) -> Option<i64> {
        let schema = self.schema_or_default(schema)?;
        let row = self
            .get_row(
                "SELECT Find_SRID(%s, %s, 'the_geom')",
                &[schema.into(), table.into()],
                &QueryOptions::default(),
            )
            .await;
        first_value(row).and_then(|v| v.as_i64())
    }

    /// `server_version_num` as an integer
    pub async fn get_pg_version(&mut self) -> Option<i64> {
        let row = self
            .get_row("SELECT current_setting('server_version_num')", &[], &QueryOptions::default())
            .await;
        first_value(row).and_then(|v| match v {
            Value::String(s) => s.trim().parse().ok(),
            other => other.as_i64(),
        })
    }

    pub async fn get_postgis_version(&mut self) -> Option<String> {
        if let Err(e) = self.check_pg_extension("postgis", true).await {
            debug!(error = %e, "postgis not available");
            return None;
        }
        self.postgis_lib_version().await
    }

    async fn postgis_lib_version(&mut self) -> Option<String> {
        let row = self.get_row("SELECT postgis_lib_version()", &[], &QueryOptions::default()).await;
        first_value(row).map(|v| value_to_string(&v))
    }

    pub async fn get_pgrouting_version(&mut self) -> Option<String> {
        if let Err(e) = self.check_pg_extension("pgrouting", true).await {
            debug!(error = %e, "pgrouting not available");
            return None;
        }
        let row = self.get_row("SELECT * FROM pgr_version()", &[], &QueryOptions::default()).await;
        first_value(row).map(|v| value_to_string(&v))
    }

    /// Set the search path to `schema, public`; replayed after reconnects
    pub async fn set_search_path(&mut self, schema: &str) -> bool {
        let sql = format!("SET search_path = {schema}, public;");
        let ok = self.execute(&sql, &[], &QueryOptions::default()).await;
        if ok {
            if let Some(handle) = self.query.as_mut() {
                handle.search_path = Some(sql);
            }
        }
        ok
    }

    /// Cancel the backend process `pid`
    pub async fn cancel_pid(&mut self, pid: i32) -> bool {
        let Some(handle) = self.query.as_mut() else {
            return false;
        };
        let cancelled = handle.cancel(pid).await;
        self.state.last_error.clone_from(&handle.last_error);
        cancelled
    }

    /// `(id, idval)` rows of a typevalue catalog table
    pub async fn get_values_from_catalog(
        &mut self,
        table: &str,
        typevalue: &str,
        order_by: &str,
    ) -> Option<Vec<Row>> {
        let sql = format!("SELECT id, idval FROM {table} WHERE typevalue = %s ORDER BY {order_by}");
        self.get_rows(&sql, &[typevalue.into()], &QueryOptions::default()).await
    }

    /// First column of every row of `sql`, as text
    pub async fn create_list_for_completer(&mut self, sql: &str) -> Vec<String> {
        self.get_rows(sql, &[], &QueryOptions::default())
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|row| row.first().map(value_to_string))
            .collect()
    }
}
