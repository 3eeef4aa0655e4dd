//! Session state read by UI collaborators

use serde::Serialize;

/// Mutable record of the current connection session
///
/// Connection fields are cleared by [`SessionState::reset`] at the start of
/// every connection attempt. `threads`, `active_dialog` and
/// `current_selections` belong to the host UI and survive resets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionState {
    /// Driver or connection error of the last operation, `None` after a success
    pub last_error: Option<String>,
    /// Formatted report of the last shown database error
    pub last_error_msg: Option<String>,
    pub logged_status: bool,
    /// Background tasks in flight; while non-empty, error dialogs are suppressed
    pub threads: Vec<String>,
    /// Schema of the credential layer
    pub schema_name: Option<String>,
    pub current_user: Option<String>,
    pub active_dialog: Option<String>,
    pub current_selections: Vec<String>,
}

impl SessionState {
    /// Clear connection fields before a new attempt
    pub fn reset(&mut self) {
        self.last_error = None;
        self.last_error_msg = None;
        self.logged_status = false;
        self.current_user = None;
    }

    /// Whether interactive dialogs must be suppressed
    #[must_use]
    pub fn in_background(&self) -> bool {
        !self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_keeps_ui_fields() {
        let mut state = SessionState {
            last_error: Some("boom".into()),
            last_error_msg: Some("Function name: get_row".into()),
            logged_status: true,
            threads: vec!["export".into()],
            schema_name: Some("ws".into()),
            current_user: Some("alice".into()),
            active_dialog: Some("dlg_info".into()),
            current_selections: vec!["node".into()],
        };
        state.reset();

        assert!(state.last_error.is_none());
        assert!(state.last_error_msg.is_none());
        assert!(!state.logged_status);
        assert!(state.current_user.is_none());
        assert_eq!(state.threads, vec!["export".to_string()]);
        assert_eq!(state.schema_name.as_deref(), Some("ws"));
        assert!(state.in_background());
    }
}
