//! Rendering the gunicorn unit file.

use alloc::collections::BTreeMap;
use core::fmt::Write as _;
use std::path::PathBuf;

/// Name of the systemd unit running the application.
pub const SERVICE_NAME: &str = "gunicorn3.service";

const SERVICE_FILE_TEMPLATE: &str = include_str!("gunicorn3.service.ini");

/// Values substituted into the unit template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContext {
    pub application_root: PathBuf,
    pub env_file: PathBuf,
    pub wsgi_module: String,
    pub user: String,
    pub group: String,
    pub port: u16,
    /// Rendered as one `Environment=` line per entry.
    pub env: BTreeMap<String, String>,
}

/// Quotes a value for a double-quoted systemd assignment.
fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str(r"\\"),
            '"' => escaped.push_str("\\\""),
            '%' => escaped.push_str("%%"),
            '\n' => escaped.push_str(r"\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

impl ServiceContext {
    fn environment_lines(&self) -> String {
        let mut lines = String::new();
        for (key, value) in &self.env {
            if !lines.is_empty() {
                lines.push('\n');
            }
            // Writing to a String never fails.
            let _ = write!(lines, "Environment=\"{}={}\"", escape(key), escape(value));
        }
        lines
    }

    #[must_use]
    pub fn render(&self) -> String {
        SERVICE_FILE_TEMPLATE
            .replace("{ application_root }", &self.application_root.to_string_lossy())
            .replace("{ env_file }", &self.env_file.to_string_lossy())
            .replace("{ wsgi_module }", &self.wsgi_module)
            .replace("{ user }", &self.user)
            .replace("{ group }", &self.group)
            .replace("{ port }", &self.port.to_string())
            .replace("{ env }", &self.environment_lines())
    }
}
