//! Consistency checks between the database URL and individual variables

use serde::Serialize;
use url::Url;

use crate::settings::{DatabaseKind, RawDatabaseConfig, decode_component};

const REDACTED: &str = "****";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

/// One URL component compared with its individual variable
#[derive(Debug, Clone, Serialize)]
pub struct FieldComparison {
    pub field: &'static str,
    pub variable: String,
    pub url_value: String,
    pub env_value: String,
    pub matches: bool,
}

/// Outcome of cross-checking the database configuration
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    /// False when any error-level issue was found
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    /// Warning- and info-level issues
    pub warnings: Vec<ValidationIssue>,
    pub comparisons: Vec<FieldComparison>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            comparisons: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    fn error(&mut self, field: &str, message: String) {
        self.valid = false;
        self.errors.push(ValidationIssue {
            field: field.to_string(),
            message,
            severity: Severity::Error,
        });
    }

    fn warn(&mut self, field: &str, message: String, severity: Severity) {
        self.warnings.push(ValidationIssue {
            field: field.to_string(),
            message,
            severity,
        });
    }
}

/// Components pulled out of the URL, empty when absent
struct UrlComponents {
    scheme: String,
    host: String,
    port: String,
    database: String,
    username: String,
    password: String,
    sslmode: String,
}

impl UrlComponents {
    fn parse(url: &str) -> Option<Self> {
        let parsed = Url::parse(url).ok()?;
        Some(Self {
            scheme: parsed.scheme().to_string(),
            host: parsed.host_str().unwrap_or_default().to_string(),
            port: parsed.port().map(|p| p.to_string()).unwrap_or_default(),
            database: decode_component(parsed.path().trim_start_matches('/')),
            username: decode_component(parsed.username()),
            password: decode_component(parsed.password().unwrap_or_default()),
            sslmode: parsed
                .query_pairs()
                .find(|(key, _)| key == "sslmode")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default(),
        })
    }
}

/// Cross-check the URL against the individual variables under `env_prefix`.
///
/// A component set on both sides with different values is an error; a
/// component present on one side only is reported as a warning or note.
/// Secrets never appear in the report.
pub fn validate_config(raw: &RawDatabaseConfig, env_prefix: &str) -> ValidationReport {
    let mut report = ValidationReport::new();
    let var = |suffix: &str| format!("{env_prefix}_{suffix}");

    let Some(url) = raw.url.as_deref() else {
        report.warn("url", "No database URL configured".to_string(), Severity::Warning);
        if raw.has_components() {
            report.recommendations.push(
                "Individual database components are set but no URL. Consider constructing URL from components."
                    .to_string(),
            );
            if let Some(suggested) = suggested_url(raw) {
                report
                    .recommendations
                    .push(format!("Consider setting {} to: {suggested}", var("URL")));
            }
        }
        return report;
    };

    let Some(components) = UrlComponents::parse(url) else {
        report.error("url", "Failed to parse database URL".to_string());
        return report;
    };

    let checks: [(&'static str, &str, Option<&str>, &str, bool); 5] = [
        ("host", &components.host, raw.host.as_deref(), "HOST", false),
        ("port", &components.port, raw.port.as_deref(), "PORT", false),
        ("database", &components.database, raw.name.as_deref(), "NAME", false),
        ("username", &components.username, raw.user.as_deref(), "USER", false),
        ("password", &components.password, raw.pw.as_deref(), "PW", true),
    ];

    for (field, url_value, env_value, suffix, secret) in checks {
        let url_value = url_value.trim();
        let env_value = env_value.unwrap_or_default().trim();
        let variable = var(suffix);
        let shown = |value: &str| {
            if secret && !value.is_empty() {
                REDACTED.to_string()
            } else {
                value.to_string()
            }
        };

        report.comparisons.push(FieldComparison {
            field,
            variable: variable.clone(),
            url_value: shown(url_value),
            env_value: shown(env_value),
            matches: url_value == env_value,
        });

        match (url_value.is_empty(), env_value.is_empty()) {
            (false, false) if url_value != env_value => {
                let message = if secret {
                    format!("{variable} does not match the password in the URL")
                } else {
                    format!("{variable} mismatch: URL has \"{url_value}\" but env has \"{env_value}\"")
                };
                report.error(field, message);
            }
            (true, false) => {
                report.warn(field, format!("{variable} is set but not in URL"), Severity::Warning);
            }
            (false, true) => {
                report.warn(field, format!("{field} in URL but {variable} not set"), Severity::Info);
            }
            _ => {}
        }
    }

    if let Some(env_kind) = raw.kind.as_deref() {
        let url_kind = DatabaseKind::from_scheme(&components.scheme);
        let declared = DatabaseKind::from_scheme(env_kind);
        if url_kind != declared || declared.is_none() {
            report.error(
                "database_type",
                format!(
                    "Database type mismatch: URL indicates {} but {} is {}",
                    components.scheme,
                    var("TYPE"),
                    env_kind.to_ascii_lowercase()
                ),
            );
        }
    }

    if let Some(env_ssl) = raw.ssl.as_deref() {
        let env_ssl = env_ssl.to_ascii_lowercase();
        let mode = components.sslmode.as_str();
        if !mode.is_empty() {
            let consistent = (env_ssl == "true" && matches!(mode, "require" | "verify-full" | "verify-ca"))
                || (env_ssl == "false" && matches!(mode, "disable" | "allow"));
            if !consistent {
                report.warn(
                    "ssl",
                    format!("SSL configuration may differ: URL has {mode}, env has {env_ssl}"),
                    Severity::Warning,
                );
            }
        }
    }

    if !report.valid {
        report
            .recommendations
            .push("Fix configuration mismatches before attempting connection.".to_string());
    }

    report
}

/// URL assembled from the individual variables with the password masked
fn suggested_url(raw: &RawDatabaseConfig) -> Option<String> {
    let masked = RawDatabaseConfig {
        pw: raw.pw.as_ref().map(|_| REDACTED.to_string()),
        ..raw.clone()
    };
    masked.url_from_components()
}
