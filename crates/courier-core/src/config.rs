use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_SEND_TIME: &str = "09:00";
pub const DEFAULT_TIMEZONE: &str = "Europe/Berlin";
pub const DEFAULT_PREFIX: &str = "RE-";
pub const DEFAULT_LOGIN_BASE_URL: &str = "https://login.microsoftonline.com";
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";
pub const DEFAULT_MAIL_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_BODY_TEMPLATE: &str = "Sehr geehrte Damen und Herren,

anbei erhalten Sie unsere Rechnung als PDF-Dokument.

Bei Fragen stehen wir Ihnen gerne zur Verfügung.

Mit freundlichen Grüßen";

/// Top-level config (courier.toml + COURIER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub folders: FolderConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub message: MessageConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// How long `POST /api/run` waits for the run to finish before replying 202.
    #[serde(default = "default_run_wait_secs")]
    pub run_wait_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            run_wait_secs: default_run_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// When the daily run fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Local wall-clock time in `HH:MM`.
    #[serde(default = "default_send_time")]
    pub send_time: String,
    /// IANA zone name, e.g. `Europe/Berlin`. Also defines "today" for eligibility.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            send_time: default_send_time(),
            timezone: default_timezone(),
        }
    }
}

impl ScheduleConfig {
    /// Parsed `(hour, minute)`. An unparseable value falls back to 09:00 with a warning.
    pub fn send_time(&self) -> (u8, u8) {
        match parse_send_time(&self.send_time) {
            Ok(hm) => hm,
            Err(e) => {
                warn!("{e}; using default {DEFAULT_SEND_TIME}");
                (9, 0)
            }
        }
    }

    pub fn time_zone(&self) -> crate::Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| crate::CoreError::InvalidTimeZone(self.timezone.clone()))
    }
}

/// Parse `HH:MM` into `(hour, minute)`.
pub fn parse_send_time(value: &str) -> crate::Result<(u8, u8)> {
    let invalid = |reason: &str| crate::CoreError::InvalidSendTime {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let (h, m) = value
        .trim()
        .split_once(':')
        .ok_or_else(|| invalid("expected HH:MM"))?;
    let hour: u8 = h.trim().parse().map_err(|_| invalid("hour is not a number"))?;
    let minute: u8 = m
        .trim()
        .parse()
        .map_err(|_| invalid("minute is not a number"))?;
    if hour > 23 || minute > 59 {
        return Err(invalid("out of range"));
    }
    Ok((hour, minute))
}

/// Source and target locations plus the candidate naming convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_target")]
    pub target: String,
    /// Filename prefix a candidate must start with (case-sensitive).
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Accepted extensions without the dot (case-insensitive).
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Files modified more recently than this are left for the next run.
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            target: default_target(),
            prefix: default_prefix(),
            extensions: default_extensions(),
            min_age_secs: default_min_age_secs(),
        }
    }
}

/// Microsoft Graph credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: String,
    #[serde(default)]
    pub sender_address: String,
    #[serde(default = "default_login_base_url")]
    pub login_base_url: String,
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    #[serde(default = "default_mail_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            sender_address: String::new(),
            login_base_url: default_login_base_url(),
            graph_base_url: default_graph_base_url(),
            timeout_secs: DEFAULT_MAIL_TIMEOUT_SECS,
        }
    }
}

impl MailConfig {
    pub fn tenant_id(&self) -> Option<&str> {
        credential(&self.tenant_id)
    }

    pub fn client_id(&self) -> Option<&str> {
        credential(&self.client_id)
    }

    pub fn client_secret(&self) -> Option<&str> {
        credential(&self.client_secret)
    }

    pub fn sender_address(&self) -> Option<&str> {
        credential(&self.sender_address)
    }

    /// All four credentials are set to something other than a template placeholder.
    pub fn is_configured(&self) -> bool {
        self.tenant_id().is_some()
            && self.client_id().is_some()
            && self.client_secret().is_some()
            && self.sender_address().is_some()
    }
}

/// Treat empty strings and copied-from-template placeholders as unset.
pub fn credential(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();
    if lower.contains("your-") && lower.contains("-here") {
        return None;
    }
    if lower.contains("your-tenant-id") || lower.contains("your-client-id") {
        return None;
    }
    Some(trimmed)
}

/// Subject/body templates. See [`render_template`] for placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageConfig {
    #[serde(default = "default_subject_template")]
    pub subject_template: String,
    #[serde(default = "default_body_template")]
    pub body_template: String,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            subject_template: default_subject_template(),
            body_template: default_body_template(),
        }
    }
}

/// Values substituted into the message templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars<'a> {
    pub filename: &'a str,
    pub stem: &'a str,
    pub invoice_number: Option<&'a str>,
    pub invoice_date: Option<&'a str>,
    pub recipient: Option<&'a str>,
    pub buyer_name: Option<&'a str>,
}

/// Replace `{filename}`, `{stem}`, `{invoice_number}`, `{invoice_date}`,
/// `{recipient}` and `{buyer_name}`. A missing invoice number falls back to the stem.
pub fn render_template(template: &str, vars: &TemplateVars<'_>) -> String {
    template
        .replace("{filename}", vars.filename)
        .replace("{stem}", vars.stem)
        .replace(
            "{invoice_number}",
            vars.invoice_number.unwrap_or(vars.stem),
        )
        .replace("{invoice_date}", vars.invoice_date.unwrap_or(""))
        .replace("{recipient}", vars.recipient.unwrap_or(""))
        .replace("{buyer_name}", vars.buyer_name.unwrap_or(""))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Manual runs deliver every parseable document regardless of its date.
    #[serde(default)]
    pub force_send_on_manual: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_run_wait_secs() -> u64 {
    30
}
fn default_send_time() -> String {
    DEFAULT_SEND_TIME.to_string()
}
fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}
fn default_source() -> String {
    "/Dokumente".to_string()
}
fn default_target() -> String {
    "/Dokumente/RE - Rechnung".to_string()
}
fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}
fn default_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}
fn default_min_age_secs() -> u64 {
    5
}
fn default_login_base_url() -> String {
    DEFAULT_LOGIN_BASE_URL.to_string()
}
fn default_graph_base_url() -> String {
    DEFAULT_GRAPH_BASE_URL.to_string()
}
fn default_mail_timeout_secs() -> u64 {
    DEFAULT_MAIL_TIMEOUT_SECS
}
fn default_subject_template() -> String {
    "{stem}".to_string()
}
fn default_body_template() -> String {
    DEFAULT_BODY_TEMPLATE.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.courier/courier.db", home)
}

impl CourierConfig {
    /// Load config from a TOML file with `COURIER_*` env var overrides.
    ///
    /// Nested keys use a double underscore: `COURIER_MAIL__CLIENT_SECRET`.
    /// Path order: explicit argument, then `~/.courier/courier.toml`.
    pub fn load(config_path: Option<&str>) -> crate::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: CourierConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COURIER_").split("__"))
            .extract()
            .map_err(|e| crate::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.courier/courier.toml", home)
}
