/// Layered application configuration
///
/// Defaults, then a `.env` file, then process environment variables, following
/// the same precedence the original service's pydantic `Settings` used.
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json_format: bool,

    #[serde(default = "default_flink_home")]
    pub flink_home: String,

    #[serde(default)]
    pub flink_cdc_home: Option<String>,

    #[serde(default = "default_job_manager_url")]
    pub flink_job_manager_url: String,

    #[serde(default = "default_sql_gateway_url")]
    pub flink_sql_gateway_url: String,

    #[serde(default = "default_encryption_key")]
    pub variable_encryption_key: String,

    /// Initial poll interval for the status monitor's exponential backoff.
    #[serde(default = "default_poll_interval_floor_ms")]
    pub poll_interval_floor_ms: u64,

    /// Cap on the status monitor's backed-off poll interval.
    #[serde(default = "default_poll_interval_cap_secs")]
    pub poll_interval_cap_secs: u64,

    /// Grace period between a graceful cancel signal and forced escalation.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
}

fn default_database_url() -> String {
    "postgresql://localhost/resinkit".to_string()
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_flink_home() -> String {
    "/opt/flink".to_string()
}

fn default_job_manager_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_sql_gateway_url() -> String {
    "http://localhost:8083".to_string()
}

fn default_encryption_key() -> String {
    "resinkit-default-encryption-key-0519".to_string()
}

fn default_poll_interval_floor_ms() -> u64 {
    200
}

fn default_poll_interval_cap_secs() -> u64 {
    30
}

fn default_cancel_grace_secs() -> u64 {
    30
}

impl Settings {
    /// Loads configuration from defaults, an optional `.env` file, and the
    /// process environment. Env vars are read unprefixed (`DATABASE_URL`,
    /// `FLINK_HOME`, `LOG_LEVEL`, ...) matching the field names verbatim, the
    /// same names the original service's settings carried.
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();

        config::Config::builder()
            // An empty defaults layer gives every `#[serde(default)]` field
            // somewhere to deserialize from when no env vars are set at all.
            .add_source(config::Config::try_from(&Settings::empty())?)
            .add_source(config::Environment::default().separator("__"))
            .build()?
            .try_deserialize()
    }

    fn empty() -> Self {
        Settings {
            database_url: default_database_url(),
            log_level: default_log_level(),
            log_json_format: false,
            flink_home: default_flink_home(),
            flink_cdc_home: None,
            flink_job_manager_url: default_job_manager_url(),
            flink_sql_gateway_url: default_sql_gateway_url(),
            variable_encryption_key: default_encryption_key(),
            poll_interval_floor_ms: default_poll_interval_floor_ms(),
            poll_interval_cap_secs: default_poll_interval_cap_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
        }
    }
}

impl serde::Serialize for Settings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Settings", 11)?;
        s.serialize_field("database_url", &self.database_url)?;
        s.serialize_field("log_level", &self.log_level)?;
        s.serialize_field("log_json_format", &self.log_json_format)?;
        s.serialize_field("flink_home", &self.flink_home)?;
        s.serialize_field("flink_cdc_home", &self.flink_cdc_home)?;
        s.serialize_field("flink_job_manager_url", &self.flink_job_manager_url)?;
        s.serialize_field("flink_sql_gateway_url", &self.flink_sql_gateway_url)?;
        s.serialize_field("variable_encryption_key", &self.variable_encryption_key)?;
        s.serialize_field("poll_interval_floor_ms", &self.poll_interval_floor_ms)?;
        s.serialize_field("poll_interval_cap_secs", &self.poll_interval_cap_secs)?;
        s.serialize_field("cancel_grace_secs", &self.cancel_grace_secs)?;
        s.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = Settings::empty();
        assert_eq!(s.log_level, "INFO");
        assert_eq!(s.poll_interval_cap_secs, 30);
        assert_eq!(s.cancel_grace_secs, 30);
    }
}
