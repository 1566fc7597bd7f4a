use serde::Deserialize;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub transport: TransportSettings,
    pub topics: TopicSettings,
    pub processor: ProcessorSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Where the development broker listens.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// How clients reach the broker and how they recover from outages.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransportSettings {
    pub url: String,
    pub client_id_prefix: String,
    pub connection_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub ack_timeout_secs: u64,
}

/// Topic layout shared by meters and the processor.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TopicSettings {
    pub readings_base: String,
    pub billing_base: String,
    pub status_base: String,
    pub shared_group: String,
    pub enable_shared_subscriptions: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProcessorSettings {
    pub health_check_interval_secs: u64,
    pub rate_per_kwh: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StorageSettings {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

impl TopicSettings {
    /// `{readings_base}/{client_id}`
    pub fn reading_topic(&self, client_id: &str) -> String {
        format!("{}/{client_id}", self.readings_base)
    }

    /// `{readings_base}/#`
    pub fn all_readings_topic(&self) -> String {
        format!("{}/#", self.readings_base)
    }

    /// `$share/{group}/{readings_base}/#`
    pub fn shared_readings_topic(&self, group: &str) -> String {
        format!("$share/{group}/{}/#", self.readings_base)
    }

    /// `{billing_base}/{user_id}`
    pub fn billing_topic(&self, user_id: &str) -> String {
        format!("{}/{user_id}", self.billing_base)
    }

    /// `{billing_base}/{user_id}/reset`
    pub fn billing_reset_topic(&self, user_id: &str) -> String {
        format!("{}/{user_id}/reset", self.billing_base)
    }

    /// `{billing_base}/#`
    pub fn all_billing_topic(&self) -> String {
        format!("{}/#", self.billing_base)
    }

    /// `{status_base}/{client_id}`
    pub fn status_topic(&self, client_id: &str) -> String {
        format!("{}/{client_id}", self.status_base)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled
/// from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub transport: Option<PartialTransportSettings>,
    pub topics: Option<PartialTopicSettings>,
    pub processor: Option<PartialProcessorSettings>,
    pub storage: Option<PartialStorageSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTransportSettings {
    pub url: Option<String>,
    pub client_id_prefix: Option<String>,
    pub connection_timeout_secs: Option<u64>,
    pub reconnect_delay_secs: Option<u64>,
    pub ack_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTopicSettings {
    pub readings_base: Option<String>,
    pub billing_base: Option<String>,
    pub status_base: Option<String>,
    pub shared_group: Option<String>,
    pub enable_shared_subscriptions: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialProcessorSettings {
    pub health_check_interval_secs: Option<u64>,
    pub rate_per_kwh: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStorageSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fills every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let transport = self.transport.unwrap_or_default();
        let topics = self.topics.unwrap_or_default();
        let processor = self.processor.unwrap_or_default();
        let storage = self.storage.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
            },
            transport: TransportSettings {
                url: transport.url.unwrap_or(defaults.transport.url),
                client_id_prefix: transport
                    .client_id_prefix
                    .unwrap_or(defaults.transport.client_id_prefix),
                connection_timeout_secs: transport
                    .connection_timeout_secs
                    .unwrap_or(defaults.transport.connection_timeout_secs),
                reconnect_delay_secs: transport
                    .reconnect_delay_secs
                    .unwrap_or(defaults.transport.reconnect_delay_secs),
                ack_timeout_secs: transport
                    .ack_timeout_secs
                    .unwrap_or(defaults.transport.ack_timeout_secs),
            },
            topics: TopicSettings {
                readings_base: topics.readings_base.unwrap_or(defaults.topics.readings_base),
                billing_base: topics.billing_base.unwrap_or(defaults.topics.billing_base),
                status_base: topics.status_base.unwrap_or(defaults.topics.status_base),
                shared_group: topics.shared_group.unwrap_or(defaults.topics.shared_group),
                enable_shared_subscriptions: topics
                    .enable_shared_subscriptions
                    .unwrap_or(defaults.topics.enable_shared_subscriptions),
            },
            processor: ProcessorSettings {
                health_check_interval_secs: processor
                    .health_check_interval_secs
                    .unwrap_or(defaults.processor.health_check_interval_secs),
                rate_per_kwh: processor
                    .rate_per_kwh
                    .unwrap_or(defaults.processor.rate_per_kwh),
            },
            storage: StorageSettings {
                path: storage.path.unwrap_or(defaults.storage.path),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// Ensures the application has sensible defaults if no configuration is provided.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            transport: TransportSettings {
                url: "ws://127.0.0.1:8080".to_string(),
                client_id_prefix: "mqtt-meter".to_string(),
                connection_timeout_secs: 30,
                reconnect_delay_secs: 5,
                ack_timeout_secs: 10,
            },
            topics: TopicSettings {
                readings_base: "meters/readings".to_string(),
                billing_base: "meters/billing".to_string(),
                status_base: "meters/clients/status".to_string(),
                shared_group: "mqtt-meter-group".to_string(),
                enable_shared_subscriptions: false,
            },
            processor: ProcessorSettings {
                health_check_interval_secs: 30,
                rate_per_kwh: crate::billing::DEFAULT_RATE_PER_KWH,
            },
            storage: StorageSettings {
                path: "meterbus_db".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}
