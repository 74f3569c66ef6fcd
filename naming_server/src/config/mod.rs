use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::server::NamingServerOptions;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub id: String,
    pub client_port: u16,
    pub storage_port: u16,
    pub ack_port: u16,
    pub log_level: String,
    pub log_base: String,
    pub apm_endpoint: Option<String>,
    pub cache_capacity: usize,
    pub registry_buckets: usize,
    pub replication_min_servers: usize,
    pub write_check_interval_secs: u64,
    pub write_abandon_after_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: "naming".to_string(),
            client_port: 8080,
            storage_port: 8081,
            ack_port: 8082,
            log_level: "info".to_string(),
            log_base: "./temp/naming_server".to_string(),
            apm_endpoint: None,
            cache_capacity: 5,
            registry_buckets: 10,
            replication_min_servers: 3,
            write_check_interval_secs: 5,
            write_abandon_after_secs: 10,
        }
    }
}

impl Config {
    pub fn options(&self) -> NamingServerOptions {
        NamingServerOptions {
            client_addrs: format!("0.0.0.0:{}", self.client_port),
            storage_addrs: format!("0.0.0.0:{}", self.storage_port),
            ack_addrs: format!("0.0.0.0:{}", self.ack_port),
            registry_buckets: self.registry_buckets,
            cache_capacity: self.cache_capacity,
            replication_min_servers: self.replication_min_servers,
            write_check_interval: Duration::from_secs(self.write_check_interval_secs),
            write_abandon_after: Duration::from_secs(self.write_abandon_after_secs),
        }
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let env = std::env::var("ENV").unwrap_or_else(|_| "default".to_owned());
    let config_file_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| format!("./naming_server/config/{}.yaml", env));
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Yaml::file(config_file_path))
        .extract()
        .unwrap()
});
