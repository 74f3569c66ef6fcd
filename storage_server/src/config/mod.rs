use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Serialized, Yaml},
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::server::StorageServerOptions;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    pub node_id: String,
    pub naming_addrs: String,
    pub naming_ack_addrs: Option<String>,
    pub advertise_ip: String,
    // 0 picks an ephemeral port
    pub client_port: u16,
    pub storage_path: String,
    pub async_write_threshold: u64,
    pub chunk_size: usize,
    pub reconnect_retries: u8,
    pub log_level: String,
    pub log_base: String,
    pub apm_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_id: "storage".to_string(),
            naming_addrs: "127.0.0.1:8081".to_string(),
            naming_ack_addrs: Some("127.0.0.1:8082".to_string()),
            advertise_ip: "127.0.0.1".to_string(),
            client_port: 0,
            storage_path: "./temp/storage_server/data".to_string(),
            async_write_threshold: 10,
            chunk_size: 4096,
            reconnect_retries: 5,
            log_level: "info".to_string(),
            log_base: "./temp/storage_server".to_string(),
            apm_endpoint: None,
        }
    }
}

impl Config {
    pub fn options(&self) -> StorageServerOptions {
        StorageServerOptions {
            naming_addrs: self.naming_addrs.clone(),
            naming_ack_addrs: self.naming_ack_addrs.clone(),
            advertise_ip: self.advertise_ip.clone(),
            client_addrs: format!("0.0.0.0:{}", self.client_port),
            storage_path: self.storage_path.clone().into(),
            async_write_threshold: self.async_write_threshold,
            chunk_size: self.chunk_size,
            reconnect_retries: self.reconnect_retries,
            reconnect_delay: Duration::from_millis(500),
        }
    }
}

pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let env = std::env::var("ENV").unwrap_or_else(|_| "default".to_owned());
    let config_file_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| format!("./storage_server/config/{}.yaml", env));
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Yaml::file(config_file_path))
        .extract()
        .unwrap()
});
