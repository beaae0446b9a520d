use serde::{Deserialize, Serialize};

/// OTLP ingress settings: the gRPC and HTTP receivers (§6.2, §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OtlpIngressConfig {
    #[serde(default = "d_true")]
    pub grpc_enabled: bool,
    #[serde(default = "d_grpc_host")]
    pub grpc_host: String,
    #[serde(default = "d_grpc_port")]
    pub grpc_port: u16,
    #[serde(default = "d_true")]
    pub http_enabled: bool,
    #[serde(default = "d_http_path")]
    pub http_path: String,
}

impl Default for OtlpIngressConfig {
    fn default() -> Self {
        Self {
            grpc_enabled: true,
            grpc_host: d_grpc_host(),
            grpc_port: d_grpc_port(),
            http_enabled: true,
            http_path: d_http_path(),
        }
    }
}

fn d_true() -> bool {
    true
}

fn d_grpc_host() -> String {
    "127.0.0.1".into()
}

fn d_grpc_port() -> u16 {
    4317
}

fn d_http_path() -> String {
    "/v1/traces".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwarderProtocol {
    Http,
    Grpc,
}

impl Default for ForwarderProtocol {
    fn default() -> Self {
        ForwarderProtocol::Http
    }
}

/// Downstream OTLP forwarder settings, the Forward Grouper's export target
/// (§4.6, §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub protocol: ForwarderProtocol,
    #[serde(default = "d_service_name")]
    pub service_name: String,
    #[serde(default = "d_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "d_true")]
    pub insecure: bool,
    #[serde(default = "d_debounce")]
    pub debounce_seconds: u64,
    #[serde(default = "d_run_timeout")]
    pub run_timeout_seconds: u64,
    #[serde(default = "d_max_steps")]
    pub max_synthetic_spans: usize,
    #[serde(default = "d_attr_max_str")]
    pub attr_max_str: usize,
    #[serde(default = "d_attr_max_kv_str")]
    pub attr_max_kv_str: usize,
    #[serde(default = "d_attr_max_list_items")]
    pub attr_max_list_items: usize,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            protocol: ForwarderProtocol::default(),
            service_name: d_service_name(),
            timeout_seconds: d_timeout(),
            insecure: true,
            debounce_seconds: d_debounce(),
            run_timeout_seconds: d_run_timeout(),
            max_synthetic_spans: d_max_steps(),
            attr_max_str: d_attr_max_str(),
            attr_max_kv_str: d_attr_max_kv_str(),
            attr_max_list_items: d_attr_max_list_items(),
        }
    }
}

fn d_service_name() -> String {
    "tracehub-forwarder".into()
}

fn d_timeout() -> u64 {
    30
}

fn d_debounce() -> u64 {
    5
}

fn d_run_timeout() -> u64 {
    30
}

fn d_max_steps() -> usize {
    10
}

fn d_attr_max_str() -> usize {
    500
}

fn d_attr_max_kv_str() -> usize {
    200
}

fn d_attr_max_list_items() -> usize {
    5
}
