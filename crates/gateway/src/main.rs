use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use opentelemetry_proto::tonic::collector::trace::v1::trace_service_server::TraceServiceServer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use th_domain::config::{Config, ConfigSeverity, LogFormat};
use th_eventbus::Hub;
use th_forwarder::{AttrCaps, ForwardGrouper, ReqwestOtlpSender};
use th_gateway::cli::{Cli, Command, ConfigCommand};
use th_gateway::ingest::EngineIngestSink;
use th_gateway::state::AppState;
use th_gateway::{api, cli};
use th_otlp::grpc::TraceServiceImpl;
use th_reconcile::{EventSink, ForwardSink, NullForwardSink, ReconcileEngine};
use th_store::RunStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    match args.command {
        None | Some(Command::Serve) => {
            let (config, _config_path) = cli::load_config()?;
            init_tracing(&config.logging);
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = cli::load_config()?;
            let passed = cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config()?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config()?;
            cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("tracehub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(logging: &th_domain::config::LoggingConfig) {
    let default_filter = format!("{},th_gateway=debug", logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let issues = config.validate();
    let mut has_errors = false;
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Error => {
                has_errors = true;
                tracing::error!("{issue}");
            }
            ConfigSeverity::Warning => tracing::warn!("{issue}"),
        }
    }
    if has_errors {
        anyhow::bail!("configuration is invalid, see logged errors above");
    }

    let store = Arc::new(RunStore::open(std::path::Path::new(&config.storage.state_dir))?);
    tracing::info!(state_dir = %config.storage.state_dir, "run store opened");

    let hub = Arc::new(Hub::new());
    tracing::info!("event bus ready");

    let forwarder: Arc<dyn ForwardSink> = if config.forwarder.enabled {
        let grouper = ForwardGrouper::new(
            store.clone(),
            Arc::new(ReqwestOtlpSender::with_config(
                config.forwarder.timeout_seconds,
                config.forwarder.insecure,
            )),
            config.forwarder.endpoint.clone(),
        )
        .with_debounce(Duration::from_secs(config.forwarder.debounce_seconds))
        .with_max_step_spans(config.forwarder.max_synthetic_spans)
        .with_attr_caps(AttrCaps {
            top_level_len: config.forwarder.attr_max_str,
            nested_len: config.forwarder.attr_max_kv_str,
            list_cap: config.forwarder.attr_max_list_items,
        });
        tracing::info!(endpoint = %config.forwarder.endpoint, "downstream forwarder enabled");
        Arc::new(grouper)
    } else {
        tracing::info!("downstream forwarder disabled");
        Arc::new(NullForwardSink)
    };

    let engine = Arc::new(ReconcileEngine::new(store.clone(), hub.clone() as Arc<dyn EventSink>, forwarder));
    tracing::info!("reconciliation engine ready");

    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        engine: engine.clone(),
        hub: hub.clone(),
    };

    {
        let engine = engine.clone();
        let timeout_minutes = config.stale_run.timeout_minutes_default;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                if let Err(e) = engine.sweep_stale(timeout_minutes).await {
                    tracing::warn!(error = %e, "periodic stale-run sweep failed");
                }
            }
        });
    }

    let cors_layer = build_cors_layer(&config.server.cors);
    let app = api::router(state).layer(cors_layer);

    let http_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding http listener on {http_addr}"))?;
    tracing::info!(addr = %http_addr, "http server listening");

    let http_server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    if config.otlp.grpc_enabled {
        let grpc_addr = format!("{}:{}", config.otlp.grpc_host, config.otlp.grpc_port)
            .parse()
            .context("parsing otlp grpc bind address")?;
        let sink = Arc::new(EngineIngestSink::new(engine.clone()));
        let trace_service = TraceServiceImpl::new(sink);

        tracing::info!(addr = %grpc_addr, "otlp grpc server listening");
        let grpc_server = tonic::transport::Server::builder()
            .add_service(TraceServiceServer::new(trace_service))
            .serve_with_shutdown(grpc_addr, shutdown_signal());

        let (http_result, grpc_result) = tokio::join!(http_server, grpc_server);
        http_result.context("http server failed")?;
        grpc_result.context("otlp grpc server failed")?;
    } else {
        http_server.await.context("http server failed")?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining without flushing pending forward buckets");
}

fn build_cors_layer(cors: &th_domain::config::CorsConfig) -> CorsLayer {
    use axum::http::header;

    if cors.allowed_origins.len() == 1 && cors.allowed_origins[0] == "*" {
        tracing::warn!("CORS configured with wildcard \"*\" — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    let mut exact: Vec<HeaderValue> = Vec::new();
    let mut wildcard_prefixes: Vec<String> = Vec::new();

    for origin in &cors.allowed_origins {
        if origin.ends_with(":*") {
            let prefix = origin.trim_end_matches('*').to_owned();
            wildcard_prefixes.push(prefix);
        } else if let Ok(hv) = origin.parse::<HeaderValue>() {
            exact.push(hv);
        } else {
            tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
        }
    }

    let allow_origin = if wildcard_prefixes.is_empty() {
        AllowOrigin::list(exact)
    } else {
        AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            if exact.iter().any(|e| e.as_bytes() == origin.as_bytes()) {
                return true;
            }
            wildcard_prefixes.iter().any(|prefix| {
                origin_str
                    .strip_prefix(prefix.as_str())
                    .map(|port| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
                    .unwrap_or(false)
            })
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

