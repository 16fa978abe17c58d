// src/main.rs

use anyhow::{bail, Context, Result};
use sign_capture::api::{self, ApiClient};
use sign_capture::capture::{self, CaptureDeps, CaptureNotice, SyntheticCamera, SyntheticCameraConfig};
use sign_capture::prediction::PredictionClient;
use sign_capture::preprocessing::GridPreprocessor;
use sign_capture::proxy;
use sign_capture::store::{AppStore, LabelSource, PredictionRecord};
use sign_capture::types::{Config, PredictionResult};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: sign-capture [config.yaml] [--label <name|id>] [--no-camera] [--serve-proxy]";

struct Args {
    config_path: String,
    label: Option<String>,
    no_camera: bool,
    serve_proxy: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args {
            config_path: "config.yaml".to_string(),
            label: None,
            no_camera: false,
            serve_proxy: false,
        };
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--no-camera" => parsed.no_camera = true,
                "--serve-proxy" => parsed.serve_proxy = true,
                "--label" => match args.next() {
                    Some(label) => parsed.label = Some(label),
                    None => bail!("--label needs a value\n{}", USAGE),
                },
                "-h" | "--help" => bail!(USAGE),
                other if other.starts_with("--") => bail!("unknown flag {}\n{}", other, USAGE),
                other => parsed.config_path = other.to_string(),
            }
        }
        Ok(parsed)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    let config = Config::load_or_default(&args.config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🤟 Sign capture starting");
    info!("📡 Prediction API URL: {}", config.api.base_url);

    let store = Arc::new(match &config.store.snapshot_path {
        Some(path) => AppStore::load(path).with_context(|| format!("Failed to load store {}", path))?,
        None => AppStore::new(),
    });

    let api_client = ApiClient::new(&config.api)?;
    load_labels(&api_client, &store, &config).await;
    select_label(&store, args.label.as_deref());

    if args.serve_proxy {
        let app = proxy::router(&config.proxy.backend_url, api::http_client(&config.api)?);
        let bind = config.proxy.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy::serve(&bind, app).await {
                error!("Proxy stopped: {:#}", e);
            }
        });
    }

    let (result_tx, mut results) = mpsc::unbounded_channel();
    let submitter = Arc::new(PredictionClient::from_api(
        api_client,
        config.api.predict_path.clone(),
    ));
    let mut module = capture::spawn(
        &config.capture,
        CaptureDeps {
            labels: store.clone(),
            preprocessor: Arc::new(GridPreprocessor::new(&config.preprocess)),
            submitter,
            sink: Box::new(move |result: PredictionResult| {
                let _ = result_tx.send(result);
            }),
        },
    );
    let handle = module.handle.clone();

    let mut state_rx = handle.subscribe();
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            let state = *state_rx.borrow();
            info!("🖐 {}", state);
        }
    });

    let mut camera = if args.no_camera {
        SyntheticCamera::unavailable(&handle, "camera disabled with --no-camera").await
    } else {
        SyntheticCamera::start(SyntheticCameraConfig::default(), handle.clone())
    };

    handle.start().await?;

    let outcome = loop {
        tokio::select! {
            Some(result) = results.recv() => break Some(result),
            Some(notice) = module.notices.recv() => match notice {
                CaptureNotice::CameraDegraded(_) | CaptureNotice::FallbackSequence => {
                    warn!("⚠️ {}", notice);
                }
                other => {
                    error!("❌ {}", other);
                    break None;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling capture");
                handle.stop().await?;
                break None;
            }
        }
    };

    camera.stop();

    if let Some(result) = outcome {
        info!("✅ Prediction: {}", result.0);
        if let Some(label) = store.selected_label() {
            store.add_record(PredictionRecord::new(label.name, result));
        }
    }

    let summary = handle.metrics().summary();
    info!("📊 Capture metrics: {}", serde_json::to_string(&summary)?);

    if handle.shutdown().await.is_err() {
        warn!("Capture task already stopped");
    }
    module.task.await.context("Capture task panicked")?;

    if let Some(path) = &config.store.snapshot_path {
        store
            .save(path)
            .with_context(|| format!("Failed to save store {}", path))?;
    }

    if args.serve_proxy {
        info!("Proxy still running, press Ctrl-C to exit");
        tokio::signal::ctrl_c().await?;
    }

    info!("👋 Done");
    Ok(())
}

async fn load_labels(api_client: &ApiClient, store: &AppStore, config: &Config) {
    store.set_loading(true);
    match api_client.labels(&config.api.labels_path).await {
        Ok(labels) => {
            info!("✓ {} labels available", labels.len());
            store.set_labels(labels);
            store.set_error(None);
        }
        Err(e) => {
            warn!("Could not fetch labels: {}", e);
            store.set_error(Some(e.to_string()));
            if store.labels().is_empty() {
                if let Some(label) = config.store.fallback_label.clone() {
                    info!("Using fallback label \"{}\"", label.name);
                    store.set_labels(vec![label]);
                }
            }
        }
    }
    store.set_loading(false);
}

fn select_label(store: &AppStore, requested: Option<&str>) {
    if let Some(key) = requested {
        if store.select_label(key).is_none() {
            warn!("Label \"{}\" not found", key);
        }
        return;
    }
    if store.selected_label().is_none() {
        if let Some(first) = store.labels().into_iter().next() {
            store.set_current_label(Some(first));
        }
    }
}
