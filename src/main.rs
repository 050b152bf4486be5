use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cloud_seg_rs::{
    api::{self, AppState},
    Cli, Config, ImageProcessor, JobStore, Model, PgJobStore,
};

const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";
const DB_MAX_CONNECTIONS: u32 = 5;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration: {}", cli.config.display()))?;
    config.apply_cli(&cli);
    let addr = config.api.socket_addr().await?;

    if config.storage.has_remote_containers() {
        info!(
            "Remote containers configured (input: {:?}, output: {:?}); artifacts stay on local disk",
            config.storage.azure_input_container, config.storage.azure_output_container
        );
    }

    let model_path = config.model_path();
    let model = tokio::task::spawn_blocking({
        let model_config = config.model.clone();
        move || Model::new(&model_config, &model_path)
    })
    .await
    .context("Model loading task panicked")?
    .context("Failed to load segmentation model")?;

    let jobs: Option<Arc<dyn JobStore>> = match cli.database_url.as_deref() {
        Some(url) => {
            let store = PgJobStore::connect(url, DB_MAX_CONNECTIONS)
                .await
                .context("Failed to connect to job database")?;
            store
                .ensure_schema()
                .await
                .context("Failed to prepare job table")?;
            let store: Arc<dyn JobStore> = Arc::new(store);
            Some(store)
        }
        None => {
            warn!("DATABASE_URL not set; segmentation jobs will not be recorded");
            None
        }
    };

    let state = AppState {
        processor: Arc::new(ImageProcessor::new(
            Arc::new(model),
            config.data_dirs.clone(),
        )),
        jobs,
    };
    let app = api::create_app(state, config.api.max_upload_bytes());

    api::serve(app, addr).await.context("Server error")?;
    info!("Server stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
