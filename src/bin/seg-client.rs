//! Uploads one image to a running segmentation server and downloads its mask.

use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use image::ImageFormat;
use reqwest::multipart::{Form, Part};
use tracing::{info, warn};

use cloud_seg_rs::api::SegmentResponse;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Image to segment
    image: PathBuf,

    /// Base URL of the API
    #[arg(short, long, default_value = "http://127.0.0.1:5000/api")]
    server: String,

    /// Where the downloaded mask is written
    #[arg(long, default_value = "test_output")]
    save_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    ensure!(
        args.image.is_file(),
        "Image not found: {}",
        args.image.display()
    );

    let server = args.server.trim_end_matches('/');
    let client = reqwest::Client::new();

    let response = upload(&client, server, &args.image).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let mask_path = args
        .save_dir
        .join(format!("{}_mask.png", response.image_id));
    if let Err(e) = download_mask(&client, server, &response, &mask_path).await {
        warn!("Mask download failed: {:#}", e);
    }
    Ok(())
}

async fn upload(client: &reqwest::Client, server: &str, image: &Path) -> Result<SegmentResponse> {
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read image: {}", image.display()))?;
    let file_name = image
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());

    let part = Part::bytes(bytes)
        .file_name(file_name)
        .mime_str(mime_for(image))?;
    let form = Form::new().part("file", part);

    info!("Uploading {} to {}/segment", image.display(), server);
    let response = client
        .post(format!("{server}/segment"))
        .multipart(form)
        .send()
        .await
        .context("Upload request failed")?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Upload failed with {}: {}", status, body);
    }
    response
        .json::<SegmentResponse>()
        .await
        .context("Server returned an unexpected response")
}

async fn download_mask(
    client: &reqwest::Client,
    server: &str,
    segmented: &SegmentResponse,
    mask_path: &Path,
) -> Result<()> {
    let response = client
        .get(format!("{server}/mask/{}", segmented.image_id))
        .send()
        .await?
        .error_for_status()?;
    let bytes = response.bytes().await?;

    if let Some(parent) = mask_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(mask_path, &bytes)
        .await
        .with_context(|| format!("Failed to write mask: {}", mask_path.display()))?;
    info!("Mask saved to {}", mask_path.display());
    Ok(())
}

fn mime_for(path: &Path) -> &'static str {
    ImageFormat::from_path(path)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream")
}
