//! Stripestore CLI - admin client for the gateway API

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use stripestore_api::{
    DeleteFileResponse, ErrorBody, FileListResponse, RaidStatusResponse, UploadResponse,
    HDR_FILE_NAME,
};
use stripestore_common::FileRecord;

#[derive(Parser)]
#[command(name = "stripestore")]
#[command(about = "Stripestore cluster admin client")]
#[command(version)]
struct Cli {
    /// Gateway base URL
    #[arg(long, default_value = "http://127.0.0.1:7000", env = "STRIPESTORE_GATEWAY")]
    gateway: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a PDF
    Upload {
        /// Path to the file
        path: PathBuf,
        /// Name to store it under (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Download a file to disk
    Download {
        /// Stored file name
        name: String,
        /// Output path (defaults to the stored name)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete a stored file
    Delete { name: String },
    /// List stored files
    List,
    /// Search file names
    Search { query: String },
    /// Show a file's metadata record
    Info { name: String },
    /// Show cluster status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let gateway = cli.gateway.trim_end_matches('/').to_string();
    let http = reqwest::Client::new();

    match cli.command {
        Command::Upload { path, name } => {
            let data = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let name = name.unwrap_or_else(|| {
                path.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
            let resp = http
                .post(format!("{gateway}/v1/files"))
                .header(HDR_FILE_NAME, name.as_str())
                .header(reqwest::header::CONTENT_TYPE, "application/pdf")
                .body(data)
                .send()
                .await?;
            let upload: UploadResponse = parse(resp).await?;
            println!(
                "stored {name} as {} ({} blocks on nodes {:?})",
                upload.file_id, upload.blocks_created, upload.nodes_used
            );
        }
        Command::Download { name, out } => {
            let resp = http
                .get(format!("{gateway}/v1/files/{name}"))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(api_error(resp).await);
            }
            let bytes = resp.bytes().await?;
            let out = out.unwrap_or_else(|| PathBuf::from(&name));
            std::fs::write(&out, &bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("wrote {} bytes to {}", bytes.len(), out.display());
        }
        Command::Delete { name } => {
            let resp = http
                .delete(format!("{gateway}/v1/files/{name}"))
                .send()
                .await?;
            let deleted: DeleteFileResponse = parse(resp).await?;
            println!("deleted {name} ({} blocks removed)", deleted.blocks_deleted);
        }
        Command::List => {
            let resp = http.get(format!("{gateway}/v1/files")).send().await?;
            let listing: FileListResponse = parse(resp).await?;
            print_listing(&listing);
        }
        Command::Search { query } => {
            let resp = http
                .get(format!("{gateway}/v1/files/search"))
                .query(&[("query", &query)])
                .send()
                .await?;
            let listing: FileListResponse = parse(resp).await?;
            print_listing(&listing);
        }
        Command::Info { name } => {
            let resp = http
                .get(format!("{gateway}/v1/files/{name}/info"))
                .send()
                .await?;
            let record: FileRecord = parse(resp).await?;
            println!("{name}: {} bytes, {} stripes", record.size, record.stripe_count());
            for block in &record.blocks {
                println!(
                    "  stripe {} pos {} {} node {} ({} bytes)",
                    block.stripe_index,
                    block.position,
                    if block.is_parity { "parity" } else { "data  " },
                    block.node_id,
                    block.size
                );
            }
        }
        Command::Status => {
            let resp = http.get(format!("{gateway}/v1/status/raid")).send().await?;
            let status: RaidStatusResponse = parse(resp).await?;
            println!(
                "cluster {:?}: {}/{} nodes online, {} files, {} bytes",
                status.status,
                status.nodes_online,
                status.nodes_total,
                status.files_stored,
                status.bytes_stored
            );
            for node in &status.nodes {
                println!(
                    "  node {} {} {} (capacity: {} bytes, errors: {})",
                    node.node_id, node.endpoint, node.status, node.capacity, node.error_count
                );
            }
        }
    }
    Ok(())
}

fn print_listing(listing: &FileListResponse) {
    for file in &listing.files {
        println!(
            "{}\t{} bytes\t{} stripes\t{}",
            file.file_name, file.size, file.stripe_count, file.uploaded_at
        );
    }
    println!(
        "{} files, {} bytes total",
        listing.total_count, listing.total_size
    );
}

async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    if !resp.status().is_success() {
        return Err(api_error(resp).await);
    }
    Ok(resp.json::<T>().await?)
}

async fn api_error(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(body) => anyhow!("{status} ({}): {}", body.code, body.error),
        Err(_) => anyhow!("request failed with status {status}"),
    }
}
