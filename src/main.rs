//! Micro Host CLI
//!
//! Loads one micro app into a `<micro-app>` element of an empty host
//! document, prints the mounted markup to stdout, then unmounts it.
//!
//!   micro-host <url> [--name app] [--config host.toml] [--destroy]
//!
//! Console output of the app's scripts and lifecycle logs go to stderr
//! (filter with RUST_LOG, e.g. `RUST_LOG=micro_host=debug`).

use anyhow::{anyhow, Result};
use clap::Parser;
use kuchikiki::NodeRef;
use micro_host::{dom, AppStatus, HostConfig, MicroAppElement, MicroHost, TAG_NAME};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "micro-host", about = "Mount a micro frontend headlessly and print its markup")]
struct Args {
    /// URL of the micro app's HTML document
    url: String,

    /// Name of the app instance
    #[arg(long, default_value = "app")]
    name: String,

    /// TOML file with host configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Destroy the instance on unmount instead of only deactivating it
    #[arg(long)]
    destroy: bool,
}

/// An empty host page whose body holds one `<micro-app>` element.
fn host_document(args: &Args) -> Result<NodeRef> {
    let document = dom::parse_document("<!DOCTYPE html><html><head></head><body></body></html>");
    let body = dom::find_element(&document, "body").ok_or_else(|| anyhow!("host document has no body"))?;

    let element = dom::new_element(TAG_NAME);
    dom::set_attribute(&element, "name", &args.name);
    dom::set_attribute(&element, "url", &args.url);
    if args.destroy {
        dom::set_attribute(&element, "destroy", "");
    }
    body.append(element);
    Ok(document)
}

async fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => HostConfig::from_file(path)?,
        None => HostConfig::default(),
    };

    let host = MicroHost::with_http(config)?;
    let document = host_document(&args)?;
    let mut element = MicroAppElement::find_all(&document)
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("host document has no <{}> element", TAG_NAME))?;

    let app = element.connected(&host)?;
    app.settled().await;
    host.run_event_loop().await?;

    if let Some(error) = app.load_error() {
        return Err(anyhow!("{}", error));
    }
    if app.status() != AppStatus::Mounted {
        return Err(anyhow!("app '{}' did not mount (status: {})", app.name(), app.status()));
    }

    println!("{}", dom::inner_html(element.node()));

    element.disconnected()?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let local = tokio::task::LocalSet::new();
    local.run_until(run(args)).await
}
