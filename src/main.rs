#![cfg(feature = "cli")]
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use futures::future::join_all;

use rsfairplay::challenge::ProcessChallengeBuilder;
use rsfairplay::config::{CertificateMethod, SessionConfig};
use rsfairplay::source::CertificateSource;
use rsfairplay::transport::Transport;
use rsfairplay::utils::write_file;
use rsfairplay::{ContentId, DecryptionKeyResponse, LicenseFormat, LicenseSessionManager};

use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "rsfairplay", version, disable_version_flag = true, about = "rsfairplay CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Request keys for one or more content identifiers.
    ///
    /// Identifiers may be `skd://` key URIs or bare ids. The challenge is
    /// built by an external program that reads the certificate on stdin,
    /// takes the content id as its last argument and prints the SPC.
    License {
        /// Content identifiers or skd:// URIs.
        #[arg(required = true)]
        content: Vec<String>,
        #[arg(short = 'b', long = "builder")]
        builder: String,
        #[arg(long = "builder-arg")]
        builder_args: Vec<String>,
        /// YAML session config; flags below override it.
        #[arg(short = 'c', long = "config")]
        config: Option<PathBuf>,
        #[arg(long = "certificate")]
        certificate: Option<String>,
        #[arg(long = "license")]
        license: Option<String>,
        #[arg(short = 'f', long = "format")]
        format: Option<LicenseFormat>,
        /// Per-stage timeout in milliseconds.
        #[arg(short = 't', long = "timeout")]
        timeout: Option<u64>,
        /// Extra license request header, `Name: value`.
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,
        #[arg(long = "append-content-id", action = ArgAction::SetTrue)]
        append_content_id: bool,
        /// Directory to write each key to as `<content id>.ckc`.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Fetch the application certificate and save it.
    Certificate {
        url: String,
        #[arg(short = 'o', long = "output")]
        output: PathBuf,
        #[arg(long = "post", action = ArgAction::SetTrue)]
        post: bool,
        #[arg(short = 't', long = "timeout")]
        timeout: Option<u64>,
    },
    /// Parse a saved license response.
    Inspect {
        path: PathBuf,
        #[arg(short = 'f', long = "format", default_value = "raw")]
        format: LicenseFormat,
        /// Content identifier used to select ClearKey entries.
        #[arg(short = 'c', long = "content", default_value = "")]
        content: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .init();

    info!("rsfairplay version {}", env!("CARGO_PKG_VERSION"));

    if cli.version {
        return Ok(());
    }

    match cli.command {
        Some(Commands::License {
            content,
            builder,
            builder_args,
            config,
            certificate,
            license,
            format,
            timeout,
            headers,
            append_content_id,
            output,
        }) => {
            let config = build_config(
                config.as_deref(),
                certificate,
                license,
                format,
                timeout,
                &headers,
                append_content_id,
            )?;
            let mut builder = resolve_builder(&builder)?;
            for arg in builder_args {
                builder = builder.arg(arg);
            }
            block_on(run_license(config, builder, content, output))
        }
        Some(Commands::Certificate {
            url,
            output,
            post,
            timeout,
        }) => block_on(run_certificate(&url, &output, post, timeout)),
        Some(Commands::Inspect {
            path,
            format,
            content,
        }) => run_inspect(&path, format, &content),
        None => Ok(()),
    }
}

fn block_on<F: std::future::Future<Output = anyhow::Result<()>>>(fut: F) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime")?;
    runtime.block_on(fut)
}

fn build_config(
    path: Option<&Path>,
    certificate: Option<String>,
    license: Option<String>,
    format: Option<LicenseFormat>,
    timeout: Option<u64>,
    headers: &[String],
    append_content_id: bool,
) -> anyhow::Result<SessionConfig> {
    let mut config = match path {
        Some(path) => SessionConfig::from_path(path)?,
        None => SessionConfig::new(
            certificate.clone().context("--certificate is required without --config")?,
            license.clone().context("--license is required without --config")?,
        ),
    };
    if let Some(certificate) = certificate {
        config.certificate_url = certificate;
    }
    if let Some(license) = license {
        config.license_url = license;
    }
    if let Some(format) = format {
        config.license_format = format;
    }
    if let Some(timeout) = timeout {
        config.timeout_ms = timeout;
    }
    if append_content_id {
        config.append_content_id = true;
    }
    for header in headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("Header {:?} is not `Name: value`", header))?;
        config.headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(config)
}

fn resolve_builder(program: &str) -> anyhow::Result<ProcessChallengeBuilder> {
    let builder = ProcessChallengeBuilder::from_path(program)?;
    info!("[+] Using challenge program {:?}", builder);
    Ok(builder)
}

async fn run_license(
    config: SessionConfig,
    builder: ProcessChallengeBuilder,
    content: Vec<String>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let manager = LicenseSessionManager::from_config(config, builder)?;
    info!(
        "[+] Session: certificate {} license {}",
        manager.certificate_source(),
        manager.license_source()
    );

    let ids = content
        .iter()
        .map(|c| c.parse::<ContentId>())
        .collect::<Result<Vec<_>, _>>()?;

    let results = join_all(ids.iter().map(|id| manager.handle_key_request(id.clone()))).await;

    let mut failures = 0;
    for (id, result) in ids.iter().zip(results) {
        match result {
            Ok(response) => {
                info!("[{}] {} {}", id, hex::encode(&response.key), describe_lease(&response));
                if let Some(dir) = &output {
                    let path = dir.join(format!("{}.ckc", sanitize(id.as_str())));
                    write_file(&path, &response.key)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("[{}] Saved to {}", id, path.display());
                }
            }
            Err(e) => {
                failures += 1;
                error!("[{}] {}", id, e);
            }
        }
    }
    info!("[+] Certificate fetched {} time(s)", manager.certificate_fetches());

    if failures > 0 {
        anyhow::bail!("{} of {} key request(s) failed", failures, ids.len());
    }
    Ok(())
}

async fn run_certificate(
    url: &str,
    output: &Path,
    post: bool,
    timeout: Option<u64>,
) -> anyhow::Result<()> {
    let source = CertificateSource::parse(url)?;
    // The license locator is unused for a certificate-only fetch.
    let mut config = SessionConfig::new(url, url);
    if post {
        config = config.with_certificate_method(CertificateMethod::Post);
    }
    if let Some(timeout) = timeout {
        config = config.with_timeout(Duration::from_millis(timeout));
    }

    let transport = Transport::new(&config)?;
    let certificate = transport.fetch_certificate(&source).await?;
    write_file(output, &certificate)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        "[+] Saved {} byte certificate to {}",
        certificate.len(),
        output.display()
    );
    Ok(())
}

fn run_inspect(path: &Path, format: LicenseFormat, content: &str) -> anyhow::Result<()> {
    let body = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let response = format.parse(&body, &ContentId::new(content))?;
    info!("key: {}", hex::encode(&response.key));
    info!("{}", describe_lease(&response));
    Ok(())
}

fn describe_lease(response: &DecryptionKeyResponse) -> String {
    match response.lease {
        None => "no lease".to_string(),
        Some(lease) => lease_with_expiry(lease),
    }
}

#[cfg(feature = "chrono")]
fn lease_with_expiry(lease: Duration) -> String {
    match chrono::Duration::from_std(lease) {
        Ok(delta) => format!(
            "lease {}s (expires {})",
            lease.as_secs(),
            (chrono::Local::now() + delta).format("%Y-%m-%d %H:%M:%S")
        ),
        Err(_) => format!("lease {}s", lease.as_secs()),
    }
}

#[cfg(not(feature = "chrono"))]
fn lease_with_expiry(lease: Duration) -> String {
    format!("lease {}s", lease.as_secs())
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
