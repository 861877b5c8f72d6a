//! genflow CLI: submit a generation job and follow it to completion.
//!
//! Configuration comes from the environment (a `.env` file is honored). See
//! `genflow_core::config` for the variables.

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use genflow_cli::{init_tracing, parse_params, source_from_arg};
use genflow_core::models::{GenerationRequest, MediaKind};
use genflow_core::{Config, ErrorMetadata};
use genflow_providers::{RequestParts, SigningContext};
use genflow_worker::JobService;

#[derive(Parser)]
#[command(name = "genflow", about = "Multi-provider media generation jobs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job, optionally waiting for its result (Ctrl-C stops waiting)
    Submit {
        /// Provider/model id, see `genflow providers`
        #[arg(long)]
        provider: String,
        /// image or video
        #[arg(long, default_value = "video")]
        kind: MediaKind,
        #[arg(long, default_value = "")]
        prompt: String,
        /// Source image: http(s) URL, data URI or local file
        #[arg(long)]
        source: Option<String>,
        /// Provider parameter as key=value (repeatable)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        /// Resource id that scopes staging and the submission lock
        #[arg(long)]
        resource: Option<String>,
        /// Follow the job until it finishes
        #[arg(long)]
        wait: bool,
    },
    /// List registered provider adapters
    Providers,
    /// Print Volcengine signature headers for a request
    Sign {
        #[arg(long, default_value = "POST")]
        method: String,
        #[arg(long, default_value = "/")]
        path: String,
        /// Query parameter as key=value (repeatable)
        #[arg(long = "query", value_name = "KEY=VALUE")]
        query: Vec<String>,
        #[arg(long, default_value = "")]
        body: String,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing(std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")));

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Submit {
            provider,
            kind,
            prompt,
            source,
            params,
            resource,
            wait,
        } => {
            let service = JobService::from_config(&config).await?;

            let mut request = GenerationRequest::new(kind, provider).with_prompt(prompt);
            request.parameters = parse_params(&params)?;
            if let Some(source) = source {
                request = request.with_source(source_from_arg(&source)?);
            }
            if let Some(resource) = resource {
                request = request.with_resource(resource);
            }

            let response = service.submit(request).await.map_err(|e| {
                anyhow::anyhow!("{} ({})", e, e.error_code())
            })?;
            print_json(&response)?;
            if !wait {
                return Ok(());
            }

            let job_id = response.job_id;
            let mut updates = service.subscribe(job_id).await?;
            let follow = async {
                let mut last = None;
                loop {
                    let view = updates.borrow_and_update().job.status_view();
                    if last.as_ref() != Some(&(view.status, view.progress)) {
                        tracing::info!(status = %view.status, progress = view.progress, "Job progress");
                        last = Some((view.status, view.progress));
                    }
                    if updates.changed().await.is_err() {
                        break;
                    }
                }
                std::future::pending::<()>().await
            };

            tokio::select! {
                biased;
                result = service.wait(job_id) => {
                    let view = service.get_status(job_id).await?;
                    print_json(&view)?;
                    if let Err(e) = result {
                        anyhow::bail!("{} ({})", e, e.error_code());
                    }
                }
                _ = follow => {}
                _ = tokio::signal::ctrl_c() => {
                    service.cancel(job_id).await?;
                    print_json(&service.get_status(job_id).await?)?;
                    tracing::warn!(job_id = %job_id, "Stopped waiting; the provider job keeps running");
                }
            }
        }
        Commands::Providers => {
            let service = JobService::from_config(&config).await?;
            print_json(&service.providers().await)?;
        }
        Commands::Sign {
            method,
            path,
            query,
            body,
        } => {
            let providers = &config.providers;
            let (Some(access_key), Some(secret_key)) = (
                providers.volcengine_access_key.as_deref(),
                providers.volcengine_secret_key.as_deref(),
            ) else {
                anyhow::bail!("VOLCENGINE_ACCESS_KEY and VOLCENGINE_SECRET_KEY must be set");
            };

            let pairs = query
                .iter()
                .map(|pair| {
                    pair.split_once('=')
                        .with_context(|| format!("Query '{}' must look like key=value", pair))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            let host = providers
                .volcengine_base_url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/');

            let signer = SigningContext::new(
                access_key,
                secret_key,
                providers.volcengine_region.clone(),
                providers.volcengine_service.clone(),
            );
            let headers = signer.sign(
                &RequestParts {
                    method: &method,
                    uri: &path,
                    query: &pairs,
                    host,
                    content_type: "application/json",
                    body: body.as_bytes(),
                },
                Utc::now(),
            )?;

            print_json(&json!({
                "Content-Type": headers.content_type,
                "Host": headers.host,
                "X-Content-Sha256": headers.x_content_sha256,
                "X-Date": headers.x_date,
                "Authorization": headers.authorization,
            }))?;
        }
    }

    Ok(())
}
