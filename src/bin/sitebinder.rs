//! sitebinder CLI
//!
//! Publishes a local tree into a directory-mirrored bucket, previews the
//! sync plan, or prints the access policy a binding would write.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use sitebinder::core::backend::{DirCdn, DirStorage};
use sitebinder::core::binder::build_grant_policy;
use sitebinder::core::validation::DistributionId;
use sitebinder::{ErrorRoute, Publisher, PublisherConfig, StorageTarget};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sitebinder")]
#[command(about = "Publish a static site and bind read access to one CDN distribution")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload changed assets, bind the access policy and invalidate
    Publish(PublishArgs),
    /// Show the sync plan without writing anything
    Plan(TargetArgs),
    /// Print the access policy for a distribution
    Policy(PolicyArgs),
}

#[derive(Args, Debug)]
struct TargetArgs {
    /// Local site root
    #[arg(short, long)]
    root: PathBuf,

    /// Bucket mirror directory
    #[arg(short, long)]
    bucket_dir: PathBuf,

    /// Storage resource identifier (e.g. arn:aws:s3:::my-site)
    #[arg(long)]
    resource: String,

    /// Key prefix inside the resource
    #[arg(long, default_value = "")]
    prefix: String,
}

#[derive(Args, Debug)]
struct PublishArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Distribution ARN to bind (defaults to the CDN's own)
    #[arg(short, long)]
    distribution: Option<String>,

    /// Distribution ARN reported by the directory CDN stand-in
    #[arg(long, default_value = "arn:aws:cloudfront::000000000000:distribution/ELOCAL")]
    cdn_distribution: String,

    /// Error route as STATUS=DOCUMENT[:RESPONSE_STATUS], e.g. 404=error.html
    #[arg(short, long = "error-route", value_parser = parse_error_route)]
    error_routes: Vec<ErrorRoute>,

    /// Delete remote objects with no local counterpart after publishing
    #[arg(long)]
    prune: bool,
}

#[derive(Args, Debug)]
struct PolicyArgs {
    /// Storage resource identifier
    #[arg(long)]
    resource: String,

    /// Key prefix inside the resource
    #[arg(long, default_value = "")]
    prefix: String,

    /// Distribution ARN to bind
    #[arg(short, long)]
    distribution: String,
}

/// Parse `STATUS=DOCUMENT[:RESPONSE_STATUS]`
fn parse_error_route(s: &str) -> Result<ErrorRoute, String> {
    let (status, rest) = s.split_once('=').ok_or_else(|| {
        format!(
            "Invalid error route '{}'. Expected STATUS=DOCUMENT[:RESPONSE]",
            s
        )
    })?;
    let status: u16 = status
        .parse()
        .map_err(|_| format!("Invalid status code '{}'", status))?;

    let (document, response) = match rest.rsplit_once(':') {
        Some((document, response)) => {
            let response: u16 = response
                .parse()
                .map_err(|_| format!("Invalid response status '{}'", response))?;
            (document, response)
        }
        None => (rest, status),
    };
    if document.is_empty() {
        return Err(format!("Error route '{}' names no document", s));
    }

    Ok(ErrorRoute::new(status, document, response))
}

fn target(resource: &str, prefix: &str) -> anyhow::Result<StorageTarget> {
    Ok(StorageTarget::new(resource)?.with_prefix(prefix)?)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PublisherConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PublisherConfig::default(),
    };

    match cli.command {
        Command::Publish(args) => publish(config, args),
        Command::Plan(args) => plan(config, args),
        Command::Policy(args) => {
            let target = target(&args.resource, &args.prefix)?;
            let distribution = DistributionId::new(args.distribution)?;
            let policy = build_grant_policy(&config.binding, &target, &distribution);
            println!("{}", policy.to_json()?);
            Ok(())
        }
    }
}

fn publish(config: PublisherConfig, args: PublishArgs) -> anyhow::Result<()> {
    let target = target(&args.target.resource, &args.target.prefix)?;
    let storage = Arc::new(DirStorage::open(&args.target.bucket_dir)?);
    let cdn = Arc::new(DirCdn::new(&args.target.bucket_dir, args.cdn_distribution));

    let mut routes = config.error_routes.clone();
    routes.extend(args.error_routes);

    info!("Site root: {:?}", args.target.root);
    info!("Bucket mirror: {:?}", args.target.bucket_dir);

    let publisher = Publisher::with_config(storage, cdn, config)?;
    let outcome = match &args.distribution {
        Some(id) => publisher.publish(&args.target.root, &target, id, &routes),
        None => publisher.publish_current(&args.target.root, &target, &routes),
    };

    let result = match outcome {
        Ok(result) => result,
        Err(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure.result)?);
            return Err(failure.into());
        }
    };
    println!("{}", serde_json::to_string_pretty(&result)?);

    if args.prune && !result.prune_candidates.is_empty() {
        let deleted = publisher.prune(&target, &result.prune_candidates)?;
        info!("Pruned {} objects", deleted.len());
    }
    Ok(())
}

fn plan(config: PublisherConfig, args: TargetArgs) -> anyhow::Result<()> {
    let target = target(&args.resource, &args.prefix)?;
    let storage = Arc::new(DirStorage::open(&args.bucket_dir)?);
    let cdn = Arc::new(DirCdn::new(&args.bucket_dir, "ELOCAL"));
    let publisher = Publisher::with_config(storage, cdn, config)?;

    let plan = publisher.plan(&args.root, &target)?;
    for action in plan.actions() {
        println!(
            "{:<6} {}",
            format!("{:?}", action.kind()).to_lowercase(),
            target.object_key(action.asset().path())
        );
    }
    for candidate in plan.prune_candidates() {
        println!("{:<6} {}", "prune", candidate.key());
    }

    let summary = plan.summary();
    info!(
        "{} create, {} update, {} skip, {} prune candidates",
        summary.create, summary.update, summary.skip, summary.prune
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_route() {
        let route = parse_error_route("404=error.html").unwrap();
        assert_eq!(route.status, 404);
        assert_eq!(route.document, "error.html");
        assert_eq!(route.response_status, 404);

        let route = parse_error_route("403=/index.html:200").unwrap();
        assert_eq!(route.status, 403);
        assert_eq!(route.document, "/index.html");
        assert_eq!(route.response_status, 200);

        assert!(parse_error_route("404").is_err());
        assert!(parse_error_route("abc=error.html").is_err());
        assert!(parse_error_route("404=").is_err());
        assert!(parse_error_route("404=error.html:xx").is_err());
    }
}
