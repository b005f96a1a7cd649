use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use homedir::my_home;
use tracing_subscriber::EnvFilter;

use digest_search::config::Config;
use digest_search::index::SearchResult;
use digest_search::lifecycle::IndexLifecycle;
use digest_search::search::SearchService;
use digest_search::web;

mod cli;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(args))
}

fn default_base_path() -> anyhow::Result<PathBuf> {
    let home = my_home()
        .map_err(|err| anyhow::anyhow!("could not determine home directory: {err:?}"))?
        .context("home directory path is empty")?;
    Ok(home.join(".local/share/digest-search"))
}

async fn run(args: cli::Args) -> anyhow::Result<()> {
    let base_path = match args.base_path {
        Some(path) => path,
        None => default_base_path()?,
    };
    tokio::fs::create_dir_all(&base_path)
        .await
        .with_context(|| format!("failed to create {base_path:?}"))?;

    let config = Config::load_with(&base_path)
        .await
        .with_context(|| format!("failed to load config from {base_path:?}"))?;

    let lifecycle = Arc::new(IndexLifecycle::new(
        config.index_settings(),
        config.build_storage()?,
        config.build_embedding_provider(),
    ));
    let service = Arc::new(
        SearchService::new(lifecycle, config.build_record_store())
            .with_default_limit(config.default_limit),
    );

    match args.command {
        cli::Command::Search { query, limit, json } => {
            service.initialize().await;
            let results = service.search(&query, limit).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else {
                print_results(&results);
            }
        }

        cli::Command::Rebuild {} => {
            let count = service.rebuild_index().await?;
            println!("{count} records indexed");
        }

        cli::Command::Stats {} => {
            service.initialize().await;
            println!("{}", serde_json::to_string_pretty(&service.stats().await)?);
        }

        cli::Command::Daemon { listen } => {
            service.initialize().await;
            web::serve(service, &listen)
                .await
                .with_context(|| format!("daemon on {listen} failed"))?;
        }
    }

    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("no results");
        return;
    }

    for result in results {
        let record = &result.record;
        if record.category.is_empty() {
            println!("{:>7.3}  {}", result.score, record.title);
        } else {
            println!("{:>7.3}  {} [{}]", result.score, record.title, record.category);
        }
        println!("         {}", record.id);
    }
}
