mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    geoloop_core::config::load_dotenv();
    let mut config = geoloop_core::Config::from_env();
    if let Some(provider) = &args.provider {
        config.llm = config.llm.with_provider(provider);
    }

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Query {
            query,
            context,
            system_prompt,
            template,
            json,
        } => {
            let context = commands::build_context(&context);
            commands::query(&config, &query, context, system_prompt, template, json).await
        }
        Command::Tools { json } => commands::tools(&config, json).await,
        Command::Health { deep } => commands::health(&config, deep).await,
        Command::Batch {
            input,
            output,
            batch_size,
        } => commands::batch(&config, &input, &output, batch_size).await,
        Command::TestProvider { name } => commands::test_provider(&config, name.as_deref()).await,
    }
}
