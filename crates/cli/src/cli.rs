use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Answer geolocation questions with an LLM driving map tools.
#[derive(Parser, Debug)]
#[command(name = "geoloop", version, about = "LLM + MCP map tools from the command line")]
pub struct CliArgs {
    /// LLM provider to use (claude or openai); overrides LLM_PROVIDER
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Log filter when RUST_LOG is unset; overrides LOG_LEVEL
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask one question
    Query {
        query: String,

        /// Context entry as key=value (e.g. city=上海); repeatable
        #[arg(long = "context", short = 'c', value_parser = parse_key_value)]
        context: Vec<(String, String)>,

        /// System prompt override
        #[arg(long, conflicts_with = "template")]
        system_prompt: Option<String>,

        /// Named prompt template
        #[arg(long)]
        template: Option<String>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the tools the map server exposes
    Tools {
        #[arg(long)]
        json: bool,
    },

    /// Check the tool server and the LLM
    Health {
        /// Also send a probe request to the LLM
        #[arg(long)]
        deep: bool,
    },

    /// Enrich a JSON file of records with standardized addresses
    Batch {
        #[arg(long, short)]
        input: PathBuf,

        #[arg(long, short)]
        output: PathBuf,

        /// Records processed concurrently
        #[arg(long, default_value = "1")]
        batch_size: usize,
    },

    /// Probe an LLM provider (the configured one if omitted)
    TestProvider { name: Option<String> },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_with_context() {
        let args = CliArgs::try_parse_from([
            "geoloop", "query", "Where is 外滩?", "-c", "city=上海", "--context", "preferences=walking",
        ])
        .unwrap();
        match args.command {
            Command::Query { query, context, .. } => {
                assert_eq!(query, "Where is 外滩?");
                assert_eq!(
                    context,
                    vec![
                        ("city".to_string(), "上海".to_string()),
                        ("preferences".to_string(), "walking".to_string())
                    ]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_context_rejected() {
        assert!(CliArgs::try_parse_from(["geoloop", "query", "q", "-c", "nocolon"]).is_err());
        assert!(CliArgs::try_parse_from(["geoloop", "query", "q", "-c", "=v"]).is_err());
    }

    #[test]
    fn test_prompt_and_template_conflict() {
        let res = CliArgs::try_parse_from([
            "geoloop", "query", "q", "--system-prompt", "s", "--template", "default",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn test_global_provider_after_subcommand() {
        let args = CliArgs::try_parse_from(["geoloop", "test-provider", "openai", "--provider", "claude"]).unwrap();
        assert_eq!(args.provider.as_deref(), Some("claude"));
        assert!(matches!(args.command, Command::TestProvider { name: Some(ref n) } if n == "openai"));
    }

    #[test]
    fn test_batch_defaults() {
        let args = CliArgs::try_parse_from(["geoloop", "batch", "-i", "in.json", "-o", "out.json"]).unwrap();
        match args.command {
            Command::Batch { batch_size, input, .. } => {
                assert_eq!(batch_size, 1);
                assert_eq!(input, PathBuf::from("in.json"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
