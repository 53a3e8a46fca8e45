//! Command-line interface parsing and dispatch.

pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::say::{run_say, SayOptions};
use crate::core::config::Config;
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "streamscribe")]
#[command(about = "Stream a reply from an OpenAI-compatible or Gemini model")]
#[command(
    long_about = "Streamscribe sends a prompt to a configured provider and prints the answer as \
it streams in. Reasoning the model emits, natively or inside <think> markers, is kept apart \
from the answer.\n\n\
Environment Variables:\n\
  OPENAI_API_KEY     API key for the built-in openai provider\n\
  GEMINI_API_KEY     API key for the built-in gemini provider\n\
  STREAMSCRIBE_LOG   Log filter directives (default: warn)"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Model to use
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Provider id to use
    #[arg(short = 'p', long, global = true, value_name = "PROVIDER")]
    pub provider: Option<String>,

    /// Append diagnostic logs to this file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a single prompt and print the reply
    Say {
        /// Request the whole answer at once instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Print reasoning to stderr as it arrives
        #[arg(long)]
        show_reasoning: bool,

        /// Prompt text
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let config = Config::load()?;

    let log_file = args.log.clone().or_else(|| config.log_file.clone());
    init_tracing(log_file.as_deref())?;

    match args.command {
        Commands::Say {
            no_stream,
            show_reasoning,
            prompt,
        } => {
            run_say(
                &config,
                SayOptions {
                    prompt: prompt.join(" "),
                    model: args.model,
                    provider: args.provider,
                    no_stream,
                    show_reasoning,
                },
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn say_collects_prompt_words_and_global_flags() {
        let args = Args::try_parse_from([
            "streamscribe",
            "say",
            "-m",
            "o3-mini",
            "--no-stream",
            "why",
            "is",
            "the",
            "sky",
            "blue",
        ])
        .expect("parse");
        assert_eq!(args.model.as_deref(), Some("o3-mini"));
        match args.command {
            Commands::Say {
                no_stream, prompt, ..
            } => {
                assert!(no_stream);
                assert_eq!(prompt.join(" "), "why is the sky blue");
            }
        }
    }

    #[test]
    fn provider_flag_is_global() {
        let args =
            Args::try_parse_from(["streamscribe", "-p", "gemini", "say", "hi"]).expect("parse");
        assert_eq!(args.provider.as_deref(), Some("gemini"));
    }
}
