use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use atmos_agent::Orchestrator;
use atmos_core::Config;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

/// Ask about the weather anywhere, in plain language.
#[derive(Debug, Parser)]
#[command(name = "atmos", version, about)]
struct Cli {
    /// User the conversation belongs to
    #[arg(long, env = "ATMOS_USER", default_value = "default-user")]
    user: String,

    /// Conversation id; follow-up questions reuse its last location
    #[arg(long, env = "ATMOS_SESSION", default_value = "default-session")]
    session: String,

    /// Config file (defaults to <config dir>/atmos/config.toml)
    #[arg(long, env = "ATMOS_CONFIG")]
    config: Option<PathBuf>,

    /// Answer one question and exit; without it, read questions from stdin
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (config, validation) = Config::load_validated(cli.config.as_deref())?;
    atmos_core::init(&config.logging.level)?;
    for warning in &validation.warnings {
        tracing::warn!("Config warning: {}", warning);
    }

    let orchestrator = Orchestrator::from_config(&config)?;
    tracing::info!(user_id = %cli.user, session_id = %cli.session, "Atmos started");

    if !cli.query.is_empty() {
        let query = cli.query.join(" ");
        return Ok(match orchestrator.answer(&cli.user, &cli.session, &query).await {
            Ok(reply) => {
                println!("{}", reply);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}", e.user_message());
                ExitCode::FAILURE
            }
        });
    }

    let stdin = BufReader::new(tokio::io::stdin());
    interactive(&orchestrator, &cli.user, &cli.session, stdin, &mut io::stdout()).await?;
    Ok(ExitCode::SUCCESS)
}

/// One question per line until EOF or `quit`.
async fn interactive<R, W>(
    orchestrator: &Orchestrator,
    user: &str,
    session: &str,
    input: R,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();

    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "/clear" => {
                orchestrator.clear_session(user, session);
                writeln!(out, "Session cleared.")?;
                continue;
            }
            _ => {}
        }

        match orchestrator.answer(user, session, line).await {
            Ok(reply) => writeln!(out, "{}", reply)?,
            Err(e) => writeln!(out, "{}", e.user_message())?,
        }
    }

    tracing::info!("Atmos shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_interactive_handles_commands_until_quit() {
        let orchestrator = Orchestrator::from_config(&Config::default()).unwrap();
        let input: &[u8] = b"\nHow about now?\n/clear\nquit\nWeather in Berlin\n";
        let mut out = Vec::new();

        interactive(&orchestrator, "u1", "s1", input, &mut out)
            .await
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Please tell me which city you mean."), "{}", text);
        assert!(text.contains("Session cleared."));
        // Nothing after `quit` is answered
        assert_eq!(text.matches("> ").count(), 4);
        assert_eq!(orchestrator.session_count(), 0);
    }

    #[tokio::test]
    async fn test_interactive_stops_at_end_of_input() {
        let orchestrator = Orchestrator::from_config(&Config::default()).unwrap();
        let input: &[u8] = b"";
        let mut out = Vec::new();

        interactive(&orchestrator, "u1", "s1", input, &mut out)
            .await
            .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "> ");
    }
}
