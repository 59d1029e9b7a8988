use anyhow::bail;
use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;

mod app;
mod auth;
mod blocks;
mod chat;
mod cli;
mod config;
mod document;
mod eid;
mod pages;
mod semantic;
mod storage;
mod store;
mod sync;
#[cfg(test)]
mod tests;
mod web;

use app::{App, AppFactory};
use chat::ChatMessage;

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let paths = AppFactory::get_paths()?;
    let app = AppFactory::create_app(&paths)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(app, args.command))
}

async fn run(app: App, command: cli::Command) -> anyhow::Result<()> {
    match command {
        cli::Command::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| app.config().listen.clone());
            web::start_app(app, &listen).await
        }

        cli::Command::Reindex { page } => {
            let summary = app.reindex(page).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }

        cli::Command::Search { user, query } => {
            check_user(&app, &user)?;
            let matches = app.search(&user, &query).await?;
            println!("{}", serde_json::to_string_pretty(&matches)?);
            Ok(())
        }

        cli::Command::Ask { user, message } => {
            check_user(&app, &user)?;
            let mut reply = app.chat(&user, vec![ChatMessage::user(message)]).await?;
            log::debug!("turn {}: {} matches", reply.turn_id, reply.matches.len());

            let mut stdout = tokio::io::stdout();
            while let Some(token) = reply.tokens.next().await {
                stdout.write_all(token?.as_bytes()).await?;
                stdout.flush().await?;
            }
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
            Ok(())
        }
    }
}

fn check_user(app: &App, user: &str) -> anyhow::Result<()> {
    if !app.config().users.iter().any(|u| u.id == user) {
        bail!("unknown user '{user}'");
    }
    Ok(())
}
