#![allow(missing_docs)]

//! Mentorhub admin CLI.
//!
//! One-shot subcommands over the platform database, mainly for
//! operations staff: initialise the schema, send a message, inspect an
//! inbox or a thread.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use mentorhub::authz::SqliteAuthz;
use mentorhub::config::AppConfig;
use mentorhub::db;
use mentorhub::directory::SqliteDirectory;
use mentorhub::messaging::engine::MessagingEngine;
use mentorhub::messaging::notifier::NullNotifier;
use mentorhub::messaging::recipient::parse_descriptors;
use mentorhub::messaging::ReplyMode;

#[derive(Parser)]
#[command(name = "mentorhub", about = "Mentoring platform messaging admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database and apply schema migrations.
    Init,
    /// Compose a message.
    Compose {
        /// Authoring user id.
        #[arg(long)]
        author: i64,
        /// Subject line.
        #[arg(long)]
        subject: String,
        /// Body text.
        #[arg(long)]
        body: String,
        /// Recipient tokens: user ids, `support`, `group:<name>`,
        /// `group:team:<id>`. Repeatable.
        #[arg(long = "to", required = true)]
        to: Vec<String>,
        /// Reply policy: no_replies, reply_to_sender, reply_to_all.
        #[arg(long, default_value = "reply_to_all")]
        mode: String,
        /// Route to the support inbox.
        #[arg(long)]
        support: bool,
    },
    /// Reply to a message.
    Reply {
        /// Replying user id.
        #[arg(long)]
        author: i64,
        /// Message id being replied to.
        #[arg(long)]
        parent: i64,
        /// Body text.
        #[arg(long)]
        body: String,
    },
    /// List a user's inbox threads.
    Inbox {
        /// Viewing user id.
        #[arg(long)]
        user: i64,
    },
    /// Show a thread as visible to a user.
    Show {
        /// Viewing user id.
        #[arg(long)]
        user: i64,
        /// Any message id in the thread.
        #[arg(long)]
        message: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    mentorhub::logging::init_cli();

    let config = AppConfig::load().context("failed to load configuration")?;
    let cli = Cli::parse();

    let pool = db::connect(Path::new(&config.paths.database))
        .await
        .with_context(|| format!("failed to open database {}", config.paths.database))?;
    db::apply_migrations(&pool)
        .await
        .context("failed to apply migrations")?;

    if matches!(cli.command, Command::Init) {
        println!("database ready at {}", config.paths.database);
        return Ok(());
    }

    let engine = MessagingEngine::new(
        pool.clone(),
        Arc::new(SqliteDirectory::new(pool.clone())),
        Arc::new(SqliteAuthz::new(pool.clone())),
        Arc::new(NullNotifier),
        config.messaging.clone(),
    );

    match cli.command {
        Command::Init => unreachable!("handled above"),
        Command::Compose {
            author,
            subject,
            body,
            to,
            mode,
            support,
        } => {
            let mode = ReplyMode::parse(&mode)?;
            let descriptors = parse_descriptors(&to);
            let outcome = engine
                .compose(author, &subject, &body, &descriptors, mode, support)
                .await?;
            println!(
                "sent {} message(s), {} guardian cc(s)",
                outcome.message_ids.len(),
                outcome.cc_message_ids.len()
            );
        }
        Command::Reply {
            author,
            parent,
            body,
        } => {
            let outcome = engine.reply(author, parent, &body).await?;
            println!("reply {} sent", outcome.message_id);
        }
        Command::Inbox { user } => {
            for t in engine.inbox(user).await? {
                let marker = if t.unread { "*" } else { " " };
                println!(
                    "{marker} [{}] {} (from user {}, last activity {})",
                    t.thread_id, t.subject, t.author_id, t.last_activity
                );
            }
        }
        Command::Show { user, message } => {
            for m in engine.visible_thread(user, message).await? {
                let kind = if m.is_reply() { "reply" } else { "root" };
                println!(
                    "[{kind} {}] {} — user {}: {}",
                    m.id.unwrap_or_default(),
                    m.subject,
                    m.author_id,
                    m.body
                );
            }
        }
    }
    Ok(())
}
