use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use cataleya::net::api::{ApiClient, ApiClientError};
use cataleya::ui::chat::{ChatSession, EntryKind, Locale};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing user id; pass --user-id or set CATALEYA_USER_ID")]
    MissingUserId,
    #[error("unknown locale `{0}`; expected en or ru")]
    UnknownLocale(String),
    #[error("{0}")]
    Api(#[from] ApiClientError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "cataleya-chat", about = "Cataleya chat and token ledger client")]
struct Cli {
    #[arg(long, env = "CATALEYA_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "CATALEYA_USER_ID", global = true)]
    user_id: Option<Uuid>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive conversation. Type `/quit` to leave.
    Chat {
        #[arg(long, env = "CATALEYA_LOCALE", default_value = "en")]
        locale: String,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long)]
        username: Option<String>,
    },
    /// Print the current profile and balance.
    Balance,
    /// Add tokens to the balance.
    Credit {
        #[arg(long)]
        amount: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Print recent ledger entries, newest first.
    History {
        #[arg(long)]
        limit: Option<i64>,
    },
    /// List purchasable plans.
    Plans,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.base_url)?;

    match cli.command {
        Command::Chat { locale, system_prompt, username } => {
            let locale = Locale::parse(&locale).ok_or(CliError::UnknownLocale(locale))?;
            let user_id = cli.user_id.ok_or(CliError::MissingUserId)?;
            run_chat(&client, user_id, locale, system_prompt.as_deref(), username.as_deref()).await
        }
        Command::Balance => {
            let user_id = cli.user_id.ok_or(CliError::MissingUserId)?;
            print_json(&client.profile(user_id).await?)
        }
        Command::Credit { amount, description } => {
            let user_id = cli.user_id.ok_or(CliError::MissingUserId)?;
            print_json(&client.credit(user_id, amount, description.as_deref()).await?)
        }
        Command::History { limit } => {
            let user_id = cli.user_id.ok_or(CliError::MissingUserId)?;
            print_json(&client.transactions(user_id, limit).await?)
        }
        Command::Plans => print_json(&client.plans().await?),
    }
}

async fn run_chat(
    client: &ApiClient,
    user_id: Uuid,
    locale: Locale,
    system_prompt: Option<&str>,
    username: Option<&str>,
) -> Result<(), CliError> {
    let profile = client.ensure_profile(user_id, username).await?;
    eprintln!("balance: {} tokens", profile.token_balance);

    let mut session = match system_prompt {
        Some(prompt) => ChatSession::with_system_prompt(user_id, locale, prompt),
        None => ChatSession::new(user_id, locale),
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim() == "/quit" {
            break;
        }
        let Some(payload) = session.begin_send(&line) else {
            continue;
        };
        let result = client.chat(&payload).await;
        session.finish_send(result);

        if let Some(entry) = session.visible().last() {
            let prefix = match entry.kind {
                EntryKind::Message => "",
                EntryKind::Error => "! ",
            };
            println!("{prefix}{}", entry.content);
        }
        if let Some(balance) = session.balance() {
            eprintln!("[balance: {balance}]");
        }
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
