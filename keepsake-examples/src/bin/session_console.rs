//! # Session Console
//!
//! An interactive terminal client for the session controller.
//!
//! The identity source is picked from the environment (see `keepsake::config`):
//! - `KEEPSAKE_AUTH_PROVIDER=password` (default): an in-process account directory. Create an
//!   account with `register`, then `login` asks for email and password on stdin.
//! - `KEEPSAKE_AUTH_PROVIDER=federated`: `login` prints the authorization URL; sign in with a
//!   browser and paste the URL you were redirected to.
//!
//! Every session change and warning is printed as it is published.
//!
//! Run with `RUST_LOG=debug cargo run --bin session_console` to see the library logs.

use async_trait::async_trait;
use keepsake::config::{AuthBackend, KeepsakeConfig};
use keepsake_core::{AuthError, IdentityProvider};
use keepsake_flow::{
    CredentialsPrompt, EmailPassword, PasswordDirectory, PasswordProvider, Session,
    SessionController, SessionState,
};
use keepsake_memories::{Conversation, HttpChatBackend, InMemoryRepository, MemoryJournal, MemoryObjectStore};
use keepsake_oidc::{AuthorizationPrompt, CallbackParams, FederatedProvider};
use keepsake_session::MemoryProfileStore;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

type Input = Arc<Mutex<Lines<BufReader<Stdin>>>>;

async fn read_line(input: &Input, prompt: &str) -> Option<String> {
    print!("{prompt}");
    std::io::stdout().flush().ok();
    match input.lock().await.next_line().await {
        Ok(Some(line)) => Some(line.trim().to_string()),
        _ => None,
    }
}

/// Asks for email and password on stdin. An empty email cancels the login.
struct StdinCredentials {
    input: Input,
}

#[async_trait]
impl CredentialsPrompt for StdinCredentials {
    type Credentials = EmailPassword;

    async fn request_credentials(&self) -> Result<EmailPassword, AuthError> {
        let email = read_line(&self.input, "email: ")
            .await
            .filter(|e| !e.is_empty())
            .ok_or(AuthError::Cancelled)?;
        let password = read_line(&self.input, "password: ")
            .await
            .ok_or(AuthError::Cancelled)?;
        Ok(EmailPassword::new(email, password))
    }
}

/// Prints the authorization URL and waits for the pasted redirect URL.
struct PasteRedirect {
    input: Input,
}

#[async_trait]
impl AuthorizationPrompt for PasteRedirect {
    async fn authorize(&self, authorization_url: &str) -> Result<CallbackParams, AuthError> {
        println!("Open this URL in a browser and sign in:\n\n  {authorization_url}\n");
        let redirect = read_line(&self.input, "redirect URL (empty to cancel): ")
            .await
            .filter(|r| !r.is_empty())
            .ok_or(AuthError::Cancelled)?;
        CallbackParams::from_redirect(&redirect)
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login,
    Logout,
    Refresh,
    Whoami,
    Register {
        email: String,
        password: String,
        name: Option<String>,
    },
    Remember {
        label: String,
        path: String,
    },
    Gallery,
    Chat(String),
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match word {
            "login" => Ok(Self::Login),
            "logout" => Ok(Self::Logout),
            "refresh" => Ok(Self::Refresh),
            "whoami" => Ok(Self::Whoami),
            "gallery" => Ok(Self::Gallery),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            "register" => {
                let mut parts = rest.splitn(3, ' ');
                match (parts.next(), parts.next()) {
                    (Some(email), Some(password)) if !email.is_empty() => Ok(Self::Register {
                        email: email.to_string(),
                        password: password.to_string(),
                        name: parts.next().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()),
                    }),
                    _ => Err("usage: register <email> <password> [name]".to_string()),
                }
            }
            "remember" => match rest.rsplit_once(' ') {
                Some((label, path)) if !label.trim().is_empty() => Ok(Self::Remember {
                    label: label.trim().to_string(),
                    path: path.to_string(),
                }),
                _ => Err("usage: remember <label> <image path>".to_string()),
            },
            "chat" if !rest.is_empty() => Ok(Self::Chat(rest.to_string())),
            "chat" => Err("usage: chat <message>".to_string()),
            "" => Ok(Self::Help),
            other => Err(format!("unknown command: {other} (try `help`)")),
        }
    }
}

const HELP: &str = "commands: login, logout, refresh, whoami, register <email> <password> [name], \
remember <label> <image path>, gallery, chat <message>, quit";

fn describe(session: &Session) -> String {
    match session.state() {
        SessionState::SignedOut => "signed out".to_string(),
        SessionState::Authenticating => "signing in...".to_string(),
        SessionState::Failed(error) => format!("login failed: {error}"),
        SessionState::Authenticated(user) => {
            let name = user
                .profile
                .display_name()
                .unwrap_or(user.identity.external_id.as_str());
            format!("signed in as {name} ({})", user.identity.provider_id)
        }
    }
}

fn content_type_for(path: &str) -> &'static str {
    match path.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("keepsake=info,keepsake_flow=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = KeepsakeConfig::from_env()?;
    let input: Input = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));

    let mut directory = None;
    let provider: Arc<dyn IdentityProvider> = match &config.auth {
        AuthBackend::Password => {
            let accounts = Arc::new(PasswordDirectory::new());
            directory = Some(accounts.clone());
            Arc::new(PasswordProvider::new(
                accounts,
                StdinCredentials {
                    input: input.clone(),
                },
            ))
        }
        AuthBackend::Federated(settings) => Arc::new(FederatedProvider::new(
            settings.to_federated_config(),
            PasteRedirect {
                input: input.clone(),
            },
        )),
    };

    let controller = SessionController::builder()
        .shared_provider(provider)
        .profile_store(MemoryProfileStore::new())
        .build();
    let journal = MemoryJournal::new(
        controller.clone(),
        MemoryObjectStore::new(),
        InMemoryRepository::new(),
    );
    let mut conversation = Conversation::new(HttpChatBackend::new(&config.chat_url));

    let _changes = controller.subscribe(|session| println!("[session] {}", describe(session)));
    let _warnings = controller.subscribe_warnings(|warning| println!("[warning] {warning}"));

    println!("{HELP}");
    while let Some(line) = read_line(&input, "> ").await {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };

        match command {
            Command::Login => {
                if let Err(error) = controller.login().await {
                    println!("{error}");
                }
            }
            Command::Logout => controller.logout(),
            Command::Refresh => {
                if let Err(error) = controller.refresh().await {
                    println!("{error}");
                }
            }
            Command::Whoami => {
                let session = controller.current_session();
                println!("{}", describe(&session));
                if let Some(profile) = session.profile() {
                    println!("{profile:#?}");
                }
            }
            Command::Register {
                email,
                password,
                name,
            } => match &directory {
                Some(accounts) => match accounts.register(&email, &password, name.as_deref()).await {
                    Ok(identity) => println!("registered {}", identity.external_id),
                    Err(error) => println!("{error}"),
                },
                None => println!("registration is only available with the password provider"),
            },
            Command::Remember { label, path } => match tokio::fs::read(&path).await {
                Ok(bytes) => match journal.capture(&label, bytes, content_type_for(&path)).await {
                    Ok(record) => println!("saved {} as {}", record.label, record.image_url),
                    Err(error) => println!("{error}"),
                },
                Err(error) => println!("cannot read {path}: {error}"),
            },
            Command::Gallery => match journal.gallery().await {
                Ok(records) if records.is_empty() => println!("no memories yet"),
                Ok(records) => {
                    for record in records {
                        println!("{}  {}  {}", record.created_at.format("%Y-%m-%d %H:%M"), record.id, record.label);
                    }
                }
                Err(error) => println!("{error}"),
            },
            Command::Chat(message) => match conversation.send(&message).await {
                Ok(reply) => println!("assistant: {}", reply.content),
                Err(error) => println!("assistant unavailable: {error}"),
            },
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    controller.logout();
    Ok(())
}
