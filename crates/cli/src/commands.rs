//! CLI commands

use anyhow::{Context, Result, anyhow, bail};
use clap::Subcommand;
use flowtest_core::{ClientSettings, FileStorage};
use flowtest_http::client::jwt;
use flowtest_http::{
    ClientError, FlowTestClient, FlowTestClientBuilder, PageNavigator, PendingRequest, SessionState,
};
use reqwest::Method;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config;

#[derive(Subcommand)]
pub enum Commands {
    /// Log in and store the token pair
    Login {
        /// Account name
        #[arg(short, long)]
        username: String,

        /// Account password
        #[arg(short, long, env = "FLOWTEST_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show the stored session and preferences
    Status,

    /// Exchange the refresh token for a new access token
    Refresh,

    /// Ask the backend whether the stored access token is valid
    Verify,

    /// Show the authenticated user's profile
    Whoami,

    /// Send an authenticated request and print the response body
    Request {
        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// JSON request body
        #[arg(long)]
        data: Option<String>,

        /// Path relative to the backend (`projects/`, `/api/testcases/5/`) or an absolute URL
        path: String,
    },

    /// Keep the session alive with the background refresh until interrupted
    Watch,
}

impl Commands {
    pub async fn execute(self, data_dir: PathBuf, config_file: Option<PathBuf>) -> Result<()> {
        let settings = config::load_settings(config_file.as_deref(), &data_dir)?;
        let on_login_page = matches!(self, Self::Login { .. });
        let client = build_client(&settings, &data_dir, on_login_page)?;

        self.run(&client).await.map_err(explain)
    }

    async fn run(self, client: &FlowTestClient) -> Result<()> {
        match self {
            Self::Login { username, password } => login(client, &username, password).await,
            Self::Logout => {
                client.logout()?;
                println!("Logged out");
                Ok(())
            }
            Self::Status => {
                status(client);
                Ok(())
            }
            Self::Refresh => {
                client
                    .refresh_access_token()
                    .await
                    .map_err(ClientError::SessionExpired)?;
                println!("Access token refreshed");
                Ok(())
            }
            Self::Verify => verify(client).await,
            Self::Whoami => {
                let user = client.current_user().await?;
                println!("{}", serde_json::to_string_pretty(&user)?);
                Ok(())
            }
            Self::Request { method, data, path } => request(client, &method, data, &path).await,
            Self::Watch => watch(client).await,
        }
    }
}

fn build_client(
    settings: &ClientSettings,
    data_dir: &Path,
    on_login_page: bool,
) -> Result<FlowTestClient> {
    let storage = FileStorage::open(config::session_path(data_dir))
        .context("Failed to open session storage")?;
    let navigator = if on_login_page {
        PageNavigator::at_login(settings.login_page.clone())
    } else {
        PageNavigator::new(settings.login_page.clone(), "/")
    };

    FlowTestClientBuilder::from_settings(settings)
        .storage(Arc::new(storage))
        .navigator(Arc::new(navigator))
        .build()
        .context("Failed to create client")
}

/// Turn session-ending errors into an instruction to log in again
fn explain(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<ClientError>() {
        Some(client_err) if client_err.is_auth_expired() => {
            anyhow!("{client_err}. Run `flowtest login` to start a new session")
        }
        _ => err,
    }
}

async fn login(client: &FlowTestClient, username: &str, password: Option<String>) -> Result<()> {
    let Some(password) = password else {
        bail!("password required: pass --password or set FLOWTEST_PASSWORD");
    };

    client.login(username, &password).await?;
    println!("Logged in as {username}");
    Ok(())
}

fn status(client: &FlowTestClient) {
    let session = client.session();
    println!("Backend:  {}", client.base_url());

    match session.state() {
        SessionState::Anonymous => println!("Session:  anonymous"),
        SessionState::Authenticated => {
            let expiry = session.access_token().and_then(|token| {
                jwt::expires_at(&token).map(|exp| (exp, jwt::is_expired(&token) == Some(true)))
            });
            match expiry {
                Some((exp, true)) => {
                    println!("Session:  authenticated (access token expired at {exp})");
                }
                Some((exp, false)) => {
                    println!("Session:  authenticated (access token expires at {exp})");
                }
                None => println!("Session:  authenticated"),
            }
        }
    }

    if let Some(user) = session.user() {
        if let Some(name) = user.get("username").and_then(|n| n.as_str()) {
            println!("User:     {name}");
        }
    }
    if let Some(theme) = session.theme() {
        println!("Theme:    {theme}");
    }
    if let Some(language) = session.language() {
        println!("Language: {language}");
    }
    if let Some(project) = session.selected_project() {
        println!("Project:  {project}");
    }
}

async fn verify(client: &FlowTestClient) -> Result<()> {
    let Some(token) = client.session().access_token() else {
        bail!(ClientError::NotAuthenticated);
    };

    if client.verify(&token).await? {
        println!("Access token is valid");
    } else {
        println!("Access token is invalid or expired");
    }
    Ok(())
}

async fn request(
    client: &FlowTestClient,
    method: &str,
    data: Option<String>,
    path: &str,
) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {method}"))?;

    let mut pending = PendingRequest::new(method, path);
    if let Some(data) = data {
        let body: serde_json::Value =
            serde_json::from_str(&data).context("--data must be valid JSON")?;
        pending = pending.json(&body)?;
    }

    let response = client.send(pending).await?;
    let status = response.status();
    let body = response.text().await?;

    eprintln!("HTTP {status}");
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{body}"),
    }

    if !status.is_success() {
        bail!("request failed with status {status}");
    }
    Ok(())
}

async fn watch(client: &FlowTestClient) -> Result<()> {
    if client.session().state() == SessionState::Anonymous {
        bail!(ClientError::NotAuthenticated);
    }

    client.start_background_refresh();
    info!("Watching session");
    println!("Keeping the session alive, press Ctrl-C to stop");

    let mut check = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                client.stop_background_refresh();
                println!("Stopped");
                return Ok(());
            }
            _ = check.tick() => {
                if client.session().state() == SessionState::Anonymous {
                    client.stop_background_refresh();
                    bail!(ClientError::NotAuthenticated);
                }
            }
        }
    }
}
