//! furlist-auth - atproto PDS login from the terminal
//!
#![doc = "furlist-auth - atproto PDS login from the terminal"]
#![doc = "Main entry point for the furlist-auth application."]

use anyhow::{Context, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use furlist_auth::auth::loopback;
use furlist_auth::cli::{Cli, Commands};
use furlist_auth::config::{is_loopback, Config};
use furlist_auth::Client;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // The builder validates the configuration
    let client = Client::builder(config).build()?;
    client.hydrate().await;

    match cli.command {
        Commands::Login { host } => {
            let host = host.unwrap_or_default();
            if host.is_empty() {
                tracing::debug!("No host given, using the default issuer");
            }

            // The listener must exist before the browser is sent off.
            let listener = if is_loopback(client.redirect_uri()) {
                Some(loopback::bind(client.redirect_uri()).await?)
            } else {
                None
            };

            let request = client.login(&host).await?;
            tracing::info!("Waiting for authorization at {}", request.issuer);

            match listener {
                Some(listener) => {
                    let callback = tokio::select! {
                        result = loopback::accept_callback(&listener, client.redirect_uri()) => {
                            result?
                        }
                        _ = tokio::signal::ctrl_c() => {
                            client.navigate_away();
                            anyhow::bail!("login interrupted");
                        }
                    };
                    let session = client.complete_login(&callback).await?;
                    println!("Logged in as {} ({})", session.handle, session.did);
                }
                None => {
                    println!(
                        "After approving, run:\n  furlist-auth callback '<redirect URL>'"
                    );
                }
            }
            Ok(())
        }
        Commands::Callback { url } => {
            let url = url::Url::parse(&url).context("callback URL is not a valid URL")?;
            let session = client.complete_login(&url).await?;
            println!("Logged in as {} ({})", session.handle, session.did);
            Ok(())
        }
        Commands::Logout => {
            if client.logout().await {
                println!("Logged out");
            } else {
                println!("Not logged in");
            }
            Ok(())
        }
        Commands::Status => {
            print_status(&client)?;
            Ok(())
        }
    }
}

fn print_status(client: &Client) -> Result<()> {
    match client.current() {
        Some(session) => {
            println!("Logged in as {}", session.handle);
            println!("  DID:     {}", session.did);
            println!("  PDS:     {}", session.pds_endpoint);
            match session.expires_at {
                Some(at) if session.is_expired() => println!("  Expired: {at}"),
                Some(at) => println!("  Expires: {at}"),
                None => println!("  Expires: unknown"),
            }
            if let Some(avatar) = &session.avatar {
                println!("  Avatar:  {avatar}");
            }
        }
        None => println!("Not logged in"),
    }

    match client.host_preference()? {
        Some(host) => println!("Preferred host: {host}"),
        None => println!("Preferred host: (default)"),
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "furlist_auth=debug"
    } else {
        "furlist_auth=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
