#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::Result;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::{env, io};
use tokio::sync::mpsc;

mod config;
mod ui;
mod utils;

use crate::{
    config::{load_config, save_config, ClientConfig},
    ui::{ChatUI, UiAction},
};
use chatterline::{ChatStore, ContactListView, HttpChatApi, Notification, Notifier, PresenceTracker, SocketClient};

/// Command line arguments for chatterline
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatterline: a terminal chat client with live unread counts.",
    long_about = "chatterline talks to a chat backend over HTTP for contacts and history \
    and over Socket.IO for live messages and presence.\n\n\
    Settings come from CHAT_SERVER, CHAT_USER_ID and CHAT_TOKEN if all are set, \
    otherwise from the saved config file, otherwise you are prompted."
)]
struct Args {
    /// Server URL, e.g. http://localhost:5001 (overrides saved settings)
    #[arg(long, value_name = "URL")]
    server: Option<String>,

    /// Path of the config file to read and write
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log file path
    #[arg(long, value_name = "PATH", default_value = "chatterline.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(long)]
    debug: bool,
}

/// Prompts the user for connection settings
fn prompt_config(default_server: Option<&str>) -> (String, String, String) {
    let server = match default_server {
        Some(server) => server.to_string(),
        None => {
            eprintln!("Enter server URL (e.g. http://localhost:5001):");
            utils::read_line().unwrap_or_default()
        }
    };

    eprintln!("Enter your user id:");
    let user_id = utils::read_line().unwrap_or_default();

    eprintln!("Enter your session token (jwt cookie value):");
    let token = utils::read_line().unwrap_or_default();

    (server, user_id, token)
}

/// Environment first, then the saved file, then the terminal.
/// The flag says whether the settings came from the environment.
fn resolve_config(args: &Args) -> Result<(ClientConfig, bool)> {
    let (mut config, from_env) = if let (Ok(server), Ok(user_id), Ok(token)) = (
        env::var("CHAT_SERVER"),
        env::var("CHAT_USER_ID"),
        env::var("CHAT_TOKEN"),
    ) {
        (ClientConfig::new(&server, &user_id, &token), true)
    } else if let Some(config) = load_config()? {
        info!("Using saved configuration for {}", config.user_id);
        (config, false)
    } else {
        let (server, user_id, token) = prompt_config(args.server.as_deref());
        (ClientConfig::new(&server, &user_id, &token), false)
    };

    if let Some(server) = &args.server {
        config.server = server.trim_end_matches('/').to_string();
    }
    Ok((config, from_env))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { LevelFilter::Debug } else { LevelFilter::Info };
    utils::setup_logging(args.log_file.to_str(), level)?;
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Logging to file: {}", args.log_file.display());

    if let Some(path) = &args.config {
        config::set_config_path_override(path.clone());
        info!("Config path overridden to: {}", path.display());
    }

    let (config, config_from_env) = resolve_config(&args)?;
    println!("Connecting to {}... please wait...\n", config.server);

    let api = HttpChatApi::new(&config.api_base(), config.get_token())?;
    let (notifier, mut notifications) = Notifier::new();
    let store = ChatStore::new(Arc::new(api), notifier.clone());
    let presence = PresenceTracker::new();

    let socket = match SocketClient::connect(&config.server, &config.user_id, presence.clone()).await {
        Ok(socket) => {
            store.attach_transport(socket.events());
            notifier.info("Live updates connected");
            if !config_from_env {
                if let Err(e) = save_config(&config) {
                    eprintln!("Warning: Failed to save configuration: {}", e);
                }
            }
            Some(socket)
        }
        Err(e) => {
            // Contacts and history still work over HTTP
            error!("Real-time connection failed: {:#}", e);
            notifier.error("Live updates unavailable");
            None
        }
    };

    let mut terminal = ui::setup_terminal()?;
    let mut chat_ui = ChatUI::new(&config.user_id);

    let mounted = ContactListView::mount(&store);

    let result = run_main_loop(
        &mut chat_ui,
        &mut terminal,
        &store,
        &presence,
        socket.as_ref(),
        &mut notifications,
    )
    .await;

    mounted.unmount();
    ui::restore_terminal(terminal)?;

    if let Some(socket) = socket {
        socket.disconnect().await;
    }

    if let Err(e) = &result {
        error!("Main loop failed: {:#}", e);
    }
    println!("Chat session ended.");
    result
}

async fn run_main_loop(
    chat_ui: &mut ChatUI,
    terminal: &mut ui::Terminal<ui::CrosstermBackend<io::Stdout>>,
    store: &ChatStore,
    presence: &PresenceTracker,
    socket: Option<&SocketClient>,
    notifications: &mut mpsc::UnboundedReceiver<Notification>,
) -> Result<()> {
    loop {
        let state = store.snapshot();
        let online = presence.online_users();

        chat_ui.set_connection_status(socket.map_or(false, SocketClient::is_connected));
        chat_ui.clean_notifications(ui::TOAST_TTL_SECS);
        while let Ok(notification) = notifications.try_recv() {
            chat_ui.push_notification(notification);
        }

        terminal.draw(|f| chat_ui.draw(f, &state, &online))?;

        match chat_ui.handle_input(&state, &online)? {
            Some(UiAction::Quit) => break,
            Some(UiAction::Select(contact)) => {
                info!("Opening conversation with {} ({})", contact.full_name, contact.id);
                let contact_id = contact.id.clone();
                store.select_contact(contact);

                let loader = store.clone();
                tokio::spawn(async move { loader.load_transcript(&contact_id).await });

                // Starts the listener on the first selection; a live one is kept
                store.begin_listening();
            }
            Some(UiAction::Send(payload)) => {
                let sender = store.clone();
                tokio::spawn(async move { sender.send_message(payload).await });
            }
            None => {}
        }

        if store.selected_contact().is_some() && !store.is_listening() && socket.is_some() {
            warn!("Message listener not running, subscribing again");
            store.begin_listening();
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    info!("Leaving main loop");
    Ok(())
}
