use std::sync::Arc;
use std::time::Duration;

use notification_service::{escape_markdown, TelegramClient};
use watch_core::{ChatId, Symbol};
use watch_state::WatchStore;

const POLL_SECONDS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A chat command understood by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Add(Option<String>),
    Remove(Option<String>),
    List,
    Help,
}

/// Parse `/cmd[@botname] [arg]`. Anything that is not a known command yields `None`.
pub fn parse_command(text: &str) -> Option<Command> {
    let mut parts = text.split_whitespace();
    let head = parts.next()?.strip_prefix('/')?;
    let name = head.split('@').next().unwrap_or(head).to_lowercase();
    let arg = parts.next().map(str::to_string);

    match name.as_str() {
        "start" => Some(Command::Start),
        "add" => Some(Command::Add(arg)),
        "remove" => Some(Command::Remove(arg)),
        "list" => Some(Command::List),
        "help" => Some(Command::Help),
        _ => None,
    }
}

const HELP_TEXT: &str = "Commands:\n\
/start - send alerts to this chat\n\
/add SYMBOL - watch a ticker (e.g. /add EQNR.OL)\n\
/remove SYMBOL - stop watching a ticker\n\
/list - show the watch-list";

/// Apply `command` from `chat` to the store and produce the reply text.
pub async fn execute(store: &WatchStore, chat: ChatId, command: Command) -> String {
    match command {
        Command::Start => match store.set_destination(chat).await {
            Ok(_) => {
                tracing::info!(chat_id = chat.0, "Alert destination registered");
                format!("✅ Alerts will be sent to this chat.\n\n{HELP_TEXT}")
            }
            Err(e) => persist_failed("register this chat", e),
        },
        Command::Help => HELP_TEXT.to_string(),
        Command::List => {
            let symbols = store.list_instruments().await;
            if symbols.is_empty() {
                "Watch-list is empty. Use /add SYMBOL.".to_string()
            } else {
                let lines = symbols
                    .iter()
                    .map(|s| format!("• {}", escape_markdown(s.as_str())))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("📋 Watching:\n{lines}")
            }
        }
        Command::Add(arg) => {
            let symbol = match parse_symbol(arg.as_deref(), "/add") {
                Ok(symbol) => symbol,
                Err(reply) => return reply,
            };
            let label = escape_markdown(symbol.as_str());
            match store.add_instrument(symbol).await {
                Ok(true) => format!("➕ Added {label}"),
                Ok(false) => format!("{label} is already on the watch-list"),
                Err(e) => persist_failed("save the watch-list", e),
            }
        }
        Command::Remove(arg) => {
            let symbol = match parse_symbol(arg.as_deref(), "/remove") {
                Ok(symbol) => symbol,
                Err(reply) => return reply,
            };
            let label = escape_markdown(symbol.as_str());
            match store.remove_instrument(&symbol).await {
                Ok(true) => format!("➖ Removed {label}"),
                Ok(false) => format!("{label} is not on the watch-list"),
                Err(e) => persist_failed("save the watch-list", e),
            }
        }
    }
}

fn parse_symbol(arg: Option<&str>, usage: &str) -> Result<Symbol, String> {
    let raw = arg.ok_or_else(|| format!("Usage: {usage} SYMBOL"))?;
    Symbol::new(raw).map_err(|e| format!("Invalid symbol: {}", escape_markdown(&e.to_string())))
}

fn persist_failed(action: &str, err: watch_state::StateError) -> String {
    tracing::error!("Failed to {}: {}", action, err);
    format!("⚠️ Applied, but failed to {action}. The change may be lost on restart.")
}

/// Long-poll Telegram for commands until the task is aborted.
pub async fn run_command_poller(client: Arc<TelegramClient>, store: Arc<WatchStore>) {
    let mut offset: Option<i64> = None;

    loop {
        let updates = match client.get_updates(offset, POLL_SECONDS).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!("Failed to poll Telegram updates: {}", e);
                tokio::time::sleep(RETRY_DELAY).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(update.update_id + 1);

            let Some(message) = update.message else { continue };
            let Some(command) = message.text.as_deref().and_then(parse_command) else {
                continue;
            };

            let chat = ChatId(message.chat.id);
            tracing::info!(chat_id = chat.0, command = ?command, "Command received");

            let reply = execute(&store, chat, command).await;
            if let Err(e) = client.send_message(chat, &reply).await {
                tracing::warn!(chat_id = chat.0, "Failed to reply to command: {}", e);
            }
        }
    }
}
