use stranger_client::backoff::BackoffConfig;
use stranger_client::config::ClientConfig;
use stranger_client::driver::{Driver, Input};
use stranger_client::session::{CallSession, Command};
use stranger_client::{observability, signaling};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "commands: join | search | connect | skip | end | leave | quit";

#[tokio::main]
async fn main() {
    observability::init_tracing();

    let config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(component = "bootstrap", code = ?err.code(), error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        component = "bootstrap",
        room = %config.room,
        user_id = %config.identity.id,
        ice_servers = config.ice_servers.len(),
        "starting client"
    );

    let (handle, events, signaling_task) = signaling::spawn(
        config.signaling_url.clone(),
        config.room,
        BackoffConfig::websocket_default(),
    );

    let (announce_tx, mut announce_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(line) = announce_rx.recv().await {
            println!("{line}");
        }
    });

    let (input_tx, input_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("{HELP}");
        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let input = if trimmed.eq_ignore_ascii_case("quit") {
                Input::Quit
            } else {
                match Command::parse(trimmed) {
                    Some(command) => Input::Command(command),
                    None => {
                        println!("{HELP}");
                        continue;
                    }
                }
            };
            if input_tx.send(input).is_err() || input == Input::Quit {
                return;
            }
        }
        let _ = input_tx.send(Input::Quit);
    });

    let session = CallSession::new(config.room, config.identity.clone());
    let driver = Driver::new(session, handle, config.ice_servers.clone(), announce_tx);
    let result = driver.run(events, input_rx).await;

    // Give the leave-room frame a moment to flush.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    signaling_task.abort();

    if let Err(err) = result {
        tracing::error!(component = "bootstrap", code = ?err.code(), error = %err, "client stopped");
        std::process::exit(1);
    }
}
