use stranger_server::config::ServerConfig;
use stranger_server::observability;

#[tokio::main]
async fn main() {
    observability::init_tracing();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(component = "bootstrap", error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    if let Err(err) = stranger_server::serve(config).await {
        tracing::error!(component = "bootstrap", error = %err, "server stopped");
        std::process::exit(1);
    }
}
