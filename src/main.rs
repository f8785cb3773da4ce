use presence_core::log_error;

#[tokio::main]
async fn main() {
    if let Err(e) = presence_core::logging::init_logging() {
        eprintln!("[WARN] Failed to initialize structured logging: {}", e);
    }

    if let Err(e) = presence_core::app::run(std::env::args()).await {
        log_error!("{:#}", e);
        std::process::exit(1);
    }
}
