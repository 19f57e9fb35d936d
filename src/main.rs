mod config;
#[cfg(test)]
mod fakes;
mod llm_extract;
mod ocr;
mod pipeline;
mod schema;

use config::{Config, Credentials};
use llm_extract::OpenAiChat;
use ocr::WhispererClient;
use schema::Form1003;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = Path::new(config::DEFAULT_CONFIG_PATH);
    let mut cfg = Config::load_or_default(config_path)?;
    cfg.apply_env_overrides(config::env_lookup);

    // init tracing; stdout is reserved for the extracted text and reply
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!(
        path = %config_path.display(),
        from_file = config_path.exists(),
        "Configuration loaded"
    );

    // Install crypto provider
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    let creds = Credentials::from_env()?;
    let ocr = WhispererClient::new(&cfg.ocr, creds.whisperer_api_key)?;
    let chat = OpenAiChat::new(&cfg.llm, creds.openai_api_key);

    let document = Path::new(&cfg.document.path);
    let pages = cfg.document.pages.as_deref();
    let reply = match pipeline::process_1003_pdf(&ocr, &chat, document, pages).await {
        Ok(reply) => reply,
        Err(err) => {
            if let Some(code) = err.report(&mut std::io::stdout()) {
                std::process::exit(code);
            }
            return Err(err.into());
        }
    };

    let form = Form1003::from_reply(&reply)?;
    info!(
        own_house = form.current_address.own_house,
        rented_house = form.current_address.rented_house,
        self_employed = form.employment_details.business_owner_or_self_employed,
        "Parsed Form1003"
    );

    Ok(())
}
