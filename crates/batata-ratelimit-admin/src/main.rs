use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use batata_ratelimit_admin::{Admin, Cli, Configuration, init_logging};
use batata_ratelimit_persistence::{EmbeddedRateLimitStore, EmbeddedServiceStore, KvStore};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = Configuration::from_cli(&cli)?;

    // Keep the guard alive until exit so file output is flushed
    let _logging_guard = init_logging(&configuration.logging_config())?;

    let storage = configuration.storage_config()?;
    let kv = Arc::new(
        KvStore::open(&storage)
            .with_context(|| format!("Failed to open store at {}", storage.data_dir.display()))?,
    );
    let services = Arc::new(EmbeddedServiceStore::new(kv.clone()));
    let store = EmbeddedRateLimitStore::new(kv, services.clone());

    let admin = Admin {
        store: &store,
        services: &services,
    };
    let output = admin.run(cli.command)?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
