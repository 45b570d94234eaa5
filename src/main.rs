use std::error::Error;

use tracing_subscriber::EnvFilter;
use vex::{CancellationToken, SimilarityMetric, VexConfig, similarity};

const DOCUMENTS: [&str; 3] = [
    "Rust guarantees memory safety without a garbage collector. Ownership is checked at compile time.",
    "Tokio is an asynchronous runtime. It schedules tasks across a pool of worker threads.",
    "Sourdough needs a mature starter.\n\nLet the dough rise overnight in a cool place.",
];

/// Embeds a few documents and ranks them against a query.
///
/// Usage: `vex [config.yaml] [query]`. Without a config file the offline stub
/// provider is used with sentence chunking and a retry layer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => VexConfig::from_file(path)?,
        None => VexConfig::from_yaml(DEFAULT_CONFIG)?,
    };
    let query = args
        .next()
        .unwrap_or_else(|| "memory safety in systems languages".to_string());

    let service = config.build_service()?;
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let documents = service.batch(&cancel, &DOCUMENTS).await?;
    let Some(query_vector) = service.embed_query(&cancel, &query).await? else {
        println!("query produced no chunks");
        return Ok(());
    };

    let mut ranked: Vec<(f64, &str)> = documents
        .iter()
        .zip(DOCUMENTS)
        .filter_map(|(vector, text)| {
            vector
                .as_ref()
                .map(|v| (similarity(&query_vector, v, SimilarityMetric::Cosine), text))
        })
        .collect();
    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

    println!(
        "provider={} dimensions={} query={query:?}",
        service.provider().name(),
        service.dimensions()
    );
    for (score, text) in ranked {
        let preview: String = text.chars().take(60).collect();
        println!("{score:>8.4}  {preview}");
    }

    Ok(())
}

const DEFAULT_CONFIG: &str = r#"
version: "1.0"
name: "demo"
provider:
  kind: stub
  dimensions: 384
chunker:
  strategy: sentence
pooling: mean
reliability:
  retry:
    max_retries: 2
    base_delay: 50
  timeout_ms: 5000
"#;
