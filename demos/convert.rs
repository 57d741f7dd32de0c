use price_network::{NetworkConfig, PriceNetwork};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("price_network=info")),
        )
        .init();

    // convert [PAIR] [AMOUNT], e.g. `convert XBT/USD 2`
    let mut args = std::env::args().skip(1);
    let pair = args.next().unwrap_or_else(|| "XBT/USD".to_string());
    let amount: f64 = args.next().map(|a| a.parse::<f64>()).transpose()?.unwrap_or(1.0);

    let config = NetworkConfig::from_env()?;
    let network = PriceNetwork::from_config(&config);
    for warning in network.registry().warnings() {
        eprintln!("   Warning: {}", warning);
    }

    println!("Price Network");
    println!("=============");
    println!("Sources: {}", config.price_sources.join(", "));

    let mut quotes = network.subscribe();
    tokio::spawn(async move {
        while let Ok(quote) = quotes.recv().await {
            println!("   quote: {}", quote);
        }
    });

    match network.price(&pair, amount).await {
        Ok(value) => println!("{} {} = {:.8}", amount, pair, value),
        Err(e) => eprintln!("Error: {} (retryable: {})", e, e.is_retryable()),
    }

    // Give the quote printer a moment to drain
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\n{:-<50}", "");
    for metrics in network.source_metrics().await {
        println!(
            "{:<18} p50={:>8.1}ms p99={:>8.1}ms success_rate={:.1}%",
            metrics.source_name,
            metrics.latency_p50_ms,
            metrics.latency_p99_ms,
            metrics.success_rate * 100.0
        );
    }

    let health = network.health_check().await;
    println!("Health: {:?} ({})", health.status, health.message.unwrap_or_default());

    Ok(())
}
