//! Simple consumer example using the fluxwire Reader

use std::time::{Duration, Instant};

use fluxwire::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("📖 fluxwire - Simple Consumer Example");
    println!("=====================================");

    let reader = Reader::new(
        ReaderConfigBuilder::new()
            .brokers(["localhost:9092"])
            .topic("fluxwire-topic")
            .group_id("fluxwire-consumer-group")
            .session_timeout(Duration::from_secs(30))
            .commit_interval(Duration::from_secs(1))
            .build(),
    )?;

    println!("📖 Consuming from topic: fluxwire-topic");
    println!("👥 Consumer group: fluxwire-consumer-group");

    let mut message_count = 0;
    let start_time = Instant::now();

    // Consume for 30 seconds
    while start_time.elapsed() < Duration::from_secs(30) {
        tokio::select! {
            result = reader.read_message() => match result {
                Ok(message) => {
                    message_count += 1;

                    let key_str = message
                        .key
                        .as_ref()
                        .map(|k| String::from_utf8_lossy(k).to_string())
                        .unwrap_or_else(|| "<no key>".to_string());
                    let value_str = message
                        .value
                        .as_ref()
                        .map(|v| String::from_utf8_lossy(v).chars().take(50).collect::<String>())
                        .unwrap_or_default();

                    println!(
                        "   📨 Message {}: {}:{:?} offset={} key='{}' value='{}'",
                        message_count,
                        message.topic,
                        message.partition,
                        message.offset,
                        key_str,
                        value_str
                    );
                }
                Err(e @ FluxwireError::OffsetReset { .. }) => println!("   ℹ️ {}", e),
                Err(e) if e.is_retryable() => eprintln!("   ⚠️ Retrying after: {}", e),
                Err(e) => {
                    eprintln!("   ❌ Error receiving message: {}", e);
                    break;
                }
            },
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if message_count == 0 {
                    println!("   ⏳ Waiting for messages...");
                }
            }
        }
    }

    println!("\n✅ Consumption completed");
    let stats = reader.stats();
    println!(
        "📊 Total messages consumed: {} ({} fetches, {} commits, {} rebalances)",
        message_count, stats.fetches, stats.commits, stats.rebalances
    );

    // Flushes pending commits and leaves the group
    reader.close().await?;
    println!("✅ Reader closed");

    if message_count == 0 {
        println!("💡 No messages were consumed. Try running the producer example first:");
        println!("   cargo run --example simple_producer");
    }

    Ok(())
}
