//! Simple producer example using the fluxwire Writer

use std::time::{Duration, Instant};

use fluxwire::*;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    println!("🚀 fluxwire - Simple Producer Example");
    println!("=====================================");

    let writer = Writer::new(
        WriterConfigBuilder::new()
            .brokers(["localhost:9092"])
            .topic("fluxwire-topic")
            .balancer(Balancer::Murmur2)
            .required_acks(RequiredAcks::One)
            .compression(Compression::Snappy)
            .batch_timeout(Duration::from_millis(20))
            .max_message_bytes(1024 * 1024)
            .build(),
    )?;

    // Example 1: Simple message
    writer
        .write_messages(vec![Message::new("Hello from fluxwire!")])
        .await?;
    println!("✅ Sent simple message");

    // Example 2: Keyed messages land on the same partition
    writer
        .write_messages(vec![
            Message::new("User login event").with_key("user-123"),
            Message::new("User logout event").with_key("user-123"),
        ])
        .await?;
    println!("✅ Sent keyed messages");

    // Example 3: Headers, explicit partition and timestamp
    let message = Message::new("Order created: $99.99")
        .with_key("order-456")
        .with_header("content-type", "application/json")
        .with_header("source", "web-app")
        .with_partition(0)
        .with_time(1_700_000_000_000);
    writer.write_messages(vec![message]).await?;
    println!("✅ Sent message with headers to partition 0");

    // Example 4: High-throughput sending
    println!("\n🚀 High-throughput test - sending 1000 messages...");
    let start = Instant::now();
    let messages: Vec<Message> = (0..1000)
        .map(|i| {
            Message::new(format!("High-throughput message #{}", i)).with_key(format!("key-{}", i))
        })
        .collect();

    match writer.write_messages(messages).await {
        Ok(()) => {}
        Err(FluxwireError::Write(errors)) => {
            eprintln!("❌ {} messages failed: {}", errors.len(), errors);
        }
        Err(e) => return Err(e),
    }

    let elapsed = start.elapsed();
    println!(
        "✅ High-throughput test completed in {:?} (~{:.0} msg/sec)",
        elapsed,
        1000.0 / elapsed.as_secs_f64()
    );

    let stats = writer.stats();
    println!(
        "📊 {} messages in {} batches (avg {:.1} per batch, {:.0}µs per batch)",
        stats.messages, stats.batches, stats.average_batch_size, stats.average_batch_latency_us
    );

    writer.close().await?;
    println!("✅ Writer closed");

    println!("\n🎉 Producer example completed successfully!");
    println!("💡 Try running the consumer example to read these messages:");
    println!("   cargo run --example simple_consumer");

    Ok(())
}
