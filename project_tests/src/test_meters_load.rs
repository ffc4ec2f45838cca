use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::Value;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Fires bursts of concurrent requests at a running meter gateway", long_about = None)]
struct Args {
    /// Gateway base URL
    #[clap(short, long, default_value = "http://127.0.0.1:8000")]
    url: String,

    /// Meter IP to query
    #[clap(short, long, default_value = "10.0.0.5")]
    ip: String,

    /// Use /api/v1/power instead of /api/v1/power_cached
    #[clap(long)]
    uncached: bool,

    /// Requests per burst
    #[clap(short, long, default_value_t = 20)]
    concurrency: usize,

    /// Number of bursts
    #[clap(short, long, default_value_t = 5)]
    rounds: usize,

    /// Pause between bursts in milliseconds
    #[clap(short, long, default_value_t = 1000)]
    pause_ms: u64,
}

#[derive(Debug, Deserialize)]
struct PowerReply {
    power: Value,
    error: bool,
    msg: String,
    elapsed: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let endpoint = if args.uncached { "power" } else { "power_cached" };
    let url = format!("{}/api/v1/{}", args.url.trim_end_matches('/'), endpoint);
    let client = reqwest::Client::new();

    println!(
        "Loading {} for {} ({} bursts of {})",
        url, args.ip, args.rounds, args.concurrency
    );

    for round in 1..=args.rounds {
        let started = Instant::now();
        let requests = (0..args.concurrency).map(|_| {
            let request = client.get(&url).query(&[("ip", args.ip.as_str())]);
            async move {
                let reply = request.send().await?.json::<PowerReply>().await?;
                Ok::<_, reqwest::Error>(reply)
            }
        });
        let replies = join_all(requests).await;
        let wall = started.elapsed();

        let mut values: BTreeMap<String, usize> = BTreeMap::new();
        let mut failures: BTreeMap<String, usize> = BTreeMap::new();
        let mut slowest = 0.0_f64;
        for reply in replies {
            match reply {
                Ok(reply) if !reply.error => {
                    *values.entry(reply.power.to_string()).or_default() += 1;
                    slowest = slowest.max(reply.elapsed);
                }
                Ok(reply) => *failures.entry(reply.msg).or_default() += 1,
                Err(e) => *failures.entry(format!("transport: {}", e)).or_default() += 1,
            }
        }

        println!("\n----- Burst {} -----", round);
        println!("Wall time: {} ms", wall.as_millis());
        println!("Slowest server-side elapsed: {:.3} s", slowest);
        // A single value per burst means the requests were coalesced or cached.
        println!("Distinct readings: {:?}", values);
        if !failures.is_empty() {
            println!("Failures: {:?}", failures);
        }
        println!("--------------------");

        if round < args.rounds {
            tokio::time::sleep(Duration::from_millis(args.pause_ms)).await;
        }
    }

    Ok(())
}
