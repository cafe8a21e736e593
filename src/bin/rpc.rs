use clap::{Parser, Subcommand};
use coalescent_rpc::{dial, Client, Options};
use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "rpc")]
#[clap(version = "0.1.0")]
#[clap(about = "cli for coalescent-rpc services", long_about = None)]
struct Args {
    #[clap(long, default_value = "tcp")]
    network: String,
    #[clap(long, default_value = "127.0.0.1:27800")]
    address: String,
    /// codec type tag, e.g. application/json
    #[clap(long, default_value = "")]
    codec: String,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make one call and print the reply
    Call { method: String, args: String },
    /// Make `count` concurrent calls over the one connection
    Spam {
        method: String,
        args: String,
        #[clap(long, default_value = "10")]
        count: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let options = Options {
        magic_number: 0,
        codec_type: args.codec,
    };
    let client = match dial(&args.network, &args.address, &[options]).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("rpc: dial {}: {}", args.address, e);
            std::process::exit(1);
        }
    };

    let ok = match args.command {
        Commands::Call { method, args } => match parse_args(&args) {
            Some(args) => call(&client, &method, &args).await,
            None => false,
        },
        Commands::Spam {
            method,
            args,
            count,
        } => match parse_args(&args) {
            Some(args) => spam(client.clone(), &method, args, count).await,
            None => false,
        },
    };

    if let Err(e) = client.close().await {
        eprintln!("rpc: close: {}", e);
    }
    if !ok {
        std::process::exit(1);
    }
}

fn parse_args(args: &str) -> Option<Value> {
    match serde_json::from_str(args) {
        Ok(v) => Some(v),
        Err(e) => {
            eprintln!("rpc: arguments are not json: {}", e);
            None
        }
    }
}

async fn call(client: &Client, method: &str, args: &Value) -> bool {
    match client.call::<_, Value>(method, args).await {
        Ok(reply) => {
            println!("{}", reply);
            true
        }
        Err(e) => {
            eprintln!("rpc: {}: {}", method, e);
            false
        }
    }
}

async fn spam(client: Arc<Client>, method: &str, args: Value, count: usize) -> bool {
    let tasks: Vec<_> = (0..count)
        .map(|_| {
            let client = client.clone();
            let method = method.to_string();
            let args = args.clone();
            tokio::spawn(async move { client.call::<_, Value>(method, &args).await })
        })
        .collect();

    let mut failed = 0;
    for task in tasks {
        match task.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                eprintln!("rpc: {}", e);
                failed += 1;
            }
            Err(e) => {
                eprintln!("rpc: call task failed: {}", e);
                failed += 1;
            }
        }
    }
    println!("{} calls, {} failed", count, failed);
    failed == 0
}
