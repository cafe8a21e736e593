use clap::Parser;
use coalescent_rpc::{echo, CodecRegistry};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "rpc-echo")]
#[clap(version = "0.1.0")]
#[clap(about = "answers every coalescent-rpc call with its own arguments", long_about = None)]
struct Args {
    #[clap(long, default_value = "127.0.0.1:27800")]
    address: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let listener = match TcpListener::bind(&args.address).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("rpc-echo: couldn't bind {}: {}", args.address, e);
            std::process::exit(1);
        }
    };
    println!("rpc-echo: listening at {}", args.address);

    echo::serve(listener, CodecRegistry::default()).await;
}
