//! hostbridge-tail: connect to the host and print pushes as JSON lines.
//!
//! Usage: hostbridge-tail [--host <h>] [--port <p>] [--tag <cmd>]

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hostbridge::api::system;
use hostbridge::bridge::codec;
use hostbridge::{BridgeConfig, Invoker, Transport};

fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match std::env::var("HOSTBRIDGE_LOG").as_deref() {
            Ok("trace") => "trace",
            Ok("debug") => "debug",
            Ok("warn") | Ok("warning") => "warn",
            Ok("error") => "error",
            _ => "info",
        };
        EnvFilter::new(format!("hostbridge={level},hostbridge_tail={level}"))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

fn tag_filter(args: &[String]) -> Option<String> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(tag) = arg.strip_prefix("--tag=") {
            return Some(tag.to_string());
        }
        if arg == "--tag" {
            return iter.next().cloned();
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = BridgeConfig::from_args(&args).context("invalid arguments")?;
    let tag = tag_filter(&args);
    tracing::info!(
        url = %config.persistent_url(),
        tag = ?tag,
        version = hostbridge::HOSTBRIDGE_VERSION,
        "Starting hostbridge-tail"
    );

    let transport = Transport::new(config).context("failed to build transport")?;
    let mut pushes = transport.subscribe_pushes(tag);
    transport.connect().await;
    transport.wait_connected().await;

    let invoker = Invoker::new(Arc::clone(&transport));
    match system::process_info(&invoker).await {
        Some(info) => {
            let info = codec::encode_value(&hostbridge::Value::Object(info));
            tracing::info!(%info, "Host process");
        }
        None => tracing::warn!("Host process info unavailable"),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            push = pushes.recv() => match push {
                Some(envelope) => println!("{}", codec::envelope_to_json(&envelope)),
                None => break,
            },
        }
    }

    tracing::debug!(health = ?transport.health(), "Final state");
    transport.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tag_flag_forms() {
        assert_eq!(tag_filter(&args(&["--tag", "onRecvMsg"])).as_deref(), Some("onRecvMsg"));
        assert_eq!(tag_filter(&args(&["--port", "1", "--tag=onKicked"])).as_deref(), Some("onKicked"));
        assert_eq!(tag_filter(&args(&["--port", "1"])), None);
        assert_eq!(tag_filter(&args(&["--tag"])), None);
    }
}
