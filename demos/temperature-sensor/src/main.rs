use std::time::Duration;

use mqnode_client::config::Config;
use mqnode_client::error::Error;
use mqnode_client::mqnode::address::Address;
use mqnode_client::mqtt::{BrokerConfig, MqttTransport};
use mqnode_client::node::Node;
use mqnode_client::resource::{Callable, ExecOutcome, Resources};

use clap::Parser;

use serde_json::json;

use tracing::{error, info};

// Period of the simulated measurements.
const MEASUREMENT_PERIOD: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Client identifier.
    #[arg(short, long, default_value = "sensor01")]
    client_id: String,

    /// Broker address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Broker port.
    #[arg(short, long, default_value_t = 1883)]
    port: u16,

    /// Registration lifetime, in seconds.
    #[arg(short, long, default_value_t = 300)]
    lifetime: u64,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();

    let config = Config::new(cli.client_id.as_str())
        .lifetime(cli.lifetime)
        .mac("00:00:00:00:00:01");
    let (transport, events) =
        MqttTransport::start(&cli.client_id, &BrokerConfig::new(cli.address, cli.port));

    let node = Node::new(config, transport)?;
    node.add_object(
        3,
        0,
        Resources::new()
            .value(0, json!("mqnode"))
            .value(1, json!("temperature-sensor"))
            .callable(
                4,
                Callable::new().exec(|_| async {
                    info!("Reboot requested");
                    Ok(ExecOutcome::done())
                }),
            ),
    )?;
    node.add_object(
        3303,
        0,
        Resources::new()
            .value(5700, json!(20.0))
            .value(5701, json!("Cel")),
    )?;

    let mut node_events = node.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = node_events.recv().await {
            info!("{event}");
        }
    });

    let _control_loop = node.spawn(events);
    node.start().await?;

    let sensor_value = Address::resource(3303, 0, 5700);
    let mut measurements = tokio::time::interval(MEASUREMENT_PERIOD);
    let mut step = 0_u32;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => { break; }
            _ = measurements.tick() => {
                step += 1;
                let temperature = 20.0 + f64::from(step % 10) * 0.5;
                if let Err(e) = node.write(&sensor_value, json!(temperature)).await {
                    error!("Impossible to store the measurement: {e}");
                }
            }
        }
    }

    let reply = node.deregister().await;
    info!("Deregistration answered with {}", reply.status);

    Ok(())
}
