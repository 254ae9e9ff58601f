use callcore::application::{CallService, Collaborators, ControlHandle};
use callcore::config::Config;
use callcore::domain::audio::{AudioRouteMediator, ProximityMediator};
use callcore::infrastructure::events::EventBroadcaster;
use callcore::infrastructure::metrics::init_metrics;
use callcore::infrastructure::modem::SimulatedModem;
use callcore::infrastructure::power::LoggingPowerService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut demo = false;
    let mut print_config = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--demo" => demo = true,
            "--print-config" => print_config = true,
            path => config_path = Some(PathBuf::from(path)),
        }
    }

    let config = Config::load(config_path.as_deref())?;
    if print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting callcore");
    info!("Configuration loaded: {:?}", config);

    if config.metrics.enabled {
        let listen: SocketAddr = config.metrics.listen.parse()?;
        init_metrics(listen)?;
        info!("Prometheus metrics on http://{}/metrics", listen);
    }

    let modem = Arc::new(SimulatedModem::new(&config.modem));
    let events = Arc::new(EventBroadcaster::default());
    let mut subscriber = events.subscribe();
    tokio::spawn(async move {
        while let Ok(published) = subscriber.recv().await {
            match serde_json::to_string(&published.event) {
                Ok(json) => info!("Session event {}: {}", published.metadata.event_type, json),
                Err(e) => warn!("Failed to serialize session event: {}", e),
            }
        }
    });

    let mut collaborators = Collaborators::new(modem.clone(), events.clone());
    if config.audio.proximity {
        let power = Arc::new(LoggingPowerService::new());
        let mediator: Arc<dyn AudioRouteMediator> = Arc::new(ProximityMediator::new(power));
        collaborators = collaborators.with_route_mediator(mediator);
    }

    let (service, handle) = CallService::new(&config, collaborators);
    let service_task = tokio::spawn(service.run());
    modem.attach(Arc::new(handle.clone()));
    info!("callcore initialized successfully");

    if demo {
        demo_call_flow(&handle, &modem).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    handle.hangup_all().await?;
    handle.shutdown()?;
    service_task.await?;

    info!("Shutdown complete");
    Ok(())
}

/// Dial out, send tones, take a waiting call and merge both into a conference
async fn demo_call_flow(handle: &ControlHandle, modem: &SimulatedModem) -> anyhow::Result<()> {
    info!("=== Call Flow Demo ===");

    let outgoing = handle.dial("+1 555 0100").await?;
    modem.remote_alerting(&outgoing);
    modem.remote_answer(&outgoing);

    for event in [1u8, 2, 3] {
        handle.start_tone(outgoing.clone(), event).await?;
    }

    let waiting = modem.incoming_call("5550199");
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.accept(waiting.clone()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.merge(outgoing.clone(), waiting.clone()).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = handle.snapshot().await?;
    info!("Registry: {}", serde_json::to_string_pretty(&snapshot)?);

    if let Some(conference) = snapshot.conference {
        handle.hangup(conference.id).await?;
    }

    info!("=== Demo Complete ===");
    Ok(())
}
