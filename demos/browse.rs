use mdns_discovery::{Config, DiscoveryEvent, Engine};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt::init();

  let engine = Engine::new(Config::default()).await.unwrap();
  let mut events = engine.subscribe();

  engine.query_service_instances("_foobar._tcp", None).await;

  while let Ok(event) = events.recv().await {
    match event {
      DiscoveryEvent::ServiceDiscovered(name) => println!("service type: {name}"),
      DiscoveryEvent::ServiceInstanceDiscovered { name, .. } => println!("discovered: {name}"),
      DiscoveryEvent::ServiceInstanceShutdown { name, .. } => println!("gone: {name}"),
      DiscoveryEvent::NetworkInterfaceDiscovered(interfaces) => {
        println!("interfaces changed: {} usable", interfaces.len())
      }
    }
  }
}
