use mdns_discovery::{hostname, Config, Engine, ServiceProfileBuilder};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt::init();

  let host = hostname().unwrap();
  let profile = ServiceProfileBuilder::new(host.clone(), "_foobar._tcp")
    .with_port(8080)
    .with_txt_record("version=1")
    .with_ip("192.168.0.3".parse().unwrap())
    .build()
    .await
    .unwrap();

  let engine = Engine::new(Config::default()).await.unwrap();
  let profile = engine.advertise(profile).await;

  if engine.probe(&profile).await {
    eprintln!("name conflict probing {}, exiting", profile.instance_addr);
    return;
  }
  engine.announce(&profile).await;
  println!("advertising {}", profile.instance_addr);

  tokio::signal::ctrl_c().await.unwrap();
  engine.unadvertise(&profile).await;
}
