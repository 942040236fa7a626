//! `threadline gateway`: serve the web chat UI.

pub fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Threadline gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.active_model());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("threadline-gateway")
        .build()?;
    runtime.block_on(threadline_gateway::start(config))
}
