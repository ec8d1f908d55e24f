use anyhow::Result;
use clap::Parser;

use ndt_client::{
    Client, MlabnsPolicy, NettestFlags, ProtocolFlags, Settings, Verbosity,
};

#[derive(Parser, Debug)]
#[command(
    name = "ndt-client",
    about = "Measure achievable TCP throughput against an NDT server",
    version,
    long_about = None
)]
struct Cli {
    /// NDT server hostname. Omit it to discover a nearby server.
    hostname: Option<String>,

    /// Run the download subtest
    #[arg(long)]
    download: bool,

    /// Run the upload subtest
    #[arg(long)]
    upload: bool,

    /// Run the multi-stream download subtest
    #[arg(long = "download-ext")]
    download_ext: bool,

    /// Use the JSON message envelope
    #[arg(long)]
    json: bool,

    /// Use TLS for control and measurement connections
    #[arg(long)]
    tls: bool,

    /// Encapsulate messages in WebSocket frames
    #[arg(long)]
    websocket: bool,

    /// Use the ndt7 protocol (implies --tls and --websocket)
    #[arg(long)]
    ndt7: bool,

    /// Override the protocol-default server port
    #[arg(long)]
    port: Option<u16>,

    /// Locate-service policy: closest, random, or geo-options
    #[arg(long, default_value = "geo-options")]
    policy: String,

    /// Tunnel everything through a SOCKSv5h proxy on 127.0.0.1:<PORT>
    #[arg(long = "socks5h")]
    socks5h_port: Option<u16>,

    /// CA bundle for TLS verification (default: probe system locations)
    #[arg(long = "ca-bundle-path")]
    ca_bundle_path: Option<String>,

    /// Skip TLS certificate verification (insecure)
    #[arg(long)]
    insecure: bool,

    /// Per-operation I/O timeout in seconds
    #[arg(long, default_value_t = 7)]
    timeout: u64,

    /// Cap on a single subtest in seconds
    #[arg(long = "max-runtime", default_value_t = 14)]
    max_runtime: u64,

    /// Be verbose
    #[arg(long)]
    verbose: bool,
}

fn settings_from_cli(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::default();

    let mut nettest_flags = NettestFlags::default();
    if cli.download {
        nettest_flags.insert(NettestFlags::DOWNLOAD);
    }
    if cli.upload {
        nettest_flags.insert(NettestFlags::UPLOAD);
    }
    if cli.download_ext {
        nettest_flags.insert(NettestFlags::DOWNLOAD_EXT);
    }
    // With no explicit selection, run a download: the typical usage.
    if nettest_flags.bits() == 0 {
        nettest_flags = NettestFlags::DOWNLOAD;
    }
    settings.nettest_flags = nettest_flags;

    if cli.json {
        settings.protocol_flags.insert(ProtocolFlags::JSON);
    }
    if cli.tls {
        settings.protocol_flags.insert(ProtocolFlags::TLS);
    }
    if cli.websocket {
        settings.protocol_flags.insert(ProtocolFlags::WEBSOCKET);
    }
    if cli.ndt7 {
        settings.protocol_flags.insert(ProtocolFlags::NDT7);
    }

    settings.mlabns_policy = match cli.policy.as_str() {
        "closest" => MlabnsPolicy::Closest,
        "random" => MlabnsPolicy::Random,
        "geo-options" | "geo_options" => MlabnsPolicy::GeoOptions,
        other => anyhow::bail!("unknown policy: {other}"),
    };

    if let Some(hostname) = &cli.hostname {
        settings.hostname = hostname.clone();
    }
    settings.port = cli.port;
    settings.socks5h_port = cli.socks5h_port;
    settings.ca_bundle_path = cli.ca_bundle_path.clone();
    settings.tls_verify_peer = !cli.insecure;
    settings.timeout = std::time::Duration::from_secs(cli.timeout);
    settings.max_runtime = std::time::Duration::from_secs(cli.max_runtime);
    settings.verbosity = if cli.verbose {
        Verbosity::Debug
    } else {
        Verbosity::Info
    };

    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
            }),
        )
        .init();

    let settings = settings_from_cli(&cli)?;
    let client = Client::new(settings);
    if client.run().await {
        Ok(())
    } else {
        std::process::exit(1);
    }
}
