use clap::Parser;
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eap_authd::{AuthDecision, Authenticator, Config};
use eap_proto::method::MethodRegistry;
use eap_proto::methods::eap_md5;
use eap_proto::packet::EapPacket;

/// EAP Authenticator - pluggable EAP method engine (RFC 3748)
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "eap_authd")]
struct Cli {
    /// Path to configuration file
    #[arg(value_name = "CONFIG", default_value = "config.json")]
    config_path: String,

    /// Validate configuration and exit
    #[arg(short, long)]
    validate: bool,

    /// Print version information and exit
    #[arg(short = 'V', long)]
    version: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("EAP Authenticator v{}", env!("CARGO_PKG_VERSION"));
        println!("RFC 3748 EAP engine with EAP-MD5 and EAP-FAST");
        process::exit(0);
    }

    // Load or create configuration (without logging first)
    let config = match Config::from_file(&cli.config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing_subscriber::registry()
                .with(EnvFilter::new("info"))
                .with(tracing_subscriber::fmt::layer())
                .init();

            if cli.validate {
                eprintln!("Configuration validation failed: {}", e);
                process::exit(1);
            }

            warn!("Could not load config file from: {}", cli.config_path);
            info!("Creating example configuration at: {}", cli.config_path);

            let example_config = Config::example();
            if let Err(e) = example_config.to_file(&cli.config_path) {
                error!("Error creating example config: {}", e);
                process::exit(1);
            }

            info!("Please edit {} and restart", cli.config_path);
            process::exit(0);
        }
    };

    if cli.validate {
        println!("Configuration validated successfully!");
        println!();
        println!("Configuration summary:");
        println!("  Users: {}", config.users.len());
        println!("  Default method: {}", config.default_method);
        println!("  Session timeout: {}s", config.session_timeout);
        println!(
            "  Log level: {}",
            config.log_level.as_deref().unwrap_or("info")
        );
        if config.users.is_empty() {
            println!();
            println!("WARNING: no users configured, every exchange will fail");
        }
        process::exit(0);
    }

    // Initialize tracing with configured log level
    let log_level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("EAP Authenticator v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from: {}", cli.config_path);

    // Populate the method registry; read-only from here on
    let mut registry = MethodRegistry::new();
    if let Err(e) = eap_md5::register(&mut registry) {
        error!("Failed to register EAP-MD5: {}", e);
        process::exit(1);
    }
    for descriptor in registry.descriptors() {
        info!("Registered method: {}", descriptor);
    }

    if config.users.is_empty() {
        warn!("No users configured, every exchange will fail");
    } else {
        for user in &config.users {
            info!("Added user: {}", user.username);
        }
    }

    let mut authenticator = Authenticator::new(Arc::new(registry), config.clone());

    // No transport is wired in this binary; run a loopback exchange against
    // the first configured user to prove the stack end to end.
    let Some(user) = config.users.first() else {
        error!("Nothing to self-check without users");
        process::exit(1);
    };

    info!("Running loopback self-check as {}", user.username);
    match loopback_exchange(&mut authenticator, &user.username, &user.password) {
        Ok(()) => {
            info!("Self-check passed");
            info!("Embed eap_authd::Authenticator behind your transport to serve peers");
        }
        Err(e) => {
            error!("Self-check failed: {}", e);
            process::exit(1);
        }
    }
}

/// Play the peer side of an EAP-MD5 exchange against the authenticator.
fn loopback_exchange(
    authenticator: &mut Authenticator,
    username: &str,
    password: &str,
) -> Result<(), String> {
    let (session_id, frame) = authenticator.begin();

    let request =
        EapPacket::from_bytes(&frame).map_err(|e| format!("bad identity request: {}", e))?;
    let identity_response = EapPacket::identity_response(request.identifier, username);

    let challenge = match authenticator.respond(&session_id, &identity_response.to_bytes()) {
        AuthDecision::Challenge { frame } => {
            EapPacket::from_bytes(&frame).map_err(|e| format!("bad challenge: {}", e))?
        }
        _ => return Err("expected a method challenge after identity".to_string()),
    };

    if challenge.data.is_empty() {
        return Err("empty challenge".to_string());
    }
    let digest = eap_md5::compute_response(
        challenge.identifier,
        password.as_bytes(),
        &challenge.data[1..],
    );
    let response = eap_md5::response_packet(challenge.identifier, &digest);

    match authenticator.respond(&session_id, &response.to_bytes()) {
        AuthDecision::Accept { identity, .. } => {
            info!(identity = %identity, "loopback exchange accepted");
            Ok(())
        }
        AuthDecision::Reject { .. } => Err("authenticator rejected the exchange".to_string()),
        _ => Err("unexpected decision".to_string()),
    }
}
