use clap::{Parser, Subcommand};
use relay::registry::open_registry;
use relay::tenant::{redact, RegistrationForm, TenantRecord};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Multi-tenant LINE to Coze relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config, and the attachments directory.
    Init {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the webhook gateway (registration form, LINE webhooks, staged attachments).
    Gateway {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 8080)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Register a tenant directly in the configured registry and print its webhook URL.
    Register {
        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        #[arg(long, value_name = "ID")]
        channel_id: String,

        #[arg(long, value_name = "SECRET")]
        channel_secret: String,

        #[arg(long, value_name = "TOKEN")]
        channel_access_token: String,

        #[arg(long, value_name = "ID")]
        bot_id: String,

        #[arg(long, value_name = "KEY")]
        api_key: String,

        #[arg(long, value_name = "NAME")]
        bucket: String,

        /// Public server root for the webhook URL (default: RELAY_PUBLIC_URL, server.publicUrl, or http://localhost:<port>)
        #[arg(long, value_name = "URL")]
        root: Option<String>,
    },

    /// Show the stored record for a channel with secrets masked.
    Show {
        channel_id: String,

        /// Config file path (default: RELAY_CONFIG_PATH or ~/.relay/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("relay {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Register {
            config,
            channel_id,
            channel_secret,
            channel_access_token,
            bot_id,
            api_key,
            bucket,
            root,
        }) => {
            let form = RegistrationForm {
                line_channel_id: channel_id,
                line_channel_secret: channel_secret,
                line_channel_access_token: channel_access_token,
                coze_bot_id: bot_id,
                coze_api_key: api_key,
                cloud_storage_bucket_name: bucket,
            };
            if let Err(e) = run_register(config, form, root).await {
                log::error!("register failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Show { channel_id, config }) => {
            if let Err(e) = run_show(config, &channel_id).await {
                log::error!("show failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(relay::config::default_config_path);
    let dir = relay::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = relay::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!("starting gateway on {}:{}", config.server.bind, config.server.port);
    relay::gateway::run_gateway(config, path).await
}

async fn run_register(
    config_path: Option<std::path::PathBuf>,
    form: RegistrationForm,
    root: Option<String>,
) -> anyhow::Result<()> {
    let (config, path) = relay::config::load_config(config_path)?;
    let root = root
        .or_else(|| relay::config::resolve_public_url(&config))
        .unwrap_or_else(|| format!("http://localhost:{}", config.server.port));
    let registry = open_registry(&config, &path).await?;
    let record = TenantRecord::new(form.into(), &root);
    let url = record.callback_url.clone();
    registry.put(record).await?;
    println!("{}", url);
    Ok(())
}

async fn run_show(config_path: Option<std::path::PathBuf>, channel_id: &str) -> anyhow::Result<()> {
    let (config, path) = relay::config::load_config(config_path)?;
    let registry = open_registry(&config, &path).await?;
    let Some(record) = registry.get(channel_id).await? else {
        anyhow::bail!("no tenant registered for channel {}", channel_id);
    };
    let creds = &record.credentials;
    println!("line_channel_id:           {}", creds.line_channel_id);
    println!("line_channel_secret:       {}", redact(&creds.line_channel_secret));
    println!("line_channel_access_token: {}", redact(&creds.line_channel_access_token));
    println!("coze_bot_id:               {}", creds.coze_bot_id);
    println!("coze_api_key:              {}", redact(&creds.coze_api_key));
    println!("cloud_storage_bucket_name: {}", creds.cloud_storage_bucket_name);
    println!("webhook url:               {}", record.callback_url);
    Ok(())
}
