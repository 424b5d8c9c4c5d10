use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use serde_json::json;
use tracing::debug;

use cryptotoken_manager::config::DEFAULT_CALLER;
use cryptotoken_manager::model::{AuthCode, Caller, TokenId, TokenProperties, KEEP_AUTO_ACTIVATION_PIN_KEY};
use cryptotoken_manager::{
    open_service, CryptoTokenManagementService, ManagerConfig, NewCryptoToken, SOFTWARE_TYPE,
};

#[derive(Parser, Debug)]
#[command(name = "ctm")]
#[command(about = "Crypto token manager", version)]
pub struct Cli {
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// TOML configuration file. Built-in defaults apply when omitted
    #[arg(long, env = "CTM_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Token store document, overriding the configured one
    #[arg(long, env = "CTM_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Caller checked against the configured access grants
    #[arg(long, env = "CTM_CALLER", default_value = DEFAULT_CALLER, global = true)]
    pub caller: String,

    /// Authentication code (keystore passphrase or slot PIN)
    #[arg(long, env = "CTM_CODE", hide_env_values = true, global = true)]
    pub code: Option<String>,

    /// New authentication code for update-pin
    #[arg(long, env = "CTM_NEW_CODE", hide_env_values = true, global = true)]
    pub new_code: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a crypto token and print its id
    Create {
        name: String,

        /// Token type tag
        #[arg(long = "type", default_value = SOFTWARE_TYPE)]
        type_tag: String,

        /// Explicit id. A random free id is allocated when omitted
        #[arg(long, allow_negative_numbers = true)]
        id: Option<TokenId>,

        /// Backend property as KEY=VALUE, repeatable
        #[arg(long = "property", value_parser = parse_property)]
        properties: Vec<(String, String)>,

        /// Store --code as the auto-activation PIN
        #[arg(long)]
        auto_activate: bool,
    },

    /// List the tokens the caller may view
    List,

    /// Show one token
    Info {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
    },

    /// Rename a token or change its properties
    Edit {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,

        #[arg(long)]
        name: Option<String>,

        /// Property to set as KEY=VALUE, repeatable
        #[arg(long = "set", value_parser = parse_property)]
        set: Vec<(String, String)>,

        /// Property to remove, repeatable
        #[arg(long = "unset")]
        unset: Vec<String>,

        /// Drop the stored auto-activation PIN instead of keeping it
        #[arg(long, conflicts_with = "auto_activate")]
        drop_auto_activation: bool,

        /// Store --code as the new auto-activation PIN
        #[arg(long)]
        auto_activate: bool,
    },

    /// Delete a token; deleting a missing id succeeds
    Delete {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
    },

    /// Check an authentication code, sealing a fresh keystore on first use
    Activate {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
    },

    /// List the key pairs of a token
    Keys {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
    },

    /// Generate a key pair and print its public key as hex
    GenerateKey {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
        alias: String,
        /// Key specification, e.g. Ed25519 or secp256r1
        key_spec: String,
    },

    /// Generate a symmetric key (AES128, AES192 or AES256)
    GenerateSecretKey {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
        alias: String,
        key_spec: String,
    },

    /// Generate a key pair with the specification of an existing one
    RenewKey {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
        current_alias: String,
        new_alias: String,
    },

    /// Remove a key entry
    RemoveKey {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
        alias: String,
    },

    /// Sign and verify a test message with a key pair
    TestKey {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,
        alias: String,
    },

    /// Change the code protecting a token (--code current, --new-code new)
    UpdatePin {
        #[arg(allow_negative_numbers = true)]
        id: TokenId,

        /// Only change a PIN that is already stored for auto-activation
        #[arg(long)]
        update_only: bool,
    },

    /// Print the id of the token with the given name
    Resolve { name: String },
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn auth_code(raw: Option<&str>, flag: &str) -> anyhow::Result<Option<AuthCode>> {
    raw.map(AuthCode::new)
        .transpose()
        .with_context(|| format!("invalid {flag}"))
}

fn load_config(cli: &Cli) -> anyhow::Result<ManagerConfig> {
    let mut config = match &cli.config {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    if let Some(store) = &cli.store {
        config.store_path = store.clone();
    }
    Ok(config)
}

/// Each invocation starts with a cold cache, so key operations activate
/// first when a code is given
fn unlock(
    service: &CryptoTokenManagementService,
    caller: &Caller,
    id: TokenId,
    code: Option<&AuthCode>,
) -> anyhow::Result<()> {
    if let Some(code) = code {
        if !service.is_active(caller, id)? {
            debug!("Activating crypto token {} before use", id);
            service
                .activate(caller, id, Some(code))
                .with_context(|| format!("failed to activate crypto token {id}"))?;
        }
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity.tracing_level_filter())
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let service = open_service(&config)
        .with_context(|| format!("failed to open token store {}", config.store_path.display()))?;
    let caller = Caller::new(cli.caller.as_str());
    let code = auth_code(cli.code.as_deref(), "--code")?;
    let new_code = auth_code(cli.new_code.as_deref(), "--new-code")?;

    match cli.command {
        Commands::Create {
            name,
            type_tag,
            id,
            properties,
            auto_activate,
        } => {
            let mut properties: TokenProperties = properties.into_iter().collect();
            let mut request = NewCryptoToken::new(name, type_tag);
            if let Some(id) = id {
                request = request.with_id(id);
            }
            if let Some(code) = &code {
                if auto_activate {
                    properties.set_auto_activation_pin(code);
                }
                request = request.with_auth_code(code.clone());
            } else if auto_activate {
                bail!("--auto-activate needs --code");
            }
            let id = service
                .create_crypto_token(&caller, request.with_properties(properties))
                .context("failed to create crypto token")?;
            println!("{id}");
        }

        Commands::List => {
            print_json(&service.list_infos(&caller)?)?;
        }

        Commands::Info { id } => match service.get_info(&caller, id)? {
            Some(info) => print_json(&info)?,
            None => bail!("no crypto token with id {id}"),
        },

        Commands::Edit {
            id,
            name,
            set,
            unset,
            drop_auto_activation,
            auto_activate,
        } => {
            let Some(info) = service.get_info(&caller, id)? else {
                bail!("no crypto token with id {id}");
            };
            let mut properties = info.properties;
            for (key, value) in set {
                properties.insert(key, value);
            }
            for key in &unset {
                properties.remove(key);
            }
            if auto_activate {
                let Some(code) = &code else {
                    bail!("--auto-activate needs --code");
                };
                properties.set_auto_activation_pin(code);
            } else if !drop_auto_activation {
                properties.insert(KEEP_AUTO_ACTIVATION_PIN_KEY, "true");
            }
            let name = name.unwrap_or(info.name);
            service
                .save_crypto_token(&caller, id, &name, properties, code.as_ref())
                .with_context(|| format!("failed to save crypto token {id}"))?;
        }

        Commands::Delete { id } => {
            service
                .delete_crypto_token(&caller, id)
                .with_context(|| format!("failed to delete crypto token {id}"))?;
        }

        Commands::Activate { id } => {
            service
                .activate(&caller, id, code.as_ref())
                .with_context(|| format!("failed to activate crypto token {id}"))?;
        }

        Commands::Keys { id } => {
            unlock(&service, &caller, id, code.as_ref())?;
            print_json(&service.list_key_pair_infos(&caller, id)?)?;
        }

        Commands::GenerateKey {
            id,
            alias,
            key_spec,
        } => {
            unlock(&service, &caller, id, code.as_ref())?;
            let public_key = service
                .create_key_pair(&caller, id, &alias, &key_spec)
                .context("failed to generate key pair")?;
            println!("{}", hex::encode(public_key.as_bytes()));
        }

        Commands::GenerateSecretKey {
            id,
            alias,
            key_spec,
        } => {
            unlock(&service, &caller, id, code.as_ref())?;
            service
                .generate_secret_key(&caller, id, &alias, &key_spec)
                .context("failed to generate secret key")?;
        }

        Commands::RenewKey {
            id,
            current_alias,
            new_alias,
        } => {
            unlock(&service, &caller, id, code.as_ref())?;
            let public_key = service
                .create_key_pair_with_same_spec(&caller, id, &current_alias, &new_alias)
                .context("failed to generate key pair")?;
            println!("{}", hex::encode(public_key.as_bytes()));
        }

        Commands::RemoveKey { id, alias } => {
            unlock(&service, &caller, id, code.as_ref())?;
            service
                .remove_key_pair(&caller, id, &alias)
                .with_context(|| format!("failed to remove key '{alias}'"))?;
        }

        Commands::TestKey { id, alias } => {
            unlock(&service, &caller, id, code.as_ref())?;
            service
                .test_key_pair(&caller, id, &alias)
                .with_context(|| format!("key pair '{alias}' failed the test"))?;
        }

        Commands::UpdatePin { id, update_only } => {
            let Some(current) = &code else {
                bail!("update-pin needs the current code in --code");
            };
            let auto_activation = service
                .update_pin(&caller, id, current, new_code.as_ref(), update_only)
                .with_context(|| format!("failed to update PIN of crypto token {id}"))?;
            print_json(&json!({ "id": id, "autoActivation": auto_activation }))?;
        }

        Commands::Resolve { name } => match service.resolve_id_by_name(&caller, &name)? {
            Some(id) => println!("{id}"),
            None => bail!("no crypto token named '{name}'"),
        },
    }

    Ok(())
}
