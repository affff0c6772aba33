//! Subcommand handlers.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, warn};

use shopdesk_core::api::{ApiClientBuilder, RequestBody, RequestOptions};
use shopdesk_core::auth::LoginRedirect;
use shopdesk_core::config::TokenStoreKind;
use shopdesk_core::models::{ImageUpload, ProfileUpdate, RegistrationForm};
use shopdesk_core::{ApiClient, ApiError, Config};

use crate::format;
use crate::{ConfigCommand, ProductsCommand, ProfileCommand};

/// Login redirect for a terminal: there is no page to navigate to, so point
/// the user at the login command instead.
struct LoginHint;

impl LoginRedirect for LoginHint {
    fn redirect_to_login(&self, login_path: &str) {
        warn!(login_path, "Session expired, login required");
        eprintln!("Your session has expired. Run `shopdesk login` to sign in again.");
    }
}

pub fn build_client(config: &Config) -> Result<ApiClient> {
    let store = config.open_token_store(None)?;
    let client = ApiClientBuilder::from_config(config)
        .token_store(store)
        .login_redirect(Arc::new(LoginHint))
        .build()?;
    Ok(client)
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

// ===== Session =====

pub async fn login(client: &ApiClient, config: &Config, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| config.last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    if email.is_empty() {
        anyhow::bail!("Email is required");
    }
    let password = rpassword::prompt_password(format!("Password for {}: ", email))?;

    client.login(&email, &password).await?;
    println!("Logged in as {}", email);

    if config.last_email.as_deref() != Some(email.as_str()) {
        let mut config = config.clone();
        config.last_email = Some(email);
        if let Err(e) = config.save() {
            warn!(error = %e, "Failed to remember login email");
        }
    }
    Ok(())
}

pub async fn logout(client: &ApiClient) -> Result<()> {
    client.logout().await?;
    println!("Logged out");
    Ok(())
}

pub async fn register(
    client: &ApiClient,
    first_name: String,
    last_name: String,
    email: String,
) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm_password = rpassword::prompt_password("Confirm password: ")?;
    let form = RegistrationForm {
        first_name,
        last_name,
        email,
        password,
        confirm_password,
    };
    form.validate().map_err(ApiError::Validation)?;

    let registered = client.register(&form).await?;
    println!("Account created for {}", registered.user.display_name());
    println!("Run `shopdesk login --email {}` to sign in.", registered.user.email);
    Ok(())
}

pub fn status(client: &ApiClient) -> Result<()> {
    let status = client.session_status()?;
    println!("API:      {}", client.base_url());

    if !status.is_logged_in() {
        println!("Session:  not logged in");
        return Ok(());
    }

    println!(
        "Session:  access token {}, refresh token {}",
        if status.has_access { "stored" } else { "missing" },
        if status.has_refresh { "stored" } else { "missing" },
    );
    match (status.access_expires_at, status.minutes_until_expiry()) {
        (Some(_), _) if status.is_expired() => {
            println!("Expires:  expired (will refresh on next request)")
        }
        (Some(at), Some(minutes)) => println!(
            "Expires:  {} (in {})",
            at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
            format::format_remaining(minutes)
        ),
        _ => println!("Expires:  unknown"),
    }
    Ok(())
}

// ===== Resources =====

pub async fn profile(client: &ApiClient, command: ProfileCommand) -> Result<()> {
    let profile = match command {
        ProfileCommand::Show => client.profile().await?,
        ProfileCommand::Update { bio, picture } => {
            let mut update = ProfileUpdate::default();
            if let Some(bio) = bio {
                update = update.bio(bio);
            }
            if let Some(path) = picture {
                update = update.profile_picture(ImageUpload::from_path(&path)?);
            }
            let profile = client.update_profile(update).await?;
            println!("Profile updated");
            profile
        }
    };

    for line in format::profile_detail(&profile) {
        println!("{}", line);
    }
    Ok(())
}

pub async fn products(client: &ApiClient, command: ProductsCommand) -> Result<()> {
    match command {
        ProductsCommand::List => {
            let products = client.list_products().await?;
            if products.is_empty() {
                println!("No products yet. Upload an image with `shopdesk products upload`.");
                return Ok(());
            }
            println!("{}", format::product_header());
            for product in &products {
                println!("{}", format::product_row(product));
            }
        }
        ProductsCommand::Show { id } => {
            let product = client.product(id).await?;
            for line in format::product_detail(&product) {
                println!("{}", line);
            }
        }
        ProductsCommand::Upload { path, platform } => {
            let image = ImageUpload::from_path(&path)?;
            eprintln!("Uploading {} ({} bytes)...", image.file_name, image.len());
            let uploaded = client.upload_product(platform, image).await?;
            println!("Created product {}: {}", uploaded.id, uploaded.product_name);
            if let Some(csv) = uploaded.csv_file {
                println!("CSV: {}", csv);
            }
        }
        ProductsCommand::Delete { id, platform } => {
            let message = client.delete_product(platform, id).await?;
            if message.is_empty() {
                println!("Deleted product {}", id);
            } else {
                println!("{}", message);
            }
        }
    }
    Ok(())
}

pub async fn raw_request(
    client: &ApiClient,
    method: &str,
    path: &str,
    json: Option<&str>,
) -> Result<()> {
    let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let body = match json {
        Some(raw) => RequestBody::Json(serde_json::from_str(raw).context("--json is not valid JSON")?),
        None => RequestBody::Empty,
    };

    let response = client
        .request(method, path, body, RequestOptions::default())
        .await?;
    debug!(status = response.status().as_u16(), "Raw request finished");

    match response.json::<Value>() {
        Ok(Value::Null) => println!("{}", response.status()),
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(_) => println!("{}", response.text()),
    }
    Ok(())
}

// ===== Configuration =====

pub fn config(config: &Config, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
            if let Ok(dir) = config.data_dir() {
                println!("Token files: {}", dir.display());
            }
            if let Ok(dir) = config.cache_dir() {
                println!("Logs:        {}", dir.display());
            }
        }
        ConfigCommand::SetUrl { url } => {
            let mut updated = Config::load()?;
            updated.api_url = url.trim().to_string();
            updated.validate()?;
            updated.save()?;
            println!("API URL set to {}", updated.api_url);
        }
        ConfigCommand::SetStore { kind } => {
            let kind: TokenStoreKind = kind.parse()?;
            let mut updated = Config::load()?;
            if updated.token_store != kind {
                eprintln!("Tokens in the previous store are not moved; log in again afterwards.");
            }
            updated.token_store = kind;
            updated.save()?;
            println!("Token store set to {}", kind);
        }
    }
    Ok(())
}
