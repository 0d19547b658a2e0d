//! CLI command implementations

use anyhow::Result;
use dialoguer::{Confirm, Input, Password, Select};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::keys::generate_secret;
use crate::store::{
    AuthenticatorStore, Ceremony, FileHandleCache, KeyringVault, LocalAuthenticator,
    PresenceCheck, ProtectionKind, TerminalPresence,
};
use crate::wallet::{OnboardingOutcome, SigpassWallet, UnlockedWallet, WalletManager};

fn presence() -> Arc<dyn PresenceCheck> {
    Arc::new(TerminalPresence)
}

fn open_manager(config: &Config) -> Result<WalletManager> {
    WalletManager::from_config(config, presence())
        .map_err(|e| anyhow::anyhow!("Failed to open wallet registry: {}", e))
}

fn open_sigpass(config: &Config) -> SigpassWallet {
    let local = LocalAuthenticator::new(
        config.storage.credentials_path(),
        Arc::new(KeyringVault::new()),
        presence(),
    );
    let authenticator = AuthenticatorStore::new(Arc::new(local), &config.authenticator.rp_id)
        .with_enabled(config.authenticator.enabled);
    let cache = FileHandleCache::new(config.storage.cache_path());
    SigpassWallet::new(authenticator, Arc::new(cache))
}

fn prompt_new_password(min_len: usize) -> Result<String> {
    let password = Password::new()
        .with_prompt(format!("Password (min {} characters)", min_len))
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;
    Ok(password)
}

fn password_or_prompt(password: Option<String>, name: &str) -> Result<String> {
    match password {
        Some(password) => Ok(password),
        None => Ok(Password::new()
            .with_prompt(format!("Password for '{}'", name))
            .interact()?),
    }
}

/// Unlock a wallet, prompting for a password when it needs one
async fn unlock_wallet(
    manager: &mut WalletManager,
    name: Option<&str>,
    password: Option<String>,
) -> Result<Option<UnlockedWallet>> {
    let identifier = manager.resolve(name)?.clone();

    let password = match identifier.kind() {
        ProtectionKind::Password => Some(password_or_prompt(password, &identifier.name)?),
        ProtectionKind::Authenticator => None,
    };

    match manager
        .unlock(Some(&identifier.name), password.as_deref())
        .await?
    {
        Ceremony::Completed(wallet) => Ok(Some(wallet)),
        Ceremony::Cancelled => {
            println!("Unlock cancelled.");
            Ok(None)
        }
    }
}

/// Create a registered wallet
pub async fn wallet_create(
    config: &Config,
    name: Option<String>,
    protection: Option<ProtectionKind>,
    password: Option<String>,
    show_mnemonic: bool,
) -> Result<()> {
    let mut manager = open_manager(config)?;
    let mut flow = manager.onboarding();
    flow.begin()?;

    let kind = match protection {
        Some(kind) => kind,
        None if !flow.authenticator_available() => {
            println!("Passkeys are not available here, using a password.");
            ProtectionKind::Password
        }
        None => {
            let choice = Select::new()
                .with_prompt("Protect the wallet with")
                .items(&["Passkey", "Password"])
                .default(0)
                .interact()?;
            if choice == 0 {
                ProtectionKind::Authenticator
            } else {
                ProtectionKind::Password
            }
        }
    };
    flow.choose(kind)?;

    let name = match name {
        Some(name) => name,
        None => Input::<String>::new()
            .with_prompt("Wallet name")
            .interact_text()?,
    };
    flow.set_name(&name)?;

    let outcome = match kind {
        ProtectionKind::Authenticator => flow.create_with_authenticator().await?,
        ProtectionKind::Password => {
            let password = match password {
                Some(password) => password,
                None => prompt_new_password(config.wallet.min_password_length)?,
            };
            flow.create_with_password(&password).await?
        }
    };

    let (identifier, mnemonic) = match outcome {
        OnboardingOutcome::Registered {
            identifier,
            mnemonic,
        } => (identifier, mnemonic),
        OnboardingOutcome::Cancelled => {
            println!("Wallet creation cancelled. Nothing was stored.");
            return Ok(());
        }
    };

    println!("\n=== WALLET CREATED ===");
    println!("Name: {}", identifier.name);
    println!("Protection: {}", identifier.kind());
    println!("Address: {}", identifier.address);

    if show_mnemonic {
        println!("\nBackup phrase (write it down, it will not be shown again):\n");
        println!("  {}\n", mnemonic.as_str());
    } else {
        println!("\nBackup phrase not shown. Use 'sigpass wallet export' after unlocking.");
    }

    Ok(())
}

/// List registered wallets
pub async fn wallet_list(config: &Config) -> Result<()> {
    let manager = open_manager(config)?;
    let last = manager.registry().last_wallet().map(|id| id.name.clone());

    println!("\n=== REGISTERED WALLETS ===\n");
    println!("{:<3} {:<24} {:<10} {}", "", "NAME", "TYPE", "ADDRESS");
    println!("{}", "-".repeat(80));

    for wallet in manager.list() {
        let marker = if last.as_deref() == Some(wallet.name.as_str()) {
            "*"
        } else {
            ""
        };
        println!(
            "{:<3} {:<24} {:<10} {}",
            marker,
            wallet.name,
            wallet.kind().to_string(),
            wallet.address
        );
    }

    if manager.list().is_empty() {
        println!("(none) - create one with 'sigpass wallet create'");
    }

    println!();
    Ok(())
}

/// Show registry status
pub async fn wallet_status(config: &Config) -> Result<()> {
    let manager = open_manager(config)?;
    let status = manager.status();

    println!("\n=== WALLET STATUS ===\n");
    println!("Wallets: {}", status.wallet_count);
    match &status.last_wallet {
        Some(last) => println!("Active: {} ({})", last.name, last.address),
        None => println!("Active: (none)"),
    }
    match (status.unlocked, status.unlocked_at) {
        (true, Some(at)) => println!("State: UNLOCKED since {}", at.to_rfc3339()),
        (false, Some(at)) => println!("State: LOCKED (unlock from {} expired)", at.to_rfc3339()),
        _ => println!("State: LOCKED"),
    }
    println!(
        "Passkeys: {}",
        if status.authenticator_supported {
            "available"
        } else {
            "unavailable"
        }
    );
    println!();
    Ok(())
}

/// Unlock a wallet
pub async fn wallet_unlock(
    config: &Config,
    name: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let mut manager = open_manager(config)?;
    if let Some(wallet) = unlock_wallet(&mut manager, name.as_deref(), password).await? {
        println!("Unlocked '{}'", wallet.identifier().name);
        println!("Address: {}", wallet.account().address());
    }
    Ok(())
}

/// Lock all wallets
pub async fn wallet_lock(config: &Config) -> Result<()> {
    let mut manager = open_manager(config)?;
    manager.lock()?;
    println!("Wallets locked.");
    Ok(())
}

/// Sign an EIP-191 message
pub async fn wallet_sign(
    config: &Config,
    name: Option<String>,
    message: &str,
    password: Option<String>,
) -> Result<()> {
    let mut manager = open_manager(config)?;
    let Some(wallet) = unlock_wallet(&mut manager, name.as_deref(), password).await? else {
        return Ok(());
    };

    let signature = wallet.account().sign_message(message.as_bytes())?;
    info!("Signed {} bytes with {}", message.len(), wallet.account().address());

    println!("Address: {}", wallet.account().address());
    println!("Signature: {}", signature);
    Ok(())
}

/// Reveal a wallet's backup phrase
pub async fn wallet_export(
    config: &Config,
    name: Option<String>,
    password: Option<String>,
    force: bool,
) -> Result<()> {
    if !force {
        let confirmed = Confirm::new()
            .with_prompt("Print the backup phrase to this terminal?")
            .default(false)
            .interact()?;
        if !confirmed {
            info!("Export cancelled by user");
            return Ok(());
        }
    }

    let mut manager = open_manager(config)?;
    let Some(wallet) = unlock_wallet(&mut manager, name.as_deref(), password).await? else {
        return Ok(());
    };

    let mnemonic = wallet.mnemonic()?;
    warn!("Backup phrase for '{}' exported", wallet.identifier().name);
    println!("\n  {}\n", mnemonic.as_str());
    Ok(())
}

/// Forget all registered wallets
pub async fn wallet_reset(config: &Config, force: bool) -> Result<()> {
    let mut manager = open_manager(config)?;
    let count = manager.list().len();
    if count == 0 {
        println!("Registry is already empty.");
        return Ok(());
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Forget {} wallet(s)? Without a backup phrase they cannot be recovered.",
                count
            ))
            .default(false)
            .interact()?;
        if !confirmed {
            info!("Reset cancelled by user");
            return Ok(());
        }
    }

    manager.reset()?;
    println!("Registry cleared ({} wallet(s) forgotten).", count);
    Ok(())
}

/// Create the single passkey wallet
pub async fn passkey_create(config: &Config, name: &str) -> Result<()> {
    let wallet = open_sigpass(config);
    if wallet.check()? {
        anyhow::bail!("A passkey wallet already exists here. Run 'sigpass passkey forget' first.");
    }

    match wallet.create(name).await? {
        Ceremony::Completed(handle) => {
            debug!("Passkey handle {:?}", handle);
            println!("Passkey wallet created.");
            println!("Run 'sigpass passkey address' to see its address.");
        }
        Ceremony::Cancelled => println!("Passkey creation cancelled."),
    }
    Ok(())
}

/// Report whether the passkey wallet exists
pub async fn passkey_status(config: &Config) -> Result<()> {
    let wallet = open_sigpass(config);
    if wallet.check()? {
        println!("Passkey wallet: PRESENT");
    } else {
        println!("Passkey wallet: NONE");
    }
    Ok(())
}

/// Assert the passkey and print the account address
pub async fn passkey_address(config: &Config) -> Result<()> {
    let wallet = open_sigpass(config);
    match wallet.get().await? {
        Ceremony::Completed(account) => println!("Address: {}", account.address()),
        Ceremony::Cancelled => println!("Passkey assertion cancelled."),
    }
    Ok(())
}

/// Remove the passkey wallet
pub async fn passkey_forget(config: &Config, force: bool) -> Result<()> {
    let wallet = open_sigpass(config);
    if !wallet.check()? {
        println!("No passkey wallet to forget.");
        return Ok(());
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt("Delete the passkey wallet? Its secret cannot be recovered afterwards.")
            .default(false)
            .interact()?;
        if !confirmed {
            info!("Forget cancelled by user");
            return Ok(());
        }
    }

    wallet.forget().await?;
    println!("Passkey wallet removed.");
    Ok(())
}

/// Show configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check the local environment
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("Random source... ");
    match generate_secret() {
        Ok(_) => println!("OK"),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Data directory... ");
    match check_data_dir(config) {
        Ok(()) => println!("OK ({})", config.storage.data_dir.display()),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Registry... ");
    match open_manager(config) {
        Ok(manager) => println!("OK ({} wallet(s))", manager.list().len()),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Credentials... ");
    match check_credentials(config) {
        Ok(count) => println!("OK ({} credential(s))", count),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    if !config.authenticator.enabled {
        println!("Passkeys... DISABLED");
    } else if TerminalPresence.is_available() {
        println!("Passkeys... OK");
    } else {
        println!("Passkeys... UNAVAILABLE (no interactive terminal)");
    }

    println!();
    if all_healthy {
        println!("All checks passed!");
    } else {
        println!("Some checks failed. See the errors above.");
    }

    Ok(())
}

fn check_data_dir(config: &Config) -> Result<()> {
    let dir = &config.storage.data_dir;
    std::fs::create_dir_all(dir)?;
    let marker = dir.join(".health");
    std::fs::write(&marker, b"ok")?;
    std::fs::remove_file(&marker)?;
    Ok(())
}

/// Count credential files, failing on any that group or others can read
fn check_credentials(config: &Config) -> Result<usize> {
    let dir = config.storage.credentials_path();
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut count = 0;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path)?.permissions().mode();
            if mode & 0o077 != 0 {
                anyhow::bail!(
                    "{} has insecure permissions {:o}. Run 'chmod 600 {}'",
                    path.display(),
                    mode & 0o777,
                    path.display()
                );
            }
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn test_check_data_dir() {
        let dir = tempdir().unwrap();
        let config = config_in(&dir.path().join("data"));
        check_data_dir(&config).unwrap();
        assert!(config.storage.data_dir.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_check_credentials_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let config = config_in(dir.path());
        assert_eq!(check_credentials(&config).unwrap(), 0);

        let creds = config.storage.credentials_path();
        std::fs::create_dir_all(&creds).unwrap();
        let file = creds.join("abcd.json");
        std::fs::write(&file, "{}").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert_eq!(check_credentials(&config).unwrap(), 1);

        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(check_credentials(&config).is_err());
    }
}
