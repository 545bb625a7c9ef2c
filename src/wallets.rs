use crate::{
    Error,
    Result,
};
use alloy::signers::local::PrivateKeySigner;
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use tracing::info;

/// An encrypted JSON keystore on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeystoreEntry {
    pub name: String,
    pub path: PathBuf,
}

impl KeystoreEntry {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

/// `~/.foundry/keystores`, the usual home of EVM keystores.
pub fn default_keystore_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .map_err(|_| Error::Config(String::from("HOME environment variable not set")))?;
    Ok(PathBuf::from(home).join(".foundry").join("keystores"))
}

pub fn resolve_keystore_dir(dir: Option<&str>) -> Result<PathBuf> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_keystore_dir(),
    }
}

/// Files in `dir`, named by file stem, sorted by name.
pub fn list_keystores(dir: &Path) -> Result<Vec<KeystoreEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let read_err = |e: std::io::Error| {
        Error::Config(format!("failed to read keystore directory {}: {e}", dir.display()))
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        entries.push(KeystoreEntry::new(name, path.clone()));
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

pub fn find_keystore(dir: &Path, name: &str) -> Result<KeystoreEntry> {
    list_keystores(dir)?
        .into_iter()
        .find(|entry| entry.name == name)
        .ok_or_else(|| {
            Error::Config(format!("keystore '{name}' not found in {}", dir.display()))
        })
}

pub fn decrypt_keystore(entry: &KeystoreEntry, password: &str) -> Result<PrivateKeySigner> {
    let secret = decrypt_key(&entry.path, password.as_bytes()).map_err(|_| {
        Error::Config(format!("invalid password for keystore '{}'", entry.name))
    })?;
    PrivateKeySigner::from_slice(&secret).map_err(|e| {
        Error::Config(format!("keystore '{}' holds no usable key: {e}", entry.name))
    })
}

/// Prompts for the password on the terminal.
pub fn unlock_keystore(entry: &KeystoreEntry) -> Result<PrivateKeySigner> {
    let prompt = format!("Enter password for keystore '{}': ", entry.name);
    let password = prompt_password(prompt)
        .map_err(|e| Error::Config(format!("failed to read password: {e}")))?;
    let signer = decrypt_keystore(entry, &password)?;
    info!(keystore = %entry.name, address = %signer.address(), "keystore unlocked");
    Ok(signer)
}

pub fn signer_from_hex(key: &str) -> Result<PrivateKeySigner> {
    key.trim()
        .parse::<PrivateKeySigner>()
        .map_err(|e| Error::Config(format!("invalid private key: {e}")))
}
