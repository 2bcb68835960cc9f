//! Secure Settings Storage
//!
//! Encrypted file-based storage for [`AppSettings`]. Provider API keys are
//! encrypted with AES-256-GCM before they touch the disk.

use super::{AppSettings, ProviderSettings};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::types::{AppError, AppResult};

const SETTINGS_FILE: &str = "settings.json";
const ENCRYPTION_KEY_FILE: &str = ".settings_key";
const NONCE_SIZE: usize = 12;

pub struct SettingsStorage {
    settings_path: PathBuf,
    key_path: PathBuf,
}

impl SettingsStorage {
    pub fn with_path(base_dir: impl AsRef<Path>) -> Self {
        let base_dir = base_dir.as_ref();
        Self {
            settings_path: base_dir.join(SETTINGS_FILE),
            key_path: base_dir.join(ENCRYPTION_KEY_FILE),
        }
    }

    async fn ensure_dir(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn get_or_create_key(&self) -> anyhow::Result<[u8; 32]> {
        self.ensure_dir().await?;

        if fs::try_exists(&self.key_path).await? {
            let key_data = fs::read(&self.key_path).await?;
            let key_bytes = BASE64.decode(key_data.trim_ascii())?;
            if key_bytes.len() == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(&key_bytes);
                return Ok(key);
            }
            warn!("Settings key file is malformed, generating a new key");
        }

        let key: [u8; 32] = rand::random();
        fs::write(&self.key_path, BASE64.encode(key)).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.key_path, perms).await?;
        }

        info!("Generated new encryption key for settings");
        Ok(key)
    }

    fn encrypt(&self, plaintext: &str, key: &[u8; 32]) -> anyhow::Result<String> {
        let cipher = Aes256Gcm::new_from_slice(key)?;
        let nonce_bytes: [u8; NONCE_SIZE] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        // nonce || ciphertext
        let mut combined = nonce_bytes.to_vec();
        combined.extend(ciphertext);
        Ok(BASE64.encode(&combined))
    }

    fn decrypt(&self, encrypted: &str, key: &[u8; 32]) -> anyhow::Result<String> {
        let combined = BASE64.decode(encrypted)?;
        if combined.len() < NONCE_SIZE {
            return Err(anyhow::anyhow!("Invalid encrypted data"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new_from_slice(key)?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(Into::into)
    }

    pub async fn load(&self) -> anyhow::Result<AppSettings> {
        if !fs::try_exists(&self.settings_path).await? {
            info!("No settings file found, using defaults");
            return Ok(AppSettings::default());
        }

        let key = self.get_or_create_key().await?;
        let content = fs::read_to_string(&self.settings_path).await?;
        let mut settings: AppSettings = serde_json::from_str(&content)?;

        self.decrypt_provider_key(&mut settings.openai, &key);
        self.decrypt_provider_key(&mut settings.gemini, &key);
        self.decrypt_provider_key(&mut settings.ollama, &key);

        info!(path = ?self.settings_path, "Loaded settings");
        Ok(settings)
    }

    /// Write to a sibling temp file and rename over the old document
    pub async fn save(&self, settings: &AppSettings) -> anyhow::Result<()> {
        self.ensure_dir().await?;
        let key = self.get_or_create_key().await?;

        let mut encrypted = settings.clone();
        self.encrypt_provider_key(&mut encrypted.openai, &key)?;
        self.encrypt_provider_key(&mut encrypted.gemini, &key)?;
        self.encrypt_provider_key(&mut encrypted.ollama, &key)?;

        let content = serde_json::to_string_pretty(&encrypted)?;
        let tmp_path = self.settings_path.with_extension("json.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, &self.settings_path).await?;

        info!(path = ?self.settings_path, "Saved settings");
        Ok(())
    }

    fn encrypt_provider_key(&self, config: &mut ProviderSettings, key: &[u8; 32]) -> anyhow::Result<()> {
        if let Some(api_key) = &config.api_key {
            if !api_key.is_empty() {
                config.api_key = Some(self.encrypt(api_key, key)?);
            }
        }
        Ok(())
    }

    fn decrypt_provider_key(&self, config: &mut ProviderSettings, key: &[u8; 32]) {
        if let Some(encrypted_key) = &config.api_key {
            if !encrypted_key.is_empty() {
                match self.decrypt(encrypted_key, key) {
                    Ok(decrypted) => config.api_key = Some(decrypted),
                    Err(e) => {
                        warn!("Failed to decrypt API key, it may be corrupted: {}", e);
                        config.api_key = None;
                    }
                }
            }
        }
    }
}

/// Shared, cached view of the persisted settings.
///
/// Readers clone a snapshot; writers hold `write_lock` across the
/// load-modify-save cycle so concurrent updates apply one after another.
#[derive(Clone)]
pub struct SettingsHandle {
    storage: Arc<SettingsStorage>,
    cache: Arc<RwLock<AppSettings>>,
    write_lock: Arc<Mutex<()>>,
}

impl SettingsHandle {
    pub async fn load(dir: impl AsRef<Path>) -> AppResult<Self> {
        let storage = SettingsStorage::with_path(dir);
        let settings = storage
            .load()
            .await
            .map_err(|e| AppError::Internal(format!("Failed to load settings: {}", e)))?;
        Ok(Self::from_parts(storage, settings))
    }

    /// In-memory handle that persists to `dir` without reading it first
    pub fn from_parts(storage: SettingsStorage, settings: AppSettings) -> Self {
        Self {
            storage: Arc::new(storage),
            cache: Arc::new(RwLock::new(settings)),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn snapshot(&self) -> AppSettings {
        self.cache.read().await.clone()
    }

    /// Apply `change` to the current settings and persist the result.
    /// The cache is only replaced after the write succeeds.
    pub async fn update<F>(&self, change: F) -> AppResult<AppSettings>
    where
        F: FnOnce(&mut AppSettings) -> AppResult<()>,
    {
        let _guard = self.write_lock.lock().await;
        let mut next = self.snapshot().await;
        change(&mut next)?;

        self.storage
            .save(&next)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to save settings: {}", e)))?;

        *self.cache.write().await = next.clone();
        Ok(next)
    }
}
