use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use hmac::Mac;
use rusqlite::Connection;
use sha2::Sha256;
use std::sync::Arc;
use tokio::sync::Mutex;

type HmacSha256 = hmac::Hmac<Sha256>;

/// Encrypted store for platform credentials. Destinations carry only a
/// credential *reference*; connectors resolve the material here at
/// publish time, so the pipeline never holds secrets in run state.
pub struct CredentialVault {
    db: Arc<Mutex<Connection>>,
    cipher: Aes256Gcm,
}

/// Derive a 256-bit encryption key from machine-specific identifiers.
/// Uses HMAC-SHA256(hostname + username, "wirebot-credentials-v1") so the
/// key is stable across restarts but tied to the local machine/user.
fn derive_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    let input = format!("{}{}", hostname, username);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"wirebot-credentials-v1")
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    let result = mac.finalize();
    let bytes = result.into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

impl CredentialVault {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        let key = derive_key();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is valid for AES-256");
        Self { db, cipher }
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "CREATE TABLE IF NOT EXISTS platform_credentials (
                credential_ref TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Returns plaintext.
    fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }

    pub async fn store(&self, credential_ref: &str, value: &str) -> Result<()> {
        let encrypted = self.encrypt(value)?;
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO platform_credentials (credential_ref, value) VALUES (?1, ?2)
             ON CONFLICT(credential_ref) DO UPDATE SET value=excluded.value",
            (credential_ref, &encrypted),
        )?;
        Ok(())
    }

    pub async fn resolve(&self, credential_ref: &str) -> Result<Option<String>> {
        let encrypted: Option<String> = {
            let db = self.db.lock().await;
            let mut stmt =
                db.prepare("SELECT value FROM platform_credentials WHERE credential_ref = ?1")?;
            let mut rows = stmt.query([credential_ref])?;
            match rows.next()? {
                Some(row) => Some(row.get(0)?),
                None => None,
            }
        };
        match encrypted {
            Some(value) => Ok(Some(self.decrypt(&value)?)),
            None => Ok(None),
        }
    }

    /// Resolve a credential stored as a JSON object (the common shape for
    /// multi-field platform credentials).
    pub async fn resolve_json(&self, credential_ref: &str) -> Result<Option<serde_json::Value>> {
        match self.resolve(credential_ref).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|e| {
                anyhow::anyhow!("credential '{}' is not valid JSON: {}", credential_ref, e)
            })?)),
            None => Ok(None),
        }
    }

    pub async fn remove(&self, credential_ref: &str) -> Result<bool> {
        let db = self.db.lock().await;
        let deleted = db.execute(
            "DELETE FROM platform_credentials WHERE credential_ref = ?1",
            [credential_ref],
        )?;
        Ok(deleted > 0)
    }

    pub async fn list_refs(&self) -> Result<Vec<String>> {
        let db = self.db.lock().await;
        let mut stmt =
            db.prepare("SELECT credential_ref FROM platform_credentials ORDER BY credential_ref")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut refs = Vec::new();
        for row in rows {
            refs.push(row?);
        }
        Ok(refs)
    }
}
