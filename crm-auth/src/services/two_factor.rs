use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use subtle::ConstantTimeEq;
use totp_rs::{Algorithm, Secret, TOTP};

const DIGITS: usize = 6;
const STEP_SECONDS: u64 = 30;
/// Accept the previous and next time step as well.
const SKEW_STEPS: u8 = 1;

const BACKUP_CODE_LEN: usize = 8;
/// Uppercase letters and digits minus the look-alikes (0/O, 1/I).
const BACKUP_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Everything the client needs to enrol an authenticator app.
#[derive(Debug, Clone)]
pub struct TwoFactorSetup {
    /// Base32 secret, stored on the user while setup is pending.
    pub secret: String,
    /// `data:image/png;base64,...` QR code of the provisioning URI.
    pub qr_code_url: String,
    pub backup_codes: Vec<String>,
    /// The secret in groups of four for typing by hand.
    pub manual_entry_key: String,
    pub otpauth_url: String,
}

/// Outcome of checking one submitted code. At most one factor matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TwoFactorVerification {
    Totp,
    BackupCode(String),
    Invalid,
}

impl TwoFactorVerification {
    pub fn is_valid(&self) -> bool {
        !matches!(self, TwoFactorVerification::Invalid)
    }

    pub fn used_backup_code(&self) -> Option<&str> {
        match self {
            TwoFactorVerification::BackupCode(code) => Some(code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwoFactorService {
    issuer: String,
    backup_code_count: usize,
}

impl TwoFactorService {
    pub fn new(issuer: impl Into<String>, backup_code_count: usize) -> Self {
        Self {
            issuer: issuer.into(),
            backup_code_count,
        }
    }

    fn totp(&self, secret_bytes: Vec<u8>, account: &str) -> Result<TOTP, anyhow::Error> {
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            SKEW_STEPS,
            STEP_SECONDS,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| anyhow::anyhow!("TOTP init error: {e}"))
    }

    fn totp_for_secret(&self, secret: &str) -> Result<TOTP, anyhow::Error> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Stored TOTP secret is not valid base32: {e:?}"))?;
        // Account label only matters for provisioning URIs.
        self.totp(bytes, "user")
    }

    pub fn generate_setup(&self, email: &str, user_id: &str) -> Result<TwoFactorSetup, anyhow::Error> {
        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| anyhow::anyhow!("Secret gen error: {e:?}"))?;
        let totp = self.totp(secret_bytes, email)?;

        let qr = totp
            .get_qr_base64()
            .map_err(|e| anyhow::anyhow!("QR gen error: {e}"))?;
        let secret = totp.get_secret_base32();

        tracing::debug!(user_id = %user_id, "Generated two-factor setup material");

        Ok(TwoFactorSetup {
            manual_entry_key: group_by_four(&secret),
            qr_code_url: format!("data:image/png;base64,{qr}"),
            otpauth_url: totp.get_url(),
            backup_codes: self.generate_backup_codes(),
            secret,
        })
    }

    /// A fresh set of distinct one-time codes.
    pub fn generate_backup_codes(&self) -> Vec<String> {
        let mut rng = rand::thread_rng();
        let mut seen = HashSet::with_capacity(self.backup_code_count);
        let mut codes = Vec::with_capacity(self.backup_code_count);

        while codes.len() < self.backup_code_count {
            let code: String = (0..BACKUP_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..BACKUP_CODE_ALPHABET.len());
                    BACKUP_CODE_ALPHABET[idx] as char
                })
                .collect();
            if seen.insert(code.clone()) {
                codes.push(code);
            }
        }

        codes
    }

    /// TOTP within the skew window. Unparseable secrets count as a mismatch.
    pub fn verify_totp_at(&self, secret: &str, code: &str, unix_time: u64) -> bool {
        let code = normalize(code);
        if code.len() != DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }

        match self.totp_for_secret(secret) {
            Ok(totp) => totp.check(&code, unix_time),
            Err(e) => {
                tracing::error!(error = %e, "Cannot verify TOTP code");
                false
            }
        }
    }

    pub fn verify_totp(&self, secret: &str, code: &str) -> bool {
        self.verify_totp_at(secret, code, now())
    }

    /// TOTP first, then the backup codes (case-insensitive).
    pub fn verify_token_at(
        &self,
        secret: &str,
        code: &str,
        backup_codes: &[String],
        unix_time: u64,
    ) -> TwoFactorVerification {
        if self.verify_totp_at(secret, code, unix_time) {
            return TwoFactorVerification::Totp;
        }

        let candidate = normalize(code).to_uppercase();
        let mut matched: Option<&String> = None;
        for stored in backup_codes {
            if bool::from(stored.as_bytes().ct_eq(candidate.as_bytes())) {
                matched = Some(stored);
            }
        }

        match matched {
            Some(code) => TwoFactorVerification::BackupCode(code.clone()),
            None => TwoFactorVerification::Invalid,
        }
    }

    pub fn verify_token(
        &self,
        secret: &str,
        code: &str,
        backup_codes: &[String],
    ) -> TwoFactorVerification {
        self.verify_token_at(secret, code, backup_codes, now())
    }

    /// The set with `used` taken out.
    pub fn remove_used_backup_code(&self, codes: &[String], used: &str) -> Vec<String> {
        codes
            .iter()
            .filter(|code| code.as_str() != used)
            .cloned()
            .collect()
    }

    /// Current code for a stored secret.
    pub fn generate_code(&self, secret: &str, unix_time: u64) -> Result<String, anyhow::Error> {
        Ok(self.totp_for_secret(secret)?.generate(unix_time))
    }
}

fn now() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

fn normalize(code: &str) -> String {
    code.chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect()
}

fn group_by_four(secret: &str) -> String {
    secret
        .as_bytes()
        .chunks(4)
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect::<Vec<_>>()
        .join(" ")
}
