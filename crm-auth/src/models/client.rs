use sha2::{Digest, Sha256};

use super::session::DeviceInfo;

/// Request metadata the auth flows need: who is calling and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
    pub ip_address: String,
    pub user_agent: Option<String>,
    /// Client-supplied device identifier (`x-device-id`), if any.
    pub device_id: Option<String>,
}

impl ClientContext {
    pub fn new(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            user_agent: None,
            device_id: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// The explicit device id, or a stable fingerprint of user agent and address.
    pub fn device_fingerprint(&self) -> String {
        if let Some(id) = self.device_id.as_deref().filter(|id| !id.is_empty()) {
            return id.to_string();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.user_agent.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(self.ip_address.as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("fp_{}", &digest[..24])
    }

    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            device_id: self.device_fingerprint(),
            ip_address: self.ip_address.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_device_id_wins() {
        let ctx = ClientContext::new("10.0.0.1").with_device_id("laptop-7");
        assert_eq!(ctx.device_fingerprint(), "laptop-7");
    }

    #[test]
    fn fingerprint_is_stable_and_input_sensitive() {
        let a = ClientContext::new("10.0.0.1").with_user_agent("Firefox");
        let b = ClientContext::new("10.0.0.1").with_user_agent("Firefox");
        let c = ClientContext::new("10.0.0.2").with_user_agent("Firefox");

        assert_eq!(a.device_fingerprint(), b.device_fingerprint());
        assert_ne!(a.device_fingerprint(), c.device_fingerprint());
        assert!(a.device_fingerprint().starts_with("fp_"));
    }
}
