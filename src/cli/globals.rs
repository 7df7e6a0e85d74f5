use secrecy::SecretString;
use std::path::PathBuf;

/// Settings shared by every subcommand.
#[derive(Clone)]
pub struct GlobalArgs {
    pub identity_url: String,
    pub anon_key: SecretString,
    pub api_url: String,
    pub state_file: PathBuf,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(identity_url: String, anon_key: SecretString) -> Self {
        Self {
            identity_url,
            anon_key,
            api_url: "http://localhost:8080".to_string(),
            state_file: PathBuf::from(".hrms-state.json"),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: String) -> Self {
        self.api_url = api_url;
        self
    }

    #[must_use]
    pub fn with_state_file(mut self, state_file: PathBuf) -> Self {
        self.state_file = state_file;
        self
    }
}

impl std::fmt::Debug for GlobalArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalArgs")
            .field("identity_url", &self.identity_url)
            .field("anon_key", &"***")
            .field("api_url", &self.api_url)
            .field("state_file", &self.state_file)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let args = GlobalArgs::new(
            "https://auth.hrms.dev/auth/v1".to_string(),
            SecretString::from("anon-key"),
        );
        assert_eq!(args.identity_url, "https://auth.hrms.dev/auth/v1");
        assert_eq!(args.anon_key.expose_secret(), "anon-key");
        assert_eq!(args.api_url, "http://localhost:8080");
        assert_eq!(args.state_file, PathBuf::from(".hrms-state.json"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let args = GlobalArgs::new("http://localhost:9999".to_string(), SecretString::from("k3y"))
            .with_state_file(PathBuf::from("/tmp/state.json"));
        let debug = format!("{args:?}");
        assert!(!debug.contains("k3y"));
        assert!(debug.contains("/tmp/state.json"));
    }
}
