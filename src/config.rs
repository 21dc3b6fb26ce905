use std::{fs::read_to_string, path::Path};

use serde::{Deserialize, Serialize};

use crate::{brl::Brl, properties::Meta, RelayError};

/// Identity and connection settings for one graph instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Origin of the hosting graph server, e.g. `https://graph.example.com`.
    pub host: String,
    /// Application id this instance publishes under.
    pub application: String,
    /// Account id identifying this instance to its peers.
    pub account: String,
    /// Descriptive metadata advertised with the application.
    #[serde(default)]
    pub meta: Meta,
}

impl GraphConfig {
    pub fn new(
        host: impl Into<String>,
        application: impl Into<String>,
        account: impl Into<String>,
    ) -> GraphConfig {
        GraphConfig {
            host: host.into().trim_end_matches('/').to_string(),
            application: application.into(),
            account: account.into(),
            meta: Meta::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<GraphConfig, RelayError> {
        tracing::debug!("Attempting to read graph config from: {:?}", path);
        let content = read_to_string(path)?;
        let config: GraphConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Host, application and account must form valid Brls.
    pub fn validate(&self) -> Result<(), RelayError> {
        Brl::application(&self.host, &self.application)?;
        Brl::account(&self.host, &self.account)?;
        Ok(())
    }

    pub fn application_brl(&self) -> Brl {
        Brl {
            host: self.host.clone(),
            kind: crate::brl::BrlKind::Application,
            application: self.application.clone(),
            id: self.application.clone(),
        }
    }

    pub fn account_brl(&self) -> Brl {
        Brl {
            host: self.host.clone(),
            kind: crate::brl::BrlKind::Account,
            application: String::new(),
            id: self.account.clone(),
        }
    }
}
