use std::collections::HashMap;

use super::models::RemoteStatus;

/// Vendor status code to local status mapping.
#[derive(Debug, Clone)]
pub struct StatusTable {
    codes: HashMap<String, RemoteStatus>,
}

impl StatusTable {
    pub fn new(codes: HashMap<String, RemoteStatus>) -> Self {
        Self { codes }
    }

    /// Parse a JSON object such as `{"10": "Created", "30": "Complete"}`.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let codes: HashMap<String, RemoteStatus> = serde_json::from_str(raw)?;
        Ok(Self::new(
            codes
                .into_iter()
                .map(|(k, v)| (k.trim().to_string(), v))
                .collect(),
        ))
    }

    pub fn map(&self, raw: &str) -> Option<RemoteStatus> {
        self.codes.get(raw.trim()).copied()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        let codes = [
            ("10", RemoteStatus::Created),
            ("20", RemoteStatus::Executing),
            ("25", RemoteStatus::Waiting),
            ("28", RemoteStatus::Cancelling),
            ("30", RemoteStatus::Complete),
            ("31", RemoteStatus::Cancelled),
            ("35", RemoteStatus::ManualComplete),
            ("50", RemoteStatus::Warning),
            ("60", RemoteStatus::StartupError),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self { codes }
    }
}
