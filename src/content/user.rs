//! Users and their profile document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub is_admin: bool,
    pub data: UserData,
    pub created_at: DateTime<Utc>,
}

/// Profile data used to personalise the conversation system prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserData {
    pub bio: String,
    pub urls: Vec<UrlEntry>,
}

/// A profile link. Older profiles stored bare strings or `{value}` objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "UrlDocument")]
pub struct UrlEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UrlDocument {
    Plain(String),
    Described {
        url: String,
        #[serde(default)]
        description: Option<String>,
    },
    Value {
        value: String,
    },
}

impl From<UrlDocument> for UrlEntry {
    fn from(doc: UrlDocument) -> Self {
        let (url, description) = match doc {
            UrlDocument::Plain(url) | UrlDocument::Value { value: url } => (url, None),
            UrlDocument::Described { url, description } => (url, description),
        };
        UrlEntry {
            url: url.trim().to_string(),
            description: description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }
}

impl UrlEntry {
    fn display(&self) -> String {
        match &self.description {
            Some(description) => format!("{} ({})", description, self.url),
            None => self.url.clone(),
        }
    }
}

impl UserData {
    /// Comma-separated `description (url)` list.
    pub fn urls_text(&self) -> String {
        self.urls
            .iter()
            .filter(|u| !u.url.is_empty())
            .map(UrlEntry::display)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Template context `{bio, urls}` for system-prompt personalisation.
    pub fn personalization(&self) -> serde_json::Value {
        serde_json::json!({
            "bio": self.bio,
            "urls": self.urls_text(),
        })
    }
}
