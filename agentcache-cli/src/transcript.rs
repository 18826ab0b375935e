//! Replay transcripts
//!
//! Either a bare JSON list of queries, or an object with defaults and turns:
//!
//! ```json
//! {"provider": "openai", "model": "gpt-4o", "session": "s1",
//!  "turns": ["What is 2+2?", {"query": "Explain recursion", "sector": "education"}]}
//! ```

use agentcache_core::{EngineRequest, Sector};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_SESSION: &str = "replay";

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Turn {
    Query(String),
    Request {
        query: String,
        #[serde(default)]
        sector: Option<Sector>,
        #[serde(default)]
        session: Option<String>,
    },
}

impl Turn {
    pub fn query(&self) -> &str {
        match self {
            Turn::Query(query) => query,
            Turn::Request { query, .. } => query,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub sector: Sector,
    pub turns: Vec<Turn>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TranscriptFile {
    Plain(Vec<Turn>),
    Full(Transcript),
}

impl Transcript {
    pub fn parse(json: &str) -> Result<Self> {
        let file: TranscriptFile =
            serde_json::from_str(json).context("transcript is neither a list nor a turns object")?;
        Ok(match file {
            TranscriptFile::Plain(turns) => Transcript {
                provider: None,
                model: None,
                session: None,
                sector: Sector::General,
                turns,
            },
            TranscriptFile::Full(transcript) => transcript,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read transcript {}", path.display()))?;
        Self::parse(&json).with_context(|| format!("Invalid transcript {}", path.display()))
    }

    /// Requests in order; transcript fields fill in what a turn leaves out.
    /// Turns without any session id share [`DEFAULT_SESSION`].
    pub fn requests(&self, provider: &str, model: &str) -> Vec<EngineRequest> {
        let provider = self.provider.as_deref().unwrap_or(provider);
        let model = self.model.as_deref().unwrap_or(model);

        self.turns
            .iter()
            .map(|turn| {
                let (sector, session) = match turn {
                    Turn::Query(_) => (self.sector, self.session.clone()),
                    Turn::Request {
                        sector, session, ..
                    } => (
                        sector.unwrap_or(self.sector),
                        session.clone().or_else(|| self.session.clone()),
                    ),
                };
                EngineRequest::new(turn.query(), provider, model)
                    .with_sector(sector)
                    .with_session(session.unwrap_or_else(|| DEFAULT_SESSION.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_list() {
        let transcript = Transcript::parse(r#"["What is 2+2?", "What is 3+3?"]"#).unwrap();
        let requests = transcript.requests("openai", "gpt-4o");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].provider, "openai");
        assert_eq!(requests[0].session_id.as_deref(), Some(DEFAULT_SESSION));
    }

    #[test]
    fn test_full_object_with_overrides() {
        let transcript = Transcript::parse(
            r#"{"model": "gpt-4o-mini", "session": "s1", "sector": "finance",
                "turns": ["a question", {"query": "b question", "sector": "healthcare"}]}"#,
        )
        .unwrap();
        let requests = transcript.requests("openai", "gpt-4o");
        assert_eq!(requests[0].model, "gpt-4o-mini");
        assert_eq!(requests[0].sector, Sector::Finance);
        assert_eq!(requests[1].sector, Sector::Healthcare);
        assert_eq!(requests[1].session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(Transcript::parse(r#"{"not": "a transcript"}"#).is_err());
    }
}
