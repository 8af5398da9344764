//! Ollama model discovery.
//!
//! Queries `/api/tags` for the locally downloaded models and splits them into
//! chat and embedding candidates so the wizard can suggest sensible defaults.

use serde::Deserialize;

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

impl OllamaModel {
    /// Name-based guess: Ollama does not tag embedding models explicitly.
    pub fn is_embedding_model(&self) -> bool {
        let name = self.name.to_ascii_lowercase();
        name.contains("embed") || name.starts_with("bge") || name.contains("minilm")
    }

    /// Whether this entry is `model`, with or without the `:latest` tag.
    pub fn matches(&self, model: &str) -> bool {
        self.name == model || self.name.strip_suffix(":latest") == Some(model)
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

/// Ping the Ollama server and return the list of available models.
pub fn fetch_models(base_url: &str) -> Result<Vec<OllamaModel>, String> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = reqwest::blocking::get(&url)
        .map_err(|e| format!("Ollama unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }

    let tags: TagsResponse = response
        .json()
        .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;
    Ok(tags.models)
}

/// `preferred` if it is installed, otherwise the first installed model of the
/// wanted kind.
pub fn pick_model(models: &[OllamaModel], preferred: &str, embedding: bool) -> Option<String> {
    if models.iter().any(|m| m.matches(preferred)) {
        return Some(preferred.to_string());
    }
    models
        .iter()
        .find(|m| m.is_embedding_model() == embedding)
        .map(|m| m.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(names: &[&str]) -> Vec<OllamaModel> {
        names
            .iter()
            .map(|n| OllamaModel {
                name: n.to_string(),
                size: 0,
            })
            .collect()
    }

    #[test]
    fn tags_response_parses() {
        let tags: TagsResponse = serde_json::from_str(
            r#"{"models":[{"name":"llama3:latest","size":4661224676,"digest":"abc"}]}"#,
        )
        .unwrap();
        assert_eq!(tags.models.len(), 1);
        assert!(tags.models[0].matches("llama3"));
    }

    #[test]
    fn embedding_models_are_recognised() {
        let m = models(&["nomic-embed-text:latest", "bge-m3", "llama3:latest"]);
        assert!(m[0].is_embedding_model());
        assert!(m[1].is_embedding_model());
        assert!(!m[2].is_embedding_model());
    }

    #[test]
    fn pick_model_prefers_installed_default() {
        let m = models(&["mistral:latest", "llama3:latest", "nomic-embed-text:latest"]);
        assert_eq!(pick_model(&m, "llama3", false).as_deref(), Some("llama3"));
        assert_eq!(
            pick_model(&m, "nomic-embed-text", true).as_deref(),
            Some("nomic-embed-text")
        );
    }

    #[test]
    fn pick_model_falls_back_to_first_of_kind() {
        let m = models(&["mxbai-embed-large", "qwen2:7b"]);
        assert_eq!(pick_model(&m, "llama3", false).as_deref(), Some("qwen2:7b"));
        assert_eq!(
            pick_model(&m, "nomic-embed-text", true).as_deref(),
            Some("mxbai-embed-large")
        );
        assert_eq!(pick_model(&[], "llama3", false), None);
    }

    #[test]
    fn unreachable_server_is_an_error() {
        assert!(fetch_models("http://127.0.0.1:1").is_err());
    }
}
