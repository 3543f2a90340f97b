//! In-memory credential backend

use super::CredentialBackend;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Process-local backend; contents are lost on exit
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialBackend for MemoryBackend {
    async fn load(&self, service_name: &str) -> Result<Option<String>> {
        Ok(self.entries.get(service_name).map(|e| e.value().clone()))
    }

    async fn save(&self, service_name: &str, payload: &str) -> Result<()> {
        self.entries
            .insert(service_name.to_string(), payload.to_string());
        Ok(())
    }

    async fn remove(&self, service_name: &str) -> Result<()> {
        self.entries.remove(service_name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = MemoryBackend::new();
        assert!(backend.load("files").await.unwrap().is_none());

        backend.save("files", "payload-1").await.unwrap();
        backend.save("calendar", "payload-2").await.unwrap();
        backend.save("files", "payload-3").await.unwrap();

        assert_eq!(
            backend.load("files").await.unwrap().as_deref(),
            Some("payload-3")
        );
        assert_eq!(backend.list().await.unwrap(), vec!["calendar", "files"]);

        backend.remove("files").await.unwrap();
        backend.remove("files").await.unwrap();
        assert_eq!(backend.len(), 1);
    }
}
