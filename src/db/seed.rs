use super::Store;
use crate::config::Config;
use crate::error::SyncResult;

struct SeedConfig<'a> {
    key: &'a str,
    value: &'a str,
    public: bool,
    description: &'a str,
    /// Mirrors the running process and is rewritten on every start.
    runtime: bool,
}

pub async fn seed_all(store: &dyn Store, config: &Config) -> SyncResult<()> {
    let scoring = if config.scoring_enabled() { "true" } else { "false" };
    let entries = vec![
        SeedConfig {
            key: "max_cv_size_mb",
            value: "5",
            public: true,
            description: "Largest CV upload accepted by clients",
            runtime: false,
        },
        SeedConfig {
            key: "default_session_minutes",
            value: "30",
            public: true,
            description: "Duration preselected when creating a session",
            runtime: false,
        },
        SeedConfig {
            key: "scoring_enabled",
            value: scoring,
            public: true,
            description: "Whether sessions receive automatic scores",
            runtime: true,
        },
        SeedConfig {
            key: "scoring_model",
            value: &config.scoring_model,
            public: false,
            description: "Chat model used to score transcripts",
            runtime: true,
        },
    ];

    for entry in &entries {
        if entry.runtime {
            store
                .put_config(entry.key, entry.value, entry.public, entry.description)
                .await?;
        } else {
            store
                .seed_config(entry.key, entry.value, entry.public, entry.description)
                .await?;
        }
    }
    tracing::info!("Seeded {} app_config keys", entries.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::db::MemoryStore;

    fn value_of(entries: &[crate::domain::models::AppConfigEntry], key: &str) -> Option<String> {
        entries
            .iter()
            .find(|e| e.key_name == key)
            .map(|e| e.key_value.clone())
    }

    #[tokio::test]
    async fn test_runtime_keys_follow_restart_config() {
        let store = MemoryStore::new();
        let mut config = test_config();
        seed_all(&store, &config).await.unwrap();
        assert_eq!(
            value_of(&store.list_config(true).await.unwrap(), "scoring_enabled").as_deref(),
            Some("false")
        );

        config.openai_api_key = Some("sk-test".to_string());
        config.scoring_model = "gpt-4o".to_string();
        seed_all(&store, &config).await.unwrap();

        let public = store.list_config(true).await.unwrap();
        assert_eq!(public.len(), 3);
        assert_eq!(value_of(&public, "scoring_enabled").as_deref(), Some("true"));
        assert!(public.iter().all(|e| e.key_name != "scoring_model"));

        let all = store.list_config(false).await.unwrap();
        assert_eq!(value_of(&all, "scoring_model").as_deref(), Some("gpt-4o"));
    }

    #[tokio::test]
    async fn test_operator_keys_are_not_overwritten() {
        let store = MemoryStore::new();
        store
            .seed_config("max_cv_size_mb", "20", true, "raised by operator")
            .await
            .unwrap();
        seed_all(&store, &test_config()).await.unwrap();

        let public = store.list_config(true).await.unwrap();
        assert_eq!(value_of(&public, "max_cv_size_mb").as_deref(), Some("20"));
    }
}
