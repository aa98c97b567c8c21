use std::{path::Path, sync::Arc};

use crate::{
    inventory::KindInfo,
    pipeline::{PageScanner, ScanOptions},
    store::{Datastore, NAMESPACE_METADATA, StoreResult},
};

/// Page size for namespace listing.
pub const NAMESPACE_PAGE_SIZE: usize = 100;

/// List every named namespace of the project. The default namespace is skipped.
pub async fn list_namespaces(store: &Arc<dyn Datastore>) -> StoreResult<Vec<String>> {
    let metadata = KindInfo::new(NAMESPACE_METADATA);
    let mut scanner = PageScanner::new(
        store.clone(),
        "",
        &metadata,
        ScanOptions::keys(NAMESPACE_PAGE_SIZE),
    );

    let mut namespaces = Vec::new();
    while let Some(page) = scanner.next_page().await {
        namespaces.extend(
            page.into_iter()
                .filter_map(|entity| entity.key.name_str().map(str::to_string))
                .filter(|name| !name.is_empty()),
        );
        tracing::info!(listed = namespaces.len(), "Listing namespaces");
    }

    if let Some(e) = scanner.into_summary().error {
        return Err(e);
    }

    tracing::info!(total = namespaces.len(), "Listed namespaces");
    Ok(namespaces)
}

/// Keep namespaces containing `needle`, compared case-insensitively.
pub fn filter_containing(namespaces: Vec<String>, needle: &str) -> Vec<String> {
    let needle = needle.to_lowercase();
    namespaces
        .into_iter()
        .filter(|namespace| namespace.to_lowercase().contains(&needle))
        .collect()
}

/// Write one namespace per line.
pub async fn write_namespace_file(
    path: impl AsRef<Path>,
    namespaces: &[String],
) -> std::io::Result<()> {
    let mut contents = String::new();
    for namespace in namespaces {
        contents.push_str(namespace);
        contents.push('\n');
    }
    tokio::fs::write(path, contents).await
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::{Entity, Key, MemoryStore};

    #[tokio::test]
    async fn test_list_namespaces_pages_and_skips_default() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert(vec![Entity::new(Key::id("Config", "", 1))]).await;
        memory
            .insert((0..250).map(|i| Entity::new(Key::id("Person", format!("tenant-{i:03}"), 1))))
            .await;
        let store: Arc<dyn Datastore> = memory.clone();

        let namespaces = list_namespaces(&store).await.unwrap();
        assert_eq!(namespaces.len(), 250);
        assert_eq!(namespaces[0], "tenant-000");
        // 100 + 100 + 51 (default namespace included in the first page)
        assert_eq!(memory.stats().queries.get(""), Some(&3));
    }

    #[test]
    fn test_filter_containing_is_case_insensitive() {
        let namespaces = vec![
            "clinic.backup.2023".to_string(),
            "clinic".to_string(),
            "OLD_BACKUP".to_string(),
        ];
        assert_eq!(
            filter_containing(namespaces, "backup"),
            vec!["clinic.backup.2023".to_string(), "OLD_BACKUP".to_string()]
        );
    }

    #[tokio::test]
    async fn test_write_namespace_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("todos.txt");

        write_namespace_file(&path, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
    }
}
