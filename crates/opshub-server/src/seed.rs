//! Initial catalogue written on first start.

use opshub_protocol::{paths, ItemId, UPVOTE_COUNT_FIELD, DOWNVOTE_COUNT_FIELD};
use opshub_store::DocumentStore;
use serde_json::{json, Value};

use crate::config::SeedItem;

/// Write `items` under `items_root` if the collection is empty.
/// Returns how many items were written.
pub async fn seed_items(
    store: &dyn DocumentStore,
    items_root: &str,
    items: &[SeedItem],
) -> anyhow::Result<usize> {
    if items.is_empty() {
        return Ok(0);
    }
    if store.read(items_root).await?.is_some() {
        tracing::debug!(root = %items_root, "Items already present, skipping seed");
        return Ok(0);
    }

    let now = chrono::Utc::now().timestamp_millis();
    for item in items {
        let id = match &item.id {
            Some(id) => ItemId::new(id.clone()),
            None => ItemId::generate(),
        };
        let path = paths::item_path(items_root, &id)?;
        store.write(&path, seed_document(item, now)).await?;
    }
    Ok(items.len())
}

fn seed_document(item: &SeedItem, created_at: i64) -> Value {
    let mut doc = json!({
        "title": item.title,
        "tags": item.tags,
        "createdAt": created_at,
    });
    if let Some(obj) = doc.as_object_mut() {
        if let Some(category) = &item.category {
            obj.insert("category".into(), json!(category));
        }
        obj.insert(UPVOTE_COUNT_FIELD.into(), json!(0));
        obj.insert(DOWNVOTE_COUNT_FIELD.into(), json!(0));
    }
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use opshub_store::MemoryStore;

    fn seed(id: Option<&str>, title: &str) -> SeedItem {
        SeedItem {
            id: id.map(String::from),
            title: title.into(),
            category: Some("rifles".into()),
            tags: vec!["ar".into()],
        }
    }

    #[tokio::test]
    async fn test_seeds_empty_store() {
        let store = MemoryStore::default();
        let n = seed_items(&store, "posts", &[seed(Some("ak"), "AK build"), seed(None, "M4")])
            .await
            .unwrap();
        assert_eq!(n, 2);
        let doc = store.get("posts/ak").unwrap().unwrap();
        assert_eq!(doc["title"], "AK build");
        assert_eq!(doc["category"], "rifles");
        assert_eq!(doc["upvoteCount"], 0);
        assert_eq!(doc["downvoteCount"], 0);
        assert!(doc["createdAt"].is_i64());
        assert_eq!(store.get("posts").unwrap().unwrap().as_object().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_skips_populated_store() {
        let store = MemoryStore::default();
        store.put("posts/existing", json!({"title": "kept"})).unwrap();
        let n = seed_items(&store, "posts", &[seed(Some("ak"), "AK build")]).await.unwrap();
        assert_eq!(n, 0);
        assert!(store.get("posts/ak").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_bad_seed_id() {
        let store = MemoryStore::default();
        assert!(seed_items(&store, "posts", &[seed(Some("a/b"), "x")]).await.is_err());
    }
}
