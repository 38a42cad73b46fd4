//! Unit tests for the document store.

use rstest::{fixture, rstest};

use super::*;
use crate::fault::Fault;
use crate::model::Network;

#[fixture]
fn documents() -> DocumentStore<MemoryStore> {
    DocumentStore::new(MemoryStore::new(), ".json")
}

#[rstest]
#[tokio::test]
async fn saved_documents_are_keyed_by_prefix_and_extension(
    documents: DocumentStore<MemoryStore>,
) {
    let network = Network::new("staging");
    documents.save(&network).await.expect("save");

    let key = format!("networks/{}.json", network.id);
    assert_eq!(documents.key_for::<Network>(&network.id), key);
    let raw = documents.inner().get(&key).await.expect("get");
    assert!(raw.is_some());

    let loaded: Network = documents.load(&network.id).await.expect("load");
    assert_eq!(loaded.name, "staging");
}

#[rstest]
#[tokio::test]
async fn loading_a_missing_document_is_not_found(documents: DocumentStore<MemoryStore>) {
    let err = documents
        .load::<Network>("absent")
        .await
        .expect_err("missing document should fail");
    assert_eq!(err.code(), "resource_not_found");
    assert_eq!(err.entity_id(), "absent");
}

#[rstest]
#[tokio::test]
async fn undecodable_documents_surface_store_faults(documents: DocumentStore<MemoryStore>) {
    documents
        .inner()
        .put("networks/broken.json", b"{not json".to_vec())
        .await
        .expect("seed");

    let err = documents
        .load::<Network>("broken")
        .await
        .expect_err("broken document should fail");
    assert!(matches!(err, Fault::Store { .. }), "unexpected fault {err:?}");
}

#[rstest]
#[tokio::test]
async fn list_ids_ignores_foreign_keys(documents: DocumentStore<MemoryStore>) {
    let store = documents.inner();
    for key in [
        "networks/b.json",
        "networks/a.json",
        "networks/notes.txt",
        "hosts/c.json",
        "networks/nested/d.json",
    ] {
        store.put(key, b"{}".to_vec()).await.expect("seed");
    }

    let ids = documents.list_ids::<Network>().await.expect("list");
    assert_eq!(ids, vec![String::from("a"), String::from("b")]);
}

#[rstest]
#[tokio::test]
async fn removing_is_idempotent(documents: DocumentStore<MemoryStore>) {
    let network = Network::new("staging");
    documents.save(&network).await.expect("save");

    documents.remove::<Network>(&network.id).await.expect("remove");
    documents
        .remove::<Network>(&network.id)
        .await
        .expect("second remove");
    assert!(documents.inner().is_empty().await);
}
